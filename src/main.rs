// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `settlement-cli` - read-only operator commands against the configured
//! chains.
//!
//! ```text
//! settlement-cli balance    <chain> <network> <currency> <address>
//! settlement-cli validate   <chain> <address>
//! settlement-cli payments   <chain> <network> <address> [min-confirmations]
//! settlement-cli currencies <chain>
//! settlement-cli networks
//! ```

use std::process::ExitCode;

use chain_settlement::chain::DEFAULT_MIN_CONFIRMATIONS;
use chain_settlement::logging::{init_tracing, LogFormat};
use chain_settlement::{units, ChainRegistry, ChainType, SettlementConfig, SettlementError};

const USAGE: &str = "usage:
  settlement-cli balance    <chain> <network> <currency> <address>
  settlement-cli validate   <chain> <address>
  settlement-cli payments   <chain> <network> <address> [min-confirmations]
  settlement-cli currencies <chain>
  settlement-cli networks";

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; the process environment still applies
    let _ = dotenvy::dotenv();
    init_tracing(LogFormat::from_env());

    let config = SettlementConfig::from_env();
    let registry = ChainRegistry::from_config(&config);
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(&config, &registry, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage) => {
            eprintln!("{USAGE}");
            ExitCode::from(2)
        }
        Err(CliError::Settlement(e)) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

enum CliError {
    Usage,
    Settlement(SettlementError),
}

impl From<SettlementError> for CliError {
    fn from(e: SettlementError) -> Self {
        CliError::Settlement(e)
    }
}

async fn run(
    config: &SettlementConfig,
    registry: &ChainRegistry,
    args: &[String],
) -> Result<(), CliError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["balance", chain, network, symbol, address] => {
            let engine = registry.get(chain.parse::<ChainType>()?)?;
            let balance = engine.get_balance(network, symbol, address).await?;
            match engine.currency_decimals(network, symbol).await {
                Ok(decimals) => println!(
                    "{balance} ({} {symbol})",
                    units::format_amount(balance, decimals)
                ),
                Err(e) => {
                    tracing::debug!(error = %e, "No decimals for currency");
                    println!("{balance}");
                }
            }
        }
        ["validate", chain, address] => {
            let engine = registry.get(chain.parse::<ChainType>()?)?;
            let valid = engine.validate_address_format(address);
            println!("{}", if valid { "valid" } else { "invalid" });
        }
        ["payments", chain, network, address, rest @ ..] if rest.len() <= 1 => {
            let min_confirmations = match rest.first() {
                Some(raw) => raw.parse().map_err(|_| CliError::Usage)?,
                None => DEFAULT_MIN_CONFIRMATIONS,
            };
            let engine = registry.get(chain.parse::<ChainType>()?)?;
            for payment in engine
                .get_payment_transactions(network, address, min_confirmations)
                .await
            {
                println!("{}\t{}", payment.id, payment.value);
            }
        }
        ["currencies", chain] => {
            let engine = registry.get(chain.parse::<ChainType>()?)?;
            println!("{}", engine.accepted_currencies().join(","));
        }
        ["networks"] => {
            let mut ids: Vec<&String> = config.evm.https_rpc_urls.keys().collect();
            ids.sort();
            for id in ids {
                let transports = if config.evm.wss_rpc_url(id).is_ok() {
                    "https,wss"
                } else {
                    "https"
                };
                println!("evm\t{id}\t{transports}");
            }
            for id in ["mainnet", "testnet"] {
                if config.is_valid_network_id(ChainType::Bitcoin, id) {
                    println!("bitcoin\t{id}\tesplora,blockcypher");
                }
            }
        }
        _ => return Err(CliError::Usage),
    }
    Ok(())
}

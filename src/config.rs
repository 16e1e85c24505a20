// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults and the [`SettlementConfig`] value
//! that engines are constructed from. Configuration is read once by the
//! binary; library code and tests receive it as plain data.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `EVM_HTTPS_RPC_URL_<NETWORK>` | HTTPS JSON-RPC endpoint per EVM network id | none (network unsupported) |
//! | `EVM_WSS_RPC_URL_<NETWORK>` | WebSocket endpoint per EVM network id | none |
//! | `TRANSFER_MAX_ATTEMPTS` | Gas escalation attempts | `5` |
//! | `TRANSFER_INITIAL_GAS_MULTIPLIER` | First-attempt gas multiplier | `1.2` |
//! | `TRANSFER_GAS_INCREMENT_PERCENT` | Added per retry, in percent | `20` |
//! | `TRANSFER_RETRY_DELAY_MS` | Delay between attempts | `1000` |
//! | `CONTRACT_CALL_TIMEOUT_MS` | Timeout for each EVM call, submit and receipt wait | `15000` |
//! | `CONTRACT_CALL_RETRIES` | Retries for idempotent EVM reads | `2` |
//! | `ETHERSCAN_API_KEY` | Explorer API key for EVM payment history | empty |
//! | `EVM_EXPLORER_URL_<NETWORK>` | Etherscan-compatible API base per EVM network id | built-in per network |
//! | `BITCOIN_ESPLORA_URLS_<NET>` | Comma-separated Esplora-style endpoints | mempool.space, blockstream.info |
//! | `BITCOIN_BLOCKCYPHER_URL_<NET>` | BlockCypher endpoint | api.blockcypher.com |
//! | `BITCOIN_FEE_RATE_<NET>` | Fee rate in sat/byte | mainnet `5`, testnet `3` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |
//!
//! `<NET>` is `MAINNET` or `TESTNET`.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::SettlementError;
use crate::models::ChainType;

pub const EVM_HTTPS_RPC_URL_PREFIX: &str = "EVM_HTTPS_RPC_URL_";
pub const EVM_WSS_RPC_URL_PREFIX: &str = "EVM_WSS_RPC_URL_";
pub const TRANSFER_MAX_ATTEMPTS_ENV: &str = "TRANSFER_MAX_ATTEMPTS";
pub const TRANSFER_INITIAL_GAS_MULTIPLIER_ENV: &str = "TRANSFER_INITIAL_GAS_MULTIPLIER";
pub const TRANSFER_GAS_INCREMENT_PERCENT_ENV: &str = "TRANSFER_GAS_INCREMENT_PERCENT";
pub const TRANSFER_RETRY_DELAY_MS_ENV: &str = "TRANSFER_RETRY_DELAY_MS";
pub const CONTRACT_CALL_TIMEOUT_MS_ENV: &str = "CONTRACT_CALL_TIMEOUT_MS";
pub const CONTRACT_CALL_RETRIES_ENV: &str = "CONTRACT_CALL_RETRIES";
pub const ETHERSCAN_API_KEY_ENV: &str = "ETHERSCAN_API_KEY";
pub const EVM_EXPLORER_URL_PREFIX: &str = "EVM_EXPLORER_URL_";

/// Environment variable selecting the log formatter.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_GAS_MULTIPLIER: f64 = 1.2;
const DEFAULT_GAS_INCREMENT_PERCENT: u64 = 20;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_CALL_RETRIES: u32 = 2;

const BITCOIN_BALANCE_TIMEOUT: Duration = Duration::from_secs(8);
const BITCOIN_HISTORY_TIMEOUT: Duration = Duration::from_secs(20);
const BITCOIN_BROADCAST_TIMEOUT: Duration = Duration::from_secs(20);

// =============================================================================
// EVM
// =============================================================================

/// Gas escalation tuning shared by max transfers and native refunds.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferTuning {
    pub max_attempts: u32,
    pub initial_gas_multiplier: f64,
    pub gas_increment_percent: u64,
    pub retry_delay: Duration,
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_gas_multiplier: DEFAULT_INITIAL_GAS_MULTIPLIER,
            gas_increment_percent: DEFAULT_GAS_INCREMENT_PERCENT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvmConfig {
    /// HTTPS RPC endpoint keyed by network id (e.g. `"11155111"`)
    pub https_rpc_urls: HashMap<String, Url>,
    /// WebSocket RPC endpoint keyed by network id
    pub wss_rpc_urls: HashMap<String, Url>,
    pub transfer: TransferTuning,
    pub call_timeout: Duration,
    pub call_retries: u32,
    pub etherscan_api_key: Option<String>,
    /// Explorer API base overrides keyed by network id
    pub explorer_base_urls: HashMap<String, String>,
}

impl Default for EvmConfig {
    fn default() -> Self {
        Self {
            https_rpc_urls: HashMap::new(),
            wss_rpc_urls: HashMap::new(),
            transfer: TransferTuning::default(),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            call_retries: DEFAULT_CALL_RETRIES,
            etherscan_api_key: None,
            explorer_base_urls: HashMap::new(),
        }
    }
}

impl EvmConfig {
    /// HTTPS RPC endpoint for `network_id`, or `UnsupportedNetwork`.
    pub fn https_rpc_url(&self, network_id: &str) -> Result<&Url, SettlementError> {
        self.https_rpc_urls
            .get(&normalize_network_id(network_id))
            .ok_or_else(|| {
                SettlementError::UnsupportedNetwork(format!(
                    "no HTTPS RPC configured for network {network_id}"
                ))
            })
    }

    /// WebSocket RPC endpoint for `network_id`, or `UnsupportedNetwork`.
    pub fn wss_rpc_url(&self, network_id: &str) -> Result<&Url, SettlementError> {
        self.wss_rpc_urls
            .get(&normalize_network_id(network_id))
            .ok_or_else(|| {
                SettlementError::UnsupportedNetwork(format!(
                    "no WSS RPC configured for network {network_id}"
                ))
            })
    }
}

// =============================================================================
// Bitcoin
// =============================================================================

/// Read/broadcast endpoints and fee rate for one Bitcoin network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoinNetworkConfig {
    /// Esplora-compatible API roots, tried in order
    pub esplora_urls: Vec<String>,
    /// BlockCypher API root, tried after every Esplora endpoint
    pub blockcypher_url: Option<String>,
    pub fee_rate_sat_per_byte: u64,
}

impl BitcoinNetworkConfig {
    pub fn mainnet_defaults() -> Self {
        Self {
            esplora_urls: vec![
                "https://mempool.space/api".to_string(),
                "https://blockstream.info/api".to_string(),
            ],
            blockcypher_url: Some("https://api.blockcypher.com/v1/btc/main".to_string()),
            fee_rate_sat_per_byte: 5,
        }
    }

    pub fn testnet_defaults() -> Self {
        Self {
            esplora_urls: vec![
                "https://mempool.space/testnet/api".to_string(),
                "https://blockstream.info/testnet/api".to_string(),
            ],
            blockcypher_url: Some("https://api.blockcypher.com/v1/btc/test3".to_string()),
            fee_rate_sat_per_byte: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BitcoinConfig {
    pub mainnet: BitcoinNetworkConfig,
    pub testnet: BitcoinNetworkConfig,
    pub balance_timeout: Duration,
    pub history_timeout: Duration,
    pub broadcast_timeout: Duration,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            mainnet: BitcoinNetworkConfig::mainnet_defaults(),
            testnet: BitcoinNetworkConfig::testnet_defaults(),
            balance_timeout: BITCOIN_BALANCE_TIMEOUT,
            history_timeout: BITCOIN_HISTORY_TIMEOUT,
            broadcast_timeout: BITCOIN_BROADCAST_TIMEOUT,
        }
    }
}

// =============================================================================
// Settlement Config
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct SettlementConfig {
    pub evm: EvmConfig,
    pub bitcoin: BitcoinConfig,
}

impl SettlementConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k, v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();

        let evm = EvmConfig {
            https_rpc_urls: collect_urls(&vars, EVM_HTTPS_RPC_URL_PREFIX),
            wss_rpc_urls: collect_urls(&vars, EVM_WSS_RPC_URL_PREFIX),
            transfer: TransferTuning {
                max_attempts: parse_or(&vars, TRANSFER_MAX_ATTEMPTS_ENV, DEFAULT_MAX_ATTEMPTS)
                    .max(1),
                initial_gas_multiplier: parse_or(
                    &vars,
                    TRANSFER_INITIAL_GAS_MULTIPLIER_ENV,
                    DEFAULT_INITIAL_GAS_MULTIPLIER,
                ),
                gas_increment_percent: parse_or(
                    &vars,
                    TRANSFER_GAS_INCREMENT_PERCENT_ENV,
                    DEFAULT_GAS_INCREMENT_PERCENT,
                ),
                retry_delay: Duration::from_millis(parse_or(
                    &vars,
                    TRANSFER_RETRY_DELAY_MS_ENV,
                    DEFAULT_RETRY_DELAY_MS,
                )),
            },
            call_timeout: Duration::from_millis(parse_or(
                &vars,
                CONTRACT_CALL_TIMEOUT_MS_ENV,
                DEFAULT_CALL_TIMEOUT_MS,
            )),
            call_retries: parse_or(&vars, CONTRACT_CALL_RETRIES_ENV, DEFAULT_CALL_RETRIES),
            etherscan_api_key: vars.get(ETHERSCAN_API_KEY_ENV).cloned(),
            explorer_base_urls: collect_urls(&vars, EVM_EXPLORER_URL_PREFIX)
                .into_iter()
                .map(|(network, url)| (network, url.as_str().trim_end_matches('/').to_string()))
                .collect(),
        };

        let bitcoin = BitcoinConfig {
            mainnet: bitcoin_network(&vars, "MAINNET", BitcoinNetworkConfig::mainnet_defaults()),
            testnet: bitcoin_network(&vars, "TESTNET", BitcoinNetworkConfig::testnet_defaults()),
            ..BitcoinConfig::default()
        };

        Self { evm, bitcoin }
    }

    /// Whether `network_id` names a network this deployment can serve.
    pub fn is_valid_network_id(&self, chain_type: ChainType, network_id: &str) -> bool {
        let id = network_id.trim().to_ascii_lowercase();
        match chain_type {
            ChainType::Evm => self.evm.https_rpc_urls.contains_key(&id),
            ChainType::Bitcoin => matches!(id.as_str(), "mainnet" | "testnet"),
            ChainType::Solana => matches!(id.as_str(), "mainnet-beta" | "testnet" | "devnet"),
            ChainType::Unknown => false,
        }
    }
}

fn normalize_network_id(network_id: &str) -> String {
    network_id.trim().to_ascii_lowercase()
}

fn collect_urls(vars: &HashMap<String, String>, prefix: &str) -> HashMap<String, Url> {
    vars.iter()
        .filter_map(|(key, value)| {
            let network = key.strip_prefix(prefix)?;
            match Url::parse(value) {
                Ok(url) => Some((normalize_network_id(network), url)),
                Err(e) => {
                    tracing::warn!(variable = %key, error = %e, "Ignoring malformed URL");
                    None
                }
            }
        })
        .collect()
}

fn bitcoin_network(
    vars: &HashMap<String, String>,
    suffix: &str,
    defaults: BitcoinNetworkConfig,
) -> BitcoinNetworkConfig {
    let esplora_urls = vars
        .get(&format!("BITCOIN_ESPLORA_URLS_{suffix}"))
        .map(|list| {
            list.split(',')
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|urls| !urls.is_empty())
        .unwrap_or(defaults.esplora_urls);
    let blockcypher_url = vars
        .get(&format!("BITCOIN_BLOCKCYPHER_URL_{suffix}"))
        .map(|u| u.trim_end_matches('/').to_string())
        .or(defaults.blockcypher_url);
    let fee_rate_sat_per_byte = parse_or(
        vars,
        &format!("BITCOIN_FEE_RATE_{suffix}"),
        defaults.fee_rate_sat_per_byte,
    );

    BitcoinNetworkConfig {
        esplora_urls,
        blockcypher_url,
        fee_rate_sat_per_byte,
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match vars.get(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(variable = %name, value = %raw, default = %default, "Unparseable setting, using default");
            default
        }),
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # UTXO Settlement Engine
//!
//! Bitcoin implementation of [`ChainSettlement`]. Network ids are `mainnet`
//! (alias `bitcoin`) and `testnet`.
//!
//! Reads fall back across explorer providers and degrade to zero / empty.
//! Transfers pool UTXOs from the legacy, native segwit and nested segwit
//! addresses of the source WIF key, select coins, sign and broadcast.
//! Refunds are not supported on this chain family.
//!
//! The only currency is `btc`. The empty string is accepted as an alias
//! wherever a currency argument is taken.

pub mod address;
pub mod explorer;
pub mod keys;
pub mod selection;
pub mod transaction;

use std::collections::HashMap;

use alloy::primitives::U256;
use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::Network;
use reqwest::Client;

use crate::chain::ChainSettlement;
use crate::config::{BitcoinConfig, BitcoinNetworkConfig};
use crate::currency::BTC_PRECISION;
use crate::error::SettlementError;
use crate::models::{ChainType, PaymentTransaction, TransferAmount};
use crate::units;

use explorer::BitcoinExplorer;
use keys::{AddressKind, SourceKeys};
use selection::{FeeModel, Utxo};

const ACCEPTED_CURRENCIES: &[&str] = &["btc"];

pub struct BitcoinSettlement {
    config: BitcoinConfig,
    http: Client,
}

impl BitcoinSettlement {
    pub fn new(config: BitcoinConfig) -> Self {
        Self {
            config,
            http: BitcoinExplorer::http_client(),
        }
    }

    fn network_config(&self, network: Network) -> &BitcoinNetworkConfig {
        match network {
            Network::Bitcoin => &self.config.mainnet,
            _ => &self.config.testnet,
        }
    }

    fn explorer(&self, network_id: &str) -> Result<(Network, BitcoinExplorer), SettlementError> {
        let network = address::parse_network(network_id)?;
        let explorer = BitcoinExplorer::new(
            self.http.clone(),
            self.network_config(network).clone(),
            &self.config,
        );
        Ok((network, explorer))
    }

    /// UTXOs of every address the key controls. Fails only if every lookup
    /// failed.
    async fn pooled_utxos(
        &self,
        explorer: &BitcoinExplorer,
        keys: &SourceKeys,
    ) -> Result<Vec<Utxo>, SettlementError> {
        let mut pooled = Vec::new();
        let mut last_error = None;
        let mut any_succeeded = false;

        for (kind, address) in keys.addresses() {
            let address = address.to_string();
            match explorer.utxos(&address).await {
                Ok(found) => {
                    any_succeeded = true;
                    tracing::debug!(address = %address, kind = kind.as_str(), count = found.len(), "UTXOs found");
                    pooled.extend(found.into_iter().map(|u| Utxo {
                        txid: u.txid,
                        vout: u.vout,
                        value: u.value,
                        kind,
                        address: address.clone(),
                    }));
                }
                Err(e) => {
                    tracing::warn!(address = %address, kind = kind.as_str(), error = %e, "UTXO lookup failed");
                    last_error = Some(e);
                }
            }
        }

        match (any_succeeded, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(pooled),
        }
    }

    async fn prior_transactions(
        &self,
        explorer: &BitcoinExplorer,
        inputs: &[Utxo],
    ) -> Result<HashMap<bitcoin::Txid, bitcoin::Transaction>, SettlementError> {
        let mut priors = HashMap::new();
        for utxo in inputs.iter().filter(|u| u.kind == AddressKind::Legacy) {
            if !priors.contains_key(&utxo.txid) {
                let tx = explorer.raw_transaction(utxo.txid).await?;
                priors.insert(utxo.txid, tx);
            }
        }
        Ok(priors)
    }
}

fn check_currency(currency: &str) -> Result<(), SettlementError> {
    let currency = currency.trim();
    if currency.is_empty() || currency.eq_ignore_ascii_case("btc") {
        Ok(())
    } else {
        Err(SettlementError::UnknownCurrency(format!("{currency} on bitcoin")))
    }
}

#[async_trait]
impl ChainSettlement for BitcoinSettlement {
    fn chain_type(&self) -> ChainType {
        ChainType::Bitcoin
    }

    async fn get_balance(
        &self,
        network_id: &str,
        currency: &str,
        address: &str,
    ) -> Result<U256, SettlementError> {
        check_currency(currency)?;
        let (_, explorer) = self.explorer(network_id)?;
        if !address::is_valid_address(address) {
            tracing::warn!(address = %address, "Invalid Bitcoin address, reporting zero balance");
            return Ok(U256::ZERO);
        }
        Ok(U256::from(explorer.balance(address).await))
    }

    fn accepted_currencies(&self) -> &'static [&'static str] {
        ACCEPTED_CURRENCIES
    }

    async fn currency_decimals(
        &self,
        network_id: &str,
        currency: &str,
    ) -> Result<u8, SettlementError> {
        check_currency(currency)?;
        address::parse_network(network_id)?;
        Ok(BTC_PRECISION)
    }

    fn validate_address_format(&self, address: &str) -> bool {
        address::is_valid_address(address)
    }

    async fn get_payment_transactions(
        &self,
        network_id: &str,
        address: &str,
        min_confirmations: u64,
    ) -> Vec<PaymentTransaction> {
        let explorer = match self.explorer(network_id) {
            Ok((_, explorer)) => explorer,
            Err(e) => {
                tracing::warn!(network = %network_id, error = %e, "Cannot query payments");
                return Vec::new();
            }
        };
        if !address::is_valid_address(address) {
            tracing::warn!(address = %address, "Invalid Bitcoin address, no payments");
            return Vec::new();
        }
        explorer.payment_transactions(address, min_confirmations).await
    }

    async fn transfer(
        &self,
        network_id: &str,
        currency: &str,
        amount: &TransferAmount,
        source_secret: &str,
        destination: &str,
    ) -> Result<String, SettlementError> {
        check_currency(currency)?;
        let (network, explorer) = self.explorer(network_id)?;
        if !address::is_valid_address(destination) {
            return Err(SettlementError::InvalidAddress(destination.to_string()));
        }
        let destination = address::parse_address(destination, network)?;
        let keys = SourceKeys::from_wif(source_secret, network)?;

        let utxos = self.pooled_utxos(&explorer, &keys).await?;
        if utxos.is_empty() {
            return Err(SettlementError::InsufficientFunds(
                "no UTXOs found for any address of the source key".to_string(),
            ));
        }

        let fees = FeeModel::new(explorer.fee_rate());
        let fee_for = |inputs: &[Utxo], outputs: usize| fees.fee(inputs, outputs);
        let selection = match amount {
            TransferAmount::Max => selection::select_max(&utxos, fee_for)?,
            TransferAmount::Exact(raw) => {
                let sats = units::parse_amount(raw, BTC_PRECISION)?;
                let sats = u64::try_from(sats)
                    .map_err(|_| SettlementError::InvalidAmount(format!("{raw} BTC is out of range")))?;
                selection::select_coins(&utxos, sats, fee_for)?
            }
        };
        tracing::info!(
            network = %network_id,
            inputs = selection.inputs.len(),
            amount = selection.amount,
            fee = selection.fee,
            change = selection.change,
            "Coins selected"
        );

        let priors = self.prior_transactions(&explorer, &selection.inputs).await?;
        let tx = transaction::build_signed_transaction(&keys, &selection, &destination, &priors)?;
        let txid = tx.compute_txid();

        let reported = explorer.broadcast(&serialize_hex(&tx), txid).await?;
        if reported != txid.to_string() {
            tracing::warn!(txid = %txid, reported = %reported, "Explorer reported a different txid");
        }
        tracing::info!(network = %network_id, txid = %txid, "Bitcoin transfer broadcast");
        Ok(txid.to_string())
    }

    async fn send_refund(
        &self,
        _network_id: &str,
        _source_secret: &str,
        _destination: &str,
        _currency: &str,
        _amount: U256,
    ) -> Result<String, SettlementError> {
        Err(SettlementError::UnsupportedOperation(
            "refunds are not supported on bitcoin".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::utxo::keys::tests::wif_for_one;

    const DESTINATION: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

    fn engine_with(esplora: Vec<String>) -> BitcoinSettlement {
        let mut config = BitcoinConfig::default();
        config.mainnet = BitcoinNetworkConfig {
            esplora_urls: esplora,
            blockcypher_url: None,
            fee_rate_sat_per_byte: 1,
        };
        BitcoinSettlement::new(config)
    }

    #[test]
    fn engine_surface() {
        let btc = engine_with(vec![]);
        assert_eq!(btc.chain_type(), ChainType::Bitcoin);
        assert_eq!(btc.accepted_currencies(), &["btc"]);
        assert!(btc.validate_address_format(DESTINATION));
        assert!(!btc.validate_address_format("0x2222222222222222222222222222222222222222"));
    }

    #[tokio::test]
    async fn refunds_are_unsupported() {
        let result = engine_with(vec![])
            .send_refund("mainnet", "secret", DESTINATION, "btc", U256::from(1u64))
            .await;
        assert!(matches!(result, Err(SettlementError::UnsupportedOperation(_))));
    }

    #[tokio::test]
    async fn unknown_network_is_rejected() {
        let result = engine_with(vec![]).get_balance("regtest", "btc", DESTINATION).await;
        assert!(matches!(result, Err(SettlementError::UnsupportedNetwork(_))));
    }

    #[tokio::test]
    async fn satoshi_decimals() {
        let btc = engine_with(vec![]);
        assert_eq!(btc.currency_decimals("mainnet", "btc").await.unwrap(), 8);
        assert_eq!(btc.currency_decimals("testnet", "").await.unwrap(), 8);
        assert!(matches!(
            btc.currency_decimals("mainnet", "eth").await,
            Err(SettlementError::UnknownCurrency(_))
        ));
    }

    #[tokio::test]
    async fn invalid_destination_fails_before_network() {
        let btc = engine_with(vec!["http://127.0.0.1:9".to_string()]);
        let result = btc
            .transfer(
                "mainnet",
                "btc",
                &TransferAmount::Max,
                &wif_for_one(Network::Bitcoin),
                "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx",
            )
            .await;
        assert!(matches!(result, Err(SettlementError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn balance_and_history_degrade_gracefully() {
        let btc = engine_with(vec!["http://127.0.0.1:9".to_string()]);
        assert_eq!(
            btc.get_balance("mainnet", "btc", DESTINATION).await.unwrap(),
            U256::ZERO
        );
        assert!(btc
            .get_payment_transactions("mainnet", DESTINATION, 6)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn max_transfer_spends_segwit_utxo_and_broadcasts() {
        let keys = SourceKeys::from_wif(&wif_for_one(Network::Bitcoin), Network::Bitcoin).unwrap();
        let segwit = keys.address(AddressKind::NativeSegwit).to_string();
        let txid = "11".repeat(32);

        let mut server = mockito::Server::new_async().await;
        let _utxos = serve_utxos(
            &mut server,
            &keys,
            AddressKind::NativeSegwit,
            json!([{ "txid": txid, "vout": 1, "value": 100_000 }]),
        )
        .await;
        let broadcast = server
            .mock("POST", "/tx")
            .with_status(200)
            .with_body("accepted")
            .create_async()
            .await;

        let btc = engine_with(vec![server.url()]);
        let sent = btc
            .transfer(
                "mainnet",
                "btc",
                &TransferAmount::Max,
                &wif_for_one(Network::Bitcoin),
                DESTINATION,
            )
            .await
            .unwrap();

        broadcast.assert_async().await;
        assert_eq!(sent.len(), 64);
        assert_ne!(sent, txid);
        assert!(segwit.starts_with("bc1q"));
    }

    /// Serve `/address/{a}/utxo` for every address of `keys`, with `utxos`
    /// on the address of `kind` and nothing elsewhere.
    async fn serve_utxos(
        server: &mut mockito::ServerGuard,
        keys: &SourceKeys,
        kind: AddressKind,
        utxos: serde_json::Value,
    ) -> Vec<mockito::Mock> {
        let mut mocks = Vec::new();
        for (address_kind, address) in keys.addresses() {
            let body = if address_kind == kind { utxos.clone() } else { json!([]) };
            mocks.push(
                server
                    .mock("GET", format!("/address/{address}/utxo").as_str())
                    .with_status(200)
                    .with_body(body.to_string())
                    .create_async()
                    .await,
            );
        }
        mocks
    }

    #[tokio::test]
    async fn exact_transfer_spends_legacy_utxo_with_prior_transaction() {
        let keys = SourceKeys::from_wif(&wif_for_one(Network::Bitcoin), Network::Bitcoin).unwrap();
        let prior = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(60_000),
                script_pubkey: keys.address(AddressKind::Legacy).script_pubkey(),
            }],
        };
        let prior_txid = prior.compute_txid();

        let mut server = mockito::Server::new_async().await;
        let _utxos = serve_utxos(
            &mut server,
            &keys,
            AddressKind::Legacy,
            json!([{ "txid": prior_txid.to_string(), "vout": 0, "value": 60_000 }]),
        )
        .await;
        let raw = server
            .mock("GET", format!("/tx/{prior_txid}/hex").as_str())
            .with_status(200)
            .with_body(serialize_hex(&prior))
            .create_async()
            .await;
        // the signed transaction must spend the legacy outpoint
        let broadcast = server
            .mock("POST", "/tx")
            .match_body(Matcher::Regex(serialize_hex(&OutPoint::new(prior_txid, 0))))
            .with_status(200)
            .with_body("accepted")
            .create_async()
            .await;

        let btc = engine_with(vec![server.url()]);
        let sent = btc
            .transfer(
                "mainnet",
                "btc",
                &TransferAmount::Exact("0.0005".to_string()),
                &wif_for_one(Network::Bitcoin),
                DESTINATION,
            )
            .await
            .unwrap();

        raw.assert_async().await;
        broadcast.assert_async().await;
        assert_eq!(sent.len(), 64);
        assert_ne!(sent, prior_txid.to_string());
    }

    #[tokio::test]
    async fn broadcast_timeout_surfaces_as_unknown_outcome() {
        let keys = SourceKeys::from_wif(&wif_for_one(Network::Bitcoin), Network::Bitcoin).unwrap();

        let mut server = mockito::Server::new_async().await;
        let _utxos = serve_utxos(
            &mut server,
            &keys,
            AddressKind::NativeSegwit,
            json!([{ "txid": "22".repeat(32), "vout": 0, "value": 100_000 }]),
        )
        .await;
        let _rejected = server
            .mock("POST", "/tx")
            .with_status(503)
            .create_async()
            .await;

        // second endpoint accepts the POST and never answers
        let hung = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let hung_url = format!("http://{}", hung.local_addr().unwrap());
        std::thread::spawn(move || {
            let mut open = Vec::new();
            for socket in hung.incoming().flatten() {
                open.push(socket);
            }
        });

        let mut config = BitcoinConfig {
            broadcast_timeout: Duration::from_millis(100),
            ..BitcoinConfig::default()
        };
        config.mainnet = BitcoinNetworkConfig {
            esplora_urls: vec![server.url(), hung_url],
            blockcypher_url: None,
            fee_rate_sat_per_byte: 1,
        };
        let result = BitcoinSettlement::new(config)
            .transfer(
                "mainnet",
                "btc",
                &TransferAmount::Max,
                &wif_for_one(Network::Bitcoin),
                DESTINATION,
            )
            .await;

        assert!(matches!(result, Err(SettlementError::Timeout(_))), "{result:?}");
    }
}

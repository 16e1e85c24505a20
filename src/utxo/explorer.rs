// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bitcoin explorer access with provider fallback.
//!
//! Reads walk an ordered provider list (every Esplora endpoint, then
//! BlockCypher) and stop at the first structurally valid answer. Balance and
//! history degrade to zero / empty when every provider fails. UTXO lookups,
//! raw transactions and broadcast use the Esplora family only and report an
//! error when all of its endpoints fail.

use std::future::Future;
use std::time::Duration;

use bitcoin::consensus::encode::deserialize;
use bitcoin::hex::FromHex;
use bitcoin::{Transaction, Txid};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::{BitcoinConfig, BitcoinNetworkConfig};
use crate::error::SettlementError;
use crate::models::PaymentTransaction;

const USER_AGENT: &str = concat!("relational-chain-settlement/", env!("CARGO_PKG_VERSION"));

/// One explorer endpoint and the response family it speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Esplora(String),
    BlockCypher(String),
}

impl Provider {
    fn base_url(&self) -> &str {
        match self {
            Self::Esplora(url) | Self::BlockCypher(url) => url,
        }
    }
}

// =============================================================================
// Response shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct EsploraStats {
    #[serde(default)]
    funded_txo_sum: u64,
    #[serde(default)]
    spent_txo_sum: u64,
}

impl EsploraStats {
    fn net(&self) -> u64 {
        self.funded_txo_sum.saturating_sub(self.spent_txo_sum)
    }
}

#[derive(Debug, Deserialize)]
struct EsploraAddress {
    chain_stats: EsploraStats,
    #[serde(default)]
    mempool_stats: Option<EsploraStats>,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    status: EsploraStatus,
    #[serde(default)]
    vout: Vec<EsploraVout>,
}

/// Entry of `GET /address/{address}/utxo`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EsploraUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
}

#[derive(Debug, Deserialize)]
struct BlockCypherBalance {
    #[serde(default)]
    balance: i64,
    #[serde(default)]
    unconfirmed_balance: i64,
}

#[derive(Debug, Deserialize)]
struct BlockCypherTxRef {
    tx_hash: String,
    #[serde(default = "BlockCypherTxRef::no_output")]
    tx_output_n: i64,
    #[serde(default)]
    value: i64,
    #[serde(default)]
    confirmations: u64,
}

impl BlockCypherTxRef {
    fn no_output() -> i64 {
        -1
    }
}

#[derive(Debug, Deserialize)]
struct BlockCypherAddress {
    #[serde(default)]
    txrefs: Vec<BlockCypherTxRef>,
}

/// Confirmations of a transaction given the chain tip.
pub fn confirmations(tip_height: u64, confirmed: bool, block_height: Option<u64>) -> u64 {
    match (confirmed, block_height) {
        (true, Some(height)) if height <= tip_height => tip_height - height + 1,
        _ => 0,
    }
}

// =============================================================================
// Explorer client
// =============================================================================

/// Explorer client bound to one network's endpoints.
#[derive(Debug, Clone)]
pub struct BitcoinExplorer {
    http: Client,
    endpoints: BitcoinNetworkConfig,
    balance_timeout: Duration,
    history_timeout: Duration,
    broadcast_timeout: Duration,
}

impl BitcoinExplorer {
    pub fn new(http: Client, endpoints: BitcoinNetworkConfig, config: &BitcoinConfig) -> Self {
        Self {
            http,
            endpoints,
            balance_timeout: config.balance_timeout,
            history_timeout: config.history_timeout,
            broadcast_timeout: config.broadcast_timeout,
        }
    }

    /// Shared HTTP client with the explorer user agent.
    pub fn http_client() -> Client {
        Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new())
    }

    pub fn fee_rate(&self) -> u64 {
        self.endpoints.fee_rate_sat_per_byte
    }

    /// Read providers in fallback order.
    pub fn providers(&self) -> Vec<Provider> {
        self.endpoints
            .esplora_urls
            .iter()
            .cloned()
            .map(Provider::Esplora)
            .chain(self.endpoints.blockcypher_url.clone().map(Provider::BlockCypher))
            .collect()
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, timeout: Duration) -> Result<T, SettlementError> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SettlementError::Network(format!("GET {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SettlementError::Network(format!("GET {url} returned {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| SettlementError::Network(format!("GET {url} returned unexpected data: {e}")))
    }

    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, SettlementError> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SettlementError::Network(format!("GET {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SettlementError::Network(format!("GET {url} returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SettlementError::Network(format!("GET {url} body unreadable: {e}")))?;
        Ok(body.trim().to_string())
    }

    /// Run `call` against each provider in order; first success wins.
    async fn first_success<T, F, Fut>(
        &self,
        operation: &str,
        providers: &[Provider],
        mut call: F,
    ) -> Result<T, SettlementError>
    where
        F: FnMut(Provider) -> Fut,
        Fut: Future<Output = Result<T, SettlementError>>,
    {
        let mut last_error = None;
        for provider in providers {
            match call(provider.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        operation = %operation,
                        provider = %provider.base_url(),
                        error = %e,
                        "Explorer provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SettlementError::Network(format!("{operation}: no explorer endpoints configured"))
        }))
    }

    // -------------------------------------------------------------------------
    // Balance
    // -------------------------------------------------------------------------

    async fn balance_from(&self, provider: Provider, address: &str) -> Result<u64, SettlementError> {
        match provider {
            Provider::Esplora(base) => {
                let data: EsploraAddress = self
                    .get_json(&format!("{base}/address/{address}"), self.balance_timeout)
                    .await?;
                let mempool = data.mempool_stats.as_ref().map_or(0, EsploraStats::net);
                Ok(data.chain_stats.net().saturating_add(mempool))
            }
            Provider::BlockCypher(base) => {
                let data: BlockCypherBalance = self
                    .get_json(&format!("{base}/addrs/{address}/balance"), self.balance_timeout)
                    .await?;
                let total = data.balance.saturating_add(data.unconfirmed_balance);
                Ok(u64::try_from(total).unwrap_or(0))
            }
        }
    }

    /// Confirmed plus unconfirmed balance in satoshis; zero if every provider fails.
    pub async fn balance(&self, address: &str) -> u64 {
        let providers = self.providers();
        match self
            .first_success("btc.balance", &providers, |p| self.balance_from(p, address))
            .await
        {
            Ok(sats) => {
                tracing::debug!(address = %address, sats, "Retrieved balance");
                sats
            }
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "All explorer endpoints failed, reporting zero balance");
                0
            }
        }
    }

    // -------------------------------------------------------------------------
    // Payment history
    // -------------------------------------------------------------------------

    async fn esplora_payments(
        &self,
        base: &str,
        address: &str,
        min_confirmations: u64,
    ) -> Result<Vec<PaymentTransaction>, SettlementError> {
        let txs: Vec<EsploraTx> = self
            .get_json(&format!("{base}/address/{address}/txs"), self.history_timeout)
            .await?;
        let tip = self
            .get_text(&format!("{base}/blocks/tip/height"), self.history_timeout)
            .await?;
        let tip: u64 = tip
            .parse()
            .map_err(|_| SettlementError::Network(format!("invalid tip height from {base}: {tip}")))?;

        let mut payments = Vec::new();
        for tx in txs {
            let confs = confirmations(tip, tx.status.confirmed, tx.status.block_height);
            if confs < min_confirmations {
                tracing::debug!(txid = %tx.txid, confirmations = confs, "Skipping unconfirmed payment");
                continue;
            }
            payments.extend(
                tx.vout
                    .iter()
                    .filter(|out| out.scriptpubkey_address.as_deref() == Some(address))
                    .map(|out| PaymentTransaction {
                        id: tx.txid.clone(),
                        value: out.value.to_string(),
                    }),
            );
        }
        Ok(payments)
    }

    async fn blockcypher_payments(
        &self,
        base: &str,
        address: &str,
        min_confirmations: u64,
    ) -> Result<Vec<PaymentTransaction>, SettlementError> {
        let data: BlockCypherAddress = self
            .get_json(
                &format!("{base}/addrs/{address}?includeScript=true"),
                self.history_timeout,
            )
            .await?;

        Ok(data
            .txrefs
            .into_iter()
            .filter(|r| r.confirmations >= min_confirmations && r.tx_output_n >= 0 && r.value > 0)
            .map(|r| PaymentTransaction {
                id: r.tx_hash,
                value: r.value.to_string(),
            })
            .collect())
    }

    /// Inbound payments with at least `min_confirmations`; empty if every
    /// provider fails.
    pub async fn payment_transactions(
        &self,
        address: &str,
        min_confirmations: u64,
    ) -> Vec<PaymentTransaction> {
        let providers = self.providers();
        let result = self
            .first_success("btc.payments", &providers, |provider| async move {
                match provider {
                    Provider::Esplora(base) => {
                        self.esplora_payments(&base, address, min_confirmations).await
                    }
                    Provider::BlockCypher(base) => {
                        self.blockcypher_payments(&base, address, min_confirmations)
                            .await
                    }
                }
            })
            .await;

        match result {
            Ok(payments) => {
                tracing::debug!(
                    address = %address,
                    count = payments.len(),
                    min_confirmations,
                    "Retrieved confirmed payments"
                );
                payments
            }
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "All explorer endpoints failed, reporting no payments");
                Vec::new()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Spending
    // -------------------------------------------------------------------------

    fn esplora_providers(&self) -> Vec<Provider> {
        self.endpoints
            .esplora_urls
            .iter()
            .cloned()
            .map(Provider::Esplora)
            .collect()
    }

    /// Unspent outputs of `address`.
    pub async fn utxos(&self, address: &str) -> Result<Vec<EsploraUtxo>, SettlementError> {
        let providers = self.esplora_providers();
        self.first_success("btc.utxos", &providers, |provider| async move {
            self.get_json(
                &format!("{}/address/{address}/utxo", provider.base_url()),
                self.balance_timeout,
            )
            .await
        })
        .await
    }

    /// Full prior transaction, checked against the requested txid.
    pub async fn raw_transaction(&self, txid: Txid) -> Result<Transaction, SettlementError> {
        let providers = self.esplora_providers();
        self.first_success("btc.raw_transaction", &providers, |provider| async move {
            let hex = self
                .get_text(
                    &format!("{}/tx/{txid}/hex", provider.base_url()),
                    self.history_timeout,
                )
                .await?;
            let bytes = Vec::<u8>::from_hex(&hex)
                .map_err(|e| SettlementError::Network(format!("invalid transaction hex: {e}")))?;
            let tx: Transaction = deserialize(&bytes)
                .map_err(|e| SettlementError::Network(format!("undecodable transaction: {e}")))?;
            if tx.compute_txid() != txid {
                return Err(SettlementError::Network(format!(
                    "explorer returned a different transaction for {txid}"
                )));
            }
            Ok(tx)
        })
        .await
    }

    /// Broadcast a signed transaction with id `txid`.
    ///
    /// Endpoints are tried in order while they reject the transaction. A
    /// timeout stops the walk with [`SettlementError::Timeout`]: the endpoint
    /// may already have relayed it. An endpoint that reports the
    /// transaction as already known counts as success.
    pub async fn broadcast(&self, tx_hex: &str, txid: Txid) -> Result<String, SettlementError> {
        let mut last_error = None;
        for provider in self.esplora_providers() {
            let url = format!("{}/tx", provider.base_url());
            let response = match self
                .http
                .post(&url)
                .header("Content-Type", "text/plain")
                .body(tx_hex.to_string())
                .timeout(self.broadcast_timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() => return Err(broadcast_timeout(&url, txid)),
                Err(e) => {
                    tracing::warn!(provider = %provider.base_url(), error = %e, "Broadcast failed, trying next");
                    last_error = Some(SettlementError::Network(format!("POST {url} failed: {e}")));
                    continue;
                }
            };

            let status = response.status();
            let body = match response.text().await {
                Ok(body) => body.trim().to_string(),
                Err(e) if e.is_timeout() => return Err(broadcast_timeout(&url, txid)),
                Err(e) => format!("unreadable body: {e}"),
            };
            if status.is_success() {
                return Ok(body);
            }
            if is_already_known(&body) {
                tracing::info!(provider = %provider.base_url(), txid = %txid, "Transaction already known to explorer");
                return Ok(txid.to_string());
            }
            tracing::warn!(provider = %provider.base_url(), status = %status, body = %body, "Broadcast rejected, trying next");
            last_error = Some(SettlementError::Network(format!("POST {url} returned {status}: {body}")));
        }
        Err(last_error.unwrap_or_else(|| {
            SettlementError::Network("btc.broadcast: no explorer endpoints configured".to_string())
        }))
    }
}

/// Node replies meaning the transaction was accepted earlier.
const ALREADY_KNOWN_MARKERS: &[&str] = &[
    "txn-already-in-mempool",
    "txn-already-known",
    "already in mempool",
    "already known",
    "already in block chain",
];

fn is_already_known(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    ALREADY_KNOWN_MARKERS.iter().any(|marker| body.contains(marker))
}

fn broadcast_timeout(url: &str, txid: Txid) -> SettlementError {
    tracing::warn!(url = %url, txid = %txid, "Broadcast timed out; transaction may have been relayed");
    SettlementError::Timeout(format!("broadcast of {txid} to {url}"))
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    const ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

    fn explorer(esplora: Vec<String>, blockcypher: Option<String>) -> BitcoinExplorer {
        let endpoints = BitcoinNetworkConfig {
            esplora_urls: esplora,
            blockcypher_url: blockcypher,
            fee_rate_sat_per_byte: 5,
        };
        BitcoinExplorer::new(BitcoinExplorer::http_client(), endpoints, &BitcoinConfig::default())
    }

    #[test]
    fn confirmation_count() {
        assert_eq!(confirmations(100, true, Some(96)), 5);
        assert_eq!(confirmations(100, true, Some(100)), 1);
        assert_eq!(confirmations(100, false, None), 0);
        assert_eq!(confirmations(100, true, Some(101)), 0);
    }

    #[test]
    fn providers_are_ordered_esplora_first() {
        let explorer = explorer(
            vec!["https://a".into(), "https://b".into()],
            Some("https://c".into()),
        );
        assert_eq!(
            explorer.providers(),
            vec![
                Provider::Esplora("https://a".into()),
                Provider::Esplora("https://b".into()),
                Provider::BlockCypher("https://c".into()),
            ]
        );
    }

    #[tokio::test]
    async fn balance_falls_back_to_next_provider() {
        let mut down = mockito::Server::new_async().await;
        let _down = down
            .mock("GET", format!("/address/{ADDRESS}").as_str())
            .with_status(503)
            .create_async()
            .await;

        let mut up = mockito::Server::new_async().await;
        let up_mock = up
            .mock("GET", format!("/address/{ADDRESS}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "chain_stats": { "funded_txo_sum": 150_000, "spent_txo_sum": 50_000 },
                    "mempool_stats": { "funded_txo_sum": 2_000, "spent_txo_sum": 0 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let explorer = explorer(vec![down.url(), up.url()], None);
        assert_eq!(explorer.balance(ADDRESS).await, 102_000);
        up_mock.assert_async().await;
    }

    #[tokio::test]
    async fn balance_uses_blockcypher_shape() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/addrs/{ADDRESS}/balance").as_str())
            .with_status(200)
            .with_body(json!({ "balance": 7_000, "unconfirmed_balance": -1_000 }).to_string())
            .create_async()
            .await;

        let explorer = explorer(vec![], Some(server.url()));
        assert_eq!(explorer.balance(ADDRESS).await, 6_000);
    }

    #[tokio::test]
    async fn balance_is_zero_when_all_providers_fail() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let explorer = explorer(vec![server.url()], Some(server.url()));
        assert_eq!(explorer.balance(ADDRESS).await, 0);
    }

    async fn esplora_history_server(tip: u64) -> (mockito::ServerGuard, Vec<mockito::Mock>) {
        let mut server = mockito::Server::new_async().await;
        let txs = server
            .mock("GET", format!("/address/{ADDRESS}/txs").as_str())
            .with_status(200)
            .with_body(
                json!([
                    {
                        "txid": "aa",
                        "status": { "confirmed": true, "block_height": 96 },
                        "vout": [
                            { "scriptpubkey_address": ADDRESS, "value": 25_000 },
                            { "scriptpubkey_address": "bc1qother", "value": 1 }
                        ]
                    },
                    {
                        "txid": "bb",
                        "status": { "confirmed": false },
                        "vout": [{ "scriptpubkey_address": ADDRESS, "value": 9 }]
                    }
                ])
                .to_string(),
            )
            .create_async()
            .await;
        let tip = server
            .mock("GET", "/blocks/tip/height")
            .with_status(200)
            .with_body(tip.to_string())
            .create_async()
            .await;
        (server, vec![txs, tip])
    }

    #[tokio::test]
    async fn history_applies_confirmation_threshold() {
        // tip 100, included at 96: five confirmations
        let (server, _mocks) = esplora_history_server(100).await;
        let explorer = explorer(vec![server.url()], None);

        assert!(explorer.payment_transactions(ADDRESS, 6).await.is_empty());
        assert_eq!(
            explorer.payment_transactions(ADDRESS, 5).await,
            vec![PaymentTransaction {
                id: "aa".to_string(),
                value: "25000".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn history_falls_back_to_blockcypher() {
        let mut down = mockito::Server::new_async().await;
        let _down = down
            .mock("GET", Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let mut cypher = mockito::Server::new_async().await;
        let _cypher = cypher
            .mock("GET", format!("/addrs/{ADDRESS}").as_str())
            .match_query(Matcher::UrlEncoded("includeScript".into(), "true".into()))
            .with_status(200)
            .with_body(
                json!({
                    "txrefs": [
                        { "tx_hash": "cc", "tx_output_n": 0, "value": 40_000, "confirmations": 12 },
                        { "tx_hash": "dd", "tx_output_n": 1, "value": 10, "confirmations": 2 },
                        { "tx_hash": "ee", "tx_input_n": 0, "tx_output_n": -1, "value": 5_000, "confirmations": 30 }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let explorer = explorer(vec![down.url()], Some(cypher.url()));
        let ids: Vec<_> = explorer
            .payment_transactions(ADDRESS, 6)
            .await
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["cc"]);
    }

    fn sample_txid() -> Txid {
        "11".repeat(32).parse().unwrap()
    }

    #[tokio::test]
    async fn broadcast_fails_over_and_returns_txid() {
        let mut down = mockito::Server::new_async().await;
        let _down = down
            .mock("POST", "/tx")
            .with_status(503)
            .create_async()
            .await;

        let mut up = mockito::Server::new_async().await;
        let up_mock = up
            .mock("POST", "/tx")
            .match_header("content-type", "text/plain")
            .match_body("0200deadbeef")
            .with_status(200)
            .with_body("abcd1234\n")
            .create_async()
            .await;

        let explorer = explorer(vec![down.url(), up.url()], None);
        assert_eq!(
            explorer.broadcast("0200deadbeef", sample_txid()).await.unwrap(),
            "abcd1234"
        );
        up_mock.assert_async().await;
    }

    #[tokio::test]
    async fn broadcast_treats_already_known_as_sent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/tx")
            .with_status(400)
            .with_body("sendrawtransaction RPC error: txn-already-in-mempool")
            .create_async()
            .await;

        let explorer = explorer(vec![server.url()], None);
        assert_eq!(
            explorer.broadcast("00", sample_txid()).await.unwrap(),
            sample_txid().to_string()
        );
    }

    #[tokio::test]
    async fn broadcast_timeout_is_unknown_outcome_and_stops() {
        // accepts connections and never answers
        let hung = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let hung_url = format!("http://{}", hung.local_addr().unwrap());
        std::thread::spawn(move || {
            let mut open = Vec::new();
            for socket in hung.incoming().flatten() {
                open.push(socket);
            }
        });

        let mut next = mockito::Server::new_async().await;
        let next_mock = next
            .mock("POST", "/tx")
            .with_status(400)
            .with_body("sendrawtransaction RPC error: txn-already-in-mempool")
            .expect(0)
            .create_async()
            .await;

        let config = BitcoinConfig {
            broadcast_timeout: Duration::from_millis(100),
            ..BitcoinConfig::default()
        };
        let endpoints = BitcoinNetworkConfig {
            esplora_urls: vec![hung_url, next.url()],
            blockcypher_url: None,
            fee_rate_sat_per_byte: 5,
        };
        let explorer = BitcoinExplorer::new(BitcoinExplorer::http_client(), endpoints, &config);

        let result = explorer.broadcast("00", sample_txid()).await;
        assert!(matches!(result, Err(SettlementError::Timeout(_))), "{result:?}");
        next_mock.assert_async().await;
    }

    #[test]
    fn already_known_replies() {
        assert!(is_already_known("sendrawtransaction RPC error: txn-already-in-mempool"));
        assert!(is_already_known("Transaction already in block chain"));
        assert!(is_already_known("ALREADY KNOWN"));
        assert!(!is_already_known("bad-txns-inputs-missingorspent"));
    }

    #[tokio::test]
    async fn utxo_lookup_errors_when_all_endpoints_fail() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let explorer = explorer(vec![server.url()], None);
        assert!(matches!(
            explorer.utxos(ADDRESS).await,
            Err(SettlementError::Network(_))
        ));
    }
}

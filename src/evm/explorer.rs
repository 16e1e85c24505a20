// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Etherscan-family history client for inbound EVM payments.
//!
//! Queries `module=account&action=txlist` for an address and keeps only
//! successful transactions sent *to* it with enough confirmations.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::SettlementError;
use crate::models::PaymentTransaction;

const DEFAULT_BASE_URL: &str = "https://api.etherscan.io/api";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Explorer API root per network id.
fn default_base_url(network_id: &str) -> &'static str {
    match network_id.trim() {
        "11155111" => "https://api-sepolia.etherscan.io/api",
        "42161" => "https://api.arbiscan.io/api",
        "10" => "https://api-optimistic.etherscan.io/api",
        "8453" => "https://api.basescan.org/api",
        "137" => "https://api.polygonscan.com/api",
        _ => DEFAULT_BASE_URL,
    }
}

#[derive(Debug, Deserialize)]
struct TxListResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct ExplorerTx {
    hash: String,
    #[serde(default)]
    to: Option<String>,
    value: String,
    #[serde(rename = "isError", default)]
    is_error: String,
    #[serde(default)]
    confirmations: String,
}

/// Etherscan-compatible REST client.
pub struct EtherscanClient {
    http: Client,
    api_key: Option<String>,
    base_urls: HashMap<String, String>,
}

impl EtherscanClient {
    pub fn new(api_key: Option<String>, base_urls: HashMap<String, String>) -> Self {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            api_key,
            base_urls,
        }
    }

    pub fn base_url(&self, network_id: &str) -> String {
        self.base_urls
            .get(network_id.trim())
            .cloned()
            .unwrap_or_else(|| default_base_url(network_id).to_string())
    }

    /// Successful inbound transactions to `address` with at least
    /// `min_confirmations` confirmations, newest first.
    pub async fn payment_transactions(
        &self,
        network_id: &str,
        address: &str,
        min_confirmations: u64,
    ) -> Result<Vec<PaymentTransaction>, SettlementError> {
        let url = self.base_url(network_id);
        let api_key = self.api_key.clone().unwrap_or_default();

        let response = self
            .http
            .get(&url)
            .query(&[
                ("module", "account"),
                ("action", "txlist"),
                ("address", address),
                ("startblock", "0"),
                ("endblock", "99999999"),
                ("sort", "desc"),
                ("apikey", api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SettlementError::Network(format!("explorer request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SettlementError::Network(format!(
                "explorer returned {status}: {body}"
            )));
        }

        let body: TxListResponse = response
            .json()
            .await
            .map_err(|e| SettlementError::Network(format!("explorer response unreadable: {e}")))?;

        Ok(filter_payments(body, address, min_confirmations))
    }
}

fn filter_payments(
    body: TxListResponse,
    address: &str,
    min_confirmations: u64,
) -> Vec<PaymentTransaction> {
    if body.status != "1" {
        tracing::debug!(message = %body.message, "Explorer reported no transactions");
        return Vec::new();
    }
    let Value::Array(entries) = body.result else {
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<ExplorerTx>(entry).ok())
        .filter(|tx| tx.is_error == "0")
        .filter(|tx| {
            tx.to
                .as_deref()
                .is_some_and(|to| to.eq_ignore_ascii_case(address))
        })
        .filter(|tx| tx.confirmations.parse::<u64>().unwrap_or(0) >= min_confirmations)
        .map(|tx| PaymentTransaction {
            id: tx.hash,
            value: tx.value,
        })
        .collect()
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC access for the EVM engine.
//!
//! [`EvmGateway`] is the seam between settlement logic and the chain: the
//! engine only ever asks for balances, a gas price, and for a transfer to be
//! signed, submitted and confirmed. [`AlloyGateway`] is the production
//! implementation; tests script their own.

use std::future::Future;
use std::time::Duration;

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::{Address, U256},
    providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    transports::TransportError,
};
use async_trait::async_trait;

use super::decode::with_decoded_errors;
use super::erc20::Erc20Contract;
use super::retry::{safe_call, with_timeout, CallPolicy};
use crate::config::EvmConfig;
use crate::error::SettlementError;
use crate::models::{TransactionOutput, TxReceipt};

/// Native value transfer parameters. `None` lets the node decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTransfer {
    pub to: Address,
    pub value: U256,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
}

/// ERC-20 `transfer` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub token: Address,
    pub to: Address,
    pub amount: U256,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
}

/// Chain access used by the EVM settlement engine.
#[async_trait]
pub trait EvmGateway: Send + Sync {
    async fn native_balance(&self, network_id: &str, owner: Address)
        -> Result<U256, SettlementError>;

    async fn token_balance(
        &self,
        network_id: &str,
        token: Address,
        owner: Address,
    ) -> Result<U256, SettlementError>;

    async fn token_decimals(&self, network_id: &str, token: Address)
        -> Result<u8, SettlementError>;

    /// Current legacy gas price, if the node reports one.
    async fn gas_price(&self, network_id: &str) -> Result<Option<u128>, SettlementError>;

    /// Sign, submit and wait for the receipt of a native transfer.
    async fn send_native(
        &self,
        network_id: &str,
        signer: &PrivateKeySigner,
        transfer: NativeTransfer,
    ) -> Result<TransactionOutput, SettlementError>;

    /// Sign, submit and wait for the receipt of an ERC-20 transfer.
    async fn send_token(
        &self,
        network_id: &str,
        signer: &PrivateKeySigner,
        transfer: TokenTransfer,
    ) -> Result<TransactionOutput, SettlementError>;
}

// =============================================================================
// Error mapping
// =============================================================================

/// Transport failures are network errors; node rejections keep their message
/// so the gas classifier can read it.
pub(crate) fn map_rpc_error(err: TransportError) -> SettlementError {
    if let Some(payload) = err.as_error_resp() {
        return SettlementError::Rpc(payload.message.to_string());
    }
    if err.is_transport_error() {
        return SettlementError::Network(err.to_string());
    }
    SettlementError::Rpc(err.to_string())
}

/// Submit a transaction and wait for its receipt.
///
/// Submission and receipt wait each run under `timeout`. Nothing is ever
/// resubmitted: a timeout after submission is reported as
/// [`SettlementError::Timeout`] because the transaction may still be mined.
pub async fn safe_write_call<F>(
    timeout: Duration,
    operation: &str,
    request: TransactionRequest,
    submit: F,
) -> Result<TransactionOutput, SettlementError>
where
    F: Future<Output = Result<PendingTransactionBuilder<Ethereum>, SettlementError>>,
{
    let pending = with_timeout(timeout, operation, submit).await?;
    let tx_hash = format!("{:?}", pending.tx_hash());
    tracing::info!(operation = %operation, tx_hash = %tx_hash, "Transaction sent");

    let receipt = with_timeout(timeout, operation, async move {
        pending
            .get_receipt()
            .await
            .map_err(|e| SettlementError::TransactionFailed(format!("receipt unavailable: {e}")))
    })
    .await?;

    let receipt = TxReceipt {
        tx_hash: tx_hash.clone(),
        block_number: receipt.block_number.unwrap_or(0),
        gas_used: receipt.gas_used as u64,
        success: receipt.status(),
    };
    if !receipt.success {
        tracing::error!(operation = %operation, tx_hash = %tx_hash, "Transaction reverted");
        return Err(SettlementError::TransactionFailed(format!(
            "{operation} reverted in transaction {tx_hash}"
        )));
    }

    tracing::info!(
        operation = %operation,
        tx_hash = %tx_hash,
        block_number = receipt.block_number,
        gas_used = receipt.gas_used,
        "Transaction confirmed"
    );
    Ok(TransactionOutput {
        transaction_id: tx_hash,
        transaction: request,
        receipt,
    })
}

// =============================================================================
// Alloy Gateway
// =============================================================================

/// [`EvmGateway`] backed by alloy HTTP providers, one per call.
pub struct AlloyGateway {
    config: EvmConfig,
    policy: CallPolicy,
}

impl AlloyGateway {
    pub fn new(config: EvmConfig) -> Self {
        let policy = CallPolicy::from_config(&config);
        Self { config, policy }
    }

    fn read_provider(&self, network_id: &str) -> Result<DynProvider, SettlementError> {
        let url = self.config.https_rpc_url(network_id)?.clone();
        Ok(ProviderBuilder::new().connect_http(url).erased())
    }

    fn signing_provider(
        &self,
        network_id: &str,
        signer: &PrivateKeySigner,
    ) -> Result<DynProvider, SettlementError> {
        let url = self.config.https_rpc_url(network_id)?.clone();
        let wallet = EthereumWallet::from(signer.clone());
        Ok(ProviderBuilder::new().wallet(wallet).connect_http(url).erased())
    }
}

#[async_trait]
impl EvmGateway for AlloyGateway {
    async fn native_balance(
        &self,
        network_id: &str,
        owner: Address,
    ) -> Result<U256, SettlementError> {
        let provider = &self.read_provider(network_id)?;
        safe_call(&self.policy, "eth_getBalance", || async move {
            provider.get_balance(owner).await.map_err(map_rpc_error)
        })
        .await
    }

    async fn token_balance(
        &self,
        network_id: &str,
        token: Address,
        owner: Address,
    ) -> Result<U256, SettlementError> {
        let provider = self.read_provider(network_id)?;
        let erc20 = &Erc20Contract::new(&provider, token);
        safe_call(&self.policy, "token.balanceOf", || erc20.balance_of(owner)).await
    }

    async fn token_decimals(
        &self,
        network_id: &str,
        token: Address,
    ) -> Result<u8, SettlementError> {
        let provider = self.read_provider(network_id)?;
        let erc20 = &Erc20Contract::new(&provider, token);
        safe_call(&self.policy, "token.decimals", || erc20.decimals()).await
    }

    async fn gas_price(&self, network_id: &str) -> Result<Option<u128>, SettlementError> {
        let provider = &self.read_provider(network_id)?;
        let price = safe_call(&self.policy, "eth_gasPrice", || async move {
            provider.get_gas_price().await.map_err(map_rpc_error)
        })
        .await?;
        Ok((price > 0).then_some(price))
    }

    async fn send_native(
        &self,
        network_id: &str,
        signer: &PrivateKeySigner,
        transfer: NativeTransfer,
    ) -> Result<TransactionOutput, SettlementError> {
        let provider = self.signing_provider(network_id, signer)?;

        let mut request = TransactionRequest::default()
            .from(signer.address())
            .to(transfer.to)
            .value(transfer.value);
        if let Some(limit) = transfer.gas_limit {
            request = request.gas_limit(limit);
        }
        if let Some(price) = transfer.gas_price {
            request = request.gas_price(price);
        }

        let submit = {
            let request = request.clone();
            let provider = provider.clone();
            async move {
                provider
                    .send_transaction(request)
                    .await
                    .map_err(map_rpc_error)
            }
        };
        safe_write_call(self.policy.timeout, "native.transfer", request, submit).await
    }

    async fn send_token(
        &self,
        network_id: &str,
        signer: &PrivateKeySigner,
        transfer: TokenTransfer,
    ) -> Result<TransactionOutput, SettlementError> {
        let provider = self.signing_provider(network_id, signer)?;
        let erc20 = Erc20Contract::new(&provider, transfer.token);
        let request = erc20
            .transfer_request(
                transfer.to,
                transfer.amount,
                transfer.gas_limit,
                transfer.gas_price,
            )
            .from(signer.address());

        let submit = {
            let request = request.clone();
            let provider = provider.clone();
            with_decoded_errors("token.transfer", async move {
                provider
                    .send_transaction(request)
                    .await
                    .map_err(alloy::contract::Error::from)
            })
        };
        safe_write_call(self.policy.timeout, "token.transfer", request, submit).await
    }
}

#[cfg(test)]
mod tests {
    use alloy::transports::{RpcError, TransportErrorKind};

    use super::*;

    #[test]
    fn transport_failures_are_network_errors() {
        let err: TransportError = TransportErrorKind::custom_str("connection refused");
        assert!(matches!(map_rpc_error(err), SettlementError::Network(_)));
    }

    #[test]
    fn node_rejections_keep_their_message() {
        let err: TransportError = RpcError::local_usage_str("transaction underpriced");
        let mapped = map_rpc_error(err);
        assert!(matches!(mapped, SettlementError::Rpc(_)));
        assert!(mapped.is_gas_related());
    }

    #[tokio::test]
    async fn unknown_network_fails_fast() {
        let gateway = AlloyGateway::new(EvmConfig::default());
        let result = gateway.native_balance("1", Address::ZERO).await;
        assert!(matches!(result, Err(SettlementError::UnsupportedNetwork(_))));
        let result = gateway.gas_price("137").await;
        assert!(matches!(result, Err(SettlementError::UnsupportedNetwork(_))));
    }
}

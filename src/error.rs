// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Classified errors returned by every settlement engine.
//!
//! Callers receive exactly one terminal error per call. Reads that degrade
//! gracefully (UTXO balance, payment history) never surface these; writes do.

use alloy::primitives::U256;

use crate::evm::decode::DecodedErrorKind;

/// Substrings in provider errors that mark a failure as fee/gas related and
/// therefore worth retrying with a higher gas price.
const GAS_ERROR_MARKERS: &[&str] = &[
    "underpriced",
    "insufficient funds",
    "gas required exceeds",
    "replacement fee too low",
];

/// Errors that can occur during settlement operations.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Refund amount {refund} is too small to cover gas cost {gas_cost}")]
    RefundTooSmall { refund: U256, gas_cost: U256 },

    #[error("Network error: {0}")]
    Network(String),

    /// The operation did not complete in time. For submissions the outcome
    /// is unknown: the transaction may still be mined.
    #[error("Timed out waiting for {0}; outcome unknown")]
    Timeout(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Unsupported chain type: {0}")]
    UnsupportedChain(String),

    #[error("Contract call {operation} reverted ({kind}): {reason}")]
    ContractRevert {
        operation: String,
        reason: String,
        kind: DecodedErrorKind,
    },

    /// The provider rejected the request. The raw message is kept so the
    /// gas classifier can inspect it.
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<SettlementError>,
    },
}

impl SettlementError {
    /// Whether this failure came from the network rejecting the offered fee.
    ///
    /// Only provider rejections and decoded reverts are inspected. Locally
    /// raised errors (e.g. our own balance checks) are never gas related.
    pub fn is_gas_related(&self) -> bool {
        let message = match self {
            Self::Rpc(message) => message,
            Self::ContractRevert { reason, .. } => reason,
            _ => return false,
        };
        let message = message.to_ascii_lowercase();
        GAS_ERROR_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }

    /// Whether an idempotent read may be retried after this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_markers_are_detected_in_rpc_errors() {
        for message in [
            "server returned an error response: error code -32000: transaction underpriced",
            "insufficient funds for gas * price + value",
            "gas required exceeds allowance (21000)",
            "replacement fee too low",
            "Transaction UNDERPRICED",
        ] {
            assert!(
                SettlementError::Rpc(message.to_string()).is_gas_related(),
                "{message} should be gas related"
            );
        }
    }

    #[test]
    fn non_gas_errors_are_terminal() {
        assert!(!SettlementError::Rpc("nonce too low".into()).is_gas_related());
        assert!(!SettlementError::InsufficientFunds("insufficient funds".into()).is_gas_related());
        assert!(!SettlementError::Network("underpriced".into()).is_gas_related());
        assert!(!SettlementError::RefundTooSmall {
            refund: U256::from(1u64),
            gas_cost: U256::from(2u64),
        }
        .is_gas_related());
    }

    #[test]
    fn decoded_reverts_are_classified_by_reason() {
        let err = SettlementError::ContractRevert {
            operation: "token.transfer".into(),
            reason: "insufficient funds for gas".into(),
            kind: DecodedErrorKind::RpcError,
        };
        assert!(err.is_gas_related());
    }

    #[test]
    fn only_network_and_timeout_are_transient() {
        assert!(SettlementError::Network("down".into()).is_transient());
        assert!(SettlementError::Timeout("eth_getBalance".into()).is_transient());
        assert!(!SettlementError::Rpc("boom".into()).is_transient());
    }
}

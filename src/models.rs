// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Data Models
//!
//! Value types shared by the capability contract and both engines. All of
//! them are plain data; nothing here performs I/O.
//!
//! ## Model Categories
//!
//! - **Chain selection**: [`ChainType`]
//! - **Inbound payments**: [`PaymentTransaction`]
//! - **Transfers**: [`TransferAmount`], [`TransactionOutput`], [`TxReceipt`]

use std::fmt;
use std::str::FromStr;

use alloy::rpc::types::TransactionRequest;
use serde::{Deserialize, Serialize};

use crate::error::SettlementError;

// =============================================================================
// Chain Type
// =============================================================================

/// Family of chain an operation targets. Selects the engine implementation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Evm,
    Bitcoin,
    /// Reserved; no engine is registered for it yet.
    Solana,
    Unknown,
}

impl ChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Evm => "evm",
            ChainType::Bitcoin => "bitcoin",
            ChainType::Solana => "solana",
            ChainType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainType {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evm" => Ok(ChainType::Evm),
            "bitcoin" | "btc" => Ok(ChainType::Bitcoin),
            "solana" => Ok(ChainType::Solana),
            "unknown" => Ok(ChainType::Unknown),
            other => Err(SettlementError::UnsupportedChain(other.to_string())),
        }
    }
}

// =============================================================================
// Payment History
// =============================================================================

/// One inbound payment credit discovered by a history query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentTransaction {
    /// Transaction identifier (hash / txid)
    pub id: String,
    /// Credited amount in the chain's smallest unit, as a decimal string
    pub value: String,
}

// =============================================================================
// Transfers
// =============================================================================

/// Amount requested for a transfer.
///
/// `Exact` holds the caller's literal string; each engine interprets it in
/// its own unit (EVM: integer base units, Bitcoin: decimal BTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferAmount {
    /// Everything that can be moved after fees.
    Max,
    Exact(String),
}

impl FromStr for TransferAmount {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SettlementError::InvalidAmount("amount is empty".to_string()));
        }
        if trimmed.eq_ignore_ascii_case("max") {
            Ok(TransferAmount::Max)
        } else {
            Ok(TransferAmount::Exact(trimmed.to_string()))
        }
    }
}

impl fmt::Display for TransferAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferAmount::Max => f.write_str("max"),
            TransferAmount::Exact(amount) => f.write_str(amount),
        }
    }
}

/// Transaction receipt after confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: String,
    /// Block number where transaction was included
    pub block_number: u64,
    /// Gas actually used
    pub gas_used: u64,
    /// Whether the transaction was successful
    pub success: bool,
}

/// Result of an EVM write operation.
#[derive(Debug, Clone)]
pub struct TransactionOutput {
    /// Transaction hash, `0x`-prefixed
    pub transaction_id: String,
    /// The request that was signed and submitted
    pub transaction: TransactionRequest,
    /// Receipt once the transaction was included
    pub receipt: TxReceipt,
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Chain Settlement - multi-chain settlement for the escrow platform
//!
//! Balance queries, address validation, inbound payment discovery, transfers
//! and refunds behind one [`chain::ChainSettlement`] trait, implemented for
//! account-based EVM chains and for Bitcoin.
//!
//! ## Modules
//!
//! - `chain` - Capability trait and chain-type registry
//! - `evm` - EVM engine (alloy)
//! - `utxo` - Bitcoin engine (rust-bitcoin)
//! - `currency` - Currency symbol / contract address resolver
//! - `config` - Environment-sourced settings
//! - `logging` - `tracing` subscriber setup

pub mod chain;
pub mod config;
pub mod currency;
pub mod error;
pub mod evm;
pub mod logging;
pub mod models;
pub mod units;
pub mod utxo;

pub use chain::{ChainRegistry, ChainSettlement};
pub use config::SettlementConfig;
pub use error::SettlementError;
pub use models::{ChainType, PaymentTransaction, TransferAmount};

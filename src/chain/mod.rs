// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Chain Capability Contract
//!
//! [`ChainSettlement`] is the one interface the escrow service talks to. Each
//! chain family implements it once; [`ChainRegistry`] picks the
//! implementation by [`ChainType`] at call entry.
//!
//! ## Failure policy
//!
//! - Reads degrade: [`ChainSettlement::get_payment_transactions`] returns an
//!   empty list when nothing qualifies or every provider fails.
//! - Writes fail loudly: transfers and refunds return exactly one classified
//!   [`SettlementError`].

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;

use crate::config::SettlementConfig;
use crate::error::SettlementError;
use crate::evm::EvmSettlement;
use crate::models::{ChainType, PaymentTransaction, TransferAmount};
use crate::utxo::BitcoinSettlement;

/// Confirmation threshold callers use when they have no stronger policy.
pub const DEFAULT_MIN_CONFIRMATIONS: u64 = 6;

/// Settlement operations every chain family provides.
#[async_trait]
pub trait ChainSettlement: Send + Sync {
    fn chain_type(&self) -> ChainType;

    /// Balance of `address` in the currency's smallest unit.
    ///
    /// An address with no funds yields zero, not an error.
    async fn get_balance(
        &self,
        network_id: &str,
        currency: &str,
        address: &str,
    ) -> Result<U256, SettlementError>;

    /// Currency symbols this chain family settles in.
    fn accepted_currencies(&self) -> &'static [&'static str];

    /// Decimals of `currency` on `network_id`, for display.
    async fn currency_decimals(
        &self,
        network_id: &str,
        currency: &str,
    ) -> Result<u8, SettlementError>;

    /// Chain-specific syntax and checksum validation. Never fails.
    fn validate_address_format(&self, address: &str) -> bool;

    /// Inbound payments to `address` with at least `min_confirmations`.
    async fn get_payment_transactions(
        &self,
        network_id: &str,
        address: &str,
        min_confirmations: u64,
    ) -> Vec<PaymentTransaction>;

    /// Move `amount` (or everything, for [`TransferAmount::Max`]) from the
    /// wallet controlled by `source_secret` to `destination`. Returns the
    /// transaction id.
    async fn transfer(
        &self,
        network_id: &str,
        currency: &str,
        amount: &TransferAmount,
        source_secret: &str,
        destination: &str,
    ) -> Result<String, SettlementError>;

    /// Refund `amount` base units to `destination`. Identical requests within
    /// the dedup window return the first transaction id.
    async fn send_refund(
        &self,
        network_id: &str,
        source_secret: &str,
        destination: &str,
        currency: &str,
        amount: U256,
    ) -> Result<String, SettlementError>;
}

/// Engines keyed by chain type.
#[derive(Default, Clone)]
pub struct ChainRegistry {
    engines: HashMap<ChainType, Arc<dyn ChainSettlement>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the production EVM and Bitcoin engines.
    pub fn from_config(config: &SettlementConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EvmSettlement::from_config(&config.evm)));
        registry.register(Arc::new(BitcoinSettlement::new(config.bitcoin.clone())));
        registry
    }

    /// Add or replace the engine for its chain type.
    pub fn register(&mut self, engine: Arc<dyn ChainSettlement>) {
        self.engines.insert(engine.chain_type(), engine);
    }

    /// Engine for `chain_type`, or `UnsupportedChain`.
    pub fn get(&self, chain_type: ChainType) -> Result<Arc<dyn ChainSettlement>, SettlementError> {
        self.engines
            .get(&chain_type)
            .cloned()
            .ok_or_else(|| SettlementError::UnsupportedChain(chain_type.to_string()))
    }

    pub fn chain_types(&self) -> Vec<ChainType> {
        self.engines.keys().copied().collect()
    }
}

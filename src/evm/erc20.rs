// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ERC-20 token contract interactions.
//!
//! Reads go through [`with_decoded_errors`] so reverts surface with a
//! readable reason. Transfers are built here and submitted by the gateway.

use alloy::{
    primitives::{Address, U256},
    providers::Provider,
    rpc::types::TransactionRequest,
    sol,
};

use super::decode::with_decoded_errors;
use crate::error::SettlementError;

// Minimal ERC-20 surface consumed by the settlement engine.
sol! {
    #[sol(rpc)]
    interface IERC20 {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// ERC-20 contract wrapper.
pub struct Erc20Contract<P> {
    contract: IERC20::IERC20Instance<P>,
}

impl<P: Provider + Clone> Erc20Contract<P> {
    pub fn new(provider: &P, address: Address) -> Self {
        Self {
            contract: IERC20::new(address, provider.clone()),
        }
    }

    pub fn address(&self) -> Address {
        *self.contract.address()
    }

    /// Get the token decimals.
    pub async fn decimals(&self) -> Result<u8, SettlementError> {
        with_decoded_errors("token.decimals", self.contract.decimals().call()).await
    }

    /// Raw balance of `owner` in token base units.
    pub async fn balance_of(&self, owner: Address) -> Result<U256, SettlementError> {
        with_decoded_errors("token.balanceOf", self.contract.balanceOf(owner).call()).await
    }

    /// Build the `transfer(to, amount)` request without sending it.
    pub fn transfer_request(
        &self,
        to: Address,
        amount: U256,
        gas_limit: Option<u64>,
        gas_price: Option<u128>,
    ) -> TransactionRequest {
        let mut call = self.contract.transfer(to, amount);
        if let Some(limit) = gas_limit {
            call = call.gas(limit);
        }
        if let Some(price) = gas_price {
            call = call.gas_price(price);
        }
        call.into_transaction_request()
    }
}

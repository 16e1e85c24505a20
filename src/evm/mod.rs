// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # EVM Settlement Engine
//!
//! Settlement for account-based chains. Native coin and ERC-20 paths share
//! one engine; the currency reference decides which is taken.
//!
//! ## Transfers
//!
//! - Fixed amounts are checked against the current balance and sent as-is.
//! - `max` of the native coin reserves gas from the balance and runs under
//!   the gas-escalating [`RetryPolicy`]; each attempt re-reads the balance and
//!   gas price.
//! - `max` of a token is the full token balance (gas is paid in native coin).
//!
//! ## Refunds
//!
//! - Native refunds deliver `amount − gas cost` under the same escalation
//!   loop and fail with `RefundTooSmall` if nothing would be left.
//! - Token refunds reserve a buffered gas budget in native coin first.
//! - Successful refunds are remembered in the engine's [`RefundCache`];
//!   identical requests within the TTL return the recorded hash.

pub mod decode;
pub mod erc20;
pub mod explorer;
pub mod gateway;
pub mod refund_cache;
pub mod retry;
pub mod signing;

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

use crate::chain::ChainSettlement;
use crate::config::EvmConfig;
use crate::currency::{self, ResolvedCurrency};
use crate::error::SettlementError;
use crate::models::{ChainType, PaymentTransaction, TransactionOutput, TransferAmount};
use crate::units;

use explorer::EtherscanClient;
use gateway::{AlloyGateway, EvmGateway, NativeTransfer, TokenTransfer};
use refund_cache::{refund_key, RefundCache};
use retry::{GasEscalation, RetryPolicy};

/// Gas limit of a plain value transfer.
pub const NATIVE_TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Gas limit reserved for an ERC-20 refund.
pub const TOKEN_TRANSFER_GAS_LIMIT: u64 = 100_000;

/// Safety margin applied to the token refund gas budget, in percent.
const TOKEN_GAS_BUFFER_PERCENT: u64 = 150;

/// Used when the node reports no gas price (20 gwei).
pub const DEFAULT_GAS_PRICE_WEI: u128 = 20_000_000_000;

const ACCEPTED_CURRENCIES: &[&str] = &["eth", "usdt", "usdc"];

/// EVM implementation of [`ChainSettlement`].
pub struct EvmSettlement {
    gateway: Arc<dyn EvmGateway>,
    explorer: EtherscanClient,
    refunds: Arc<RefundCache>,
    escalation: GasEscalation,
    retry: RetryPolicy,
}

impl EvmSettlement {
    /// Engine talking to the configured JSON-RPC endpoints.
    pub fn from_config(config: &EvmConfig) -> Self {
        Self::with_gateway(config, Arc::new(AlloyGateway::new(config.clone())))
    }

    /// Engine over an arbitrary gateway, with its own empty refund cache.
    pub fn with_gateway(config: &EvmConfig, gateway: Arc<dyn EvmGateway>) -> Self {
        Self {
            gateway,
            explorer: EtherscanClient::new(
                config.etherscan_api_key.clone(),
                config.explorer_base_urls.clone(),
            ),
            refunds: Arc::new(RefundCache::default()),
            escalation: GasEscalation::from_tuning(&config.transfer),
            retry: RetryPolicy::new(config.transfer.max_attempts, config.transfer.retry_delay),
        }
    }

    /// Replace the refund cache, e.g. to share one across handles.
    pub fn with_refund_cache(mut self, refunds: Arc<RefundCache>) -> Self {
        self.refunds = refunds;
        self
    }

    async fn base_gas_price(&self, network_id: &str) -> Result<u128, SettlementError> {
        Ok(self
            .gateway
            .gas_price(network_id)
            .await?
            .unwrap_or(DEFAULT_GAS_PRICE_WEI))
    }

    /// Send the whole native balance minus gas, escalating the gas price on
    /// fee-related rejections.
    async fn transfer_max_native(
        &self,
        network_id: &str,
        signer: &PrivateKeySigner,
        destination: Address,
    ) -> Result<TransactionOutput, SettlementError> {
        let source = signer.address();
        tracing::info!(
            network = %network_id,
            max_attempts = self.retry.max_attempts,
            "Starting max native transfer"
        );

        self.retry
            .run("native.transfer_max", SettlementError::is_gas_related, |attempt| async move {
                let balance = self.gateway.native_balance(network_id, source).await?;
                let base = self.base_gas_price(network_id).await?;
                let gas_price = self.escalation.gas_price(base, attempt);
                let gas_cost = U256::from(gas_price) * U256::from(NATIVE_TRANSFER_GAS_LIMIT);

                if balance <= gas_cost {
                    return Err(SettlementError::InsufficientFunds(format!(
                        "balance {balance} of {source} does not cover gas cost {gas_cost}"
                    )));
                }
                let value = balance - gas_cost;
                tracing::info!(
                    network = %network_id,
                    attempt,
                    gas_price,
                    value = %value,
                    "Sending max native transfer"
                );

                self.gateway
                    .send_native(
                        network_id,
                        signer,
                        NativeTransfer {
                            to: destination,
                            value,
                            gas_limit: Some(NATIVE_TRANSFER_GAS_LIMIT),
                            gas_price: Some(gas_price),
                        },
                    )
                    .await
            })
            .await
    }

    async fn native_refund(
        &self,
        network_id: &str,
        signer: &PrivateKeySigner,
        destination: Address,
        refund: U256,
    ) -> Result<TransactionOutput, SettlementError> {
        let source = signer.address();
        let balance = self.gateway.native_balance(network_id, source).await?;
        if balance < refund {
            return Err(SettlementError::InsufficientFunds(format!(
                "native balance {balance} of {source} is below refund {refund}"
            )));
        }

        self.retry
            .run("native.refund", SettlementError::is_gas_related, |attempt| async move {
                let base = self.base_gas_price(network_id).await?;
                let gas_price = self.escalation.gas_price(base, attempt);
                let gas_cost = U256::from(gas_price) * U256::from(NATIVE_TRANSFER_GAS_LIMIT);

                if refund <= gas_cost {
                    return Err(SettlementError::RefundTooSmall { refund, gas_cost });
                }
                let value = refund - gas_cost;
                tracing::info!(
                    network = %network_id,
                    attempt,
                    gas_price,
                    refund = %refund,
                    value = %value,
                    "Sending native refund"
                );

                self.gateway
                    .send_native(
                        network_id,
                        signer,
                        NativeTransfer {
                            to: destination,
                            value,
                            gas_limit: Some(NATIVE_TRANSFER_GAS_LIMIT),
                            gas_price: Some(gas_price),
                        },
                    )
                    .await
            })
            .await
    }

    async fn token_refund(
        &self,
        network_id: &str,
        signer: &PrivateKeySigner,
        token: Address,
        destination: Address,
        amount: U256,
    ) -> Result<TransactionOutput, SettlementError> {
        let source = signer.address();
        let (native_balance, gas_price) = tokio::try_join!(
            self.gateway.native_balance(network_id, source),
            self.base_gas_price(network_id),
        )?;

        let gas_budget = U256::from(gas_price)
            * U256::from(TOKEN_TRANSFER_GAS_LIMIT)
            * U256::from(TOKEN_GAS_BUFFER_PERCENT)
            / U256::from(100u64);
        if native_balance < gas_budget {
            return Err(SettlementError::InsufficientFunds(format!(
                "native balance {native_balance} of {source} cannot pay token refund gas {gas_budget}"
            )));
        }

        let token_balance = self.gateway.token_balance(network_id, token, source).await?;
        if token_balance < amount {
            return Err(SettlementError::InsufficientFunds(format!(
                "token balance {token_balance} of {source} is below refund {amount}"
            )));
        }

        tracing::info!(network = %network_id, token = %token, amount = %amount, "Sending token refund");
        self.gateway
            .send_token(
                network_id,
                signer,
                TokenTransfer {
                    token,
                    to: destination,
                    amount,
                    gas_limit: Some(TOKEN_TRANSFER_GAS_LIMIT),
                    gas_price: Some(gas_price),
                },
            )
            .await
    }
}

fn parse_evm_address(address: &str) -> Result<Address, SettlementError> {
    if !currency::is_valid_evm_address(address) {
        return Err(SettlementError::InvalidAddress(address.to_string()));
    }
    Address::from_str(address.trim()).map_err(|_| SettlementError::InvalidAddress(address.to_string()))
}

#[async_trait]
impl ChainSettlement for EvmSettlement {
    fn chain_type(&self) -> ChainType {
        ChainType::Evm
    }

    async fn get_balance(
        &self,
        network_id: &str,
        currency: &str,
        address: &str,
    ) -> Result<U256, SettlementError> {
        let owner = parse_evm_address(address)?;
        match currency::resolve_currency(currency, network_id)? {
            ResolvedCurrency::Native => self.gateway.native_balance(network_id, owner).await,
            ResolvedCurrency::Token(token) => {
                self.gateway.token_balance(network_id, token, owner).await
            }
        }
    }

    fn accepted_currencies(&self) -> &'static [&'static str] {
        ACCEPTED_CURRENCIES
    }

    /// Native currency is 18; tokens use the table, then the contract.
    async fn currency_decimals(
        &self,
        network_id: &str,
        currency: &str,
    ) -> Result<u8, SettlementError> {
        match currency::resolve_currency(currency, network_id)? {
            ResolvedCurrency::Native => Ok(18),
            ResolvedCurrency::Token(token) => {
                if let Some(decimals) = currency::currency_precision(currency, network_id) {
                    return Ok(decimals);
                }
                self.gateway.token_decimals(network_id, token).await
            }
        }
    }

    fn validate_address_format(&self, address: &str) -> bool {
        currency::is_valid_evm_address(address)
    }

    async fn get_payment_transactions(
        &self,
        network_id: &str,
        address: &str,
        min_confirmations: u64,
    ) -> Vec<PaymentTransaction> {
        match self
            .explorer
            .payment_transactions(network_id, address, min_confirmations)
            .await
        {
            Ok(payments) => payments,
            Err(e) => {
                tracing::warn!(network = %network_id, address = %address, error = %e, "Payment history unavailable");
                Vec::new()
            }
        }
    }

    async fn transfer(
        &self,
        network_id: &str,
        currency: &str,
        amount: &TransferAmount,
        source_secret: &str,
        destination: &str,
    ) -> Result<String, SettlementError> {
        let resolved = currency::resolve_currency(currency, network_id)?;
        let destination = parse_evm_address(destination)?;
        let signer = signing::signer_from_secret(source_secret)?;
        let source = signer.address();

        let output = match (resolved, amount) {
            (ResolvedCurrency::Native, TransferAmount::Max) => {
                self.transfer_max_native(network_id, &signer, destination)
                    .await?
            }
            (ResolvedCurrency::Native, TransferAmount::Exact(raw)) => {
                let value = positive_amount(raw)?;
                let balance = self.gateway.native_balance(network_id, source).await?;
                if value > balance {
                    return Err(SettlementError::InsufficientFunds(format!(
                        "amount {value} exceeds balance {balance} of {source}"
                    )));
                }
                self.gateway
                    .send_native(
                        network_id,
                        &signer,
                        NativeTransfer {
                            to: destination,
                            value,
                            gas_limit: None,
                            gas_price: None,
                        },
                    )
                    .await?
            }
            (ResolvedCurrency::Token(token), amount) => {
                let balance = self.gateway.token_balance(network_id, token, source).await?;
                let value = match amount {
                    TransferAmount::Max if balance.is_zero() => {
                        return Err(SettlementError::InsufficientFunds(format!(
                            "{source} holds no {currency}"
                        )));
                    }
                    TransferAmount::Max => balance,
                    TransferAmount::Exact(raw) => positive_amount(raw)?,
                };
                if value > balance {
                    return Err(SettlementError::InsufficientFunds(format!(
                        "amount {value} exceeds token balance {balance} of {source}"
                    )));
                }
                self.gateway
                    .send_token(
                        network_id,
                        &signer,
                        TokenTransfer {
                            token,
                            to: destination,
                            amount: value,
                            gas_limit: None,
                            gas_price: None,
                        },
                    )
                    .await?
            }
        };

        tracing::info!(
            network = %network_id,
            currency = %currency,
            tx_hash = %output.transaction_id,
            "Transfer complete"
        );
        Ok(output.transaction_id)
    }

    async fn send_refund(
        &self,
        network_id: &str,
        source_secret: &str,
        destination: &str,
        currency: &str,
        amount: U256,
    ) -> Result<String, SettlementError> {
        let purged = self.refunds.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "Expired refund cache entries removed");
        }

        let key = refund_key(source_secret, destination, currency, amount);
        if let Some(tx_hash) = self.refunds.get(&key) {
            tracing::warn!(tx_hash = %tx_hash, "Duplicate refund prevented, returning existing transaction");
            return Ok(tx_hash);
        }

        let resolved = currency::resolve_currency(currency, network_id)?;
        let destination = parse_evm_address(destination)?;
        if amount.is_zero() {
            return Err(SettlementError::InvalidAmount("refund amount is zero".to_string()));
        }
        let signer = signing::signer_from_secret(source_secret)?;

        tracing::info!(
            network = %network_id,
            currency = %currency,
            amount = %amount,
            from = %signer.address(),
            to = %destination,
            "Sending refund"
        );
        let output = match resolved {
            ResolvedCurrency::Native => {
                self.native_refund(network_id, &signer, destination, amount)
                    .await?
            }
            ResolvedCurrency::Token(token) => {
                self.token_refund(network_id, &signer, token, destination, amount)
                    .await?
            }
        };

        self.refunds.record(key, output.transaction_id.clone());
        tracing::info!(tx_hash = %output.transaction_id, "Refund successful and cached");
        Ok(output.transaction_id)
    }
}

fn positive_amount(raw: &str) -> Result<U256, SettlementError> {
    let value = units::parse_base_units(raw)?;
    if value.is_zero() {
        return Err(SettlementError::InvalidAmount("amount must be positive".to_string()));
    }
    Ok(value)
}

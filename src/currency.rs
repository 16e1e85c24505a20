// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Address / Currency Resolver
//!
//! Maps symbolic currency identifiers (`eth`, `usdc`, `usdt`) to the
//! network-specific ERC-20 contract address and precision. Pure lookups,
//! no I/O.
//!
//! A currency reference handed to an engine is either:
//! - a native alias (`eth`, `matic`, `bnb`, `avax`, `native`, empty, or the
//!   zero address),
//! - a token contract address, or
//! - a symbol present in the per-network table below.

use std::str::FromStr;

use alloy::primitives::{Address, U256};

use crate::error::SettlementError;
use crate::units;

/// Precision of a currency in three contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precision {
    /// Digits shown to users
    pub display: u8,
    /// Digits persisted by the escrow service
    pub db: u8,
    /// On-chain decimals
    pub native: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct CurrencyEntry {
    pub symbol: &'static str,
    pub contract_address: &'static str,
    pub precision: Precision,
}

#[derive(Debug)]
pub struct NetworkCurrencies {
    pub chain_id: u64,
    pub chain_name: &'static str,
    pub currencies: [CurrencyEntry; 3],
}

/// Bitcoin amounts always use 8 decimals.
pub const BTC_PRECISION: u8 = 8;

const ZERO: &str = "0x0000000000000000000000000000000000000000";

const fn stable(symbol: &'static str, contract_address: &'static str, native: u8) -> CurrencyEntry {
    CurrencyEntry {
        symbol,
        contract_address,
        precision: Precision {
            display: 2,
            db: 2,
            native,
        },
    }
}

const fn eth(display: u8) -> CurrencyEntry {
    CurrencyEntry {
        symbol: "eth",
        contract_address: ZERO,
        precision: Precision {
            display,
            db: 8,
            native: 18,
        },
    }
}

const fn network(
    chain_id: u64,
    chain_name: &'static str,
    usdc: (&'static str, u8),
    usdt: (&'static str, u8),
    eth_display: u8,
) -> NetworkCurrencies {
    NetworkCurrencies {
        chain_id,
        chain_name,
        currencies: [
            stable("usdc", usdc.0, usdc.1),
            stable("usdt", usdt.0, usdt.1),
            eth(eth_display),
        ],
    }
}

static NETWORKS: &[NetworkCurrencies] = &[
    network(
        11155111,
        "sepolia",
        ("0x822585D682B973e4b1B47C0311f162b29586DD02", 12),
        ("0xbe9fe9b717c888a2b2ca0a6caa639afe369249c5", 6),
        5,
    ),
    network(
        11155420,
        "op-sepolia",
        ("0x45B24160Da2cA92673B6CAf4dFD11f60aDac73E3", 12),
        ("0x94b008aA00579c1307B0EF2c499aD98a8ce58e58", 6),
        5,
    ),
    network(
        80002,
        "amoy",
        ("0xA4b440AAA9A7bd454d775D3f38194D59A8ADCC45", 12),
        ("0x6718F8c7686B4C1a756cf5028d3b66b74E432596", 6),
        5,
    ),
    network(
        1,
        "ethereum",
        ("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
        ("0xdac17f958d2ee523a2206206994597c13d831ec7", 6),
        5,
    ),
    network(
        10,
        "optimism",
        ("0x0b2c639c533813f4aa9d7837caf62653d097ff85", 6),
        ("0x94b008aa00579c1307b0ef2c499ad98a8ce58e58", 6),
        5,
    ),
    network(
        56,
        "bsc",
        ("0x8965349fb649a33a30cbfda057d8ec2c48abe2a2", 18),
        ("0x2B90E061a517dB2BbD7E39Ef7F733Fd234B494CA", 6),
        5,
    ),
    network(
        137,
        "polygon",
        ("0x3c499c542cef5e3811e1192ce70d8cc03d5c3359", 6),
        ("0xc2132d05d31c914a87c6611c10748aeb04b58e8f", 6),
        6,
    ),
    network(
        1101,
        "polygon-zkevm",
        ("0xa8ce8aee21bc2a48a5ef670afcc9274c7bbbc035", 6),
        ("0x1e4a5963abfd975d8c9021ce480b42188849d41d", 6),
        5,
    ),
    network(
        5000,
        "mantle",
        ("0x09Bc4E0D864854c6aFB6eB9A9cdF58aC190D0dF9", 6),
        ("0x201EBa5CC46D216Ce6DC03F6a759e8E766e956aE", 6),
        5,
    ),
    network(
        8453,
        "base",
        ("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6),
        ("0xfde4C96c8593536E31F229EA8f37b2ADa2699bb2", 6),
        6,
    ),
    network(
        84532,
        "base-sepolia",
        ("0xD06c3b9Ee65245cE34089E8a55F0312500512455", 4),
        ("0x0baD6a5a59F3ca21Fb3b053d0a083F9DB37c1c1d", 18),
        6,
    ),
    network(
        42161,
        "arbitrum",
        ("0xaf88d065e77c8cC2239327C5EDb3A432268e5831", 6),
        ("0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9", 6),
        6,
    ),
    network(
        534352,
        "scroll",
        ("0x06eFdBFf2a14a7c8E15944D1F4A48F9F95F663A4", 6),
        ("0xf55bec9cafdbe8730f096aa55dad6d22d44099df", 6),
        5,
    ),
];

// =============================================================================
// Predicates
// =============================================================================

/// `""`, `"0"`, `"0x"` and `0x` followed only by zeros.
pub fn is_zero_address(address: &str) -> bool {
    let normalized = address.trim().to_ascii_lowercase();
    normalized.is_empty()
        || normalized == "0"
        || normalized
            .strip_prefix("0x")
            .is_some_and(|rest| rest.chars().all(|c| c == '0'))
}

/// Whether the reference denotes the chain's native coin.
pub fn is_native_currency(currency: &str) -> bool {
    let normalized = currency.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "eth" | "matic" | "bnb" | "avax" | "native"
    ) || is_zero_address(&normalized)
}

/// `0x` + 40 hex digits. Mixed-case input must carry a valid EIP-55 checksum.
pub fn is_valid_evm_address(address: &str) -> bool {
    let address = address.trim();
    let Some(hex) = address.strip_prefix("0x") else {
        return false;
    };
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(address, None).is_ok()
    } else {
        true
    }
}

pub fn is_valid_currency_address(address: &str) -> bool {
    is_zero_address(address) || is_valid_evm_address(address)
}

// =============================================================================
// Lookups
// =============================================================================

fn network_entry(network_id: &str) -> Option<&'static NetworkCurrencies> {
    let chain_id: u64 = network_id.trim().parse().ok()?;
    NETWORKS.iter().find(|n| n.chain_id == chain_id)
}

fn currency_entry(currency: &str, network_id: &str) -> Option<&'static CurrencyEntry> {
    let symbol = currency.trim().to_ascii_lowercase();
    network_entry(network_id)?
        .currencies
        .iter()
        .find(|c| c.symbol == symbol)
}

/// Human-readable network name, e.g. `"sepolia"` for `11155111`.
pub fn chain_name(network_id: &str) -> Option<&'static str> {
    network_entry(network_id).map(|n| n.chain_name)
}

/// Contract address of `currency` on `network_id` (zero address for `eth`).
pub fn currency_address(currency: &str, network_id: &str) -> Option<&'static str> {
    currency_entry(currency, network_id).map(|c| c.contract_address)
}

/// On-chain decimals of `currency` on `network_id`. `btc` is always 8.
pub fn currency_precision(currency: &str, network_id: &str) -> Option<u8> {
    if currency.trim().eq_ignore_ascii_case("btc") {
        return Some(BTC_PRECISION);
    }
    currency_entry(currency, network_id).map(|c| c.precision.native)
}

/// All three precisions of `currency` on `network_id`.
pub fn currency_precisions(currency: &str, network_id: &str) -> Option<Precision> {
    currency_entry(currency, network_id).map(|c| c.precision)
}

/// Returns `currency` unchanged when it is already an address, otherwise the
/// table address for the symbol.
pub fn translate_currency_address(currency: &str, network_id: &str) -> Option<String> {
    if is_valid_currency_address(currency) {
        return Some(currency.trim().to_string());
    }
    currency_address(currency, network_id).map(str::to_string)
}

/// Rescale a base-unit amount of `currency` from one network's precision to
/// another's. Digits below the target precision are dropped.
pub fn convert_currency_amount(
    currency: &str,
    amount: U256,
    from_network: &str,
    to_network: &str,
) -> Result<U256, SettlementError> {
    let from = currency_precision(currency, from_network).ok_or_else(|| {
        SettlementError::UnknownCurrency(format!("{currency} on network {from_network}"))
    })?;
    let to = currency_precision(currency, to_network).ok_or_else(|| {
        SettlementError::UnknownCurrency(format!("{currency} on network {to_network}"))
    })?;
    Ok(units::rescale(amount, from, to))
}

// =============================================================================
// Resolution
// =============================================================================

/// What an EVM currency reference resolves to on a given network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedCurrency {
    Native,
    Token(Address),
}

/// Resolve a currency reference for `network_id`.
///
/// Fails with `InvalidAddress` for malformed `0x…` references and with
/// `UnknownCurrency` for symbols the table does not know on that network.
pub fn resolve_currency(
    currency: &str,
    network_id: &str,
) -> Result<ResolvedCurrency, SettlementError> {
    let currency = currency.trim();
    if is_native_currency(currency) {
        return Ok(ResolvedCurrency::Native);
    }
    if currency.starts_with("0x") || currency.starts_with("0X") {
        if !is_valid_evm_address(currency) {
            return Err(SettlementError::InvalidAddress(currency.to_string()));
        }
        return Address::from_str(currency)
            .map(ResolvedCurrency::Token)
            .map_err(|_| SettlementError::InvalidAddress(currency.to_string()));
    }

    let address = currency_address(currency, network_id).ok_or_else(|| {
        SettlementError::UnknownCurrency(format!("{currency} on network {network_id}"))
    })?;
    if is_zero_address(address) {
        return Ok(ResolvedCurrency::Native);
    }
    Address::from_str(address)
        .map(ResolvedCurrency::Token)
        .map_err(|_| SettlementError::InvalidAddress(address.to_string()))
}

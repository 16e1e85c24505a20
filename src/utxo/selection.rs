// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Coin selection and fee estimation.
//!
//! Sizes are estimated per input script type (68 vbytes for native segwit,
//! 148 bytes otherwise), 34 bytes per output and 10 bytes of overhead. The
//! fee carries a 10% buffer and is rounded up to whole satoshis.

use bitcoin::Txid;

use super::keys::AddressKind;
use crate::error::SettlementError;

/// Change at or below this many satoshis is folded into the fee.
pub const DUST_THRESHOLD_SATS: u64 = 546;

const TX_OVERHEAD_BYTES: u64 = 10;
const SEGWIT_INPUT_BYTES: u64 = 68;
const LEGACY_INPUT_BYTES: u64 = 148;
const OUTPUT_BYTES: u64 = 34;

/// An unspent output owned by one of the source key's addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub kind: AddressKind,
    pub address: String,
}

/// Fee estimation at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeModel {
    pub sat_per_byte: u64,
}

impl FeeModel {
    pub fn new(sat_per_byte: u64) -> Self {
        Self { sat_per_byte }
    }

    pub fn estimated_size(inputs: &[Utxo], outputs: usize) -> u64 {
        let input_bytes: u64 = inputs
            .iter()
            .map(|utxo| match utxo.kind {
                AddressKind::NativeSegwit => SEGWIT_INPUT_BYTES,
                AddressKind::Legacy | AddressKind::NestedSegwit => LEGACY_INPUT_BYTES,
            })
            .sum();
        TX_OVERHEAD_BYTES + input_bytes + outputs as u64 * OUTPUT_BYTES
    }

    /// `ceil(size × rate × 1.1)`
    pub fn fee(&self, inputs: &[Utxo], outputs: usize) -> u64 {
        let base = Self::estimated_size(inputs, outputs).saturating_mul(self.sat_per_byte);
        base.saturating_mul(11).div_ceil(10)
    }
}

/// Inputs and outputs of a transaction ready to be assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    /// Paid to the destination
    pub amount: u64,
    pub fee: u64,
    /// Returned to the source; zero means no change output
    pub change: u64,
}

impl Selection {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.value).sum()
    }
}

pub fn total_value(utxos: &[Utxo]) -> u64 {
    utxos.iter().map(|u| u.value).sum()
}

/// Choose inputs paying `amount` to one destination.
///
/// Prefers the smallest single UTXO covering `amount` plus a two-output fee.
/// Otherwise accumulates UTXOs smallest first, re-estimating the fee for the
/// current input count, until amount and fee are covered. A pool that cannot
/// afford change but still covers a single-output fee is accepted without
/// change.
pub fn select_coins<F>(utxos: &[Utxo], amount: u64, fee_for: F) -> Result<Selection, SettlementError>
where
    F: Fn(&[Utxo], usize) -> u64,
{
    let available = total_value(utxos);
    if amount == 0 {
        return Err(SettlementError::InvalidAmount("transfer amount is zero".to_string()));
    }
    if amount > available {
        return Err(SettlementError::InsufficientFunds(format!(
            "requested {amount} sats, available {available} sats"
        )));
    }

    let mut by_value: Vec<&Utxo> = utxos.iter().collect();
    by_value.sort_by_key(|u| u.value);

    let single = by_value.iter().copied().find(|utxo| {
        utxo.value >= amount.saturating_add(fee_for(std::slice::from_ref(*utxo), 2))
    });
    if let Some(utxo) = single {
        return Ok(finish(vec![utxo.clone()], amount, &fee_for));
    }

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in by_value {
        selected.push(utxo.clone());
        total += utxo.value;
        if total >= amount.saturating_add(fee_for(&selected, 2)) {
            return Ok(finish(selected, amount, &fee_for));
        }
    }

    let single_output_fee = fee_for(&selected, 1);
    if total >= amount.saturating_add(single_output_fee) {
        return Ok(finish(selected, amount, &fee_for));
    }
    Err(SettlementError::InsufficientFunds(format!(
        "{total} sats cannot cover {amount} sats plus fee {single_output_fee}"
    )))
}

/// Spend every UTXO into a single output.
pub fn select_max<F>(utxos: &[Utxo], fee_for: F) -> Result<Selection, SettlementError>
where
    F: Fn(&[Utxo], usize) -> u64,
{
    let total = total_value(utxos);
    let fee = fee_for(utxos, 1);
    if total <= fee {
        return Err(SettlementError::InsufficientFunds(format!(
            "balance {total} sats does not cover fee {fee} sats"
        )));
    }
    Ok(Selection {
        inputs: utxos.to_vec(),
        amount: total - fee,
        fee,
        change: 0,
    })
}

/// Settle fee and change once the inputs are fixed. Callers guarantee the
/// inputs cover `amount` plus the single-output fee.
fn finish<F>(inputs: Vec<Utxo>, amount: u64, fee_for: &F) -> Selection
where
    F: Fn(&[Utxo], usize) -> u64,
{
    let total = total_value(&inputs);
    let two_output_fee = fee_for(&inputs, 2);
    let (fee, change) = match total.checked_sub(amount.saturating_add(two_output_fee)) {
        Some(remainder) if remainder > DUST_THRESHOLD_SATS => (two_output_fee, remainder),
        _ => (total - amount, 0),
    };
    Selection {
        inputs,
        amount,
        fee,
        change,
    }
}

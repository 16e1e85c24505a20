// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction assembly and signing.
//!
//! Every input is signed with `SIGHASH_ALL` by the source key:
//!
//! | Input kind    | Sighash         | scriptSig            | Witness      |
//! |---------------|-----------------|----------------------|--------------|
//! | P2PKH         | legacy          | `<sig> <pubkey>`     | empty        |
//! | P2WPKH        | BIP143          | empty                | sig, pubkey  |
//! | P2SH-P2WPKH   | BIP143          | `<redeem script>`    | sig, pubkey  |

use std::collections::HashMap;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytes;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{
    ecdsa, Address, Amount, EcdsaSighashType, OutPoint, PublicKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};

use super::keys::{AddressKind, SourceKeys};
use super::selection::{Selection, Utxo};
use crate::error::SettlementError;

fn signing_error(e: impl std::fmt::Display) -> SettlementError {
    SettlementError::TransactionFailed(format!("signing failed: {e}"))
}

/// Check a legacy input against its full prior transaction.
pub fn verify_prior_output(
    utxo: &Utxo,
    prior: &Transaction,
    expected_script: &ScriptBuf,
) -> Result<(), SettlementError> {
    if prior.compute_txid() != utxo.txid {
        return Err(SettlementError::TransactionFailed(format!(
            "prior transaction does not match {}",
            utxo.txid
        )));
    }
    let output = prior.output.get(utxo.vout as usize).ok_or_else(|| {
        SettlementError::TransactionFailed(format!("{}:{} does not exist", utxo.txid, utxo.vout))
    })?;
    if output.value != Amount::from_sat(utxo.value) || &output.script_pubkey != expected_script {
        return Err(SettlementError::TransactionFailed(format!(
            "{}:{} does not match the reported UTXO",
            utxo.txid, utxo.vout
        )));
    }
    Ok(())
}

fn unsigned_transaction(
    keys: &SourceKeys,
    selection: &Selection,
    destination: &Address,
) -> Transaction {
    let input = selection
        .inputs
        .iter()
        .map(|utxo| TxIn {
            previous_output: OutPoint::new(utxo.txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        })
        .collect();

    let mut output = vec![TxOut {
        value: Amount::from_sat(selection.amount),
        script_pubkey: destination.script_pubkey(),
    }];
    if selection.change > 0 {
        output.push(TxOut {
            value: Amount::from_sat(selection.change),
            script_pubkey: keys.change_address().script_pubkey(),
        });
    }

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

/// Build and sign the transaction for `selection`.
///
/// `prior_txs` must hold the full prior transaction of every legacy input.
pub fn build_signed_transaction(
    keys: &SourceKeys,
    selection: &Selection,
    destination: &Address,
    prior_txs: &HashMap<Txid, Transaction>,
) -> Result<Transaction, SettlementError> {
    let unsigned = unsigned_transaction(keys, selection, destination);
    let secp = keys.secp();
    let secret = &keys.private_key().inner;
    let witness_program = keys.witness_program();

    let mut signatures = Vec::with_capacity(selection.inputs.len());
    {
        let mut cache = SighashCache::new(&unsigned);
        for (index, utxo) in selection.inputs.iter().enumerate() {
            let digest = match utxo.kind {
                AddressKind::Legacy => {
                    let script = keys.address(AddressKind::Legacy).script_pubkey();
                    let prior = prior_txs.get(&utxo.txid).ok_or_else(|| {
                        SettlementError::TransactionFailed(format!(
                            "missing prior transaction {}",
                            utxo.txid
                        ))
                    })?;
                    verify_prior_output(utxo, prior, &script)?;
                    cache
                        .legacy_signature_hash(index, &script, EcdsaSighashType::All.to_u32())
                        .map_err(signing_error)?
                        .to_byte_array()
                }
                AddressKind::NativeSegwit | AddressKind::NestedSegwit => cache
                    .p2wpkh_signature_hash(
                        index,
                        &witness_program,
                        Amount::from_sat(utxo.value),
                        EcdsaSighashType::All,
                    )
                    .map_err(signing_error)?
                    .to_byte_array(),
            };
            let signature = ecdsa::Signature {
                signature: secp.sign_ecdsa(&Message::from_digest(digest), secret),
                sighash_type: EcdsaSighashType::All,
            };
            signatures.push(signature);
        }
    }

    let public_key = PublicKey::from(*keys.public_key());
    let mut tx = unsigned;
    for ((input, utxo), signature) in tx.input.iter_mut().zip(&selection.inputs).zip(&signatures) {
        match utxo.kind {
            AddressKind::Legacy => {
                let signature = signature.to_vec();
                let signature: &PushBytes =
                    signature.as_slice().try_into().map_err(signing_error)?;
                input.script_sig = ScriptBuf::builder()
                    .push_slice(signature)
                    .push_key(&public_key)
                    .into_script();
            }
            AddressKind::NativeSegwit => {
                input.witness = Witness::p2wpkh(signature, &keys.public_key().0);
            }
            AddressKind::NestedSegwit => {
                let redeem: &PushBytes = witness_program
                    .as_bytes()
                    .try_into()
                    .map_err(signing_error)?;
                input.script_sig = ScriptBuf::builder().push_slice(redeem).into_script();
                input.witness = Witness::p2wpkh(signature, &keys.public_key().0);
            }
        }
    }

    tracing::debug!(
        txid = %tx.compute_txid(),
        inputs = tx.input.len(),
        outputs = tx.output.len(),
        fee = selection.fee,
        "Transaction signed"
    );
    Ok(tx)
}

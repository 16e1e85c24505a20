// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Source-secret parsing for EVM signing.
//!
//! Escrow wallets hand us either a raw hex private key (with or without
//! `0x`) or a PEM-encoded secp256k1 key (SEC1 or PKCS#8). Both become an
//! alloy [`PrivateKeySigner`].

use alloy::signers::local::PrivateKeySigner;
use k256::SecretKey;

use crate::error::SettlementError;

/// Signer from a PEM secp256k1 key. SEC1 (`EC PRIVATE KEY`) and PKCS#8
/// (`PRIVATE KEY`) blocks are accepted.
pub fn signer_from_pem(pem_str: &str) -> Result<PrivateKeySigner, SettlementError> {
    use k256::pkcs8::DecodePrivateKey;

    let block = pem::parse(pem_str.trim())
        .map_err(|e| SettlementError::InvalidPrivateKey(format!("Invalid PEM: {e}")))?;
    let secret = match block.tag() {
        "EC PRIVATE KEY" => SecretKey::from_sec1_der(block.contents())
            .map_err(|e| SettlementError::InvalidPrivateKey(format!("Invalid SEC1 key: {e}")))?,
        "PRIVATE KEY" => SecretKey::from_pkcs8_der(block.contents())
            .map_err(|e| SettlementError::InvalidPrivateKey(format!("Invalid PKCS#8 key: {e}")))?,
        other => {
            return Err(SettlementError::InvalidPrivateKey(format!(
                "unsupported PEM block '{other}'"
            )))
        }
    };

    PrivateKeySigner::from_slice(&secret.to_bytes())
        .map_err(|e| SettlementError::InvalidPrivateKey(e.to_string()))
}

/// Create a signer from a hex private key.
pub fn signer_from_hex(private_key_hex: &str) -> Result<PrivateKeySigner, SettlementError> {
    let trimmed = private_key_hex.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let key_bytes = alloy::hex::decode(hex)
        .map_err(|e| SettlementError::InvalidPrivateKey(format!("Invalid hex: {}", e)))?;
    if key_bytes.len() != 32 {
        return Err(SettlementError::InvalidPrivateKey(format!(
            "expected 32 bytes, got {}",
            key_bytes.len()
        )));
    }

    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| SettlementError::InvalidPrivateKey(e.to_string()))
}

/// Create a signer from whatever form the source secret takes.
pub fn signer_from_secret(source_secret: &str) -> Result<PrivateKeySigner, SettlementError> {
    if source_secret.trim_start().starts_with("-----BEGIN") {
        signer_from_pem(source_secret)
    } else {
        signer_from_hex(source_secret)
    }
}

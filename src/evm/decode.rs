// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Contract-error decoding.
//!
//! Raw provider failures carry ABI-encoded revert payloads. This module turns
//! them into a readable reason plus a coarse [`DecodedErrorKind`], and
//! [`with_decoded_errors`] composes that decoding around any contract call.

use std::fmt;
use std::future::IntoFuture;

use alloy::primitives::U256;
use alloy::sol_types::{Panic, Revert, SolError};

use crate::error::SettlementError;

/// Coarse classification of a contract failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedErrorKind {
    /// `require`/`revert` with a string message (`Error(string)`)
    Revert,
    /// Compiler-inserted check (`Panic(uint256)`)
    Panic,
    /// Revert with a custom error selector we have no ABI for
    CustomError,
    /// The node rejected the call before execution
    RpcError,
    /// Reverted without data
    EmptyError,
    UnknownError,
}

impl fmt::Display for DecodedErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodedErrorKind::Revert => "revert",
            DecodedErrorKind::Panic => "panic",
            DecodedErrorKind::CustomError => "custom error",
            DecodedErrorKind::RpcError => "rpc error",
            DecodedErrorKind::EmptyError => "empty error",
            DecodedErrorKind::UnknownError => "unknown error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedError {
    pub reason: String,
    pub kind: DecodedErrorKind,
}

fn panic_reason(code: U256) -> String {
    let description = match u64::try_from(code).unwrap_or(u64::MAX) {
        0x00 => "generic compiler panic",
        0x01 => "assertion failed",
        0x11 => "arithmetic overflow or underflow",
        0x12 => "division or modulo by zero",
        0x21 => "invalid enum value",
        0x22 => "invalid storage byte array",
        0x31 => "pop on empty array",
        0x32 => "array index out of bounds",
        0x41 => "out of memory",
        0x51 => "call to uninitialized function",
        _ => "unknown panic code",
    };
    format!("{description} (0x{code:x})")
}

/// Decode raw revert data returned by a failed call.
pub fn decode_revert_data(data: &[u8]) -> DecodedError {
    if data.is_empty() {
        return DecodedError {
            reason: "execution reverted without a reason".to_string(),
            kind: DecodedErrorKind::EmptyError,
        };
    }
    if data.len() < 4 {
        return DecodedError {
            reason: format!("malformed revert data 0x{}", alloy::hex::encode(data)),
            kind: DecodedErrorKind::UnknownError,
        };
    }

    let selector = &data[..4];
    if selector == Revert::SELECTOR {
        if let Ok(revert) = Revert::abi_decode(data) {
            return DecodedError {
                reason: revert.reason,
                kind: DecodedErrorKind::Revert,
            };
        }
    } else if selector == Panic::SELECTOR {
        if let Ok(panic) = Panic::abi_decode(data) {
            return DecodedError {
                reason: panic_reason(panic.code),
                kind: DecodedErrorKind::Panic,
            };
        }
    } else {
        return DecodedError {
            reason: format!("custom error 0x{}", alloy::hex::encode(selector)),
            kind: DecodedErrorKind::CustomError,
        };
    }

    DecodedError {
        reason: format!("undecodable revert data 0x{}", alloy::hex::encode(data)),
        kind: DecodedErrorKind::UnknownError,
    }
}

/// First line of a provider message; node errors often append JSON blobs.
fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

/// Decode an alloy contract error.
pub fn decode_contract_error(err: &alloy::contract::Error) -> DecodedError {
    if let Some(data) = err.as_revert_data() {
        return decode_revert_data(&data);
    }
    DecodedError {
        reason: first_line(&err.to_string()),
        kind: DecodedErrorKind::RpcError,
    }
}

/// Run a contract call and convert any failure into a decoded
/// [`SettlementError::ContractRevert`] tagged with `operation`.
///
/// Takes anything awaitable, so alloy call builders (`.call()`) can be
/// passed directly.
pub async fn with_decoded_errors<T, F>(operation: &str, call: F) -> Result<T, SettlementError>
where
    F: IntoFuture<Output = Result<T, alloy::contract::Error>>,
{
    call.await.map_err(|e| {
        let decoded = decode_contract_error(&e);
        // Unreachable nodes stay network errors so reads can retry them
        if let alloy::contract::Error::TransportError(transport) = e {
            if transport.is_transport_error() {
                tracing::warn!(operation = %operation, error = %transport, "Contract call transport failure");
                return SettlementError::Network(transport.to_string());
            }
        }
        tracing::warn!(
            operation = %operation,
            kind = %decoded.kind,
            reason = %decoded.reason,
            "Contract call failed"
        );
        SettlementError::ContractRevert {
            operation: operation.to_string(),
            reason: decoded.reason,
            kind: decoded.kind,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_error_string() {
        let data = Revert {
            reason: "ERC20: transfer amount exceeds balance".to_string(),
        }
        .abi_encode();
        let decoded = decode_revert_data(&data);
        assert_eq!(decoded.kind, DecodedErrorKind::Revert);
        assert_eq!(decoded.reason, "ERC20: transfer amount exceeds balance");
    }

    #[test]
    fn decodes_panic_code() {
        let data = Panic {
            code: U256::from(0x11u64),
        }
        .abi_encode();
        let decoded = decode_revert_data(&data);
        assert_eq!(decoded.kind, DecodedErrorKind::Panic);
        assert!(decoded.reason.contains("overflow"), "{}", decoded.reason);
    }

    #[test]
    fn classifies_custom_and_empty() {
        let custom = decode_revert_data(&[0xde, 0xad, 0xbe, 0xef, 0, 0]);
        assert_eq!(custom.kind, DecodedErrorKind::CustomError);
        assert!(custom.reason.contains("deadbeef"));

        assert_eq!(decode_revert_data(&[]).kind, DecodedErrorKind::EmptyError);
        assert_eq!(decode_revert_data(&[1, 2]).kind, DecodedErrorKind::UnknownError);
    }

    #[test]
    fn truncated_error_string_is_unknown() {
        let mut data = Revert {
            reason: "boom".to_string(),
        }
        .abi_encode();
        data.truncate(10);
        assert_eq!(decode_revert_data(&data).kind, DecodedErrorKind::UnknownError);
    }

    #[tokio::test]
    async fn wrapper_tags_operation() {
        let result: Result<(), _> = with_decoded_errors("token.transfer", async {
            Err(alloy::contract::Error::UnknownFunction("transfer".into()))
        })
        .await;
        match result {
            Err(SettlementError::ContractRevert {
                operation, kind, ..
            }) => {
                assert_eq!(operation, "token.transfer");
                assert_eq!(kind, DecodedErrorKind::RpcError);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Awaitable only through `IntoFuture`, like alloy's `EthCall`.
    struct PendingRead(Result<u8, alloy::contract::Error>);

    impl IntoFuture for PendingRead {
        type Output = Result<u8, alloy::contract::Error>;
        type IntoFuture = std::future::Ready<Self::Output>;

        fn into_future(self) -> Self::IntoFuture {
            std::future::ready(self.0)
        }
    }

    #[tokio::test]
    async fn wrapper_accepts_call_builders() {
        let decimals = with_decoded_errors("token.decimals", PendingRead(Ok(6)))
            .await
            .unwrap();
        assert_eq!(decimals, 6);

        let failed = with_decoded_errors(
            "token.decimals",
            PendingRead(Err(alloy::contract::Error::UnknownFunction("decimals".into()))),
        )
        .await;
        assert!(matches!(failed, Err(SettlementError::ContractRevert { .. })));
    }
}

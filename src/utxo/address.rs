// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bitcoin network ids and address validation.

use std::str::FromStr;
use std::sync::LazyLock;

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network};
use regex::Regex;

use crate::error::SettlementError;

/// Quick shape check for legacy, P2SH and bech32 addresses on either network.
static ADDRESS_SHAPE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(1[a-km-zA-HJ-NP-Z1-9]{25,34}|3[a-km-zA-HJ-NP-Z1-9]{25,34}|(bc|tb)1[a-z0-9]{8,87}|[mn2][a-km-zA-HJ-NP-Z1-9]{25,34})$",
    )
    .ok()
});

/// Map a network id (`mainnet`/`bitcoin`, `testnet`) to a [`Network`].
pub fn parse_network(network_id: &str) -> Result<Network, SettlementError> {
    match network_id.trim().to_ascii_lowercase().as_str() {
        "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        other => Err(SettlementError::UnsupportedNetwork(format!("bitcoin network {other}"))),
    }
}

fn matches_shape(address: &str) -> bool {
    ADDRESS_SHAPE
        .as_ref()
        .is_some_and(|re| re.is_match(address))
}

/// Whether `address` is a valid mainnet or testnet address.
///
/// The shape check only logs; the decision is made by parsing the address
/// against mainnet rules, then testnet rules.
pub fn is_valid_address(address: &str) -> bool {
    if !matches_shape(address) {
        tracing::debug!(address = %address, "Address failed shape check");
    }
    let Ok(unchecked) = Address::<NetworkUnchecked>::from_str(address) else {
        tracing::debug!(address = %address, "Address failed to parse");
        return false;
    };
    unchecked.is_valid_for_network(Network::Bitcoin)
        || unchecked.is_valid_for_network(Network::Testnet)
}

/// Parse `address` for a specific network.
pub fn parse_address(address: &str, network: Network) -> Result<Address, SettlementError> {
    Address::<NetworkUnchecked>::from_str(address.trim())
        .map_err(|_| SettlementError::InvalidAddress(address.to_string()))?
        .require_network(network)
        .map_err(|_| {
            SettlementError::InvalidAddress(format!("{address} is not a {network} address"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAINNET: &[&str] = &[
        "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
        "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy",
        "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
        "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
    ];

    const TESTNET: &[&str] = &[
        "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn",
        "2MzQwSSnBHWHqSAqtTVQ6v47XtaisrJa1Vc",
        "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx",
    ];

    #[test]
    fn accepts_mainnet_and_testnet_addresses() {
        for address in MAINNET.iter().chain(TESTNET) {
            assert!(is_valid_address(address), "{address} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for address in [
            "",
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfN",           // too short
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb",          // bad checksum
            "0A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",          // wrong prefix
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdo",  // 'o' is not bech32
            "0x2222222222222222222222222222222222222222",
        ] {
            assert!(!is_valid_address(address), "{address:?} should be invalid");
        }
    }

    #[test]
    fn network_ids() {
        assert_eq!(parse_network("mainnet").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("Bitcoin").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("testnet").unwrap(), Network::Testnet);
        assert!(matches!(
            parse_network("signet"),
            Err(SettlementError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn parse_address_checks_network() {
        assert!(parse_address(MAINNET[2], Network::Bitcoin).is_ok());
        assert!(matches!(
            parse_address(MAINNET[2], Network::Testnet),
            Err(SettlementError::InvalidAddress(_))
        ));
        assert!(parse_address(TESTNET[0], Network::Testnet).is_ok());
    }
}

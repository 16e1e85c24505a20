// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Source key handling for Bitcoin transfers.
//!
//! One WIF key controls three addresses. Funds may sit on any of them, so
//! transfers pool UTXOs from all three.

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, CompressedPublicKey, Network, NetworkKind, PrivateKey, ScriptBuf};

use crate::error::SettlementError;

/// Output script family of a source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// P2PKH
    Legacy,
    /// P2WPKH
    NativeSegwit,
    /// P2SH-wrapped P2WPKH
    NestedSegwit,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "p2pkh",
            Self::NativeSegwit => "p2wpkh",
            Self::NestedSegwit => "p2sh-p2wpkh",
        }
    }
}

/// A decoded source key and the addresses it controls on one network.
pub struct SourceKeys {
    secp: Secp256k1<All>,
    private_key: PrivateKey,
    public_key: CompressedPublicKey,
    legacy: Address,
    segwit: Address,
    nested: Address,
}

impl SourceKeys {
    /// Decode a compressed WIF key for `network`.
    pub fn from_wif(wif: &str, network: Network) -> Result<Self, SettlementError> {
        let private_key = PrivateKey::from_wif(wif.trim())
            .map_err(|e| SettlementError::InvalidPrivateKey(format!("Invalid WIF: {e}")))?;
        if private_key.network != NetworkKind::from(network) {
            return Err(SettlementError::InvalidPrivateKey(format!(
                "WIF key is not for {network}"
            )));
        }

        let secp = Secp256k1::new();
        let public_key = CompressedPublicKey::from_private_key(&secp, &private_key)
            .map_err(|e| SettlementError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self {
            legacy: Address::p2pkh(public_key, network),
            segwit: Address::p2wpkh(&public_key, network),
            nested: Address::p2shwpkh(&public_key, network),
            secp,
            private_key,
            public_key,
        })
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &CompressedPublicKey {
        &self.public_key
    }

    pub fn address(&self, kind: AddressKind) -> &Address {
        match kind {
            AddressKind::Legacy => &self.legacy,
            AddressKind::NativeSegwit => &self.segwit,
            AddressKind::NestedSegwit => &self.nested,
        }
    }

    /// All controlled addresses, legacy first.
    pub fn addresses(&self) -> [(AddressKind, &Address); 3] {
        [
            (AddressKind::Legacy, &self.legacy),
            (AddressKind::NativeSegwit, &self.segwit),
            (AddressKind::NestedSegwit, &self.nested),
        ]
    }

    /// Change always returns to the native segwit address.
    pub fn change_address(&self) -> &Address {
        &self.segwit
    }

    /// The P2WPKH program, used as the nested-segwit redeem script.
    pub fn witness_program(&self) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&self.public_key.wpubkey_hash())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bitcoin::secp256k1::SecretKey;

    use super::*;
    use crate::utxo::address::parse_address;

    /// WIF for the secret key `1` on `network`.
    pub(crate) fn wif_for_one(network: Network) -> String {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let secret = SecretKey::from_slice(&bytes).unwrap();
        PrivateKey::new(secret, network).to_wif()
    }

    #[test]
    fn derives_all_three_addresses() {
        let keys = SourceKeys::from_wif(&wif_for_one(Network::Bitcoin), Network::Bitcoin).unwrap();

        assert_eq!(
            keys.address(AddressKind::Legacy).to_string(),
            "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"
        );
        assert_eq!(
            keys.address(AddressKind::NativeSegwit).to_string(),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
        assert!(keys.address(AddressKind::NestedSegwit).to_string().starts_with('3'));
        assert_eq!(keys.change_address(), keys.address(AddressKind::NativeSegwit));
    }

    #[test]
    fn testnet_keys_derive_testnet_addresses() {
        let keys = SourceKeys::from_wif(&wif_for_one(Network::Testnet), Network::Testnet).unwrap();
        for (_, address) in keys.addresses() {
            assert!(parse_address(&address.to_string(), Network::Testnet).is_ok());
        }
        assert!(keys.address(AddressKind::NativeSegwit).to_string().starts_with("tb1q"));
    }

    #[test]
    fn rejects_wrong_network_and_garbage() {
        assert!(matches!(
            SourceKeys::from_wif(&wif_for_one(Network::Testnet), Network::Bitcoin),
            Err(SettlementError::InvalidPrivateKey(_))
        ));
        assert!(matches!(
            SourceKeys::from_wif("not-a-wif", Network::Bitcoin),
            Err(SettlementError::InvalidPrivateKey(_))
        ));
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Message framing and identifier derivation.
//!
//! Two byte-exact framings feed the signer: the personal-message prefix
//! `0x19 || "Ethereum Signed Message:\n" || <decimal length> || payload`
//! and the typed-data form `0x19 0x01 || domain_separator || struct_hash`.
//! Both are hashed with Keccak-256. Addresses are the trailing 20 bytes
//! of the Keccak-256 hash of the 64-byte uncompressed public key.

use crate::{
    errors::{Error, Result},
    field::CurvePoint,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tiny_keccak::{Hasher, Keccak};

/// Prefix text for the personal-message framing; the leading `0x19` byte
/// and the decimal length are added around it.
pub const PERSONAL_MESSAGE_PREFIX: &str = "Ethereum Signed Message:\n";

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// The digest of a personal-sign message: the prefixed payload, hashed.
pub fn personal_message_digest(message: &[u8]) -> [u8; 32] {
    let mut framed =
        Vec::with_capacity(1 + PERSONAL_MESSAGE_PREFIX.len() + 3 + message.len());
    framed.push(0x19);
    framed.extend_from_slice(PERSONAL_MESSAGE_PREFIX.as_bytes());
    framed.extend_from_slice(message.len().to_string().as_bytes());
    framed.extend_from_slice(message);
    keccak256(&framed)
}

/// The digest of a typed-data payload:
/// `keccak256(0x19 0x01 || domain_separator || struct_hash)`.
pub fn typed_data_digest(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut framed = Vec::with_capacity(2 + 64);
    framed.push(0x19);
    framed.push(0x01);
    framed.extend_from_slice(domain_separator);
    framed.extend_from_slice(struct_hash);
    keccak256(&framed)
}

/// A 20-byte account identifier derived from a public key.
///
/// Displayed and serialized as `0x`-prefixed lower hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    /// The raw 20 bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse the `0x`-prefixed lower-hex form.
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").ok_or(Error::Serialization)?;
        let bytes: [u8; 20] = hex::decode(stripped)
            .map_err(|_| Error::Serialization)?
            .try_into()
            .map_err(|_| Error::Serialization)?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Derive the address for a public point.
///
/// Keccak-256 over the 64 coordinate bytes of the uncompressed SEC1
/// encoding (the leading `0x04` tag is dropped), keeping the last 20
/// bytes.
pub fn derive_address(public_key: &CurvePoint) -> Address {
    let uncompressed = public_key.to_sec1_bytes(false);
    let hash = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Scalar;

    #[test]
    fn keccak256_known_vectors() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(
            hex::encode(keccak256(b"hello")),
            "1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn personal_digest_matches_manual_framing() {
        let message = b"hi";
        let mut framed = vec![0x19];
        framed.extend_from_slice(b"Ethereum Signed Message:\n2hi");
        assert_eq!(personal_message_digest(message), keccak256(&framed));
    }

    #[test]
    fn personal_digest_length_is_decimal_ascii() {
        // 123-byte payload must frame the length as the three bytes "123".
        let message = vec![0xaau8; 123];
        let mut framed = vec![0x19];
        framed.extend_from_slice(b"Ethereum Signed Message:\n123");
        framed.extend_from_slice(&message);
        assert_eq!(personal_message_digest(&message), keccak256(&framed));
    }

    #[test]
    fn typed_data_digest_matches_manual_framing() {
        let domain = keccak256(b"domain");
        let structure = keccak256(b"struct");
        let mut framed = vec![0x19, 0x01];
        framed.extend_from_slice(&domain);
        framed.extend_from_slice(&structure);
        assert_eq!(typed_data_digest(&domain, &structure), keccak256(&framed));
    }

    #[test]
    fn address_for_secret_key_one() {
        // The generator point's address is a fixed, widely published value.
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let secret = Scalar::from_bytes(&bytes).unwrap();
        let address = derive_address(&CurvePoint::generator_mul(&secret));
        assert_eq!(
            address.to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn address_hex_roundtrip() {
        let address = Address::from_hex("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap();
        assert_eq!(
            address.to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
        assert!(Address::from_hex("7e5f4552091a69125d5dfcb7b8c2659029395bdf").is_err());
        assert!(Address::from_hex("0xabcd").is_err());
    }
}

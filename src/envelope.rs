// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Password-based envelope encryption for secret material.
//!
//! A password is stretched with scrypt (`N = 2^18, r = 8, p = 1`) over a
//! fresh 32-byte salt, and the resulting key encrypts the plaintext with
//! XSalsa20-Poly1305 under a fresh 24-byte nonce. The envelope binds
//! ciphertext, nonce, salt, and a format version together; the version is
//! fixed at 1 and the KDF parameters are not configurable until a future
//! version changes them.
//!
//! Decryption failure deliberately does not distinguish a wrong password
//! from tampered bytes; both surface as [`Error::Undecryptable`] out of
//! the AEAD's constant-time tag check.

use crate::errors::{Error, Result};
use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Salt length fed to scrypt.
pub const SALT_LENGTH: usize = 32;
/// XSalsa20-Poly1305 nonce length.
pub const NONCE_LENGTH: usize = 24;
/// Poly1305 authentication tag length.
pub const TAG_LENGTH: usize = 16;

// scrypt cost parameters for version 1. N = 2^18.
const SCRYPT_LOG_N: u8 = 18;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const KEY_LENGTH: usize = 32;

/// An authenticated, password-encrypted blob.
///
/// The wire form is a JSON object with base64 byte fields:
/// `{ "ciphertext": ..., "nonce": ..., "salt": ..., "version": 1 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    #[serde(with = "base64_bytes")]
    pub(crate) ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub(crate) nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub(crate) salt: Vec<u8>,
    pub(crate) version: u8,
}

impl EncryptedEnvelope {
    /// The envelope format version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Encode as the JSON wire record.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::Serialization)
    }

    /// Decode from the JSON wire record.
    ///
    /// Unknown versions are accepted here and rejected by [`open`], so
    /// that callers can still inspect records written by future builds.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| Error::Serialization)
    }
}

/// Encrypt `plaintext` under `password` with a fresh salt and nonce.
///
/// Two calls with identical inputs produce different envelopes; the salt
/// and nonce are drawn fresh every time. The derived key is wiped before
/// returning.
pub fn seal<R: RngCore + CryptoRng>(
    plaintext: &[u8],
    password: &str,
    rng: &mut R,
) -> Result<EncryptedEnvelope> {
    let mut salt = vec![0u8; SALT_LENGTH];
    rng.fill_bytes(&mut salt);
    let mut nonce = vec![0u8; NONCE_LENGTH];
    rng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::InternalInvariantFailed)?;

    Ok(EncryptedEnvelope {
        ciphertext,
        nonce,
        salt,
        version: ENVELOPE_VERSION,
    })
}

/// Decrypt an envelope with `password`.
///
/// Fails with [`Error::BadVersion`] for unknown envelope versions and
/// [`Error::Undecryptable`] when authentication fails, whether because
/// the password is wrong or the bytes were altered.
pub fn open(envelope: &EncryptedEnvelope, password: &str) -> Result<Vec<u8>> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::BadVersion(envelope.version));
    }
    // Structural checks only; nothing here depends on the key.
    if envelope.salt.len() != SALT_LENGTH
        || envelope.nonce.len() != NONCE_LENGTH
        || envelope.ciphertext.len() < TAG_LENGTH
    {
        return Err(Error::Undecryptable);
    }

    let key = derive_key(password, &envelope.salt)?;
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key.as_slice()));
    cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| Error::Undecryptable)
}

/// Stretch `password` over `salt` with the version-1 scrypt parameters.
fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LENGTH)
        .map_err(|_| Error::InternalInvariantFailed)?;
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    scrypt::scrypt(password.as_bytes(), salt, &params, key.as_mut_slice())
        .map_err(|_| Error::InternalInvariantFailed)?;
    Ok(key)
}

mod base64_bytes {
    //! Standard-alphabet, padded base64 for serde byte fields.

    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::get_test_rng;
    use base64::{engine::general_purpose::STANDARD, Engine};

    #[test]
    fn seal_open_roundtrip() {
        let mut rng = get_test_rng();
        let envelope = seal(b"some secret bytes", "hunter2", &mut rng).unwrap();
        assert_eq!(open(&envelope, "hunter2").unwrap(), b"some secret bytes");
    }

    #[test]
    fn wrong_password_is_undecryptable() {
        let mut rng = get_test_rng();
        let envelope = seal(b"payload", "correct horse", &mut rng).unwrap();
        assert_eq!(
            open(&envelope, "correct horsf"),
            Err(Error::Undecryptable)
        );
    }

    #[test]
    fn tampered_ciphertext_is_undecryptable() {
        let mut rng = get_test_rng();
        let mut envelope = seal(b"payload", "pw", &mut rng).unwrap();
        envelope.ciphertext[0] ^= 0x01;
        assert_eq!(open(&envelope, "pw"), Err(Error::Undecryptable));
    }

    #[test]
    fn unknown_version_is_rejected_before_key_derivation() {
        let mut rng = get_test_rng();
        let mut envelope = seal(b"payload", "pw", &mut rng).unwrap();
        envelope.version = 2;
        assert_eq!(open(&envelope, "pw"), Err(Error::BadVersion(2)));
    }

    #[test]
    fn repeated_seal_produces_distinct_envelopes() {
        let mut rng = get_test_rng();
        let first = seal(b"same plaintext", "same password", &mut rng).unwrap();
        let second = seal(b"same plaintext", "same password", &mut rng).unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn wire_format_shape() {
        let mut rng = get_test_rng();
        let envelope = seal(b"0123456789", "pw", &mut rng).unwrap();
        let json = envelope.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], 1);
        let salt = STANDARD.decode(value["salt"].as_str().unwrap()).unwrap();
        let nonce = STANDARD.decode(value["nonce"].as_str().unwrap()).unwrap();
        let ciphertext = STANDARD
            .decode(value["ciphertext"].as_str().unwrap())
            .unwrap();
        assert_eq!(salt.len(), SALT_LENGTH);
        assert_eq!(nonce.len(), NONCE_LENGTH);
        assert_eq!(ciphertext.len(), 10 + TAG_LENGTH);

        let decoded = EncryptedEnvelope::from_json(&json).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert_eq!(
            EncryptedEnvelope::from_json("{\"nope\":true}"),
            Err(Error::Serialization)
        );
    }
}

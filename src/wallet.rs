// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The threshold wallet: splits a signing key into password-sealed
//! shares, collects opened shares back, and signs once the threshold is
//! met.
//!
//! The signing key exists in full only inside [`ThresholdWallet::create`]
//! / [`ThresholdWallet::import_key`] and, transiently, inside a signing
//! call. In both places it is wiped as soon as the operation finishes,
//! success or not. Collected shares are wiped on [`ThresholdWallet::lock`]
//! and after every signature.

use crate::{
    envelope::{self, EncryptedEnvelope},
    errors::{Error, Result},
    field::{CurvePoint, Scalar},
    sharing::{self, Share},
    signing::{
        self,
        framing::{self, Address},
        transaction::Transaction,
        RecoverableSignature,
    },
    utils::Identifier,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// How a key is split: how many shares exist, and how many reconstruct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareConfig {
    /// Number of shares issued, `2..=255`.
    pub total_shares: u8,
    /// Shares required to sign or recover, `2..=total_shares`.
    pub threshold: u8,
}

impl ShareConfig {
    /// Check the `2 <= threshold <= total_shares` constraints.
    pub fn validate(&self) -> Result<()> {
        sharing::validate_config(self.total_shares, self.threshold)
    }
}

/// The public, immutable identity of a wallet.
///
/// Every share record carries a copy; records agreeing on `key_id` agree
/// on everything else here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    /// Random 16-byte identifier binding shares to this wallet.
    pub key_id: Identifier,
    /// The aggregate public key.
    pub public_key: CurvePoint,
    /// Identifier derived from the public key.
    pub address: Address,
    /// The sharing configuration.
    pub config: ShareConfig,
}

/// A share sealed under its holder's password, as stored and transported.
///
/// The envelope's plaintext is the 64-hex-character share scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedShareRecord {
    /// The share's x-coordinate.
    pub index: u8,
    /// The sealed share value.
    pub encrypted_share: EncryptedEnvelope,
    /// Copied from the wallet state.
    pub public_key: CurvePoint,
    /// Copied from the wallet state.
    pub address: Address,
    /// Copied from the wallet state.
    pub key_id: Identifier,
    /// Copied from the wallet state.
    pub config: ShareConfig,
    /// Free-form holder label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl EncryptedShareRecord {
    /// Encode as the JSON wire record.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::Serialization)
    }

    /// Decode from the JSON wire record.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| Error::Serialization)
    }
}

/// A plaintext share record, produced exactly once at setup so the owner
/// can back their share up. Wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct PlainShareRecord {
    /// The share's x-coordinate.
    #[zeroize(skip)]
    pub index: u8,
    /// The share scalar itself.
    pub scalar: Scalar,
    /// Copied from the wallet state.
    #[zeroize(skip)]
    pub public_key: CurvePoint,
    /// Copied from the wallet state.
    #[zeroize(skip)]
    pub address: Address,
    /// Copied from the wallet state.
    #[zeroize(skip)]
    pub key_id: Identifier,
    /// Copied from the wallet state.
    #[zeroize(skip)]
    pub config: ShareConfig,
}

impl std::fmt::Debug for PlainShareRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainShareRecord")
            .field("index", &self.index)
            .field("scalar", &"[redacted]")
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Everything produced by wallet creation.
#[derive(Debug)]
pub struct CreateResult {
    /// The wallet's public identity.
    pub state: WalletState,
    /// One sealed record per share, in index order.
    pub sealed_shares: Vec<EncryptedShareRecord>,
    /// The plaintext shares, for the owner's immediate backup.
    pub plain_shares: Vec<PlainShareRecord>,
}

/// A wallet that signs by collecting a threshold of opened shares.
///
/// Not thread-safe; callers serialize access to an instance.
pub struct ThresholdWallet {
    state: Option<WalletState>,
    collected: BTreeMap<u8, Scalar>,
}

impl std::fmt::Debug for ThresholdWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdWallet")
            .field("state", &self.state)
            .field("collected_indices", &self.collected.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ThresholdWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl ThresholdWallet {
    /// An empty wallet; call [`Self::load_state`] or create a key first.
    pub fn new() -> Self {
        Self {
            state: None,
            collected: BTreeMap::new(),
        }
    }

    /// Generate a fresh signing key, split it, and seal each share under
    /// the corresponding password.
    ///
    /// `passwords[i]` seals the share with index `i + 1`. The wallet
    /// adopts the new state. Fails with [`Error::ConfigInvalid`] on bad
    /// configurations and [`Error::PasswordCountMismatch`] when the
    /// password count differs from `config.total_shares`.
    #[instrument(skip_all)]
    pub fn create<R: RngCore + CryptoRng>(
        &mut self,
        config: ShareConfig,
        passwords: &[&str],
        rng: &mut R,
    ) -> Result<CreateResult> {
        config.validate()?;
        let mut secret = Scalar::random(rng)?;
        let result = self.split_and_seal(&secret, config, passwords, rng);
        secret.zeroize();
        result
    }

    /// Like [`Self::create`], but for a key generated elsewhere (e.g.
    /// derived from a mnemonic by the host).
    ///
    /// Fails with [`Error::InvalidScalar`] unless the scalar is in
    /// `[1, n-1]`.
    #[instrument(skip_all)]
    pub fn import_key<R: RngCore + CryptoRng>(
        &mut self,
        secret: &Scalar,
        config: ShareConfig,
        passwords: &[&str],
        rng: &mut R,
    ) -> Result<CreateResult> {
        config.validate()?;
        secret.ensure_nonzero()?;
        self.split_and_seal(secret, config, passwords, rng)
    }

    fn split_and_seal<R: RngCore + CryptoRng>(
        &mut self,
        secret: &Scalar,
        config: ShareConfig,
        passwords: &[&str],
        rng: &mut R,
    ) -> Result<CreateResult> {
        if passwords.len() != usize::from(config.total_shares) {
            return Err(Error::PasswordCountMismatch {
                expected: usize::from(config.total_shares),
                actual: passwords.len(),
            });
        }

        let public_key = CurvePoint::generator_mul(secret);
        let address = framing::derive_address(&public_key);
        let key_id = Identifier::random(rng);
        let state = WalletState {
            key_id,
            public_key,
            address,
            config,
        };

        let shares = sharing::split(secret, config.total_shares, config.threshold, rng)?;

        let mut sealed_shares = Vec::with_capacity(shares.len());
        let mut plain_shares = Vec::with_capacity(shares.len());
        for (share, password) in shares.iter().zip(passwords) {
            let plaintext = Zeroizing::new(share.value().to_hex());
            let encrypted_share = envelope::seal(plaintext.as_bytes(), password, rng)?;
            sealed_shares.push(EncryptedShareRecord {
                index: share.index(),
                encrypted_share,
                public_key,
                address,
                key_id,
                config,
                label: None,
            });
            plain_shares.push(PlainShareRecord {
                index: share.index(),
                scalar: *share.value(),
                public_key,
                address,
                key_id,
                config,
            });
        }

        info!(%key_id, total = config.total_shares, threshold = config.threshold,
              "Created threshold wallet.");
        self.state = Some(state.clone());
        self.collected.clear();

        Ok(CreateResult {
            state,
            sealed_shares,
            plain_shares,
        })
    }

    /// Adopt a previously created wallet state, discarding any collected
    /// shares.
    pub fn load_state(&mut self, state: WalletState) {
        self.lock();
        self.state = Some(state);
    }

    /// The loaded wallet state, if any.
    pub fn state(&self) -> Option<&WalletState> {
        self.state.as_ref()
    }

    /// Open a sealed share with `password` and collect it.
    ///
    /// Returns `Ok(false)` when the password does not open the envelope,
    /// so callers can re-prompt without learning anything else. All other
    /// failures are errors: [`Error::WrongWallet`] when the record's key
    /// id does not match, [`Error::AlreadyCollected`] when the index is
    /// already present.
    #[instrument(skip_all, fields(index = record.index))]
    pub fn add_share(&mut self, record: &EncryptedShareRecord, password: &str) -> Result<bool> {
        let state = self.loaded_state()?;
        if record.key_id != state.key_id {
            return Err(Error::WrongWallet);
        }
        if self.collected.contains_key(&record.index) {
            return Err(Error::AlreadyCollected(record.index));
        }

        let plaintext = match envelope::open(&record.encrypted_share, password) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(Error::Undecryptable) => return Ok(false),
            Err(e) => return Err(e),
        };
        let hex = std::str::from_utf8(&plaintext).map_err(|_| Error::Serialization)?;
        let value = Scalar::from_hex(hex).map_err(|_| Error::Serialization)?;

        // Constructing the share validates the index range.
        let share = Share::new(record.index, value)?;
        let _ = self.collected.insert(share.index(), *share.value());
        info!("Collected share.");
        Ok(true)
    }

    /// Whether enough shares are collected to sign.
    pub fn can_sign(&self) -> bool {
        match &self.state {
            Some(state) => self.collected.len() >= usize::from(state.config.threshold),
            None => false,
        }
    }

    /// Number of shares currently collected.
    pub fn collected_count(&self) -> usize {
        self.collected.len()
    }

    /// Whether the share with this index is already collected.
    pub fn has_share(&self, index: u8) -> bool {
        self.collected.contains_key(&index)
    }

    /// Sign a raw 32-byte digest.
    pub fn sign_digest(&mut self, digest: &[u8; 32]) -> Result<RecoverableSignature> {
        self.sign_collected(digest)
    }

    /// Sign a personal message (prefixed framing, then Keccak-256).
    pub fn sign_message(&mut self, message: &[u8]) -> Result<RecoverableSignature> {
        self.sign_collected(&framing::personal_message_digest(message))
    }

    /// Sign a typed-data payload given its domain separator and struct
    /// hash.
    pub fn sign_typed(
        &mut self,
        domain_separator: &[u8; 32],
        struct_hash: &[u8; 32],
    ) -> Result<RecoverableSignature> {
        self.sign_collected(&framing::typed_data_digest(domain_separator, struct_hash))
    }

    /// Sign a transaction, returning the raw signed bytes ready for
    /// broadcast by the caller.
    pub fn sign_transaction(&mut self, transaction: &Transaction) -> Result<Vec<u8>> {
        let signature = self.sign_collected(&transaction.signing_digest())?;
        Ok(transaction.raw_signed(&signature))
    }

    /// Discard all collected shares, wiping them first.
    pub fn lock(&mut self) {
        for value in self.collected.values_mut() {
            value.zeroize();
        }
        self.collected.clear();
    }

    /// Reconstruct the key, sign, and wipe. The collected shares are
    /// consumed whether or not signing succeeds.
    #[instrument(skip_all)]
    fn sign_collected(&mut self, digest: &[u8; 32]) -> Result<RecoverableSignature> {
        let state = self.loaded_state()?;
        let threshold = state.config.threshold;
        if self.collected.len() < usize::from(threshold) {
            return Err(Error::NotEnoughShares {
                collected: self.collected.len(),
                threshold,
            });
        }

        let shares = self
            .collected
            .iter()
            .map(|(&index, value)| Share::new(index, *value))
            .collect::<Result<Vec<_>>>()?;
        let mut secret = sharing::combine(&shares)?;
        let result = signing::sign_digest(digest, &secret);
        secret.zeroize();
        drop(shares);
        self.lock();
        result
    }

    fn loaded_state(&self) -> Result<&WalletState> {
        self.state.as_ref().ok_or(Error::WrongWallet)
    }
}

impl Drop for ThresholdWallet {
    fn drop(&mut self) {
        self.lock();
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Guardian records and the invite/accept challenge.
//!
//! A guardian is a third party holding one sealed share. Enrollment runs
//! through an invite carrying a 6-digit verification code: the code is
//! delivered out-of-band exactly once, only its Keccak-256 hash persists
//! on the guardian record, and the response is checked against that hash
//! in constant time.
//!
//! Invites are transient: they expire, expired entries are dropped on
//! every scan, and they are never part of exported state.

use crate::{
    errors::{Error, Result},
    signing::framing::{keccak256, Address},
    utils::{Clock, Identifier, SystemClock},
    wallet::EncryptedShareRecord,
};
use displaydoc::Display;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use subtle::ConstantTimeEq;
use tracing::{info, instrument};

/// How long a fresh invite stays answerable: 72 hours.
pub const DEFAULT_INVITE_TTL_MS: u64 = 72 * 60 * 60 * 1000;

const VERIFICATION_CODE_DIGITS: usize = 6;

/// How a guardian is reached, out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ContactType {
    /// email
    Email,
    /// phone
    Phone,
    /// wallet
    Wallet,
    /// other
    Other,
}

/// Lifecycle of a guardian record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum GuardianStatus {
    /// pending
    Pending,
    /// accepted
    Accepted,
    /// declined
    Declined,
    /// revoked
    Revoked,
}

/// One guardian of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guardian {
    /// Random identifier.
    pub id: Identifier,
    /// Display name.
    pub name: String,
    /// Out-of-band contact detail.
    pub contact: String,
    /// What kind of contact detail it is.
    pub contact_type: ContactType,
    /// The share index this guardian holds; unique within a wallet.
    pub share_index: u8,
    /// Current lifecycle state.
    pub status: GuardianStatus,
    /// When the record was created, ms since epoch.
    pub added_at: u64,
    /// When the guardian accepted, if they have.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<u64>,
    /// Lower-hex Keccak-256 of the invite verification code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_hash: Option<String>,
}

/// An invite for a guardian to take custody of a sealed share.
///
/// The verification code is populated only on the value returned to the
/// caller; the copy retained for bookkeeping holds an empty string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianInvite {
    /// Random identifier.
    pub id: Identifier,
    /// The guardian this invite addresses.
    pub guardian_id: Identifier,
    /// The wallet the share belongs to.
    pub wallet_address: Address,
    /// The sealed share the guardian will hold.
    pub encrypted_share: EncryptedShareRecord,
    /// Six decimal digits, delivered out-of-band exactly once.
    pub verification_code: String,
    /// When the invite stops being answerable, ms since epoch.
    pub expires_at: u64,
    /// When the invite was created, ms since epoch.
    pub created_at: u64,
}

impl std::fmt::Debug for GuardianInvite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardianInvite")
            .field("id", &self.id)
            .field("guardian_id", &self.guardian_id)
            .field("wallet_address", &self.wallet_address)
            .field("verification_code", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The guardian table and its pending invites.
///
/// Not thread-safe; callers serialize access to an instance.
#[derive(Debug)]
pub struct GuardianManager {
    clock: Arc<dyn Clock>,
    invite_ttl_ms: u64,
    guardians: BTreeMap<Identifier, Guardian>,
    invites: BTreeMap<Identifier, GuardianInvite>,
}

impl Default for GuardianManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardianManager {
    /// A manager on the system clock with the default invite TTL.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A manager reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            invite_ttl_ms: DEFAULT_INVITE_TTL_MS,
            guardians: BTreeMap::new(),
            invites: BTreeMap::new(),
        }
    }

    /// Register a guardian in the `Pending` state.
    ///
    /// Fails with [`Error::ConfigInvalid`] if the share index is zero or
    /// already assigned to another guardian.
    #[instrument(skip_all)]
    pub fn add_guardian<R: RngCore + CryptoRng>(
        &mut self,
        name: &str,
        contact: &str,
        contact_type: ContactType,
        share_index: u8,
        rng: &mut R,
    ) -> Result<Guardian> {
        if share_index == 0 {
            return Err(Error::ConfigInvalid(
                "guardian share index 0 is forbidden".to_string(),
            ));
        }
        if self.get_by_share_index(share_index).is_some() {
            return Err(Error::ConfigInvalid(format!(
                "share index {share_index} is already assigned"
            )));
        }

        let guardian = Guardian {
            id: Identifier::random(rng),
            name: name.to_string(),
            contact: contact.to_string(),
            contact_type,
            share_index,
            status: GuardianStatus::Pending,
            added_at: self.clock.now_ms(),
            accepted_at: None,
            verification_hash: None,
        };
        let _ = self.guardians.insert(guardian.id, guardian.clone());
        info!(guardian = %guardian.id, "Added guardian.");
        Ok(guardian)
    }

    /// Create an invite for a registered guardian.
    ///
    /// The returned invite carries the plaintext verification code; the
    /// retained copy does not, and only the code's hash is stored on the
    /// guardian record.
    #[instrument(skip_all)]
    pub fn create_invite<R: RngCore + CryptoRng>(
        &mut self,
        guardian_id: Identifier,
        wallet_address: Address,
        encrypted_share: EncryptedShareRecord,
        rng: &mut R,
    ) -> Result<GuardianInvite> {
        let now = self.clock.now_ms();
        let invite_id = Identifier::random(rng);
        let verification_code: String = (0..VERIFICATION_CODE_DIGITS)
            .map(|_| char::from(b'0' + rng.gen_range(0u8..10)))
            .collect();
        let code_hash = hex::encode(keccak256(verification_code.as_bytes()));

        let guardian = self
            .guardians
            .get_mut(&guardian_id)
            .ok_or(Error::GuardianNotFound)?;
        guardian.verification_hash = Some(code_hash);

        let invite = GuardianInvite {
            id: invite_id,
            guardian_id,
            wallet_address,
            encrypted_share,
            verification_code,
            expires_at: now + self.invite_ttl_ms,
            created_at: now,
        };
        let mut retained = invite.clone();
        retained.verification_code = String::new();
        let _ = self.invites.insert(retained.id, retained);

        info!(invite = %invite.id, guardian = %guardian_id, "Created guardian invite.");
        Ok(invite)
    }

    /// Process a guardian's response to an invite.
    ///
    /// The verification code is hashed and compared against the stored
    /// hash in constant time. On a match the guardian becomes `Accepted`
    /// (recording the acceptance time) or `Declined`, and the invite is
    /// dropped either way.
    #[instrument(skip(self, verification_code))]
    pub fn process_response(
        &mut self,
        invite_id: Identifier,
        guardian_id: Identifier,
        accepted: bool,
        verification_code: &str,
    ) -> Result<GuardianStatus> {
        let now = self.clock.now_ms();

        let expired = match self.invites.get(&invite_id) {
            None => return Err(Error::InviteNotFound),
            Some(invite) => now > invite.expires_at,
        };
        if expired {
            let _ = self.invites.remove(&invite_id);
            self.sweep_expired(now);
            return Err(Error::InviteExpired);
        }
        self.sweep_expired(now);

        let invite = self.invites.get(&invite_id).ok_or(Error::InviteNotFound)?;
        if invite.guardian_id != guardian_id {
            return Err(Error::InviteNotFound);
        }

        let guardian = self
            .guardians
            .get_mut(&guardian_id)
            .ok_or(Error::GuardianNotFound)?;
        let stored_hash = guardian
            .verification_hash
            .as_ref()
            .ok_or(Error::BadCode)?;
        let stored: [u8; 32] = hex::decode(stored_hash)
            .map_err(|_| Error::InternalInvariantFailed)?
            .try_into()
            .map_err(|_| Error::InternalInvariantFailed)?;
        let received = keccak256(verification_code.as_bytes());
        if !bool::from(received.ct_eq(&stored)) {
            return Err(Error::BadCode);
        }

        guardian.status = if accepted {
            guardian.accepted_at = Some(now);
            GuardianStatus::Accepted
        } else {
            GuardianStatus::Declined
        };
        let status = guardian.status;
        let _ = self.invites.remove(&invite_id);
        info!(guardian = %guardian_id, ?status, "Processed guardian response.");
        Ok(status)
    }

    /// Mark a guardian as revoked. Their share index stays reserved.
    pub fn revoke(&mut self, guardian_id: Identifier) -> Result<()> {
        let guardian = self
            .guardians
            .get_mut(&guardian_id)
            .ok_or(Error::GuardianNotFound)?;
        guardian.status = GuardianStatus::Revoked;
        Ok(())
    }

    /// A guardian by id.
    pub fn get(&self, guardian_id: Identifier) -> Option<&Guardian> {
        self.guardians.get(&guardian_id)
    }

    /// All guardians, in id order.
    pub fn get_all(&self) -> Vec<&Guardian> {
        self.guardians.values().collect()
    }

    /// Guardians that have accepted.
    pub fn get_active(&self) -> Vec<&Guardian> {
        self.guardians
            .values()
            .filter(|g| g.status == GuardianStatus::Accepted)
            .collect()
    }

    /// The guardian holding a given share index, if any.
    pub fn get_by_share_index(&self, share_index: u8) -> Option<&Guardian> {
        self.guardians
            .values()
            .find(|g| g.share_index == share_index)
    }

    /// Whether the accepted guardians alone can reach `threshold`.
    pub fn has_enough(&self, threshold: u8) -> bool {
        self.get_active().len() >= usize::from(threshold)
    }

    /// Pending invites, with expired entries dropped first.
    pub fn pending_invites(&mut self) -> Vec<&GuardianInvite> {
        let now = self.clock.now_ms();
        self.sweep_expired(now);
        self.invites.values().collect()
    }

    /// The guardian table, for persistence. Invites are transient and
    /// deliberately excluded.
    pub fn export_guardians(&self) -> Vec<Guardian> {
        self.guardians.values().cloned().collect()
    }

    /// Replace the guardian table with previously exported records.
    ///
    /// Fails with [`Error::ConfigInvalid`] if two records share an index.
    pub fn import_guardians(&mut self, guardians: Vec<Guardian>) -> Result<()> {
        let mut seen = [false; 256];
        for guardian in &guardians {
            if guardian.share_index == 0 || seen[usize::from(guardian.share_index)] {
                return Err(Error::ConfigInvalid(format!(
                    "invalid or duplicate share index {}",
                    guardian.share_index
                )));
            }
            seen[usize::from(guardian.share_index)] = true;
        }
        self.guardians = guardians.into_iter().map(|g| (g.id, g)).collect();
        self.invites.clear();
        Ok(())
    }

    fn sweep_expired(&mut self, now: u64) {
        self.invites.retain(|_, invite| now <= invite.expires_at);
    }
}

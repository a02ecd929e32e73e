// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The social-recovery wallet: one surface over the envelope cipher, the
//! threshold wallet, the guardian table, and the recovery coordinator.
//!
//! At setup the key is split so that the first `owner_shares` shares are
//! sealed under the owner's password and kept with the wallet, while the
//! remaining shares become guardian invites. The configuration
//! guarantees the guardians alone can reach the threshold, so the owner
//! can lose everything and still recover through them.

use crate::{
    errors::{Error, Result},
    field::Scalar,
    guardian::{ContactType, Guardian, GuardianInvite, GuardianManager, GuardianStatus},
    recovery::{
        InitiateParams, RecoveryConfig, RecoveryCoordinator, RecoveryRequest,
    },
    signing::{transaction::Transaction, RecoverableSignature},
    utils::{Clock, Identifier, SystemClock},
    wallet::{
        CreateResult, EncryptedShareRecord, PlainShareRecord, ShareConfig, ThresholdWallet,
        WalletState,
    },
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Configuration of a social-recovery wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialRecoveryConfig {
    /// Total shares issued.
    pub total_shares: u8,
    /// Shares required to sign or recover.
    pub threshold: u8,
    /// Shares kept by the owner; the rest go to guardians.
    pub owner_shares: u8,
    /// Timelock between recovery approval and executability.
    pub timelock_hours: u64,
    /// How long a recovery request stays answerable.
    pub expiration_days: u64,
    /// Minimum interval between recovery initiations.
    pub cooldown_hours: u64,
}

impl SocialRecoveryConfig {
    /// Check every structural constraint:
    /// `threshold >= 2`, `owner_shares >= 1`, `total_shares >= threshold`,
    /// `owner_shares <= total_shares - 1`, and enough guardian shares
    /// that the guardians alone can reach the threshold.
    pub fn validate(&self) -> Result<()> {
        let share_config = self.share_config();
        share_config.validate()?;
        if self.owner_shares < 1 {
            return Err(Error::ConfigInvalid(
                "the owner must hold at least one share".to_string(),
            ));
        }
        if self.owner_shares > self.total_shares - 1 {
            return Err(Error::ConfigInvalid(
                "at least one share must go to a guardian".to_string(),
            ));
        }
        if self.guardian_shares() < self.threshold {
            return Err(Error::ConfigInvalid(format!(
                "guardians hold {} shares but recovery needs {}",
                self.guardian_shares(),
                self.threshold
            )));
        }
        Ok(())
    }

    /// Shares held by guardians.
    pub fn guardian_shares(&self) -> u8 {
        self.total_shares - self.owner_shares
    }

    fn share_config(&self) -> ShareConfig {
        ShareConfig {
            total_shares: self.total_shares,
            threshold: self.threshold,
        }
    }

    fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            timelock_ms: self.timelock_hours * HOUR_MS,
            expiration_ms: self.expiration_days * DAY_MS,
            cooldown_ms: self.cooldown_hours * HOUR_MS,
        }
    }
}

/// A guardian to enroll at setup.
#[derive(Debug, Clone)]
pub struct GuardianDescriptor {
    /// Display name.
    pub name: String,
    /// Out-of-band contact detail.
    pub contact: String,
    /// What kind of contact detail it is.
    pub contact_type: ContactType,
    /// The password their share is sealed under.
    pub share_password: String,
}

/// Everything produced by [`SocialRecoveryWallet::setup`].
#[derive(Debug)]
pub struct SetupResult {
    /// The wallet's public identity.
    pub wallet_state: WalletState,
    /// One invite per guardian, each carrying a sealed share and a
    /// verification code to deliver out-of-band.
    pub guardian_invites: Vec<GuardianInvite>,
    /// The owner's plaintext shares, for immediate backup.
    pub owner_plain_shares: Vec<PlainShareRecord>,
}

/// A wallet whose key can be recovered by its guardians.
///
/// Not thread-safe; callers serialize access to an instance.
#[derive(Debug)]
pub struct SocialRecoveryWallet {
    config: SocialRecoveryConfig,
    wallet: ThresholdWallet,
    guardians: GuardianManager,
    recovery: RecoveryCoordinator,
    owner_shares: Vec<EncryptedShareRecord>,
}

impl SocialRecoveryWallet {
    /// Build an empty wallet on the system clock.
    pub fn new(config: SocialRecoveryConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build an empty wallet reading time from `clock`.
    pub fn with_clock(config: SocialRecoveryConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            wallet: ThresholdWallet::new(),
            guardians: GuardianManager::with_clock(clock.clone()),
            recovery: RecoveryCoordinator::with_clock(config.recovery_config(), clock),
            owner_shares: Vec::new(),
        })
    }

    /// Generate a key, split it, and enroll the guardians.
    ///
    /// The first `owner_shares` shares are sealed under `owner_password`
    /// and retained; each remaining share is sealed under its guardian's
    /// password and handed back inside an invite.
    #[instrument(skip_all)]
    pub fn setup<R: RngCore + CryptoRng>(
        &mut self,
        owner_password: &str,
        guardian_descriptors: &[GuardianDescriptor],
        rng: &mut R,
    ) -> Result<SetupResult> {
        self.finish_setup(None, owner_password, guardian_descriptors, rng)
    }

    /// Like [`Self::setup`], but splitting a key generated elsewhere.
    #[instrument(skip_all)]
    pub fn setup_with_key<R: RngCore + CryptoRng>(
        &mut self,
        secret: &Scalar,
        owner_password: &str,
        guardian_descriptors: &[GuardianDescriptor],
        rng: &mut R,
    ) -> Result<SetupResult> {
        self.finish_setup(Some(secret), owner_password, guardian_descriptors, rng)
    }

    fn finish_setup<R: RngCore + CryptoRng>(
        &mut self,
        secret: Option<&Scalar>,
        owner_password: &str,
        guardian_descriptors: &[GuardianDescriptor],
        rng: &mut R,
    ) -> Result<SetupResult> {
        let expected_guardians = usize::from(self.config.guardian_shares());
        if guardian_descriptors.len() != expected_guardians {
            return Err(Error::ConfigInvalid(format!(
                "expected {expected_guardians} guardian descriptors, got {}",
                guardian_descriptors.len()
            )));
        }

        // Owner shares are all sealed under the one owner password.
        let mut passwords = vec![owner_password; usize::from(self.config.owner_shares)];
        passwords.extend(guardian_descriptors.iter().map(|d| d.share_password.as_str()));

        let CreateResult {
            state,
            sealed_shares,
            mut plain_shares,
        } = match secret {
            Some(secret) => {
                self.wallet
                    .import_key(secret, self.config.share_config(), &passwords, rng)?
            }
            None => self
                .wallet
                .create(self.config.share_config(), &passwords, rng)?,
        };

        let owner_count = usize::from(self.config.owner_shares);
        self.owner_shares = sealed_shares[..owner_count].to_vec();

        let mut guardian_invites = Vec::with_capacity(expected_guardians);
        for (descriptor, sealed) in guardian_descriptors
            .iter()
            .zip(sealed_shares[owner_count..].iter())
        {
            let guardian = self.guardians.add_guardian(
                &descriptor.name,
                &descriptor.contact,
                descriptor.contact_type,
                sealed.index,
                rng,
            )?;
            let invite = self.guardians.create_invite(
                guardian.id,
                state.address,
                sealed.clone(),
                rng,
            )?;
            guardian_invites.push(invite);
        }

        // Only the owner's plaintext shares leave this function.
        plain_shares.truncate(owner_count);

        info!(wallet = %state.address, guardians = expected_guardians, "Finished setup.");
        Ok(SetupResult {
            wallet_state: state,
            guardian_invites,
            owner_plain_shares: plain_shares,
        })
    }

    /// Adopt a previously created wallet state and its sealed owner
    /// shares, as after a restart.
    pub fn load(
        &mut self,
        state: WalletState,
        owner_shares: Vec<EncryptedShareRecord>,
        guardians: Vec<Guardian>,
    ) -> Result<()> {
        self.wallet.load_state(state);
        self.owner_shares = owner_shares;
        self.guardians.import_guardians(guardians)
    }

    /// Open every owner share with `password` and collect them.
    ///
    /// Returns `false` if the password fails on any owner share, so the
    /// caller can re-prompt. Shares already collected are skipped.
    #[instrument(skip_all)]
    pub fn unlock_owner_shares(&mut self, password: &str) -> Result<bool> {
        for record in &self.owner_shares {
            if self.wallet.has_share(record.index) {
                continue;
            }
            if !self.wallet.add_share(record, password)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Collect a guardian's sealed share, e.g. during assisted signing.
    ///
    /// Returns `false` when the password does not open the envelope.
    pub fn add_guardian_share(
        &mut self,
        record: &EncryptedShareRecord,
        password: &str,
    ) -> Result<bool> {
        self.wallet.add_share(record, password)
    }

    /// Whether enough shares are collected to sign.
    pub fn can_sign(&self) -> bool {
        self.wallet.can_sign()
    }

    /// Sign a raw 32-byte digest.
    pub fn sign_digest(&mut self, digest: &[u8; 32]) -> Result<RecoverableSignature> {
        self.wallet.sign_digest(digest)
    }

    /// Sign a personal message.
    pub fn sign_message(&mut self, message: &[u8]) -> Result<RecoverableSignature> {
        self.wallet.sign_message(message)
    }

    /// Sign a typed-data payload.
    pub fn sign_typed(
        &mut self,
        domain_separator: &[u8; 32],
        struct_hash: &[u8; 32],
    ) -> Result<RecoverableSignature> {
        self.wallet.sign_typed(domain_separator, struct_hash)
    }

    /// Sign a transaction, returning the raw signed bytes.
    pub fn sign_transaction(&mut self, transaction: &Transaction) -> Result<Vec<u8>> {
        self.wallet.sign_transaction(transaction)
    }

    /// Discard all collected shares.
    pub fn lock(&mut self) {
        self.wallet.lock();
    }

    /// The wallet's public identity, once set up or loaded.
    pub fn wallet_state(&self) -> Option<&WalletState> {
        self.wallet.state()
    }

    /// The sealed owner shares.
    pub fn owner_share_records(&self) -> &[EncryptedShareRecord] {
        &self.owner_shares
    }

    /// The guardian table.
    pub fn guardians(&self) -> &GuardianManager {
        &self.guardians
    }

    /// Process a guardian's response to their invite.
    pub fn process_guardian_response(
        &mut self,
        invite_id: Identifier,
        guardian_id: Identifier,
        accepted: bool,
        verification_code: &str,
    ) -> Result<GuardianStatus> {
        self.guardians
            .process_response(invite_id, guardian_id, accepted, verification_code)
    }

    /// Revoke a guardian.
    pub fn revoke_guardian(&mut self, guardian_id: Identifier) -> Result<()> {
        self.guardians.revoke(guardian_id)
    }

    /// Start a recovery request for this wallet.
    #[instrument(skip_all)]
    pub fn initiate_recovery<R: RngCore + CryptoRng>(
        &mut self,
        initiator: &str,
        reason: &str,
        rng: &mut R,
    ) -> Result<RecoveryRequest> {
        let state = self.wallet.state().ok_or(Error::WrongWallet)?;
        self.recovery.initiate(
            InitiateParams {
                wallet_address: state.address,
                key_id: state.key_id,
                initiator: initiator.to_string(),
                reason: reason.to_string(),
                threshold: self.config.threshold,
            },
            rng,
        )
    }

    /// Record a guardian's approval, forwarding the share index from
    /// their record.
    pub fn add_recovery_approval(
        &mut self,
        request_id: Identifier,
        guardian_id: Identifier,
        share_value: Scalar,
    ) -> Result<RecoveryRequest> {
        let share_index = self
            .guardians
            .get(guardian_id)
            .ok_or(Error::GuardianNotFound)?
            .share_index;
        self.recovery
            .add_approval(request_id, guardian_id, share_index, share_value)
    }

    /// Execute a ready request, returning the reconstructed key scalar.
    pub fn execute_recovery(&mut self, request_id: Identifier) -> Result<Scalar> {
        self.recovery.execute(request_id)
    }

    /// Cancel a live request.
    pub fn cancel_recovery(&mut self, request_id: Identifier) -> Result<()> {
        self.recovery.cancel(request_id)
    }

    /// This wallet's live recovery request, if one exists.
    pub fn pending_recovery(&mut self) -> Option<RecoveryRequest> {
        let address = self.wallet.state()?.address;
        self.recovery.get_pending_request(address)
    }

    /// A recovery request by id, with status projection applied.
    pub fn recovery_request(&mut self, request_id: Identifier) -> Option<RecoveryRequest> {
        self.recovery.get_request(request_id)
    }

    /// Approval progress of a request.
    pub fn recovery_progress(
        &mut self,
        request_id: Identifier,
    ) -> Result<crate::recovery::ApprovalProgress> {
        self.recovery.approval_progress(request_id)
    }

    /// Milliseconds until a request's timelock elapses.
    pub fn recovery_timelock_remaining(&mut self, request_id: Identifier) -> Result<u64> {
        self.recovery.timelock_remaining(request_id)
    }

    /// The guardian table for persistence; invites are transient and
    /// never exported.
    pub fn export_guardians(&self) -> Vec<Guardian> {
        self.guardians.export_guardians()
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The recovery request state machine.
//!
//! A request moves `pending -> approved` once the guardian threshold is
//! met, `approved -> ready` once its timelock elapses, and `ready ->
//! executed` when the shares are combined. `cancelled` and `expired` are
//! the other two terminal states; no terminal state ever transitions
//! again. Expiry and timelock promotion are a lazy projection applied on
//! every read, so two calls at the same clock reading always agree.
//!
//! Initiation is rate-limited per wallet by a cooldown, and at most one
//! non-terminal request per wallet exists at any time. Cancellation wipes
//! every collected approval share before the request is observable
//! again.

use crate::{
    errors::{Error, Result},
    field::Scalar,
    sharing::{self, Share},
    signing::framing::Address,
    utils::{Clock, Identifier, SystemClock},
};
use displaydoc::Display;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{info, instrument};
use zeroize::Zeroize;

/// Durations governing every request a coordinator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryConfig {
    /// Delay between approval and executability, during which the owner
    /// can cancel.
    pub timelock_ms: u64,
    /// How long a request stays answerable before expiring.
    pub expiration_ms: u64,
    /// Minimum interval between initiations for one wallet.
    pub cooldown_ms: u64,
}

/// Lifecycle of a recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    /// pending
    Pending,
    /// approved
    Approved,
    /// ready
    Ready,
    /// executed
    Executed,
    /// cancelled
    Cancelled,
    /// expired
    Expired,
}

impl RecoveryStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled | Self::Expired)
    }
}

/// One guardian's contribution to a recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianApproval {
    /// The approving guardian.
    pub guardian_id: Identifier,
    /// The x-coordinate of their share.
    pub share_index: u8,
    /// Their decrypted share value; wiped if the request is cancelled.
    pub share_value: Scalar,
    /// When the approval was recorded, ms since epoch.
    pub approved_at: u64,
}

/// A request to reconstruct a wallet's key from guardian shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequest {
    /// Random identifier.
    pub id: Identifier,
    /// The wallet being recovered.
    pub wallet_address: Address,
    /// The key the approvals must belong to.
    pub key_id: Identifier,
    /// Who started the recovery.
    pub initiator: String,
    /// Free-form reason.
    pub reason: String,
    /// Current lifecycle state, as of the last projection.
    pub status: RecoveryStatus,
    /// Approvals needed to reach `approved`.
    pub threshold: u8,
    /// Approvals collected so far; at most one per guardian.
    pub approvals: Vec<GuardianApproval>,
    /// The timelock applied once approved.
    pub timelock_ms: u64,
    /// When the request was created, ms since epoch.
    pub created_at: u64,
    /// When the threshold was reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<u64>,
    /// When the timelock elapses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timelock_expires_at: Option<u64>,
    /// When the request expires.
    pub expires_at: u64,
    /// When the request was executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<u64>,
    /// The reconstructed secret; present only once executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_secret: Option<Scalar>,
}

/// Inputs to [`RecoveryCoordinator::initiate`].
#[derive(Debug, Clone)]
pub struct InitiateParams {
    /// The wallet being recovered.
    pub wallet_address: Address,
    /// The key the approvals must belong to.
    pub key_id: Identifier,
    /// Who is asking.
    pub initiator: String,
    /// Why.
    pub reason: String,
    /// Approvals required.
    pub threshold: u8,
}

/// Progress of approval collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalProgress {
    /// Approvals collected.
    pub current: usize,
    /// Approvals required.
    pub required: usize,
    /// `current / required`, in whole percent, capped at 100.
    pub percentage: u8,
}

/// Manages the recovery requests of any number of wallets.
///
/// Not thread-safe; callers serialize access to an instance.
#[derive(Debug)]
pub struct RecoveryCoordinator {
    clock: Arc<dyn Clock>,
    config: RecoveryConfig,
    requests: BTreeMap<Identifier, RecoveryRequest>,
    last_attempt_at: BTreeMap<Address, u64>,
}

impl RecoveryCoordinator {
    /// A coordinator on the system clock.
    pub fn new(config: RecoveryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// A coordinator reading time from `clock`.
    pub fn with_clock(config: RecoveryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            config,
            requests: BTreeMap::new(),
            last_attempt_at: BTreeMap::new(),
        }
    }

    /// Open a new recovery request.
    ///
    /// Fails with [`Error::Cooldown`] inside the per-wallet cooldown
    /// window and [`Error::AlreadyPending`] while another request for
    /// the wallet is still live. The attempt counts against the cooldown
    /// whether or not the request ever completes.
    #[instrument(skip_all, fields(wallet = %params.wallet_address))]
    pub fn initiate<R: RngCore + CryptoRng>(
        &mut self,
        params: InitiateParams,
        rng: &mut R,
    ) -> Result<RecoveryRequest> {
        let now = self.clock.now_ms();

        if let Some(&last) = self.last_attempt_at.get(&params.wallet_address) {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.config.cooldown_ms {
                return Err(Error::Cooldown {
                    remaining_ms: self.config.cooldown_ms - elapsed,
                });
            }
        }
        if self.live_request_id(params.wallet_address, now).is_some() {
            return Err(Error::AlreadyPending);
        }

        let request = RecoveryRequest {
            id: Identifier::random(rng),
            wallet_address: params.wallet_address,
            key_id: params.key_id,
            initiator: params.initiator,
            reason: params.reason,
            status: RecoveryStatus::Pending,
            threshold: params.threshold,
            approvals: Vec::new(),
            timelock_ms: self.config.timelock_ms,
            created_at: now,
            approved_at: None,
            timelock_expires_at: None,
            expires_at: now + self.config.expiration_ms,
            executed_at: None,
            recovered_secret: None,
        };
        let _ = self.last_attempt_at.insert(params.wallet_address, now);
        let _ = self.requests.insert(request.id, request.clone());
        info!(request = %request.id, "Initiated recovery.");
        Ok(request)
    }

    /// Record a guardian's approval.
    ///
    /// Valid only while the request is `pending` or `approved`; a second
    /// approval from the same guardian fails with
    /// [`Error::DuplicateGuardian`], and a zero or out-of-range share
    /// value with [`Error::InvalidScalar`]. Reaching the threshold
    /// transitions the request to `approved` and starts the timelock.
    #[instrument(skip_all, fields(request = %request_id, guardian = %guardian_id))]
    pub fn add_approval(
        &mut self,
        request_id: Identifier,
        guardian_id: Identifier,
        share_index: u8,
        share_value: Scalar,
    ) -> Result<RecoveryRequest> {
        let now = self.clock.now_ms();
        let request = self
            .requests
            .get_mut(&request_id)
            .ok_or(Error::RequestNotFound)?;
        project_status(request, now);

        if !matches!(
            request.status,
            RecoveryStatus::Pending | RecoveryStatus::Approved
        ) {
            return Err(Error::InvalidState(request.status.to_string()));
        }
        if request
            .approvals
            .iter()
            .any(|approval| approval.guardian_id == guardian_id)
        {
            return Err(Error::DuplicateGuardian);
        }
        share_value.ensure_nonzero()?;
        if share_index == 0 {
            return Err(Error::InvalidScalar);
        }

        request.approvals.push(GuardianApproval {
            guardian_id,
            share_index,
            share_value,
            approved_at: now,
        });

        if request.status == RecoveryStatus::Pending
            && request.approvals.len() >= usize::from(request.threshold)
        {
            request.status = RecoveryStatus::Approved;
            request.approved_at = Some(now);
            request.timelock_expires_at = Some(now + request.timelock_ms);
            info!("Recovery request approved; timelock started.");
        }
        // A zero timelock makes the request ready immediately.
        project_status(request, now);
        Ok(request.clone())
    }

    /// Combine the approval shares and finish the request.
    ///
    /// Valid only in `ready`. The reconstructed scalar is returned and
    /// also recorded on the request per its data model; the caller is
    /// responsible for wiping its own copy when done.
    #[instrument(skip_all, fields(request = %request_id))]
    pub fn execute(&mut self, request_id: Identifier) -> Result<Scalar> {
        let now = self.clock.now_ms();
        let request = self
            .requests
            .get_mut(&request_id)
            .ok_or(Error::RequestNotFound)?;
        project_status(request, now);

        if request.status != RecoveryStatus::Ready {
            return Err(Error::InvalidState(request.status.to_string()));
        }

        let shares = request
            .approvals
            .iter()
            .map(|approval| Share::new(approval.share_index, approval.share_value))
            .collect::<Result<Vec<_>>>()?;
        let secret = sharing::combine(&shares)?;

        request.recovered_secret = Some(secret);
        request.executed_at = Some(now);
        request.status = RecoveryStatus::Executed;
        info!("Recovery executed.");
        Ok(secret)
    }

    /// Cancel a live request, wiping every collected approval share.
    #[instrument(skip_all, fields(request = %request_id))]
    pub fn cancel(&mut self, request_id: Identifier) -> Result<()> {
        let now = self.clock.now_ms();
        let request = self
            .requests
            .get_mut(&request_id)
            .ok_or(Error::RequestNotFound)?;
        project_status(request, now);

        if !matches!(
            request.status,
            RecoveryStatus::Pending | RecoveryStatus::Approved | RecoveryStatus::Ready
        ) {
            return Err(Error::InvalidState(request.status.to_string()));
        }

        request.status = RecoveryStatus::Cancelled;
        for approval in request.approvals.iter_mut() {
            approval.share_value.zeroize();
        }
        info!("Recovery cancelled; approval shares wiped.");
        Ok(())
    }

    /// A request by id, with the lazy status projection applied.
    pub fn get_request(&mut self, request_id: Identifier) -> Option<RecoveryRequest> {
        let now = self.clock.now_ms();
        let request = self.requests.get_mut(&request_id)?;
        project_status(request, now);
        Some(request.clone())
    }

    /// The wallet's live (non-terminal) request, if one exists.
    pub fn get_pending_request(&mut self, wallet_address: Address) -> Option<RecoveryRequest> {
        let now = self.clock.now_ms();
        let id = self.live_request_id(wallet_address, now)?;
        self.requests.get(&id).cloned()
    }

    /// How far approval collection has come.
    pub fn approval_progress(&mut self, request_id: Identifier) -> Result<ApprovalProgress> {
        let request = self
            .get_request(request_id)
            .ok_or(Error::RequestNotFound)?;
        let current = request.approvals.len();
        let required = usize::from(request.threshold);
        let percentage = ((current * 100) / required.max(1)).min(100) as u8;
        Ok(ApprovalProgress {
            current,
            required,
            percentage,
        })
    }

    /// Milliseconds until the timelock elapses; zero when there is no
    /// running timelock.
    pub fn timelock_remaining(&mut self, request_id: Identifier) -> Result<u64> {
        let now = self.clock.now_ms();
        let request = self
            .get_request(request_id)
            .ok_or(Error::RequestNotFound)?;
        match (request.status, request.timelock_expires_at) {
            (RecoveryStatus::Approved, Some(deadline)) => Ok(deadline.saturating_sub(now)),
            _ => Ok(0),
        }
    }

    /// Find the wallet's non-terminal request, projecting every scanned
    /// entry first.
    fn live_request_id(&mut self, wallet_address: Address, now: u64) -> Option<Identifier> {
        for request in self.requests.values_mut() {
            if request.wallet_address != wallet_address {
                continue;
            }
            project_status(request, now);
            if !request.status.is_terminal() {
                return Some(request.id);
            }
        }
        None
    }
}

/// The lazy status projection. Deterministic in `(request, now)` and
/// idempotent; terminal states are never touched.
fn project_status(request: &mut RecoveryRequest, now: u64) {
    if request.status.is_terminal() {
        return;
    }
    if now > request.expires_at {
        request.status = RecoveryStatus::Expired;
        return;
    }
    if request.status == RecoveryStatus::Approved {
        if let Some(deadline) = request.timelock_expires_at {
            if now >= deadline {
                request.status = RecoveryStatus::Ready;
            }
        }
    }
}

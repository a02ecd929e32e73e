// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A list of error types which are produced by the wallet core.
//!
//! Every failure a caller can sensibly branch on gets its own variant;
//! anything else is an internal invariant violation.

use thiserror::Error;

/// The default Result type used in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error produced by the wallet core.
#[derive(Clone, Eq, PartialEq, Error, Debug)]
pub enum Error {
    /// Threshold/total/owner-share constraints were violated.
    #[error("Invalid sharing configuration: `{0}`")]
    ConfigInvalid(String),
    /// The number of passwords supplied differs from the share count.
    #[error("Expected `{expected}` passwords but got `{actual}`")]
    PasswordCountMismatch {
        /// Number of shares being sealed.
        expected: usize,
        /// Number of passwords supplied.
        actual: usize,
    },
    /// The envelope carries a version this build does not understand.
    #[error("Unknown envelope version `{0}`")]
    BadVersion(u8),
    /// Wrong password or tampered ciphertext. The MAC check is
    /// constant-time; the two causes are deliberately indistinguishable.
    #[error("Could not decrypt envelope")]
    Undecryptable,
    /// Combining requires at least two shares.
    #[error("Too few shares: got `{0}`, need at least 2")]
    TooFewShares(usize),
    /// Two shares carry the same x-coordinate.
    #[error("Duplicate share index `{0}`")]
    DuplicateIndex(u8),
    /// Signing was attempted below the wallet threshold.
    #[error("Not enough shares collected: have `{collected}`, need `{threshold}`")]
    NotEnoughShares {
        /// Shares currently collected.
        collected: usize,
        /// The wallet threshold.
        threshold: u8,
    },
    /// The share's key id does not match the loaded wallet state.
    #[error("Share belongs to a different wallet")]
    WrongWallet,
    /// A share with this index has already been collected.
    #[error("Share index `{0}` already collected")]
    AlreadyCollected(u8),
    /// A scalar was zero or not less than the group order.
    #[error("Scalar is zero or exceeds the group order")]
    InvalidScalar,
    /// No invite exists under the given id.
    #[error("Invite not found")]
    InviteNotFound,
    /// The invite exists but its deadline has passed.
    #[error("Invite has expired")]
    InviteExpired,
    /// The verification code does not match the invite.
    #[error("Verification code mismatch")]
    BadCode,
    /// A non-terminal recovery request already exists for this wallet.
    #[error("A recovery request is already pending for this wallet")]
    AlreadyPending,
    /// Recovery was re-initiated before the cooldown elapsed.
    #[error("Recovery cooldown in effect for `{remaining_ms}` more ms")]
    Cooldown {
        /// Milliseconds until initiation is allowed again.
        remaining_ms: u64,
    },
    /// The request is not in a state that permits the operation.
    #[error("Recovery request is in state `{0}`, which does not permit this operation")]
    InvalidState(String),
    /// This guardian has already approved the request.
    #[error("Guardian has already approved this request")]
    DuplicateGuardian,
    /// No guardian exists under the given id.
    #[error("Guardian not found")]
    GuardianNotFound,
    /// No recovery request exists under the given id.
    #[error("Recovery request not found")]
    RequestNotFound,
    /// Failure while encoding or decoding a wire record.
    #[error("Serialization Error")]
    Serialization,
    /// Reached the maximum allowed number of retries
    #[error("Reached the maximum allowed number of retries")]
    RetryFailed,
    /// Represents some code assumption that was checked at runtime but
    /// failed to be true.
    #[error("Internal invariant failed")]
    InternalInvariantFailed,
}

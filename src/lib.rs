// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The cryptographic core of a self-custodial wallet.
//!
//! Three subsystems do the heavy lifting:
//!
//! - [`envelope`] seals secret material under a password (scrypt +
//!   XSalsa20-Poly1305, versioned JSON wire format);
//! - [`sharing`] splits and recombines 256-bit secrets as polynomials
//!   over the secp256k1 scalar field ([`field`]), and [`wallet`] builds a
//!   threshold-signing wallet on top of it with [`signing`]'s
//!   deterministic, recoverable ECDSA;
//! - [`guardian`] and [`recovery`] coordinate social recovery: guardian
//!   enrollment with a verification-code challenge, then a cancellable,
//!   timelocked state machine that reconstructs the key from guardian
//!   approvals. [`social`] composes the whole stack behind one facade.
//!
//! Everything else a wallet product needs (storage, chain registries,
//! RPC, transaction broadcast, UI) lives outside this crate and talks to
//! it through the types re-exported below.
//!
//! Secret material is wiped eagerly: reconstructed keys exist only
//! inside a signing or recovery call, collected shares are consumed by
//! every signature, and cancelled recovery requests scrub their
//! approvals before they can be observed again.

pub mod envelope;
pub mod errors;
pub mod field;
pub mod guardian;
pub mod recovery;
pub mod sharing;
pub mod signing;
pub mod social;
pub mod utils;
pub mod wallet;

#[cfg(test)]
mod tests;

pub use envelope::{open, seal, EncryptedEnvelope, ENVELOPE_VERSION};
pub use errors::{Error, Result};
pub use field::{CurvePoint, Scalar};
pub use guardian::{ContactType, Guardian, GuardianInvite, GuardianManager, GuardianStatus};
pub use recovery::{
    ApprovalProgress, GuardianApproval, InitiateParams, RecoveryConfig, RecoveryCoordinator,
    RecoveryRequest, RecoveryStatus,
};
pub use sharing::{combine, split, Share};
pub use signing::{
    framing::{derive_address, keccak256, personal_message_digest, typed_data_digest, Address},
    recover, sign_digest, transaction::Transaction, verify, RecoverableSignature,
};
pub use social::{
    GuardianDescriptor, SetupResult, SocialRecoveryConfig, SocialRecoveryWallet,
};
pub use utils::{Clock, Identifier, SystemClock};
pub use wallet::{
    CreateResult, EncryptedShareRecord, PlainShareRecord, ShareConfig, ThresholdWallet,
    WalletState,
};

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! End-to-end scenarios exercising every layer together.

use crate::{
    envelope,
    errors::Error,
    field::Scalar,
    guardian::{ContactType, GuardianStatus},
    recovery::RecoveryStatus,
    signing::{self, framing},
    social::{GuardianDescriptor, SocialRecoveryConfig, SocialRecoveryWallet},
    utils::{
        testing::{get_test_rng, init_testing, TestClock},
        Identifier,
    },
    wallet::{ShareConfig, ThresholdWallet},
};
use rand::rngs::StdRng;
use std::sync::Arc;

const HOUR_MS: u64 = 60 * 60 * 1000;

fn guardian_descriptors(count: usize) -> Vec<GuardianDescriptor> {
    (0..count)
        .map(|i| GuardianDescriptor {
            name: format!("guardian-{i}"),
            contact: format!("g{i}@example.com"),
            contact_type: ContactType::Email,
            share_password: format!("guardian-pw-{i}"),
        })
        .collect()
}

/// Set up a 3-of-5 social-recovery wallet (1 owner share, 4 guardians)
/// around a known secret, and have every guardian accept their invite.
/// Returns the wallet, the secret, and each guardian's
/// `(guardian_id, plaintext share value)`.
fn recovery_fixture(
    config: SocialRecoveryConfig,
    clock: Arc<TestClock>,
    rng: &mut StdRng,
) -> (SocialRecoveryWallet, Scalar, Vec<(Identifier, Scalar)>) {
    let secret = Scalar::random(rng).unwrap();
    let mut wallet = SocialRecoveryWallet::with_clock(config, clock).unwrap();
    let setup = wallet
        .setup_with_key(
            &secret,
            "owner-pw",
            &guardian_descriptors(usize::from(config.guardian_shares())),
            rng,
        )
        .unwrap();

    let mut guardian_shares = Vec::new();
    for (i, invite) in setup.guardian_invites.iter().enumerate() {
        let status = wallet
            .process_guardian_response(
                invite.id,
                invite.guardian_id,
                true,
                &invite.verification_code,
            )
            .unwrap();
        assert_eq!(status, GuardianStatus::Accepted);

        // Each guardian opens their sealed share with their own password,
        // as they would before approving a recovery.
        let plaintext = envelope::open(
            &invite.encrypted_share.encrypted_share,
            &format!("guardian-pw-{i}"),
        )
        .unwrap();
        let value = Scalar::from_hex(std::str::from_utf8(&plaintext).unwrap()).unwrap();
        guardian_shares.push((invite.guardian_id, value));
    }
    (wallet, secret, guardian_shares)
}

fn three_of_five(timelock_hours: u64) -> SocialRecoveryConfig {
    SocialRecoveryConfig {
        total_shares: 5,
        threshold: 3,
        owner_shares: 1,
        timelock_hours,
        expiration_days: 7,
        cooldown_hours: 2,
    }
}

#[test]
fn envelope_guards_a_mnemonic_fragment() {
    init_testing();
    let mut rng = get_test_rng();

    let sealed = envelope::seal(b"abandon abandon about", "password", &mut rng).unwrap();
    assert_eq!(
        envelope::open(&sealed, "password").unwrap(),
        b"abandon abandon about"
    );
    // Case matters.
    assert_eq!(
        envelope::open(&sealed, "Password"),
        Err(Error::Undecryptable)
    );
}

#[test]
fn deterministic_signature_is_reproducible_from_scratch() {
    let mut bytes = [0u8; 32];
    bytes[31] = 1;
    let scalar = Scalar::from_bytes(&bytes).unwrap();
    let digest = framing::keccak256(b"hello");

    let first = signing::sign_digest(&digest, &scalar).unwrap();
    let second = signing::sign_digest(&digest, &scalar).unwrap();
    assert_eq!(first.to_bytes(), second.to_bytes());
    assert!(first.recovery_id() <= 1);
    assert_eq!(
        signing::recover(&digest, &first),
        Some(signing::public_key(&scalar).unwrap())
    );
}

#[test]
fn threshold_wallet_signs_with_any_quorum() {
    init_testing();
    let mut rng = get_test_rng();
    let passwords = ["p1", "p2", "p3", "p4", "p5"];

    let mut wallet = ThresholdWallet::new();
    let created = wallet
        .create(
            ShareConfig {
                total_shares: 5,
                threshold: 3,
            },
            &passwords,
            &mut rng,
        )
        .unwrap();

    // A fresh instance adopts the state, as after a restart.
    let mut wallet = ThresholdWallet::new();
    wallet.load_state(created.state.clone());

    for index in [0usize, 2, 4] {
        assert!(wallet
            .add_share(&created.sealed_shares[index], passwords[index])
            .unwrap());
    }
    assert!(wallet.can_sign());

    let signature = wallet.sign_message(b"hi").unwrap();
    let digest = framing::personal_message_digest(b"hi");
    assert_eq!(
        signing::recover(&digest, &signature),
        Some(created.state.public_key)
    );

    // The signature consumed the collected shares.
    assert_eq!(wallet.collected_count(), 0);
}

#[test]
fn recovery_happy_path_reconstructs_the_key() {
    init_testing();
    let mut rng = get_test_rng();
    let clock = Arc::new(TestClock::new(1_000));
    let (mut wallet, secret, guardian_shares) =
        recovery_fixture(three_of_five(0), clock, &mut rng);

    let request = wallet.initiate_recovery("owner", "lost device", &mut rng).unwrap();
    assert_eq!(request.status, RecoveryStatus::Pending);

    for (i, (guardian_id, value)) in guardian_shares.iter().take(3).enumerate() {
        let updated = wallet
            .add_recovery_approval(request.id, *guardian_id, *value)
            .unwrap();
        if i < 2 {
            assert_eq!(updated.status, RecoveryStatus::Pending);
        } else {
            // Zero timelock: approval tips straight into ready.
            assert_eq!(updated.status, RecoveryStatus::Ready);
        }
    }

    let recovered = wallet.execute_recovery(request.id).unwrap();
    assert_eq!(recovered, secret);

    // The reconstructed key controls the original wallet address.
    let address = framing::derive_address(&signing::public_key(&recovered).unwrap());
    assert_eq!(address, wallet.wallet_state().unwrap().address);

    let finished = wallet.recovery_request(request.id).unwrap();
    assert_eq!(finished.status, RecoveryStatus::Executed);
    assert_eq!(finished.recovered_secret, Some(secret));
}

#[test]
fn cancelled_recovery_scrubs_approvals() {
    init_testing();
    let mut rng = get_test_rng();
    let clock = Arc::new(TestClock::new(0));
    let (mut wallet, _secret, guardian_shares) =
        recovery_fixture(three_of_five(24), clock, &mut rng);

    let request = wallet.initiate_recovery("owner", "phishing?", &mut rng).unwrap();
    for (guardian_id, value) in guardian_shares.iter().take(2) {
        let _ = wallet
            .add_recovery_approval(request.id, *guardian_id, *value)
            .unwrap();
    }

    wallet.cancel_recovery(request.id).unwrap();

    let cancelled = wallet.recovery_request(request.id).unwrap();
    assert_eq!(cancelled.status, RecoveryStatus::Cancelled);
    for approval in &cancelled.approvals {
        assert!(approval.share_value.is_zero());
    }

    // Terminal: nothing more can be added.
    let (guardian_id, value) = &guardian_shares[2];
    assert!(matches!(
        wallet.add_recovery_approval(request.id, *guardian_id, *value),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn a_guardian_cannot_approve_twice() {
    init_testing();
    let mut rng = get_test_rng();
    let clock = Arc::new(TestClock::new(0));
    let (mut wallet, _secret, guardian_shares) =
        recovery_fixture(three_of_five(24), clock, &mut rng);

    let request = wallet.initiate_recovery("owner", "redundant", &mut rng).unwrap();
    let (guardian_id, value) = &guardian_shares[0];
    let _ = wallet
        .add_recovery_approval(request.id, *guardian_id, *value)
        .unwrap();
    assert_eq!(
        wallet.add_recovery_approval(request.id, *guardian_id, *value),
        Err(Error::DuplicateGuardian)
    );
}

#[test]
fn recovery_initiation_honors_the_cooldown() {
    init_testing();
    let mut rng = get_test_rng();
    let clock = Arc::new(TestClock::new(0));
    let config = three_of_five(0);
    let (mut wallet, secret, guardian_shares) =
        recovery_fixture(config, clock.clone(), &mut rng);

    let request = wallet.initiate_recovery("owner", "first", &mut rng).unwrap();
    for (guardian_id, value) in guardian_shares.iter().take(3) {
        let _ = wallet
            .add_recovery_approval(request.id, *guardian_id, *value)
            .unwrap();
    }
    assert_eq!(wallet.execute_recovery(request.id).unwrap(), secret);

    // Immediately again: blocked by the cooldown even though the first
    // request is terminal.
    assert!(matches!(
        wallet.initiate_recovery("owner", "second", &mut rng),
        Err(Error::Cooldown { .. })
    ));

    clock.advance(config.cooldown_hours * HOUR_MS);
    assert!(wallet.initiate_recovery("owner", "second", &mut rng).is_ok());
}

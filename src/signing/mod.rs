// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! ECDSA over secp256k1 with recoverable, low-S signatures.
//!
//! Nonces are deterministic per RFC 6979, so signing the same digest with
//! the same scalar always yields the same signature. `s` is normalized to
//! the low half of the order, complementing the recovery id's parity bit
//! when the negation happens.

pub mod framing;
pub mod transaction;

use crate::{
    errors::{Error, Result},
    field::{CurvePoint, Scalar},
};
use k256::ecdsa::{
    signature::hazmat::PrehashVerifier, RecoveryId, Signature as EcdsaSignature, SigningKey,
    VerifyingKey,
};

/// An ECDSA signature `(r, s)` with the recovery id needed to recompute
/// the public key from the digest.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    r: Scalar,
    s: Scalar,
    recovery_id: u8,
}

impl RecoverableSignature {
    /// The `r` component.
    pub fn r(&self) -> &Scalar {
        &self.r
    }

    /// The `s` component; always in the low half of the order.
    pub fn s(&self) -> &Scalar {
        &self.s
    }

    /// The raw recovery id, `0` or `1`.
    pub fn recovery_id(&self) -> u8 {
        self.recovery_id
    }

    /// The legacy `v` value, `27 + recovery_id`.
    pub fn v_legacy(&self) -> u8 {
        27 + self.recovery_id
    }

    /// The EIP-155 `v` value, `chain_id * 2 + 35 + recovery_id`.
    pub fn v_eip155(&self, chain_id: u64) -> u64 {
        chain_id * 2 + 35 + u64::from(self.recovery_id)
    }

    /// The 65-byte serialization `r(32) || s(32) || v(1)` with
    /// `v = 27 + recovery_id`.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r.to_bytes());
        out[32..64].copy_from_slice(&self.s.to_bytes());
        out[64] = self.v_legacy();
        out
    }

    /// Parse the 65-byte serialization produced by [`Self::to_bytes`].
    /// Both `v` conventions (`0/1` and `27/28`) are accepted.
    pub fn from_bytes(bytes: &[u8; 65]) -> Result<Self> {
        let r = Scalar::from_bytes(bytes[..32].try_into().map_err(|_| Error::Serialization)?)?;
        let s = Scalar::from_bytes(bytes[32..64].try_into().map_err(|_| Error::Serialization)?)?;
        let recovery_id = match bytes[64] {
            v @ (0 | 1) => v,
            v @ (27 | 28) => v - 27,
            _ => return Err(Error::Serialization),
        };
        r.ensure_nonzero()?;
        s.ensure_nonzero()?;
        Ok(Self { r, s, recovery_id })
    }

    fn to_ecdsa(self) -> Result<EcdsaSignature> {
        EcdsaSignature::from_scalars(self.r.to_bytes(), self.s.to_bytes())
            .map_err(|_| Error::Serialization)
    }
}

impl std::fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Signatures are public; print them, unlike bare scalars.
        f.debug_struct("RecoverableSignature")
            .field("r", &self.r.to_hex())
            .field("s", &self.s.to_hex())
            .field("v", &self.v_legacy())
            .finish()
    }
}

/// Derive the public point for a secret scalar.
pub fn public_key(secret: &Scalar) -> Result<CurvePoint> {
    secret.ensure_nonzero()?;
    Ok(CurvePoint::generator_mul(secret))
}

/// Sign a 32-byte digest with RFC 6979 deterministic nonces.
///
/// Fails with [`Error::InvalidScalar`] when the scalar is zero.
pub fn sign_digest(digest: &[u8; 32], secret: &Scalar) -> Result<RecoverableSignature> {
    secret.ensure_nonzero()?;
    let key_bytes: k256::FieldBytes = secret.to_bytes().into();
    let signing_key = SigningKey::from_bytes(&key_bytes).map_err(|_| Error::InvalidScalar)?;
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(digest)
        .map_err(|_| Error::InternalInvariantFailed)?;

    // Normalize to low-S, flipping the recovery parity alongside the
    // negation. `normalize_s` returns None when s is already low.
    let (signature, recovery_id) = match signature.normalize_s() {
        Some(normalized) => {
            let flipped = RecoveryId::from_byte(recovery_id.to_byte() ^ 1)
                .ok_or(Error::InternalInvariantFailed)?;
            (normalized, flipped)
        }
        None => (signature, recovery_id),
    };

    let (r, s) = signature.split_scalars();
    Ok(RecoverableSignature {
        r: Scalar::from_inner(*r),
        s: Scalar::from_inner(*s),
        recovery_id: recovery_id.to_byte(),
    })
}

/// Check `(r, s)` over `digest` against a public point.
pub fn verify(digest: &[u8; 32], signature: &RecoverableSignature, public_key: &CurvePoint) -> bool {
    let ecdsa_signature = match signature.to_ecdsa() {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let verifying_key =
        match VerifyingKey::from_encoded_point(&public_key.inner().to_affine().into()) {
            Ok(vk) => vk,
            Err(_) => return false,
        };
    verifying_key.verify_prehash(digest, &ecdsa_signature).is_ok()
}

/// Recover the public point that produced `signature` over `digest`, or
/// `None` when the signature does not resolve to a valid point.
pub fn recover(digest: &[u8; 32], signature: &RecoverableSignature) -> Option<CurvePoint> {
    let recovery_id = RecoveryId::from_byte(signature.recovery_id)?;
    let ecdsa_signature = signature.to_ecdsa().ok()?;
    let verifying_key =
        VerifyingKey::recover_from_prehash(digest, &ecdsa_signature, recovery_id).ok()?;
    Some(CurvePoint::from(k256::ProjectivePoint::from(
        *verifying_key.as_affine(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::get_test_rng;
    use k256::elliptic_curve::{ff::PrimeField, scalar::IsHigh};

    fn one() -> Scalar {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        Scalar::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn deterministic_signature_for_known_scalar() {
        let digest = framing::keccak256(b"hello");
        let first = sign_digest(&digest, &one()).unwrap();
        let second = sign_digest(&digest, &one()).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[test]
    fn sign_verify_recover_roundtrip() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        let expected = public_key(&secret).unwrap();
        let digest = framing::keccak256(b"roundtrip message");

        let signature = sign_digest(&digest, &secret).unwrap();
        assert!(verify(&digest, &signature, &expected));
        assert_eq!(recover(&digest, &signature), Some(expected));
    }

    #[test]
    fn verify_rejects_other_digest_and_other_key() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        let other = Scalar::random(&mut rng).unwrap();
        let digest = framing::keccak256(b"signed");
        let signature = sign_digest(&digest, &secret).unwrap();

        let other_digest = framing::keccak256(b"not signed");
        assert!(!verify(&other_digest, &signature, &public_key(&secret).unwrap()));
        assert!(!verify(&digest, &signature, &public_key(&other).unwrap()));
    }

    #[test]
    fn s_is_always_low() {
        let mut rng = get_test_rng();
        for message in 0u64..16 {
            let secret = Scalar::random(&mut rng).unwrap();
            let digest = framing::keccak256(&message.to_be_bytes());
            let signature = sign_digest(&digest, &secret).unwrap();

            // s <= n/2 iff the k256 scalar is not "high".
            let s: Option<k256::Scalar> =
                k256::Scalar::from_repr(signature.s().to_bytes().into()).into();
            assert!(!bool::from(s.unwrap().is_high()));
        }
    }

    #[test]
    fn zero_scalar_cannot_sign() {
        let digest = framing::keccak256(b"zero");
        assert_eq!(
            sign_digest(&digest, &Scalar::ZERO),
            Err(Error::InvalidScalar)
        );
    }

    #[test]
    fn signature_byte_codec_roundtrip() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        let digest = framing::keccak256(b"codec");
        let signature = sign_digest(&digest, &secret).unwrap();

        let bytes = signature.to_bytes();
        assert!(bytes[64] == 27 || bytes[64] == 28);
        assert_eq!(RecoverableSignature::from_bytes(&bytes).unwrap(), signature);
    }

    #[test]
    fn v_encodings() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        let digest = framing::keccak256(b"v values");
        let signature = sign_digest(&digest, &secret).unwrap();

        assert_eq!(
            u64::from(signature.v_legacy()),
            u64::from(signature.recovery_id()) + 27
        );
        assert_eq!(
            signature.v_eip155(1),
            37 + u64::from(signature.recovery_id())
        );
        assert_eq!(
            signature.v_eip155(137),
            309 + u64::from(signature.recovery_id())
        );
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Arithmetic over the scalar field of secp256k1, i.e. the integers modulo
//! the group order `n`.
//!
//! [`Scalar`] wraps [`k256::Scalar`] so that we can define our own
//! serialization (32 big-endian bytes / 64 lower-hex characters), control
//! `Debug` output for secret values, and pin down the exact failure modes
//! of the fallible conversions. All arithmetic inherits `k256`'s
//! constant-time field implementation.

use crate::errors::{Error, Result};
use k256::elliptic_curve::{
    ff::{Field, PrimeField},
    sec1::{FromEncodedPoint, ToEncodedPoint},
    subtle::{Choice, ConditionallySelectable, ConstantTimeEq},
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

pub(crate) const CRYPTOGRAPHIC_RETRY_MAX: usize = 500usize;

/// An element of GF(n), where n is the secp256k1 group order.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Scalar(k256::Scalar);

impl Scalar {
    /// The additive identity.
    pub const ZERO: Self = Scalar(k256::Scalar::ZERO);
    /// The multiplicative identity.
    pub const ONE: Self = Scalar(k256::Scalar::ONE);

    /// Sample a uniformly random nonzero scalar.
    ///
    /// Rejection sampling on 32 random bytes: candidates that are zero or
    /// not less than the group order are discarded and redrawn. The
    /// per-draw rejection probability is negligible, so the retry bound
    /// should virtually never be hit.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        for _ in 0..CRYPTOGRAPHIC_RETRY_MAX {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            let candidate: Option<k256::Scalar> = k256::Scalar::from_repr(bytes.into()).into();
            bytes.zeroize();
            match candidate {
                Some(scalar) if !bool::from(scalar.is_zero()) => return Ok(Scalar(scalar)),
                _ => continue,
            }
        }
        Err(Error::RetryFailed)
    }

    /// Sample a uniformly random scalar, zero included.
    ///
    /// Polynomial coefficients want the whole field; everything else in
    /// this crate goes through [`Self::random`], which rejects zero.
    pub(crate) fn random_including_zero<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        for _ in 0..CRYPTOGRAPHIC_RETRY_MAX {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            let candidate: Option<k256::Scalar> = k256::Scalar::from_repr(bytes.into()).into();
            bytes.zeroize();
            if let Some(scalar) = candidate {
                return Ok(Scalar(scalar));
            }
        }
        Err(Error::RetryFailed)
    }

    /// The scalar representing a small integer, e.g. a share x-coordinate.
    pub(crate) fn from_u64(value: u64) -> Self {
        Scalar(k256::Scalar::from(value))
    }

    /// Parse a scalar from its canonical 32-byte big-endian encoding.
    ///
    /// Fails with [`Error::InvalidScalar`] if the value is not less than
    /// the group order. Zero is accepted; use [`Self::ensure_nonzero`]
    /// where zero must be ruled out as well.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        Option::<k256::Scalar>::from(k256::Scalar::from_repr((*bytes).into()))
            .map(Scalar)
            .ok_or(Error::InvalidScalar)
    }

    /// The canonical 32-byte big-endian encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_repr().into()
    }

    /// Parse a scalar from 64 lower-hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(s)
            .map_err(|_| Error::InvalidScalar)?
            .try_into()
            .map_err(|_| Error::InvalidScalar)?;
        Self::from_bytes(&bytes)
    }

    /// The 64-character lower-hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Whether this is the additive identity.
    pub fn is_zero(&self) -> bool {
        bool::from(self.0.is_zero())
    }

    /// Errors with [`Error::InvalidScalar`] unless the value is in
    /// `[1, n-1]`, the valid range for secret keys and share values.
    pub fn ensure_nonzero(&self) -> Result<()> {
        if self.is_zero() {
            return Err(Error::InvalidScalar);
        }
        Ok(())
    }

    /// The additive inverse.
    pub fn negate(&self) -> Self {
        Scalar(-self.0)
    }

    /// The multiplicative inverse, computed in constant time.
    ///
    /// Fails with [`Error::InvalidScalar`] on zero, which has no inverse.
    pub fn invert(&self) -> Result<Self> {
        Option::<k256::Scalar>::from(self.0.invert())
            .map(Scalar)
            .ok_or(Error::InvalidScalar)
    }

    /// Modular exponentiation by a constant-time square-and-multiply
    /// ladder over all 256 exponent bits.
    ///
    /// The multiply is performed unconditionally and selected in, so the
    /// operation sequence does not depend on the exponent.
    pub fn pow(&self, exponent: &Scalar) -> Self {
        let exp_bytes = exponent.to_bytes();
        let mut acc = k256::Scalar::ONE;
        for byte in exp_bytes {
            for bit in (0..8).rev() {
                acc = acc.square();
                let multiplied = acc * self.0;
                let take = Choice::from((byte >> bit) & 1);
                acc = k256::Scalar::conditional_select(&acc, &multiplied, take);
            }
        }
        Scalar(acc)
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }

    pub(crate) fn from_inner(inner: k256::Scalar) -> Self {
        Scalar(inner)
    }
}

impl std::ops::Add for Scalar {
    type Output = Scalar;
    fn add(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Scalar {
    type Output = Scalar;
    fn sub(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 * rhs.0)
    }
}

impl std::ops::Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        self.negate()
    }
}

impl std::ops::AddAssign for Scalar {
    fn add_assign(&mut self, rhs: Scalar) {
        self.0 += rhs.0;
    }
}

impl Zeroize for Scalar {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

// Scalars frequently hold secret material (share values, reconstructed
// keys), so the raw value never reaches Debug output.
impl std::fmt::Debug for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Scalar([redacted])")
    }
}

impl Serialize for Scalar {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Scalar::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Wrapper around [`k256::ProjectivePoint`] so that we can define our own
/// serialization/deserialization for it (SEC1 compressed, hex-encoded).
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct CurvePoint(pub(crate) k256::ProjectivePoint);

impl CurvePoint {
    /// The group generator.
    pub const GENERATOR: Self = CurvePoint(k256::ProjectivePoint::GENERATOR);

    /// `scalar * G`, the public point for a secret scalar.
    pub fn generator_mul(scalar: &Scalar) -> Self {
        CurvePoint(k256::ProjectivePoint::GENERATOR * scalar.0)
    }

    /// SEC1 encoding; 33 bytes compressed, 65 bytes uncompressed.
    pub fn to_sec1_bytes(&self, compressed: bool) -> Vec<u8> {
        self.0.to_affine().to_encoded_point(compressed).as_bytes().to_vec()
    }

    /// Parse a SEC1-encoded point (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let encoded = k256::EncodedPoint::from_bytes(bytes).map_err(|_| Error::Serialization)?;
        Option::<k256::AffinePoint>::from(k256::AffinePoint::from_encoded_point(&encoded))
            .map(|affine| CurvePoint(affine.into()))
            .ok_or(Error::Serialization)
    }

    /// The compressed SEC1 encoding as 66 lower-hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_sec1_bytes(true))
    }

    pub(crate) fn inner(&self) -> &k256::ProjectivePoint {
        &self.0
    }
}

impl From<k256::ProjectivePoint> for CurvePoint {
    fn from(p: k256::ProjectivePoint) -> Self {
        Self(p)
    }
}

impl Serialize for CurvePoint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CurvePoint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        CurvePoint::from_sec1_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

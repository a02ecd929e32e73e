// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Shamir secret sharing over the secp256k1 scalar field.
//!
//! A secret `s` is embedded as the constant term of a random polynomial
//! `f(X) = s + a_1 X + ... + a_{t-1} X^{t-1}` over GF(n); share `i` is the
//! point `(i, f(i))` for `i = 1..=total`. Any `t` shares reconstruct `s`
//! by Lagrange interpolation at zero; fewer than `t` reveal nothing.
//!
//! The x-coordinate zero is forbidden everywhere: the share `(0, f(0))`
//! would simply be the secret.

use crate::{
    errors::{Error, Result},
    field::Scalar,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A single share `(x, f(x))` of a split secret.
///
/// The value is secret material; shares zeroize themselves on drop and
/// never expose the raw y-coordinate through `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    index: u8,
    value: Scalar,
}

impl Share {
    /// Construct a share; `index` must be in `1..=255`.
    pub fn new(index: u8, value: Scalar) -> Result<Self> {
        if index == 0 {
            return Err(Error::ConfigInvalid(
                "share index 0 is forbidden".to_string(),
            ));
        }
        Ok(Self { index, value })
    }

    /// The x-coordinate, in `1..=255`.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// The y-coordinate, `f(index)`.
    pub fn value(&self) -> &Scalar {
        &self.value
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("value", &"[redacted]")
            .finish()
    }
}

/// Validate a `(total, threshold)` sharing configuration.
///
/// `total` is bounded to 255 by its type; the remaining constraints are
/// `2 <= threshold <= total`.
pub fn validate_config(total: u8, threshold: u8) -> Result<()> {
    if threshold < 2 {
        return Err(Error::ConfigInvalid(format!(
            "threshold must be at least 2, got {threshold}"
        )));
    }
    if threshold > total {
        return Err(Error::ConfigInvalid(format!(
            "threshold {threshold} exceeds total shares {total}"
        )));
    }
    Ok(())
}

/// Split `secret` into `total` shares, any `threshold` of which
/// reconstruct it.
///
/// A zero secret is permitted; the polynomial's constant term is then
/// zero. Coefficients are sampled uniformly from the whole field and
/// wiped once the shares have been evaluated.
pub fn split<R: RngCore + CryptoRng>(
    secret: &Scalar,
    total: u8,
    threshold: u8,
    rng: &mut R,
) -> Result<Vec<Share>> {
    validate_config(total, threshold)?;

    // coefficients[0] = secret, coefficients[k] = a_k.
    let mut coefficients = Vec::with_capacity(threshold as usize);
    coefficients.push(*secret);
    for _ in 1..threshold {
        coefficients.push(Scalar::random_including_zero(rng)?);
    }

    let shares = (1..=total)
        .map(|index| {
            let value = evaluate(&coefficients, index);
            Share::new(index, value)
        })
        .collect::<Result<Vec<_>>>();

    for coefficient in coefficients.iter_mut() {
        coefficient.zeroize();
    }
    shares
}

/// Evaluate the polynomial at `x` by Horner's rule.
fn evaluate(coefficients: &[Scalar], x: u8) -> Scalar {
    let x = Scalar::from_u64(u64::from(x));
    let mut acc = Scalar::ZERO;
    for coefficient in coefficients.iter().rev() {
        acc = acc * x + *coefficient;
    }
    acc
}

/// Reconstruct the secret from `shares` by Lagrange interpolation at
/// zero.
///
/// Fails with [`Error::TooFewShares`] when fewer than two shares are
/// given and [`Error::DuplicateIndex`] when two shares collide on an
/// x-coordinate. Any subset of at least `threshold` shares of a
/// consistent set yields the same secret.
pub fn combine(shares: &[Share]) -> Result<Scalar> {
    if shares.len() < 2 {
        return Err(Error::TooFewShares(shares.len()));
    }
    let mut seen = [false; 256];
    for share in shares {
        if seen[share.index as usize] {
            return Err(Error::DuplicateIndex(share.index));
        }
        seen[share.index as usize] = true;
    }

    let mut secret = Scalar::ZERO;
    for share_i in shares {
        let x_i = Scalar::from_u64(u64::from(share_i.index));
        // basis_i(0) = prod_{j != i} (-x_j) / (x_i - x_j)
        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;
        for share_j in shares {
            if share_j.index == share_i.index {
                continue;
            }
            let x_j = Scalar::from_u64(u64::from(share_j.index));
            numerator = numerator * x_j.negate();
            denominator = denominator * (x_i - x_j);
        }
        // Distinct x-coordinates guarantee a nonzero denominator.
        let basis = numerator * denominator.invert()?;
        secret += share_i.value * basis;
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::get_test_rng;

    fn subset(shares: &[Share], indices: &[usize]) -> Vec<Share> {
        indices.iter().map(|&i| shares[i].clone()).collect()
    }

    #[test]
    fn two_of_three_roundtrip() {
        let mut rng = get_test_rng();
        let mut secret_bytes = [0u8; 32];
        secret_bytes[31] = 1;
        let secret = Scalar::from_bytes(&secret_bytes).unwrap();

        let shares = split(&secret, 3, 2, &mut rng).unwrap();
        assert_eq!(shares.len(), 3);

        for pair in [[0, 1], [0, 2], [1, 2]] {
            assert_eq!(combine(&subset(&shares, &pair)).unwrap(), secret);
        }
    }

    #[test]
    fn three_of_five_roundtrip_every_subset() {
        let mut rng = get_test_rng();
        let secret = Scalar::from_hex(
            "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .unwrap();

        let shares = split(&secret, 5, 3, &mut rng).unwrap();
        for a in 0..5 {
            for b in (a + 1)..5 {
                for c in (b + 1)..5 {
                    let combined = combine(&subset(&shares, &[a, b, c])).unwrap();
                    assert_eq!(combined, secret);
                }
            }
        }
        // More than threshold also works.
        assert_eq!(combine(&shares).unwrap(), secret);
    }

    #[test]
    fn below_threshold_does_not_reconstruct() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        let shares = split(&secret, 5, 3, &mut rng).unwrap();
        let wrong = combine(&subset(&shares, &[0, 1])).unwrap();
        assert_ne!(wrong, secret);
    }

    #[test]
    fn zero_secret_is_permitted() {
        let mut rng = get_test_rng();
        let shares = split(&Scalar::ZERO, 4, 2, &mut rng).unwrap();
        assert_eq!(combine(&subset(&shares, &[1, 3])).unwrap(), Scalar::ZERO);
    }

    #[test]
    fn share_order_does_not_matter() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        let shares = split(&secret, 4, 3, &mut rng).unwrap();
        assert_eq!(combine(&subset(&shares, &[2, 0, 3])).unwrap(), secret);
        assert_eq!(combine(&subset(&shares, &[3, 2, 0])).unwrap(), secret);
    }

    #[test]
    fn rejects_bad_configs() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        assert!(matches!(
            split(&secret, 5, 1, &mut rng),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            split(&secret, 3, 4, &mut rng),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn combine_rejects_too_few_and_duplicates() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        let shares = split(&secret, 3, 2, &mut rng).unwrap();

        assert_eq!(
            combine(&subset(&shares, &[0])),
            Err(Error::TooFewShares(1))
        );
        assert_eq!(
            combine(&subset(&shares, &[1, 1])),
            Err(Error::DuplicateIndex(shares[1].index()))
        );
    }

    #[test]
    fn share_index_zero_is_forbidden() {
        let mut rng = get_test_rng();
        let value = Scalar::random(&mut rng).unwrap();
        assert!(matches!(
            Share::new(0, value),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn maximum_total_is_supported() {
        let mut rng = get_test_rng();
        let secret = Scalar::random(&mut rng).unwrap();
        let shares = split(&secret, 255, 2, &mut rng).unwrap();
        assert_eq!(shares.len(), 255);
        assert_eq!(shares.last().unwrap().index(), 255);
        assert_eq!(combine(&subset(&shares, &[7, 254])).unwrap(), secret);
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Identifiers, the wall-clock abstraction, and test utilities shared
//! across the crate.

use crate::errors::{Error, Result};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A generic identifier: 16 random bytes.
///
/// Used for key ids, guardian ids, invite ids, and recovery-request ids.
/// The wire encoding is 32 lower-hex characters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(u128);

impl Identifier {
    /// Produces a random [`Identifier`].
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen::<u128>())
    }

    /// The full 32-character lower-hex form.
    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parses the 32-character lower-hex form produced by [`Self::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes: [u8; 16] = hex::decode(s)
            .map_err(|_| Error::Serialization)?
            .try_into()
            .map_err(|_| Error::Serialization)?;
        Ok(Self(u128::from_be_bytes(bytes)))
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Id({})", hex::encode(&self.0.to_be_bytes()[..4]))
    }
}

impl Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Identifier::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A source of wall-clock time in integer milliseconds since the Unix
/// epoch.
///
/// The recovery coordinator and guardian manager read every timestamp
/// through this trait, which keeps their state machines deterministic
/// under test. Production code uses [`SystemClock`].
pub trait Clock: std::fmt::Debug + Send + Sync {
    /// The current time, in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

////////////////////////////
// Test Utility Functions //
////////////////////////////

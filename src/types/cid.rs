// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Defines the [`Cid`] content identifier type.
//!
//! Content identifiers are SHA-256 digests of the content they name.
//! They are opaque to the rest of the crate except for two places that derive
//! a bucket from them, both of which use [`Cid::shard_key`].

use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a content identifier in bytes.
pub const CID_LEN: usize = 32;

/// Content identifier, the SHA-256 digest of the identified bytes.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Cid([u8; CID_LEN]);

/// Errors that may occur when parsing a [`Cid`] from its hex form.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ParseCidError {
    #[error("content identifier is not valid hex")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("content identifier has {0} bytes, expected {CID_LEN}")]
    WrongLength(usize),
}

impl Cid {
    /// Wraps an existing digest.
    pub const fn from_digest(digest: [u8; CID_LEN]) -> Self {
        Self(digest)
    }

    /// Computes the content identifier of `data`.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Computes a content identifier over the concatenation of all `parts`.
    #[must_use]
    pub fn of_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }

    /// Returns the key used to assign this identifier to one of several shards.
    ///
    /// This is the first four digest bytes read as little-endian `u32`.
    pub fn shard_key(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Returns the lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Cid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Cid {
    type Err = ParseCidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        let digest: [u8; CID_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseCidError::WrongLength(bytes.len()))?;
        Ok(Self(digest))
    }
}

impl Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // short form is enough to tell identifiers apart in logs
        write!(f, "Cid({})", &self.to_hex()[..12])
    }
}

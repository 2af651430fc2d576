// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-asset bucket indices.
//!
//! An index maps each bucket of an asset to the [`BlockRecord`]s it contains.
//! This module defines the [`Index`] trait all index variants implement,
//! and [`AssetIndex`], the tagged variant stored for each asset:
//! - [`MultiIndexSorted`] shards records into sorted buckets,
//!   this is the only variant challenges are issued against.
//! - [`SortedIndex`] keeps all records in one sorted list.
//!
//! It also defines the serialized form of an index:
//! the magic bytes `PIDX`, the [`IndexCodec`] as little-endian `u64`,
//! followed by the `bincode` encoded body.

mod multi_sorted;
mod sorted;

use std::fmt::Display;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use self::multi_sorted::{Bucket, MultiIndexSorted};
pub use self::sorted::SortedIndex;
use crate::types::{BlockRecord, BucketId};

/// Hash committing to the records of one bucket.
pub type BucketHash = [u8; 32];

/// Magic bytes every serialized index starts with.
const INDEX_MAGIC: &[u8; 4] = b"PIDX";
/// Length of the magic plus codec header.
const HEADER_LEN: usize = 12;
/// Upper bound on the decoded body size, guards against hostile length prefixes.
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Errors that may occur when building, accessing or (de)serializing an index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("bucket {bucket} out of range, index has {count} buckets")]
    BucketOutOfRange { bucket: BucketId, count: u32 },
    #[error("bucket count must be positive")]
    ZeroBucketCount,
    #[error("index bytes do not start with the index header")]
    BadHeader,
    #[error("unknown index codec {0:#06x}")]
    UnknownCodec(u64),
    #[error("index body could not be encoded")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("index body could not be decoded")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("{0} trailing bytes after index body")]
    TrailingBytes(usize),
    #[error("records of bucket {0} are not sorted")]
    Unsorted(BucketId),
    #[error("hash of bucket {0} does not match its records")]
    HashMismatch(BucketId),
}

/// Identifies the variant of a serialized index.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexCodec {
    Sorted = 0x0400,
    MultiSorted = 0x0401,
}

impl TryFrom<u64> for IndexCodec {
    type Error = IndexError;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        match code {
            0x0400 => Ok(Self::Sorted),
            0x0401 => Ok(Self::MultiSorted),
            other => Err(IndexError::UnknownCodec(other)),
        }
    }
}

impl Display for IndexCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sorted => write!(f, "sorted"),
            Self::MultiSorted => write!(f, "multi-sorted"),
        }
    }
}

/// Read-only view of a bucket index.
pub trait Index {
    /// Returns the variant of this index.
    fn codec(&self) -> IndexCodec;

    /// Returns the number of buckets, valid bucket IDs are `0..bucket_count()`.
    fn bucket_count(&self) -> u32;

    /// Returns the hash and the records of the given bucket.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::BucketOutOfRange`] if `bucket >= bucket_count()`.
    fn bucket_records(&self, bucket: BucketId) -> Result<(BucketHash, &[BlockRecord]), IndexError>;

    /// Returns the total number of records over all buckets.
    fn record_count(&self) -> usize;
}

/// Index of one asset, tagged by variant.
///
/// Variants are reference-counted, cloning an [`AssetIndex`] never copies records.
#[derive(Clone, Debug)]
pub enum AssetIndex {
    Sorted(Arc<SortedIndex>),
    MultiSorted(Arc<MultiIndexSorted>),
}

impl AssetIndex {
    /// Returns the sharded variant, or `None` for any other variant.
    pub fn as_multi_sorted(&self) -> Option<&Arc<MultiIndexSorted>> {
        match self {
            Self::MultiSorted(index) => Some(index),
            Self::Sorted(_) => None,
        }
    }

    /// Serializes this index, including header.
    pub fn encode(&self) -> Result<Vec<u8>, IndexError> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + 64 * self.record_count());
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&(self.codec() as u64).to_le_bytes());
        let body = match self {
            Self::Sorted(index) => bincode::serde::encode_to_vec(index.as_ref(), bincode_config())?,
            Self::MultiSorted(index) => {
                bincode::serde::encode_to_vec(index.buckets(), bincode_config())?
            }
        };
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Deserializes an index produced by [`AssetIndex::encode`].
    ///
    /// # Errors
    ///
    /// Fails on a bad header, unknown codec, malformed body, trailing bytes,
    /// and if any bucket is unsorted or does not match its stored hash.
    pub fn decode(bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != INDEX_MAGIC {
            return Err(IndexError::BadHeader);
        }
        let mut code = [0; 8];
        code.copy_from_slice(&bytes[4..HEADER_LEN]);
        let codec = IndexCodec::try_from(u64::from_le_bytes(code))?;
        let body = &bytes[HEADER_LEN..];
        match codec {
            IndexCodec::Sorted => {
                let (index, read): (SortedIndex, usize) =
                    bincode::serde::decode_from_slice(body, bincode_config())?;
                check_consumed(body, read)?;
                Ok(Self::Sorted(Arc::new(index.validate()?)))
            }
            IndexCodec::MultiSorted => {
                let (buckets, read): (Vec<Bucket>, usize) =
                    bincode::serde::decode_from_slice(body, bincode_config())?;
                check_consumed(body, read)?;
                let index = MultiIndexSorted::from_decoded(buckets)?;
                Ok(Self::MultiSorted(Arc::new(index)))
            }
        }
    }
}

impl Index for AssetIndex {
    fn codec(&self) -> IndexCodec {
        match self {
            Self::Sorted(index) => index.codec(),
            Self::MultiSorted(index) => index.codec(),
        }
    }

    fn bucket_count(&self) -> u32 {
        match self {
            Self::Sorted(index) => index.bucket_count(),
            Self::MultiSorted(index) => index.bucket_count(),
        }
    }

    fn bucket_records(&self, bucket: BucketId) -> Result<(BucketHash, &[BlockRecord]), IndexError> {
        match self {
            Self::Sorted(index) => index.bucket_records(bucket),
            Self::MultiSorted(index) => index.bucket_records(bucket),
        }
    }

    fn record_count(&self) -> usize {
        match self {
            Self::Sorted(index) => index.record_count(),
            Self::MultiSorted(index) => index.record_count(),
        }
    }
}

impl From<MultiIndexSorted> for AssetIndex {
    fn from(index: MultiIndexSorted) -> Self {
        Self::MultiSorted(Arc::new(index))
    }
}

impl From<SortedIndex> for AssetIndex {
    fn from(index: SortedIndex) -> Self {
        Self::Sorted(Arc::new(index))
    }
}

/// Computes the hash over a bucket's records, in the given order.
pub(crate) fn bucket_hash(records: &[BlockRecord]) -> BucketHash {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.digest_input());
    }
    hasher.finalize().into()
}

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_BODY_BYTES>()
}

fn check_consumed(body: &[u8], read: usize) -> Result<(), IndexError> {
    if read != body.len() {
        return Err(IndexError::TrailingBytes(body.len() - read));
    }
    Ok(())
}

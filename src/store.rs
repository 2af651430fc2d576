// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed block storage.
//!
//! This module defines the [`BlockStore`] trait challenges read through.
//! It also provides two implementations:
//! - [`MemoryBlockStore`] keeps everything in process memory.
//! - [`FsBlockStore`] keeps assets in a directory tree.
//!
//! Assets are grouped into store-level buckets by [`store_bucket_for`].
//! Each non-empty store bucket has a hash over the sorted roots it contains,
//! see [`store_bucket_hash`].

mod fs;
mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use self::fs::FsBlockStore;
pub use self::memory::MemoryBlockStore;
use crate::index::{AssetIndex, BucketHash, IndexError};
use crate::types::{BucketId, Cid};

/// Default number of store-level buckets assets are grouped into.
pub const DEFAULT_STORE_BUCKETS: u32 = 128;

/// Errors reported by a [`BlockStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("asset {0} not found")]
    AssetNotFound(Cid),
    #[error("block {cid} of asset {root} not found")]
    BlockNotFound { root: Cid, cid: Cid },
    #[error("stored index is malformed")]
    Index(#[from] IndexError),
    #[error("storage I/O failure")]
    Io(#[from] std::io::Error),
    #[error("malformed store entry: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Returns `true` iff this error means the requested item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AssetNotFound(_) | Self::BlockNotFound { .. })
    }
}

/// Abstraction over content-addressed storage holding assets.
///
/// All operations are read-only.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Returns the hash of every non-empty store bucket.
    ///
    /// The map's iteration order is unspecified.
    /// Callers using the bucket IDs as a random-index domain must sort them first.
    async fn bucket_hashes(&self) -> Result<HashMap<BucketId, BucketHash>, StoreError>;

    /// Returns the roots of all assets in the given store bucket.
    async fn assets_in_bucket(&self, bucket: BucketId) -> Result<Vec<Cid>, StoreError>;

    /// Loads and parses the index of the given asset.
    ///
    /// Every call parses the stored index anew, cache the result.
    async fn load_index(&self, root: &Cid) -> Result<AssetIndex, StoreError>;

    /// Fetches the bytes of a block of the given asset.
    async fn fetch_block(&self, root: &Cid, cid: &Cid) -> Result<Bytes, StoreError>;
}

/// Returns the store bucket an asset with the given root belongs to.
pub fn store_bucket_for(root: &Cid, store_buckets: u32) -> BucketId {
    root.shard_key() % store_buckets.max(1)
}

/// Computes the hash of a store bucket from the roots it contains.
///
/// Roots are sorted first, the result does not depend on their order.
pub fn store_bucket_hash<'a>(roots: impl IntoIterator<Item = &'a Cid>) -> BucketHash {
    let mut roots: Vec<_> = roots.into_iter().collect();
    roots.sort_unstable();
    let mut hasher = Sha256::new();
    for root in roots {
        hasher.update(root.as_bytes());
    }
    hasher.finalize().into()
}

// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Turning payloads into content-addressed assets.
//!
//! An [`Asset`] is a payload split into fixed-size blocks, together with the
//! [`AssetIndex`] describing where each block lives.
//! Its root is the hash over all block identifiers in payload order.

use std::collections::BTreeMap;

use bytes::Bytes;
use log::debug;

use crate::index::{AssetIndex, Index, IndexError, MultiIndexSorted, SortedIndex};
use crate::types::{BlockRecord, Cid};

/// Default size of a block in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;
/// Largest block size, so that every block size fits a [`BlockRecord`].
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize;
/// Default number of buckets an asset's index is sharded into.
pub const DEFAULT_BUCKET_COUNT: u32 = 32;

/// Content-addressed asset, ready to be stored.
#[derive(Clone, Debug)]
pub struct Asset {
    root: Cid,
    index: AssetIndex,
    blocks: BTreeMap<Cid, Bytes>,
}

impl Asset {
    /// Returns the root content identifier naming the whole asset.
    pub fn root(&self) -> Cid {
        self.root
    }

    pub fn index(&self) -> &AssetIndex {
        &self.index
    }

    /// Returns all distinct blocks of this asset, keyed by content identifier.
    pub fn blocks(&self) -> &BTreeMap<Cid, Bytes> {
        &self.blocks
    }

    /// Returns the bytes of the block with the given identifier.
    pub fn block(&self, cid: &Cid) -> Option<&Bytes> {
        self.blocks.get(cid)
    }
}

/// Builder splitting payloads into [`Asset`]s.
#[derive(Clone, Copy, Debug)]
pub struct AssetBuilder {
    block_size: usize,
    bucket_count: u32,
    sharded: bool,
}

impl Default for AssetBuilder {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            bucket_count: DEFAULT_BUCKET_COUNT,
            sharded: true,
        }
    }
}

impl AssetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size, clamped to `1..=MAX_BLOCK_SIZE`.
    #[must_use]
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.clamp(1, MAX_BLOCK_SIZE);
        self
    }

    #[must_use]
    pub fn bucket_count(mut self, bucket_count: u32) -> Self {
        self.bucket_count = bucket_count;
        self
    }

    /// Makes the builder emit a flat [`SortedIndex`] instead of a sharded one.
    #[must_use]
    pub fn unsharded(mut self) -> Self {
        self.sharded = false;
        self
    }

    /// Splits `payload` into blocks and indexes them.
    ///
    /// Sharded indices stripe the blocks over the configured number of buckets,
    /// capped at the number of blocks, so every bucket of a non-empty payload
    /// holds at least one record.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ZeroBucketCount`] if a sharded index with zero buckets was requested.
    pub fn build(&self, payload: &[u8]) -> Result<Asset, IndexError> {
        let mut records = Vec::with_capacity(payload.len().div_ceil(self.block_size));
        let mut blocks = BTreeMap::new();
        let mut offset = 0u64;
        for chunk in payload.chunks(self.block_size) {
            let cid = Cid::of(chunk);
            records.push(BlockRecord {
                cid,
                offset,
                size: chunk.len() as u32,
            });
            blocks
                .entry(cid)
                .or_insert_with(|| Bytes::copy_from_slice(chunk));
            offset += chunk.len() as u64;
        }
        let root = Cid::of_parts(records.iter().map(|r| r.cid.as_ref()));

        let index: AssetIndex = if self.sharded {
            MultiIndexSorted::striped(records, self.bucket_count)?.into()
        } else {
            SortedIndex::new(records).into()
        };
        debug!(
            "built asset {root} with {} blocks ({} distinct) over {} buckets",
            index.record_count(),
            blocks.len(),
            index.bucket_count(),
        );
        Ok(Asset {
            root,
            index,
            blocks,
        })
    }
}

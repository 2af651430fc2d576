// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sharded index with sorted buckets.

use serde::{Deserialize, Serialize};

use super::{BucketHash, Index, IndexCodec, IndexError, bucket_hash};
use crate::types::{BlockRecord, BucketId, Cid};

/// One shard of a [`MultiIndexSorted`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    hash: BucketHash,
    records: Vec<BlockRecord>,
}

impl Bucket {
    /// Sorts `records` and computes the bucket hash over them.
    pub fn new(mut records: Vec<BlockRecord>) -> Self {
        records.sort_unstable();
        Self {
            hash: bucket_hash(&records),
            records,
        }
    }

    pub fn hash(&self) -> BucketHash {
        self.hash
    }

    pub fn records(&self) -> &[BlockRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Index whose records are sharded into a fixed number of sorted buckets.
///
/// Buckets are addressed by their position in `0..bucket_count`.
/// [`MultiIndexSorted::build`] assigns records with [`MultiIndexSorted::bucket_for`],
/// [`MultiIndexSorted::striped`] by their position. Within a bucket they are sorted by `(cid, offset, size)`.
///
/// Instances are never mutated after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiIndexSorted {
    buckets: Vec<Bucket>,
}

impl MultiIndexSorted {
    /// Builds an index over `records`, sharded into `bucket_count` buckets.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ZeroBucketCount`] if `bucket_count` is zero.
    pub fn build(
        records: impl IntoIterator<Item = BlockRecord>,
        bucket_count: u32,
    ) -> Result<Self, IndexError> {
        if bucket_count == 0 {
            return Err(IndexError::ZeroBucketCount);
        }
        let mut shards = vec![Vec::new(); bucket_count as usize];
        for record in records {
            shards[Self::bucket_for(&record.cid, bucket_count) as usize].push(record);
        }
        Ok(Self::from_buckets(shards))
    }

    /// Builds an index over `records` striped across at most `bucket_count` buckets.
    ///
    /// Record `i` lands in bucket `i % n`, where `n` is `bucket_count` capped at
    /// the number of records (but at least one), so no bucket is left empty
    /// unless there are no records at all.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ZeroBucketCount`] if `bucket_count` is zero.
    pub fn striped(records: Vec<BlockRecord>, bucket_count: u32) -> Result<Self, IndexError> {
        if bucket_count == 0 {
            return Err(IndexError::ZeroBucketCount);
        }
        let n = (bucket_count as usize).min(records.len()).max(1);
        let mut shards = vec![Vec::with_capacity(records.len().div_ceil(n)); n];
        for (i, record) in records.into_iter().enumerate() {
            shards[i % n].push(record);
        }
        Ok(Self::from_buckets(shards))
    }

    /// Creates an index with exactly the given bucket layout.
    ///
    /// Each inner vector becomes one bucket and is sorted.
    /// Placement according to [`Self::bucket_for`] is not enforced.
    pub fn from_buckets(buckets: Vec<Vec<BlockRecord>>) -> Self {
        Self {
            buckets: buckets.into_iter().map(Bucket::new).collect(),
        }
    }

    /// Re-assembles an index from decoded buckets, checking their invariants.
    pub(super) fn from_decoded(buckets: Vec<Bucket>) -> Result<Self, IndexError> {
        for (id, bucket) in buckets.iter().enumerate() {
            let id = id as BucketId;
            if !bucket.records.is_sorted() {
                return Err(IndexError::Unsorted(id));
            }
            if bucket_hash(&bucket.records) != bucket.hash {
                return Err(IndexError::HashMismatch(id));
            }
        }
        Ok(Self { buckets })
    }

    /// Returns the bucket a block with content identifier `cid` is placed in.
    pub fn bucket_for(cid: &Cid, bucket_count: u32) -> BucketId {
        cid.shard_key() % bucket_count
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }
}

impl Index for MultiIndexSorted {
    fn codec(&self) -> IndexCodec {
        IndexCodec::MultiSorted
    }

    fn bucket_count(&self) -> u32 {
        self.buckets.len() as u32
    }

    fn bucket_records(&self, bucket: BucketId) -> Result<(BucketHash, &[BlockRecord]), IndexError> {
        let b = self
            .buckets
            .get(bucket as usize)
            .ok_or(IndexError::BucketOutOfRange {
                bucket,
                count: self.bucket_count(),
            })?;
        Ok((b.hash, &b.records))
    }

    fn record_count(&self) -> usize {
        self.buckets.iter().map(|b| b.records.len()).sum()
    }
}

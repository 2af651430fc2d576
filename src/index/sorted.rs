// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use super::{BucketHash, Index, IndexCodec, IndexError, bucket_hash};
use crate::types::{BlockRecord, BucketId};

/// Flat index holding all records in one sorted list.
///
/// Reports itself as a single bucket.
/// Challenges do not accept this variant, it exists for assets ingested without sharding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedIndex {
    hash: BucketHash,
    records: Vec<BlockRecord>,
}

impl SortedIndex {
    pub fn new(records: impl IntoIterator<Item = BlockRecord>) -> Self {
        let mut records: Vec<_> = records.into_iter().collect();
        records.sort_unstable();
        Self {
            hash: bucket_hash(&records),
            records,
        }
    }

    pub(super) fn validate(self) -> Result<Self, IndexError> {
        if !self.records.is_sorted() {
            return Err(IndexError::Unsorted(0));
        }
        if bucket_hash(&self.records) != self.hash {
            return Err(IndexError::HashMismatch(0));
        }
        Ok(self)
    }

    pub fn records(&self) -> &[BlockRecord] {
        &self.records
    }
}

impl Index for SortedIndex {
    fn codec(&self) -> IndexCodec {
        IndexCodec::Sorted
    }

    fn bucket_count(&self) -> u32 {
        1
    }

    fn bucket_records(&self, bucket: BucketId) -> Result<(BucketHash, &[BlockRecord]), IndexError> {
        if bucket != 0 {
            return Err(IndexError::BucketOutOfRange { bucket, count: 1 });
        }
        Ok((self.hash, &self.records))
    }

    fn record_count(&self) -> usize {
        self.records.len()
    }
}

// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Utility types and functions for tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::asset::{Asset, AssetBuilder};
use crate::cache::IndexCache;
use crate::config::CacheConfig;
use crate::index::{AssetIndex, MultiIndexSorted};
use crate::store::MemoryBlockStore;
use crate::types::{BlockRecord, Cid};

/// Returns a fresh, not yet existing directory below the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "possession-{prefix}-{}-{nanos}-{n}",
        std::process::id()
    ))
}

/// Generates `len` deterministic payload bytes, different for each `salt`.
pub fn payload(len: usize, salt: u64) -> Vec<u8> {
    let mut state = salt.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (0..len)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// Builds an asset of `blocks` distinct blocks sharded into `buckets` buckets.
pub fn asset(blocks: usize, buckets: u32, salt: u64) -> Asset {
    AssetBuilder::new()
        .block_size(64)
        .bucket_count(buckets)
        .build(&payload(64 * blocks, salt))
        .unwrap()
}

/// Creates a memory store holding `num_assets` assets of 16 blocks in 4 buckets each.
pub fn populated_store(num_assets: u64, store_buckets: u32) -> (Arc<MemoryBlockStore>, Vec<Asset>) {
    let store = Arc::new(MemoryBlockStore::new(store_buckets));
    let assets: Vec<_> = (0..num_assets).map(|i| asset(16, 4, i + 1)).collect();
    for asset in &assets {
        store.put_asset(asset).unwrap();
    }
    (store, assets)
}

/// Wraps `store` in an [`IndexCache`] with default capacities.
pub fn cache_over(store: Arc<MemoryBlockStore>) -> Arc<IndexCache> {
    Arc::new(IndexCache::new(store, &CacheConfig::default()))
}

/// Stores an asset with exactly the given number of records per bucket.
///
/// Returns the asset's root and its bucket layout, as sorted in the index.
pub fn put_layout(store: &MemoryBlockStore, counts: &[usize], salt: u64) -> (Cid, Vec<Vec<BlockRecord>>) {
    let root = Cid::of(&salt.to_le_bytes());
    let mut offset = 0;
    let mut layout = Vec::with_capacity(counts.len());
    for (bucket, &count) in counts.iter().enumerate() {
        let mut records = Vec::with_capacity(count);
        for i in 0..count {
            let data = payload(32, salt ^ (((bucket as u64) << 32) | i as u64));
            let cid = store.put_block(root, data);
            records.push(BlockRecord {
                cid,
                offset,
                size: 32,
            });
            offset += 32;
        }
        records.sort_unstable();
        layout.push(records);
    }
    let index: AssetIndex = MultiIndexSorted::from_buckets(layout.clone()).into();
    store.put_raw_index(root, index.encode().unwrap());
    (root, layout)
}

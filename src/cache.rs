// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bounded cache of parsed asset indices and recently fetched blocks.
//!
//! Both caches evict least-recently-used entries first.
//! Cached values are reference-counted ([`AssetIndex`] variants are behind an
//! [`Arc`], blocks are [`Bytes`]), so evicting an entry only drops the cache's
//! reference and never invalidates a value a concurrent round is still using.
//!
//! Concurrent misses for the same key are coalesced: only one of them loads
//! from the [`BlockStore`], the others wait for and share its result.
//! Failed loads are not cached.

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use log::trace;
use moka::future::Cache;
use moka::policy::EvictionPolicy;

use crate::config::CacheConfig;
use crate::index::AssetIndex;
use crate::store::{BlockStore, StoreError};
use crate::types::Cid;

/// Cache sitting in front of a [`BlockStore`].
pub struct IndexCache {
    store: Arc<dyn BlockStore>,
    indices: Cache<Cid, AssetIndex>,
    blocks: Cache<(Cid, Cid), Bytes>,
}

impl IndexCache {
    /// Creates an empty cache over `store`, bounded as configured.
    pub fn new(store: Arc<dyn BlockStore>, config: &CacheConfig) -> Self {
        let indices = Cache::builder()
            .name("asset-indices")
            .max_capacity(config.index_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        let blocks = Cache::builder()
            .name("blocks")
            .max_capacity(config.block_capacity_bytes)
            .weigher(|_: &(Cid, Cid), data: &Bytes| -> u32 {
                data.len().try_into().unwrap_or(u32::MAX)
            })
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            store,
            indices,
            blocks,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Returns the index of asset `root`, loading it from the store on a miss.
    #[fastrace::trace(short_name = true)]
    pub async fn asset_index(&self, root: &Cid) -> Result<AssetIndex, Arc<StoreError>> {
        self.indices
            .try_get_with(*root, async {
                trace!("index cache miss for asset {root}");
                self.store.load_index(root).await
            })
            .await
    }

    /// Returns the bytes of block `cid` of asset `root`, fetching them on a miss.
    #[fastrace::trace(short_name = true)]
    pub async fn block(&self, root: &Cid, cid: &Cid) -> Result<Bytes, Arc<StoreError>> {
        self.blocks
            .try_get_with((*root, *cid), async {
                trace!("block cache miss for {cid} of asset {root}");
                self.store.fetch_block(root, cid).await
            })
            .await
    }

    /// Drops the cached index and all cached blocks of asset `root`.
    ///
    /// Must be called after the asset was removed or re-ingested.
    /// Rounds already holding the old index keep using it.
    pub async fn invalidate(&self, root: &Cid) {
        self.indices.invalidate(root).await;
        let keys: Vec<_> = self
            .blocks
            .iter()
            .filter(|(key, _)| key.0 == *root)
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            self.blocks.invalidate(key).await;
        }
        trace!("invalidated cached index and {} blocks of asset {root}", keys.len());
    }

    /// Drops all cached indices and blocks.
    pub fn clear(&self) {
        self.indices.invalidate_all();
        self.blocks.invalidate_all();
    }

    /// Returns the number of cached indices.
    ///
    /// The count is only exact after [`IndexCache::run_pending_tasks`].
    pub fn cached_indices(&self) -> u64 {
        self.indices.entry_count()
    }

    /// Returns the total size of all cached blocks.
    ///
    /// The size is only exact after [`IndexCache::run_pending_tasks`].
    pub fn cached_block_bytes(&self) -> u64 {
        self.blocks.weighted_size()
    }

    /// Applies pending inserts, evictions and invalidations.
    pub async fn run_pending_tasks(&self) {
        self.indices.run_pending_tasks().await;
        self.blocks.run_pending_tasks().await;
    }
}

impl Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("cached_indices", &self.indices.entry_count())
            .field("cached_block_bytes", &self.blocks.weighted_size())
            .finish_non_exhaustive()
    }
}

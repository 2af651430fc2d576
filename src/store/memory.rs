// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::trace;

use super::{BlockStore, DEFAULT_STORE_BUCKETS, StoreError, store_bucket_for, store_bucket_hash};
use crate::asset::Asset;
use crate::index::{AssetIndex, BucketHash};
use crate::types::{BucketId, Cid};

/// In-memory [`BlockStore`].
///
/// Indices are kept in serialized form and parsed on every [`BlockStore::load_index`] call,
/// the number of parses is available through [`MemoryBlockStore::index_loads`].
pub struct MemoryBlockStore {
    store_buckets: u32,
    state: RwLock<MemoryState>,
    index_loads: AtomicUsize,
    load_delay: Option<Duration>,
}

#[derive(Default)]
struct MemoryState {
    assets: HashMap<Cid, StoredAsset>,
    buckets: HashMap<BucketId, BTreeSet<Cid>>,
}

#[derive(Default)]
struct StoredAsset {
    index: Bytes,
    blocks: HashMap<Cid, Bytes>,
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_BUCKETS)
    }
}

impl MemoryBlockStore {
    /// Creates an empty store grouping assets into `store_buckets` buckets.
    pub fn new(store_buckets: u32) -> Self {
        Self {
            store_buckets: store_buckets.max(1),
            state: RwLock::new(MemoryState::default()),
            index_loads: AtomicUsize::new(0),
            load_delay: None,
        }
    }

    /// Makes every index load take at least `delay`.
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Stores an asset with its index and all its blocks.
    pub fn put_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let index = Bytes::from(asset.index().encode()?);
        let mut state = self.write();
        let stored = state.assets.entry(asset.root()).or_default();
        stored.index = index;
        stored
            .blocks
            .extend(asset.blocks().iter().map(|(cid, data)| (*cid, data.clone())));
        self.register(&mut state, asset.root());
        Ok(())
    }

    /// Stores raw index bytes for `root`, replacing any existing index.
    pub fn put_raw_index(&self, root: Cid, index: impl Into<Bytes>) {
        let mut state = self.write();
        state.assets.entry(root).or_default().index = index.into();
        self.register(&mut state, root);
    }

    /// Stores a single block for `root`, returning its content identifier.
    pub fn put_block(&self, root: Cid, data: impl Into<Bytes>) -> Cid {
        let data = data.into();
        let cid = Cid::of(&data);
        let mut state = self.write();
        state.assets.entry(root).or_default().blocks.insert(cid, data);
        self.register(&mut state, root);
        cid
    }

    /// Removes a block, returns `true` iff it was present.
    pub fn remove_block(&self, root: &Cid, cid: &Cid) -> bool {
        let mut state = self.write();
        state
            .assets
            .get_mut(root)
            .is_some_and(|asset| asset.blocks.remove(cid).is_some())
    }

    /// Removes an asset with all its blocks, returns `true` iff it was present.
    pub fn remove_asset(&self, root: &Cid) -> bool {
        let mut state = self.write();
        if state.assets.remove(root).is_none() {
            return false;
        }
        let bucket = store_bucket_for(root, self.store_buckets);
        if let Some(roots) = state.buckets.get_mut(&bucket) {
            roots.remove(root);
            if roots.is_empty() {
                state.buckets.remove(&bucket);
            }
        }
        true
    }

    /// Returns how often an index was parsed by [`BlockStore::load_index`].
    pub fn index_loads(&self) -> usize {
        self.index_loads.load(Ordering::Relaxed)
    }

    pub fn asset_count(&self) -> usize {
        self.read().assets.len()
    }

    fn register(&self, state: &mut MemoryState, root: Cid) {
        let bucket = store_bucket_for(&root, self.store_buckets);
        state.buckets.entry(bucket).or_default().insert(root);
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn bucket_hashes(&self) -> Result<HashMap<BucketId, BucketHash>, StoreError> {
        let state = self.read();
        Ok(state
            .buckets
            .iter()
            .map(|(id, roots)| (*id, store_bucket_hash(roots)))
            .collect())
    }

    async fn assets_in_bucket(&self, bucket: BucketId) -> Result<Vec<Cid>, StoreError> {
        let state = self.read();
        Ok(state
            .buckets
            .get(&bucket)
            .map(|roots| roots.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn load_index(&self, root: &Cid) -> Result<AssetIndex, StoreError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = {
            let state = self.read();
            let asset = state
                .assets
                .get(root)
                .ok_or(StoreError::AssetNotFound(*root))?;
            asset.index.clone()
        };
        self.index_loads.fetch_add(1, Ordering::Relaxed);
        trace!("parsing index of asset {root}");
        Ok(AssetIndex::decode(&bytes)?)
    }

    async fn fetch_block(&self, root: &Cid, cid: &Cid) -> Result<Bytes, StoreError> {
        let state = self.read();
        state
            .assets
            .get(root)
            .and_then(|asset| asset.blocks.get(cid))
            .cloned()
            .ok_or(StoreError::BlockNotFound {
                root: *root,
                cid: *cid,
            })
    }
}

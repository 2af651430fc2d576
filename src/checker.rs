// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Challenge selection.
//!
//! A [`RandomChecker`] runs one verification round: given a seed it selects a
//! bucket of an asset's [`MultiIndexSorted`] index, then a record inside that
//! bucket, and fetches the record's block through the [`IndexCache`].
//!
//! For a fixed seed, asset and storage state every draw is reproducible,
//! so a verifier and a challenged node agree on the challenged block
//! exchanging nothing but the seed. Draws happen in a fixed order:
//! 1. (self-check only) store bucket, then asset, from a fresh [`ChallengeRng`]
//! 2. bucket, from the round's own [`ChallengeRng`]
//! 3. record, from the same generator as step 2
//!
//! Asset selection never advances the round's generator,
//! a self-check round selects the same block as a targeted round for the same
//! seed and the asset it picked.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::IndexCache;
use crate::index::{Index, IndexCodec, IndexError, MultiIndexSorted};
use crate::rng::{ChallengeRng, Seed};
use crate::store::{BlockStore, StoreError};
use crate::types::{Block, BlockRecord, BucketId, Cid};

/// Errors that abort a verification round.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("no index found for asset {0}")]
    IndexNotFound(Cid),
    #[error("index of asset {root} is {found}, expected {}", IndexCodec::MultiSorted)]
    IndexTypeMismatch { root: Cid, found: IndexCodec },
    #[error("store holds no assets")]
    NoAssetsExist,
    #[error("store bucket {0} holds no assets")]
    NoAssetsInBucket(BucketId),
    #[error("asset index has no buckets")]
    NoBuckets,
    #[error("bucket {bucket} has no records")]
    EmptyBucket { bucket: BucketId },
    #[error("cannot fetch records of bucket {bucket}")]
    BucketFetch {
        bucket: BucketId,
        #[source]
        source: IndexError,
    },
    #[error("cannot fetch block {cid}")]
    BlockFetch {
        cid: Cid,
        #[source]
        source: Arc<StoreError>,
    },
    #[error("storage I/O failure")]
    StorageIo(#[source] Arc<StoreError>),
    #[error("round cancelled")]
    Cancelled,
}

/// Outcome of the bucket and record draws of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub bucket: BucketId,
    /// Position of the record inside its sorted bucket.
    pub record_index: usize,
    pub record: BlockRecord,
}

/// Result of a round checked with [`RandomChecker::report`].
#[derive(Clone, Debug)]
pub struct CheckReport {
    pub seed: Seed,
    pub root: Cid,
    pub selection: Selection,
    /// Whether the fetched block has the recorded size and hashes to its identifier.
    pub intact: bool,
}

/// State of one verification round.
#[derive(Debug)]
pub struct RandomChecker {
    rng: ChallengeRng,
    root: Cid,
    index: Arc<MultiIndexSorted>,
    cache: Arc<IndexCache>,
}

impl RandomChecker {
    /// Creates a checker for the known asset `root`.
    ///
    /// # Errors
    ///
    /// - [`CheckError::IndexNotFound`] if the store has no index for `root`.
    /// - [`CheckError::IndexTypeMismatch`] if the index is not a [`MultiIndexSorted`].
    /// - [`CheckError::StorageIo`] if loading the index failed otherwise.
    /// - [`CheckError::Cancelled`] if `cancel` fired first.
    #[fastrace::trace(short_name = true)]
    pub async fn for_asset(
        root: Cid,
        seed: Seed,
        cache: Arc<IndexCache>,
        cancel: &CancellationToken,
    ) -> Result<Self, CheckError> {
        let index = cancellable(cancel, cache.asset_index(&root))
            .await?
            .map_err(|err| {
                if err.is_not_found() {
                    CheckError::IndexNotFound(root)
                } else {
                    CheckError::StorageIo(err)
                }
            })?;
        let index = index
            .as_multi_sorted()
            .cloned()
            .ok_or(CheckError::IndexTypeMismatch {
                root,
                found: index.codec(),
            })?;
        debug!(
            "checking asset {root} with seed {seed} ({} buckets)",
            index.bucket_count()
        );
        Ok(Self {
            rng: ChallengeRng::new(seed),
            root,
            index,
            cache,
        })
    }

    /// Creates a checker for an asset picked from the whole store by [`pick_asset`].
    #[fastrace::trace(short_name = true)]
    pub async fn self_check(
        seed: Seed,
        cache: Arc<IndexCache>,
        cancel: &CancellationToken,
    ) -> Result<Self, CheckError> {
        let root = pick_asset(seed, cache.store().as_ref(), cancel).await?;
        Self::for_asset(root, seed, cache, cancel).await
    }

    pub fn seed(&self) -> Seed {
        self.rng.seed()
    }

    /// Returns the root of the asset being checked.
    pub fn root(&self) -> Cid {
        self.root
    }

    pub fn index(&self) -> &Arc<MultiIndexSorted> {
        &self.index
    }

    /// Draws the bucket and then the record to challenge, without fetching anything.
    ///
    /// # Errors
    ///
    /// - [`CheckError::NoBuckets`] if the index has no buckets.
    /// - [`CheckError::EmptyBucket`] if the drawn bucket has no records.
    pub fn select(&mut self) -> Result<Selection, CheckError> {
        let bucket_count = self.index.bucket_count() as usize;
        let bucket = self.rng.index(bucket_count).ok_or(CheckError::NoBuckets)? as BucketId;
        let (_, records) = self
            .index
            .bucket_records(bucket)
            .map_err(|source| CheckError::BucketFetch { bucket, source })?;
        let record_index = self
            .rng
            .index(records.len())
            .ok_or(CheckError::EmptyBucket { bucket })?;
        let selection = Selection {
            bucket,
            record_index,
            record: records[record_index],
        };
        debug!(
            "seed {} selected record {record_index} of bucket {bucket} in asset {}",
            self.rng.seed(),
            self.root
        );
        Ok(selection)
    }

    /// Selects a block like [`RandomChecker::select`] and fetches it.
    pub async fn challenge(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(Selection, Block), CheckError> {
        let selection = self.select()?;
        let cid = selection.record.cid;
        let data = cancellable(cancel, self.cache.block(&self.root, &cid))
            .await?
            .map_err(|source| CheckError::BlockFetch { cid, source })?;
        Ok((selection, Block { cid, data }))
    }

    /// Selects and fetches a block, then checks it against its record.
    pub async fn report(&mut self, cancel: &CancellationToken) -> Result<CheckReport, CheckError> {
        let (selection, block) = self.challenge(cancel).await?;
        let intact = block.is_intact() && block.len() == selection.record.size as usize;
        if !intact {
            warn!(
                "block {} of asset {} is corrupted (seed {})",
                block.cid,
                self.root,
                self.seed()
            );
        }
        Ok(CheckReport {
            seed: self.seed(),
            root: self.root,
            selection,
            intact,
        })
    }

    /// Selects a block and returns it as held by the store.
    ///
    /// Each call continues the round's random stream.
    #[fastrace::trace(short_name = true)]
    pub async fn get_block(&mut self, cancel: &CancellationToken) -> Result<Block, CheckError> {
        let (_, block) = self.challenge(cancel).await?;
        Ok(block)
    }
}

/// Picks an asset uniformly from the whole store.
///
/// Store bucket IDs and the assets of the chosen bucket are sorted before
/// drawing from them. Draws come from a fresh [`ChallengeRng`] for `seed`.
///
/// # Errors
///
/// - [`CheckError::NoAssetsExist`] if the store lists no buckets.
/// - [`CheckError::NoAssetsInBucket`] if the drawn bucket lists no assets.
/// - [`CheckError::StorageIo`] if listing failed.
pub async fn pick_asset(
    seed: Seed,
    store: &dyn BlockStore,
    cancel: &CancellationToken,
) -> Result<Cid, CheckError> {
    let mut rng = ChallengeRng::new(seed);
    let hashes = cancellable(cancel, store.bucket_hashes())
        .await?
        .map_err(storage_io)?;
    let mut buckets: Vec<BucketId> = hashes.into_keys().collect();
    buckets.sort_unstable();
    let bucket = buckets[rng.index(buckets.len()).ok_or(CheckError::NoAssetsExist)?];

    let mut assets = cancellable(cancel, store.assets_in_bucket(bucket))
        .await?
        .map_err(storage_io)?;
    assets.sort_unstable();
    let i = rng
        .index(assets.len())
        .ok_or(CheckError::NoAssetsInBucket(bucket))?;
    debug!("seed {seed} picked asset {} from store bucket {bucket}", assets[i]);
    Ok(assets[i])
}

/// Runs one untargeted round and checks the integrity of the returned block.
pub async fn self_check_round(
    seed: Seed,
    cache: Arc<IndexCache>,
    cancel: &CancellationToken,
) -> Result<CheckReport, CheckError> {
    RandomChecker::self_check(seed, cache, cancel)
        .await?
        .report(cancel)
        .await
}

/// Awaits `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, CheckError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CheckError::Cancelled),
        out = fut => Ok(out),
    }
}

fn storage_io(err: StoreError) -> CheckError {
    CheckError::StorageIo(Arc::new(err))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::asset::AssetBuilder;
    use crate::index::{AssetIndex, BucketHash};
    use crate::store::MemoryBlockStore;
    use crate::test_utils::{cache_over, populated_store, put_layout};

    async fn checker(root: Cid, seed: Seed, cache: &Arc<IndexCache>) -> RandomChecker {
        RandomChecker::for_asset(root, seed, cache.clone(), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn same_seed_same_selection() {
        let (store, assets) = populated_store(3, 4);
        let cache = cache_over(store.clone());
        let root = assets[1].root();
        for seed in 0..50 {
            let mut a = checker(root, seed, &cache).await;
            let mut b = checker(root, seed, &cache).await;
            for _ in 0..3 {
                assert_eq!(a.select().unwrap(), b.select().unwrap());
            }
        }

        // a second cache over a second store holding the same asset agrees
        let other = Arc::new(MemoryBlockStore::new(1));
        other.put_asset(&assets[1]).unwrap();
        let other_cache = cache_over(other);
        for seed in 0..50 {
            let a = checker(root, seed, &cache).await.get_block(&CancellationToken::new()).await;
            let b = checker(root, seed, &other_cache)
                .await
                .get_block(&CancellationToken::new())
                .await;
            assert_eq!(a.unwrap(), b.unwrap());
        }
    }

    #[tokio::test]
    async fn uneven_buckets() {
        let store = Arc::new(MemoryBlockStore::new(4));
        let (root, layout) = put_layout(&store, &[1, 4, 0], 99);
        let cache = cache_over(store.clone());
        let cancel = CancellationToken::new();

        let mut saw_empty = false;
        let mut saw_middle = false;
        for seed in 0..64 {
            let mut expected = ChallengeRng::new(seed);
            let bucket = expected.index(3).unwrap();
            let result = checker(root, seed, &cache).await.get_block(&cancel).await;
            match bucket {
                2 => {
                    assert!(matches!(result, Err(CheckError::EmptyBucket { bucket: 2 })));
                    saw_empty = true;
                }
                1 => {
                    let record = layout[1][expected.index(4).unwrap()];
                    let block = result.unwrap();
                    assert_eq!(block.cid, record.cid);
                    assert!(block.is_intact());
                    assert!(!block.is_empty());

                    // rerunning the seed reproduces the block
                    let again = checker(root, seed, &cache).await.get_block(&cancel).await;
                    assert_eq!(again.unwrap(), block);
                    saw_middle = true;
                }
                _ => assert_eq!(result.unwrap().cid, layout[0][0].cid),
            }
        }
        assert!(saw_empty && saw_middle);
    }

    fn chi_square(counts: &[u64], draws: u64) -> f64 {
        let expected = draws as f64 / counts.len() as f64;
        counts
            .iter()
            .map(|&c| (c as f64 - expected).powi(2) / expected)
            .sum()
    }

    #[tokio::test]
    async fn selections_are_uniform() {
        let store = Arc::new(MemoryBlockStore::new(4));
        let (root, _) = put_layout(&store, &[5; 8], 3);
        let cache = cache_over(store);

        const DRAWS: u64 = 8000;
        let mut buckets = [0u64; 8];
        let mut records = [0u64; 5];
        for seed in 0..DRAWS {
            let selection = checker(root, seed, &cache).await.select().unwrap();
            buckets[selection.bucket as usize] += 1;
            records[selection.record_index] += 1;
        }
        // 99.99% quantiles of chi-square with 7 and 4 degrees of freedom are ~29.9 and ~23.5
        assert!(chi_square(&buckets, DRAWS) < 30.0, "{buckets:?}");
        assert!(chi_square(&records, DRAWS) < 24.0, "{records:?}");
    }

    #[tokio::test]
    async fn self_check_picks_present_assets() {
        let (store, assets) = populated_store(10, 4);
        let cache = cache_over(store.clone());
        let cancel = CancellationToken::new();
        let roots: Vec<_> = assets.iter().map(|a| a.root()).collect();

        for seed in 0..200 {
            let root = pick_asset(seed, store.as_ref(), &cancel).await.unwrap();
            assert!(roots.contains(&root));
            assert_eq!(pick_asset(seed, store.as_ref(), &cancel).await.unwrap(), root);
        }

        // picking the asset does not advance the round's stream
        for seed in 0..20 {
            let mut untargeted = RandomChecker::self_check(seed, cache.clone(), &cancel)
                .await
                .unwrap();
            let mut targeted = checker(untargeted.root(), seed, &cache).await;
            assert_eq!(untargeted.select().unwrap(), targeted.select().unwrap());
        }
    }

    #[tokio::test]
    async fn small_default_asset_always_answers() {
        let store = Arc::new(MemoryBlockStore::new(4));
        let asset = AssetBuilder::new().build(b"a single small block").unwrap();
        store.put_asset(&asset).unwrap();
        let cache = cache_over(store);
        let cancel = CancellationToken::new();

        for seed in 0..500 {
            let report = checker(asset.root(), seed, &cache)
                .await
                .report(&cancel)
                .await
                .unwrap();
            assert!(report.intact);
            assert_eq!(report.selection.record.size, 20);
        }
    }

    #[tokio::test]
    async fn self_check_round_reports() {
        let (store, _) = populated_store(4, 2);
        let cache = cache_over(store);
        let report = self_check_round(11, cache, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.seed, 11);
        assert!(report.intact);
    }

    #[tokio::test]
    async fn empty_store() {
        let cache = cache_over(Arc::new(MemoryBlockStore::default()));
        let res = RandomChecker::self_check(1, cache, &CancellationToken::new()).await;
        assert!(matches!(res, Err(CheckError::NoAssetsExist)));
    }

    /// Store listing a bucket without assets in it.
    struct GhostBucketStore;

    #[async_trait]
    impl BlockStore for GhostBucketStore {
        async fn bucket_hashes(&self) -> Result<HashMap<BucketId, BucketHash>, StoreError> {
            Ok(HashMap::from([(3, [0; 32])]))
        }

        async fn assets_in_bucket(&self, _: BucketId) -> Result<Vec<Cid>, StoreError> {
            Ok(Vec::new())
        }

        async fn load_index(&self, root: &Cid) -> Result<AssetIndex, StoreError> {
            Err(StoreError::AssetNotFound(*root))
        }

        async fn fetch_block(&self, root: &Cid, cid: &Cid) -> Result<Bytes, StoreError> {
            Err(StoreError::BlockNotFound {
                root: *root,
                cid: *cid,
            })
        }
    }

    #[tokio::test]
    async fn listed_bucket_without_assets() {
        let res = pick_asset(5, &GhostBucketStore, &CancellationToken::new()).await;
        assert!(matches!(res, Err(CheckError::NoAssetsInBucket(3))));
    }

    #[tokio::test]
    async fn index_resolution_failures() {
        let store = Arc::new(MemoryBlockStore::new(4));
        let flat = AssetBuilder::new().unsharded().build(b"flat asset").unwrap();
        store.put_asset(&flat).unwrap();
        let garbage = Cid::of(b"garbage");
        store.put_raw_index(garbage, b"not an index".to_vec());
        let cache = cache_over(store);
        let cancel = CancellationToken::new();

        let res = RandomChecker::for_asset(flat.root(), 1, cache.clone(), &cancel).await;
        assert!(matches!(
            res,
            Err(CheckError::IndexTypeMismatch {
                found: IndexCodec::Sorted,
                ..
            })
        ));

        let unknown = Cid::of(b"unknown");
        let res = RandomChecker::for_asset(unknown, 1, cache.clone(), &cancel).await;
        assert!(matches!(res, Err(CheckError::IndexNotFound(root)) if root == unknown));

        let res = RandomChecker::for_asset(garbage, 1, cache, &cancel).await;
        assert!(matches!(res, Err(CheckError::StorageIo(_))));
    }

    #[tokio::test]
    async fn selection_failures() {
        let store = Arc::new(MemoryBlockStore::new(4));
        let (no_buckets, _) = put_layout(&store, &[], 1);
        let (empty, _) = put_layout(&store, &[0], 2);
        let (lost, layout) = put_layout(&store, &[1], 3);
        assert!(store.remove_block(&lost, &layout[0][0].cid));
        let cache = cache_over(store);
        let cancel = CancellationToken::new();

        let res = checker(no_buckets, 1, &cache).await.get_block(&cancel).await;
        assert!(matches!(res, Err(CheckError::NoBuckets)));

        let res = checker(empty, 1, &cache).await.get_block(&cancel).await;
        assert!(matches!(res, Err(CheckError::EmptyBucket { bucket: 0 })));

        let res = checker(lost, 1, &cache).await.get_block(&cancel).await;
        match res {
            Err(CheckError::BlockFetch { cid, source }) => {
                assert_eq!(cid, layout[0][0].cid);
                assert!(source.is_not_found());
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_rounds() {
        let (store, assets) = populated_store(2, 2);
        let cache = cache_over(store);
        let cancel = CancellationToken::new();
        let mut live = checker(assets[0].root(), 1, &cache).await;

        cancel.cancel();
        let res = RandomChecker::self_check(1, cache.clone(), &cancel).await;
        assert!(matches!(res, Err(CheckError::Cancelled)));
        let res = RandomChecker::for_asset(assets[0].root(), 1, cache, &cancel).await;
        assert!(matches!(res, Err(CheckError::Cancelled)));
        assert!(matches!(
            live.get_block(&cancel).await,
            Err(CheckError::Cancelled)
        ));
    }
}

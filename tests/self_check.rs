// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use possession::config::CacheConfig;
use possession::{
    Asset, AssetBuilder, CheckError, FsBlockStore, IndexCache, RandomChecker, self_check_round,
};
use tokio_util::sync::CancellationToken;

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "possession-it-{name}-{}-{nanos}",
        std::process::id()
    ))
}

fn assets(n: u8) -> Vec<Asset> {
    (0..n)
        .map(|i| {
            let payload: Vec<u8> = (0..20_000u32)
                .map(|j| ((j.wrapping_mul(2_654_435_761) >> 13) as u8) ^ i)
                .collect();
            AssetBuilder::new()
                .block_size(1000)
                .bucket_count(5)
                .build(&payload)
                .unwrap()
        })
        .collect()
}

fn cache(store: FsBlockStore) -> Arc<IndexCache> {
    Arc::new(IndexCache::new(Arc::new(store), &CacheConfig::default()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rounds_are_reproducible() {
    let dir = temp_dir("concurrent");
    let store = FsBlockStore::new(&dir, 8);
    let assets = assets(6);
    for asset in &assets {
        store.put_asset(asset).await.unwrap();
    }
    let cache = cache(store);
    let cancel = CancellationToken::new();

    let tasks = (0..64u64).map(|seed| {
        let cache = cache.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { self_check_round(seed, cache, &cancel).await })
    });
    let reports: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|task| task.unwrap().unwrap())
        .collect();

    // a fresh store and cache over the same directory select the same blocks
    let fresh = cache_over_dir(&dir);
    for report in &reports {
        assert!(report.intact);
        assert!(assets.iter().any(|a| a.root() == report.root));
        let again = self_check_round(report.seed, fresh.clone(), &cancel)
            .await
            .unwrap();
        assert_eq!(again.root, report.root);
        assert_eq!(again.selection, report.selection);
    }

    let _ = std::fs::remove_dir_all(&dir);
}

fn cache_over_dir(dir: &Path) -> Arc<IndexCache> {
    cache(FsBlockStore::new(dir, 8))
}

#[tokio::test]
async fn detects_corrupted_block() {
    let dir = temp_dir("corrupted");
    let store = FsBlockStore::new(&dir, 8);
    // a single block lands in a single bucket, so every round selects it
    let asset = AssetBuilder::new().build(b"the only block").unwrap();
    store.put_asset(&asset).await.unwrap();
    let (cid, _) = asset.blocks().iter().next().unwrap();
    let cancel = CancellationToken::new();

    let report = self_check_round(1, cache_over_dir(&dir), &cancel)
        .await
        .unwrap();
    assert!(report.intact);

    let block_path = dir
        .join("assets")
        .join(asset.root().to_hex())
        .join("blocks")
        .join(cid.to_hex());
    std::fs::write(&block_path, b"the only blocK").unwrap();
    let report = self_check_round(1, cache_over_dir(&dir), &cancel)
        .await
        .unwrap();
    assert!(!report.intact);

    std::fs::remove_file(&block_path).unwrap();
    let mut checker = RandomChecker::for_asset(asset.root(), 1, cache_over_dir(&dir), &cancel)
        .await
        .unwrap();
    assert!(matches!(
        checker.get_block(&cancel).await,
        Err(CheckError::BlockFetch { .. })
    ));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn removed_asset_after_invalidation() {
    let dir = temp_dir("removed");
    let store = Arc::new(FsBlockStore::new(&dir, 8));
    let asset = assets(1).remove(0);
    store.put_asset(&asset).await.unwrap();
    let cache = Arc::new(IndexCache::new(store.clone(), &CacheConfig::default()));
    let cancel = CancellationToken::new();

    RandomChecker::for_asset(asset.root(), 3, cache.clone(), &cancel)
        .await
        .unwrap();
    assert!(store.remove_asset(&asset.root()).await.unwrap());
    cache.invalidate(&asset.root()).await;

    let res = RandomChecker::for_asset(asset.root(), 3, cache.clone(), &cancel).await;
    assert!(matches!(res, Err(CheckError::IndexNotFound(_))));
    let res = self_check_round(3, cache, &cancel).await;
    assert!(matches!(res, Err(CheckError::NoAssetsExist)));

    let _ = std::fs::remove_dir_all(&dir);
}

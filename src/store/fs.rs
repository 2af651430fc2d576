// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, trace};
use tokio::fs;
use tokio::sync::Mutex;

use super::{BlockStore, StoreError, store_bucket_for, store_bucket_hash};
use crate::asset::Asset;
use crate::index::{AssetIndex, BucketHash};
use crate::types::{BucketId, Cid};

const ASSETS_DIR: &str = "assets";
const BUCKETS_DIR: &str = "buckets";
const BLOCKS_DIR: &str = "blocks";
const INDEX_FILE: &str = "index";

/// [`BlockStore`] backed by a directory tree.
///
/// Layout below the root directory:
/// - `assets/<root>/index` holds the serialized [`AssetIndex`]
/// - `assets/<root>/blocks/<cid>` holds the bytes of one block
/// - `buckets/<id>` lists the roots in store bucket `id`, one hex root per line
pub struct FsBlockStore {
    root: PathBuf,
    store_buckets: u32,
    /// Serializes rewrites of bucket files.
    bucket_lock: Mutex<()>,
}

impl FsBlockStore {
    pub fn new(root: impl AsRef<Path>, store_buckets: u32) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            store_buckets: store_buckets.max(1),
            bucket_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes an asset's index and blocks, then registers it in its store bucket.
    pub async fn put_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let root = asset.root();
        let blocks_dir = self.asset_dir(&root).join(BLOCKS_DIR);
        fs::create_dir_all(&blocks_dir).await?;

        for (cid, data) in asset.blocks() {
            let path = blocks_dir.join(cid.to_hex());
            if fs::try_exists(&path).await? {
                continue;
            }
            write_atomic(&path, data).await?;
        }
        let index = asset.index().encode()?;
        write_atomic(&self.asset_dir(&root).join(INDEX_FILE), &index).await?;

        let bucket = store_bucket_for(&root, self.store_buckets);
        let _guard = self.bucket_lock.lock().await;
        let mut roots = self.read_bucket(bucket).await?;
        if roots.insert(root) {
            self.write_bucket(bucket, &roots).await?;
        }
        debug!("stored asset {root} in store bucket {bucket}");
        Ok(())
    }

    /// Removes an asset and unregisters it, returns `true` iff it was present.
    pub async fn remove_asset(&self, root: &Cid) -> Result<bool, StoreError> {
        let bucket = store_bucket_for(root, self.store_buckets);
        {
            let _guard = self.bucket_lock.lock().await;
            let mut roots = self.read_bucket(bucket).await?;
            if roots.remove(root) {
                self.write_bucket(bucket, &roots).await?;
            }
        }
        match fs::remove_dir_all(self.asset_dir(root)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn asset_dir(&self, root: &Cid) -> PathBuf {
        self.root.join(ASSETS_DIR).join(root.to_hex())
    }

    fn bucket_path(&self, bucket: BucketId) -> PathBuf {
        self.root.join(BUCKETS_DIR).join(bucket.to_string())
    }

    async fn read_bucket(&self, bucket: BucketId) -> Result<BTreeSet<Cid>, StoreError> {
        let contents = match fs::read_to_string(self.bucket_path(bucket)).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => return Err(err.into()),
        };
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<Cid>()
                    .map_err(|err| StoreError::Malformed(format!("store bucket {bucket}: {err}")))
            })
            .collect()
    }

    async fn write_bucket(&self, bucket: BucketId, roots: &BTreeSet<Cid>) -> Result<(), StoreError> {
        let path = self.bucket_path(bucket);
        if roots.is_empty() {
            return match fs::remove_file(&path).await {
                Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
                _ => Ok(()),
            };
        }
        fs::create_dir_all(self.root.join(BUCKETS_DIR)).await?;
        let mut contents = String::with_capacity(65 * roots.len());
        for root in roots {
            contents.push_str(&root.to_hex());
            contents.push('\n');
        }
        write_atomic(&path, contents.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl BlockStore for FsBlockStore {
    async fn bucket_hashes(&self) -> Result<HashMap<BucketId, BucketHash>, StoreError> {
        let mut hashes = HashMap::new();
        let mut entries = match fs::read_dir(self.root.join(BUCKETS_DIR)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(hashes),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            // skips leftovers of interrupted writes
            let Some(bucket) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<BucketId>().ok())
            else {
                continue;
            };
            let roots = self.read_bucket(bucket).await?;
            if !roots.is_empty() {
                hashes.insert(bucket, store_bucket_hash(&roots));
            }
        }
        Ok(hashes)
    }

    async fn assets_in_bucket(&self, bucket: BucketId) -> Result<Vec<Cid>, StoreError> {
        Ok(self.read_bucket(bucket).await?.into_iter().collect())
    }

    async fn load_index(&self, root: &Cid) -> Result<AssetIndex, StoreError> {
        let path = self.asset_dir(root).join(INDEX_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::AssetNotFound(*root));
            }
            Err(err) => return Err(err.into()),
        };
        trace!("parsing index of asset {root} ({} bytes)", bytes.len());
        Ok(AssetIndex::decode(&bytes)?)
    }

    async fn fetch_block(&self, root: &Cid, cid: &Cid) -> Result<Bytes, StoreError> {
        let path = self.asset_dir(root).join(BLOCKS_DIR).join(cid.to_hex());
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::BlockNotFound {
                root: *root,
                cid: *cid,
            }),
            Err(err) => Err(err.into()),
        }
    }
}

/// Writes `bytes` to a fresh temp file next to `path`, then renames it into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    static WRITES: AtomicU64 = AtomicU64::new(0);
    let n = WRITES.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp.{}.{n}", std::process::id()));
    if let Err(err) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err);
    }
    fs::rename(tmp, path).await
}

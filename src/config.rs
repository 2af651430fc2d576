// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration, as read from a TOML file.
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [store]
//! path = "/var/lib/possession"
//! buckets = 128
//!
//! [cache]
//! index_capacity = 1024
//! block_capacity_bytes = 67108864
//!
//! [asset]
//! bucket_count = 32
//! block_size = 262144
//!
//! [sweep]
//! page_size = 3000
//! grace_secs = 3600
//! interval_secs = 600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asset::{AssetBuilder, DEFAULT_BLOCK_SIZE, DEFAULT_BUCKET_COUNT, MAX_BLOCK_SIZE};
use crate::store::DEFAULT_STORE_BUCKETS;

/// Errors that may occur when loading a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub asset: AssetConfig,
    pub sweep: SweepConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Root directory of the filesystem block store.
    pub path: PathBuf,
    /// Number of store-level buckets assets are grouped into.
    pub buckets: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("possession-store"),
            buckets: DEFAULT_STORE_BUCKETS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of parsed asset indices kept.
    pub index_capacity: u64,
    /// Maximum total size of cached blocks.
    pub block_capacity_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            index_capacity: 1024,
            block_capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetConfig {
    /// Number of buckets new assets' indices are sharded into.
    pub bucket_count: u32,
    pub block_size: usize,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            bucket_count: DEFAULT_BUCKET_COUNT,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl AssetConfig {
    pub fn builder(&self) -> AssetBuilder {
        AssetBuilder::new()
            .block_size(self.block_size)
            .bucket_count(self.bucket_count)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    /// Number of workload records examined per page.
    pub page_size: usize,
    /// Time after expiration during which a client report may still arrive.
    pub grace_secs: u64,
    /// Time between two sweeps.
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            page_size: 3000,
            grace_secs: 60 * 60,
            interval_secs: 10 * 60,
        }
    }
}

impl SweepConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Reads and validates the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates a config from TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.buckets == 0 {
            return Err(ConfigError::Invalid("store.buckets must be positive"));
        }
        if self.cache.index_capacity == 0 {
            return Err(ConfigError::Invalid("cache.index_capacity must be positive"));
        }
        if self.cache.block_capacity_bytes == 0 {
            return Err(ConfigError::Invalid(
                "cache.block_capacity_bytes must be positive",
            ));
        }
        if self.asset.bucket_count == 0 {
            return Err(ConfigError::Invalid("asset.bucket_count must be positive"));
        }
        if self.asset.block_size == 0 {
            return Err(ConfigError::Invalid("asset.block_size must be positive"));
        }
        if self.asset.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::Invalid("asset.block_size must fit in 32 bits"));
        }
        if self.sweep.page_size == 0 {
            return Err(ConfigError::Invalid("sweep.page_size must be positive"));
        }
        if self.sweep.interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep.interval_secs must be positive"));
        }
        Ok(())
    }
}

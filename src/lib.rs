// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Possession: proof-of-possession challenges over content-addressed storage.
//!
//! A verifier challenges a storage node by sending it a seed.
//! Both sides then independently select the same block of the same asset:
//! - [`checker::pick_asset`] picks an asset from the whole store (self-checks only),
//! - [`RandomChecker`] picks a bucket of that asset's index, then a record in it,
//! - the block is fetched through the [`IndexCache`] from a [`BlockStore`].
//!
//! All draws come from [`ChallengeRng`], a fully specified generator,
//! so selections agree across processes, platforms and implementations.
//!
//! The [`workload`] module keeps the accounting records of delivery sessions.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod asset;
pub mod cache;
pub mod checker;
pub mod config;
pub mod index;
pub mod logging;
pub mod rng;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod types;
pub mod workload;

use static_assertions::const_assert;

pub use self::asset::{Asset, AssetBuilder};
pub use self::cache::IndexCache;
pub use self::checker::{CheckError, CheckReport, RandomChecker, Selection, self_check_round};
pub use self::config::Config;
pub use self::index::{AssetIndex, Index, MultiIndexSorted};
pub use self::rng::{ChallengeRng, Seed};
pub use self::store::{BlockStore, FsBlockStore, MemoryBlockStore, StoreError};
pub use self::types::{Block, BlockRecord, BucketId, Cid};

// NOTE: Record positions and bucket IDs are converted to `usize` for indexing.
const_assert!(std::mem::size_of::<usize>() >= std::mem::size_of::<BucketId>());

// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block-level data types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::Cid;

/// Identifier of a bucket.
///
/// Inside an asset's index this is the bucket's position in `0..bucket_count`.
/// At the store level it names a group of assets.
pub type BucketId = u32;

/// Location of one block inside an asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Content identifier of the block.
    pub cid: Cid,
    /// Byte offset of the block inside the asset payload.
    pub offset: u64,
    /// Length of the block in bytes.
    pub size: u32,
}

impl BlockRecord {
    /// Bytes fed into a bucket hash for this record.
    pub(crate) fn digest_input(&self) -> [u8; 44] {
        let mut buf = [0; 44];
        buf[..32].copy_from_slice(self.cid.as_bytes());
        buf[32..40].copy_from_slice(&self.offset.to_le_bytes());
        buf[40..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }
}

/// Block as returned by a challenge round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub cid: Cid,
    pub data: Bytes,
}

impl Block {
    /// Creates a block, computing its content identifier.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            cid: Cid::of(&data),
            data,
        }
    }

    /// Returns `true` iff the data still hashes to the block's identifier.
    pub fn is_intact(&self) -> bool {
        Cid::of(&self.data) == self.cid
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intact_until_tampered() {
        let mut block = Block::new(b"some block".to_vec());
        assert!(block.is_intact());
        block.data = Bytes::from_static(b"other bytes");
        assert!(!block.is_intact());
    }

    #[test]
    fn digest_input_layout() {
        let record = BlockRecord {
            cid: Cid::of(b"x"),
            offset: 0x0102,
            size: 7,
        };
        let input = record.digest_input();
        assert_eq!(&input[..32], record.cid.as_bytes());
        assert_eq!(input[32], 0x02);
        assert_eq!(input[33], 0x01);
        assert_eq!(input[40], 7);
    }
}

// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod block;
pub mod cid;

pub use self::block::{Block, BlockRecord, BucketId};
pub use self::cid::{CID_LEN, Cid, ParseCidError};

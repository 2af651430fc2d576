// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use divan::counter::BytesCount;
use possession::index::{AssetIndex, Index, MultiIndexSorted};
use possession::{AssetBuilder, BlockRecord, Cid};

fn main() {
    divan::main();
}

fn records(n: u64) -> Vec<BlockRecord> {
    (0..n)
        .map(|i| BlockRecord {
            cid: Cid::of(&i.to_le_bytes()),
            offset: i * 1024,
            size: 1024,
        })
        .collect()
}

#[divan::bench(args = [1_000, 100_000])]
fn build_multi_sorted(bencher: divan::Bencher, n: u64) {
    bencher
        .with_inputs(|| records(n))
        .bench_values(|records| MultiIndexSorted::build(records, 32).unwrap());
}

#[divan::bench(args = [1_000, 100_000])]
fn decode(bencher: divan::Bencher, n: u64) {
    let index: AssetIndex = MultiIndexSorted::build(records(n), 32).unwrap().into();
    let bytes = index.encode().unwrap();
    bencher
        .counter(BytesCount::new(bytes.len()))
        .bench(|| AssetIndex::decode(divan::black_box(&bytes)).unwrap());
}

#[divan::bench]
fn build_asset(bencher: divan::Bencher) {
    let payload = vec![0x5a; 16 * 1024 * 1024];
    let builder = AssetBuilder::new().block_size(64 * 1024);
    bencher
        .counter(BytesCount::new(payload.len()))
        .bench(|| {
            let asset = builder.build(divan::black_box(&payload)).unwrap();
            asset.index().record_count()
        });
}

#![no_main]

use libfuzzer_sys::fuzz_target;
use possession::index::{AssetIndex, Index};

fuzz_target!(|data: &[u8]| {
    if let Ok(index) = AssetIndex::decode(data) {
        for bucket in 0..index.bucket_count() {
            let _res = index.bucket_records(bucket);
        }
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use tierdb_storage::block::{IndexBlock, RecordBlock};

fuzz_target!(|data: &[u8]| {
    // Decoding must reject garbage, never panic
    if let Ok(block) = RecordBlock::decode(data, 0) {
        for record in block.iter() {
            let _ = block.seek(record.key());
        }
    }
    if let Ok(block) = IndexBlock::decode(data, 0) {
        for i in 0..block.len() {
            let _ = block.entry(i);
        }
    }
});

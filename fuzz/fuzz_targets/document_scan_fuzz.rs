//! Fuzz the document scanners used on untrusted downloads and override files.
//!
//! Run with: cargo +nightly fuzz run document_scan_fuzz -- -max_total_time=60

#![no_main]

use assetdef_fetch::looks_truncated;
use assetdef_store::{extract_contracts, schema_status, OverrideIndex};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = looks_truncated(input);
        let _ = schema_status(input);
        let contracts = extract_contracts(input);

        let mut index = OverrideIndex::new();
        let delta = index.upsert("fuzz.tsml", input, None);
        assert_eq!(delta.affected.len(), contracts.len());
        assert_eq!(index.bad_file_names().is_empty(), !contracts.is_empty());

        // Identical bytes never produce a change.
        assert!(index.upsert("fuzz.tsml", input, None).is_empty());
    }
});

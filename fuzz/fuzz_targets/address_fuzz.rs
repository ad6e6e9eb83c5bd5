//! Fuzz address parsing.
//!
//! Run with: cargo +nightly fuzz run address_fuzz -- -max_total_time=60

#![no_main]

use assetdef_core::{Address, ContractKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(address) = Address::parse(input) {
            // Both renderings must parse back to the same address.
            assert_eq!(Address::parse(&address.to_checksum()), Ok(address));
            assert_eq!(Address::parse(&address.to_lowercase_hex()), Ok(address));
            assert_eq!(ContractKey::parse(input).map(|key| key.address), Ok(address));
        }
    }
});

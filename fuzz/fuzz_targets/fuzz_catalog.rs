//! Fuzz target for script catalog parsing.
//!
//! Arbitrary bytes must never panic the catalog loader, and anything it
//! accepts must only name categories inside the valid-case root.

#![no_main]

use brokerfuzz::ScriptCatalog;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut catalog) = ScriptCatalog::from_json(json) else {
        return;
    };

    assert!(!catalog.is_empty());
    for _ in 0..catalog.len() * 2 {
        let script = catalog.next_script();
        assert!(!script.is_empty());
        for category in script.categories() {
            assert!(!category.contains('/'));
            assert_ne!(category, "..");
        }
    }
});

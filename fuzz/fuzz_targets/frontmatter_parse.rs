#![no_main]

use libfuzzer_sys::fuzz_target;

// The preamble parser must never panic, and an unedited parse must
// reconstruct its input byte-for-byte.
fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(doc) = flowlock_frontmatter::Document::parse(text) {
            assert_eq!(doc.text(), text);
            let _ = doc.to_json();
        }
    }
});

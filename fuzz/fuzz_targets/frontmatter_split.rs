#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(split) = flowlock_frontmatter::split(text) {
            // Both regions are substrings of the input.
            assert!(text.contains(&split.body));
            assert!(split.preamble.len() + split.body.len() <= text.len());
        }
    }
});

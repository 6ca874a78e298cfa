#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let stripped = flowlock_prompt::strip_xml_comments(text);
        assert!(stripped.len() <= text.len());
    }
});

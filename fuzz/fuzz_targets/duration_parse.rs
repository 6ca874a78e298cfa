#![no_main]

use libfuzzer_sys::fuzz_target;

use flowlock_duration::{MAX_TOTAL_HOURS, StopAfter, parse_stop_after};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(StopAfter::Relative { delta }) = parse_stop_after(text) {
            let hours = delta.total_hours();
            assert!((1..=MAX_TOTAL_HOURS).contains(&hours));
            // Display output re-parses to the same delta.
            let rendered = delta.to_string();
            let reparsed = flowlock_duration::parse_time_delta(&rendered).unwrap();
            assert_eq!(reparsed, delta);
        }
    }
});

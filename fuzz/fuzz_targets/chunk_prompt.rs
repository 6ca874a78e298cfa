#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (String, u16)| {
    let (text, budget) = input;
    let budget = (budget as usize).max(32);
    let chunks = flowlock_prompt::chunk_with_budget(&text, budget);
    // Chunks always reassemble exactly.
    assert_eq!(chunks.concat(), text);
});

#![no_main]

use libfuzzer_sys::fuzz_target;

use reelay::resolver::parse_resolution;

fuzz_target!(|data: &[u8]| {
    // Arbitrary resolver payloads must map to a resolution or an error,
    // never a panic.
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    if let Ok(resolution) = parse_resolution(&value) {
        assert!(resolution.has_media());
        for variant in &resolution.variants {
            let _ = variant.display_label();
        }
        let _ = resolution.duration_label();
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;

use reelay::logging::redact::{mask_secret, redact_secrets};

fuzz_target!(|data: &str| {
    // ReDoS check: libFuzzer flags inputs that exceed its per-input timeout.
    let _ = redact_secrets(data);
    let _ = mask_secret(data);
});

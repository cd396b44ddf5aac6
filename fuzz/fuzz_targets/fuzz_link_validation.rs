#![no_main]

use libfuzzer_sys::fuzz_target;

use reelay::links::{SourceLinkValidator, MAX_LINK_LENGTH};

fuzz_target!(|data: &str| {
    let validator = SourceLinkValidator::default();
    if let Ok(link) = validator.validate(data) {
        assert!(!link.is_empty());
        assert!(link.len() <= MAX_LINK_LENGTH);
        assert_eq!(link, link.trim());
    }
});

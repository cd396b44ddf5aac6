#![no_main]

use libfuzzer_sys::fuzz_target;

use reelay::bot::callback::DownloadSelection;

fuzz_target!(|data: &str| {
    if let Some(selection) = DownloadSelection::parse(data) {
        assert_eq!(DownloadSelection::parse(&selection.encode()), Some(selection));
    }
});

//! Fuzz testing for route classification.
//!
//! Request paths are attacker-controlled, so the classifier must hold up
//! against any input:
//!
//! - Never panic
//! - Normalization is idempotent and always yields an absolute path
//! - Dot segments can never change the category of a path
//! - Nothing under `/api` or `/trpc` is ever treated as a static asset
//! - Passthrough never skips a webhook or protected route
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_classifier -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use taskboard_gate::gate::classifier::{
    Category, RouteClassifier, is_static_asset, normalize_path,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(path) = std::str::from_utf8(data) {
        let classifier = RouteClassifier::default();

        let normalized = normalize_path(path);
        assert!(normalized.starts_with('/'));
        assert!(!normalized.contains("//"));
        assert_eq!(normalize_path(&normalized), normalized);

        let category = classifier.classify(path);
        assert_eq!(category, classifier.classify(&normalized));

        for root in ["/api", "/trpc"] {
            if normalized == root || normalized.starts_with(&format!("{root}/")) {
                assert!(!is_static_asset(path));
                assert!(!classifier.is_passthrough(path));
            }
        }

        if classifier.is_passthrough(path) {
            assert!(matches!(category, Category::Public | Category::Default));
        }
    }
});

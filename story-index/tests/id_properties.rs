//! Property tests for id derivation.

use proptest::prelude::*;
use story_index::{sanitize, to_id};

proptest! {
    #[test]
    fn test_sanitize_output_shape(input in "[ -~]{0,40}") {
        let out = sanitize(&input);
        prop_assert!(out.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        prop_assert!(!out.starts_with('-'));
        prop_assert!(!out.ends_with('-'));
        prop_assert!(!out.contains("--"));
    }

    #[test]
    fn test_sanitize_idempotent(input in "[ -~]{0,40}") {
        let once = sanitize(&input);
        prop_assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn test_to_id_splits_on_separator(kind in "[A-Za-z][A-Za-z0-9 /]{0,20}", name in "[A-Za-z][A-Za-z0-9 ]{0,20}") {
        let id = to_id(&kind, &name).unwrap();
        let (kind_part, name_part) = id.as_str().split_once("--").unwrap();
        prop_assert_eq!(kind_part, sanitize(&kind));
        prop_assert_eq!(name_part, sanitize(&name));
    }
}

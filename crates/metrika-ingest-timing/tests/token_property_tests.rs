//! Property tests for the time-token scanner.

use proptest::prelude::*;

use metrika_ingest_timing::parse_time_tokens;

fn base_strategy() -> impl Strategy<Value = String> {
    // Plain bases plus hierarchical ones like `m/thk`.
    prop_oneof![
        "[a-z]{1,3}",
        "[a-z]{1,2}/[a-z]{1,3}",
    ]
}

proptest! {
    /// Rendering tokens and scanning them back aggregates per base with
    /// first-appearance order preserved.
    #[test]
    fn scan_matches_reference_aggregation(
        tokens in prop::collection::vec((base_strategy(), 1i64..500), 1..8)
    ) {
        let rendered: String = tokens
            .iter()
            .map(|(base, minutes)| format!("{base}{minutes}"))
            .collect::<Vec<_>>()
            .join("/");

        let mut expected: Vec<(String, i64)> = Vec::new();
        for (base, minutes) in &tokens {
            match expected.iter_mut().find(|(b, _)| b == base) {
                Some((_, total)) => *total += minutes,
                None => expected.push((base.clone(), *minutes)),
            }
        }

        let parsed = parse_time_tokens(&rendered).unwrap();
        prop_assert_eq!(parsed, expected);
    }

    /// The scanner never accepts non-token residue.
    #[test]
    fn residue_is_rejected(
        tokens in prop::collection::vec(("[a-z]{1,2}", 1i64..500), 1..4),
        residue in "[!@#$%^&*=?]{1,3}"
    ) {
        let mut rendered: String = tokens
            .iter()
            .map(|(base, minutes)| format!("{base}{minutes}"))
            .collect();
        rendered.push_str(&residue);
        prop_assert!(parse_time_tokens(&rendered).is_err());
    }
}

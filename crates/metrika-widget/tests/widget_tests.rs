//! Widget E2E tests: parse, load, evaluate.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};

use metrika_widget::{
    evaluate_widget, parse_widget, run_widget, EntryLoader, InMemoryLoader, LoadedEntry,
    LoadedScalar, Period, WidgetQuery,
};

fn timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 11)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn tim_entry(id: i64, duration: i64, times: &[(&str, i64)]) -> LoadedEntry {
    LoadedEntry {
        id,
        definition_code: "TIM".to_string(),
        timestamp: timestamp(),
        subdivision: None,
        attributes: HashMap::from([(
            "duration".to_string(),
            LoadedScalar::Int { value: duration },
        )]),
        time_values: times
            .iter()
            .map(|(k, v)| ((*k).to_string(), *v))
            .collect(),
    }
}

fn sample_tims() -> Vec<LoadedEntry> {
    vec![
        tim_entry(1, 60, &[("t", 45), ("m", 10), ("n", 5), ("p", 0)]),
        tim_entry(2, 90, &[("t", 50), ("m", 25), ("n", 5), ("p", 10)]),
        tim_entry(3, 90, &[("t", 70), ("m", 15), ("n", 5), ("p", 0)]),
    ]
}

const PRODUCTIVITY: &str = r#"
WIDGET "Productivity"
tims = TIM
"productive_time": int = sum(tims.time("t"))
"productivity": float = sum(tims.time("t")) / sum(tims.duration)
END
"#;

#[test]
fn aggregates_over_a_loaded_collection() {
    let widget = parse_widget(PRODUCTIVITY).unwrap();
    let output = evaluate_widget(&widget, &sample_tims());

    assert_eq!(output.name, "Productivity");
    assert_eq!(
        output.fields,
        vec![
            ("productive_time".to_string(), Ok(165.0)),
            ("productivity".to_string(), Ok(0.6875)),
        ]
    );
    assert_eq!(
        output.values(),
        vec![
            ("productive_time".to_string(), 165.0),
            ("productivity".to_string(), 0.6875),
        ]
    );
}

#[test]
fn empty_collections_yield_zero_aggregates_and_isolated_ratio_errors() {
    let widget = parse_widget(PRODUCTIVITY).unwrap();
    let output = evaluate_widget(&widget, &[]);

    assert_eq!(output.fields[0], ("productive_time".to_string(), Ok(0.0)));
    let (label, ratio) = &output.fields[1];
    assert_eq!(label, "productivity");
    assert!(ratio.as_ref().is_err_and(|e| e.contains("zero")));
}

#[test]
fn nested_time_prefixes_count_toward_their_base() {
    let widget = parse_widget(
        "WIDGET \"W\"\ntims = TIM\n\"mind\": int = sum(tims.time(\"m\"))\nEND\n",
    )
    .unwrap();
    let entries = vec![tim_entry(1, 60, &[("m", 5), ("m/thk", 15), ("t", 30)])];
    let output = evaluate_widget(&widget, &entries);
    assert_eq!(output.fields[0], ("mind".to_string(), Ok(20.0)));
}

#[test]
fn int_fields_floor_their_result() {
    let widget = parse_widget(
        "WIDGET \"W\"\ntims = TIM\n\"avg_t\": int = avg(tims.time(\"t\"))\nEND\n",
    )
    .unwrap();
    let output = evaluate_widget(&widget, &sample_tims());
    // 165 / 3 = 55; make it fractional with a different sample.
    assert_eq!(output.fields[0], ("avg_t".to_string(), Ok(55.0)));

    let entries = vec![
        tim_entry(1, 60, &[("t", 10)]),
        tim_entry(2, 60, &[("t", 15)]),
    ];
    let output = evaluate_widget(&widget, &entries);
    assert_eq!(output.fields[0], ("avg_t".to_string(), Ok(12.0)));
}

#[test]
fn collection_arithmetic_is_rejected_per_field_only() {
    let source = r#"
WIDGET "W"
tims = TIM
"bad": float = tims.time("t") / tims.duration
"good": int = count(tims)
END
"#;
    let widget = parse_widget(source).unwrap();
    let output = evaluate_widget(&widget, &sample_tims());

    let (_, bad) = &output.fields[0];
    assert!(bad.as_ref().is_err_and(|e| e.contains("aggregate")));
    assert_eq!(output.fields[1], ("good".to_string(), Ok(3.0)));
    assert_eq!(output.values(), vec![("good".to_string(), 3.0)]);
}

#[test]
fn non_numeric_attributes_drop_out_of_projections() {
    let mut entry = tim_entry(1, 60, &[("t", 30)]);
    entry.attributes.insert(
        "label".to_string(),
        LoadedScalar::Str {
            value: "paper".into(),
        },
    );
    let mut numeric_string = tim_entry(2, 90, &[("t", 10)]);
    numeric_string.attributes.insert(
        "label".to_string(),
        LoadedScalar::Str { value: "7".into() },
    );

    let widget = parse_widget(
        "WIDGET \"W\"\ntims = TIM\n\"labels\": float = sum(tims.label)\nEND\n",
    )
    .unwrap();
    let output = evaluate_widget(&widget, &[entry, numeric_string]);
    // Only the numeric string coerces.
    assert_eq!(output.fields[0], ("labels".to_string(), Ok(7.0)));
}

struct FixedLoader {
    entries: Vec<LoadedEntry>,
    expect_code: &'static str,
}

impl EntryLoader for FixedLoader {
    fn load_entries_for_widget(
        &self,
        definition_code: &str,
        _query: &WidgetQuery,
    ) -> Vec<LoadedEntry> {
        assert_eq!(definition_code, self.expect_code);
        self.entries.clone()
    }
}

#[test]
fn in_memory_loader_filters_by_user_definition_and_period() {
    let mut loader = InMemoryLoader::new();
    let in_week = |id, day| {
        let mut entry = tim_entry(id, 60, &[("t", 10)]);
        entry.timestamp = NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        entry
    };
    // Week of 2024-03-11 (Monday) .. 2024-03-18.
    loader.insert(1, in_week(1, 11));
    loader.insert(1, in_week(2, 17));
    loader.insert(1, in_week(3, 18)); // outside: next Monday
    loader.insert(2, in_week(4, 12)); // other user
    let mut other_code = in_week(5, 12);
    other_code.definition_code = "EST".to_string();
    loader.insert(1, other_code);

    let widget = parse_widget(
        "WIDGET \"W\"\ntims = TIM\n\"n\": int = count(tims)\nEND\n",
    )
    .unwrap();
    let query = WidgetQuery {
        user_id: 1,
        anchor_date: NaiveDate::from_ymd_opt(2024, 3, 13).unwrap(),
        period: Period::Week,
    };
    let output = run_widget(&widget, &loader, &query);
    assert_eq!(output.fields[0], ("n".to_string(), Ok(2.0)));
}

#[test]
fn run_widget_resolves_the_dataset_through_the_loader() {
    let widget = parse_widget(PRODUCTIVITY).unwrap();
    let loader = FixedLoader {
        entries: sample_tims(),
        expect_code: "TIM",
    };
    let query = WidgetQuery {
        user_id: 1,
        anchor_date: NaiveDate::from_ymd_opt(2024, 3, 13).unwrap(),
        period: Period::Week,
    };
    let output = run_widget(&widget, &loader, &query);
    assert_eq!(output.fields[0].1, Ok(165.0));
}

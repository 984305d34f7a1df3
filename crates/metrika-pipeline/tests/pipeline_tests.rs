//! Pipeline E2E tests: build, populate, resolve, apply, validate.

use chrono::{NaiveDate, NaiveDateTime};

use metrika_pipeline::*;
use metrika_schema::{
    Datatype, Definition, DefinitionId, DefinitionKind, Field, FieldId, InputMode, SchemaIndex,
};

fn attribute(id: u32, code: &str, datatype: Datatype) -> Definition {
    Definition {
        id: DefinitionId::new(id),
        code: code.to_string(),
        display_name: code.to_string(),
        kind: DefinitionKind::Attribute { datatype },
        parent_definition: None,
    }
}

fn metric(id: u32, code: &str) -> Definition {
    Definition {
        id: DefinitionId::new(id),
        code: code.to_string(),
        display_name: code.to_string(),
        kind: DefinitionKind::Metric {
            primary_identifier_field: None,
        },
        parent_definition: None,
    }
}

fn input_field(id: u32, metric: u32, name: &str, base: u32, min: u32, max: Option<u32>) -> Field {
    Field {
        id: FieldId::new(id),
        metric: DefinitionId::new(metric),
        name: name.to_string(),
        base_definition: DefinitionId::new(base),
        min_instances: min,
        max_instances: max,
        input_mode: InputMode::Input,
        formula: None,
    }
}

fn formula_field(id: u32, metric: u32, name: &str, base: u32, formula: &str) -> Field {
    Field {
        id: FieldId::new(id),
        metric: DefinitionId::new(metric),
        name: name.to_string(),
        base_definition: DefinitionId::new(base),
        min_instances: 0,
        max_instances: Some(1),
        input_mode: InputMode::Formula,
        formula: Some(formula.to_string()),
    }
}

fn day() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 11)
        .unwrap()
        .and_hms_opt(14, 30, 0)
        .unwrap()
}

// Definition ids used across the fixtures.
const EST: u32 = 1;
const TIM: u32 = 2;
const A_INT: u32 = 10;
const A_STRING: u32 = 11;
const A_HIER: u32 = 12;

/// EST with a TIM-valued field plus hierarchy and KPI formula fields; TIM
/// with the conventional `time_init`/`time_end`/`duration`/`time_type`
/// layout and two productivity formulas.
fn timing_schema() -> SchemaIndex {
    SchemaIndex::build(
        vec![
            metric(EST, "EST"),
            metric(TIM, "TIM"),
            attribute(A_INT, "number", Datatype::Int),
            attribute(A_STRING, "text", Datatype::String),
            attribute(A_HIER, "hier", Datatype::Hierarchy),
            attribute(13, "real", Datatype::Float),
        ],
        vec![
            input_field(20, EST, "adv", A_INT, 0, Some(1)),
            input_field(21, EST, "project", A_STRING, 0, Some(1)),
            input_field(22, EST, "tims", TIM, 0, None),
            formula_field(23, EST, "proj", A_STRING, "subdivision[0]"),
            input_field(30, TIM, "time_init", A_INT, 1, Some(1)),
            input_field(31, TIM, "time_end", A_INT, 1, Some(1)),
            input_field(32, TIM, "duration", A_INT, 1, Some(1)),
            input_field(33, TIM, "time_type", A_INT, 1, None),
            formula_field(
                34,
                TIM,
                "gross_productivity",
                13,
                "self.time(\"t\") / self.duration",
            ),
            formula_field(
                35,
                TIM,
                "net_productivity",
                13,
                "self.time(\"t\") / (self.time(\"t\") + self.time(\"m\") + self.time(\"p\"))",
            ),
        ],
    )
    .unwrap()
}

fn tim_input(init: i64, end: i64, times: &[(&str, i64)]) -> MetricEntryInput {
    let mut input = MetricEntryInput::new("TIM", day());
    input.fields = vec![
        FieldInput {
            field: "time_init".into(),
            values: vec![AttributeValueInput::int(init)],
        },
        FieldInput {
            field: "time_end".into(),
            values: vec![AttributeValueInput::int(end)],
        },
        FieldInput {
            field: "duration".into(),
            values: vec![AttributeValueInput::int(end - init)],
        },
        FieldInput {
            field: "time_type".into(),
            values: times
                .iter()
                .map(|(base, minutes)| {
                    AttributeValueInput::int(*minutes).with_subdivision(*base)
                })
                .collect(),
        },
    ];
    input
}

fn est_input(subdivision: &str) -> MetricEntryInput {
    let mut input = MetricEntryInput::new("EST", day());
    input.subdivision = Some(subdivision.to_string());
    input.fields = vec![
        FieldInput {
            field: "adv".into(),
            values: vec![AttributeValueInput::int(7)],
        },
        FieldInput {
            field: "project".into(),
            values: vec![AttributeValueInput::string("paper")],
        },
        FieldInput {
            field: "tims".into(),
            values: vec![AttributeValueInput::nested(tim_input(
                840,
                900,
                &[("t", 30), ("m/thk", 15), ("m", 5), ("n", 10)],
            ))],
        },
    ];
    input
}

fn attr_value(node: &ResolvedEntry, field_name: &str, schema: &SchemaIndex) -> Option<ScalarValue> {
    let field = schema.field_by_name(node.entry.definition, field_name)?;
    node.children_for_field(field.id)
        .next()
        .and_then(|child| child.attribute.as_ref())
        .and_then(|attr| attr.value.get())
}

#[test]
fn full_run_timing_and_kpis() {
    let schema = timing_schema();
    let oracle = NoExistingEntries;
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };

    let state = run_pipeline(&est_input("TFG/research"), &ctx).unwrap();

    // Timestamps normalized to midnight, everywhere.
    let expected_midnight = NaiveDate::from_ymd_opt(2024, 3, 11)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let rows = flatten(&state, 1);
    assert!(rows.iter().all(|r| r.entry.timestamp == expected_midnight));

    // Hierarchy vectors.
    assert_eq!(state.division, vec!["EST"]);
    assert_eq!(state.subdivision, vec!["TFG", "research"]);
    assert_eq!(state.path, vec!["EST", "TFG", "research"]);

    // Header attributes.
    assert_eq!(
        attr_value(&state.root, "adv", &schema),
        Some(ScalarValue::Int { value: 7 })
    );
    assert_eq!(
        attr_value(&state.root, "project", &schema),
        Some(ScalarValue::Str {
            value: "paper".into()
        })
    );
    // Hierarchy-only formula.
    assert_eq!(
        attr_value(&state.root, "proj", &schema),
        Some(ScalarValue::Str {
            value: "TFG".into()
        })
    );

    // The nested TIM.
    let tims_field = schema
        .field_by_name(DefinitionId::new(EST), "tims")
        .unwrap();
    let tim = state
        .root
        .children_for_field(tims_field.id)
        .next()
        .expect("nested TIM under the tims field");
    assert!(tim.is_metric());
    assert_eq!(
        attr_value(tim, "duration", &schema),
        Some(ScalarValue::Int { value: 60 })
    );

    // time_type children: one per base, subdivision-tagged.
    let time_type = schema
        .field_by_name(DefinitionId::new(TIM), "time_type")
        .unwrap();
    let mut time_children: Vec<(String, i64)> = tim
        .children_for_field(time_type.id)
        .filter_map(|c| {
            Some((
                c.entry.subdivision.clone()?,
                c.attribute.as_ref()?.value.value_int?,
            ))
        })
        .collect();
    time_children.sort();
    assert_eq!(
        time_children,
        vec![
            ("m".to_string(), 5),
            ("m/thk".to_string(), 15),
            ("n".to_string(), 10),
            ("t".to_string(), 30),
        ]
    );

    // KPI formulas on the TIM node.
    assert_eq!(
        attr_value(tim, "gross_productivity", &schema),
        Some(ScalarValue::Float { value: 0.5 })
    );
    assert_eq!(
        attr_value(tim, "net_productivity", &schema),
        Some(ScalarValue::Float { value: 0.6 })
    );
}

#[test]
fn provisional_ids_come_from_disjoint_counters() {
    let schema = timing_schema();
    let oracle = NoExistingEntries;
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };

    let state = run_pipeline(&est_input("TFG"), &ctx).unwrap();
    let rows = flatten(&state, 1);

    assert_eq!(state.root.entry.id, 1);
    // Builder ids positive, hierarchy-populator ids in the -1000s, formula
    // applier ids in the -2000s; no collisions.
    let mut seen = std::collections::HashSet::new();
    for row in &rows {
        assert!(seen.insert(row.entry.id), "duplicate id {}", row.entry.id);
        assert!(
            row.entry.id >= 1 || (-1999..=-1000).contains(&row.entry.id)
                || (-2999..=-2000).contains(&row.entry.id),
            "unexpected id {}",
            row.entry.id
        );
    }
    // `proj` was synthesized by the hierarchy populator, the KPI children by
    // the formula applier.
    assert!(rows.iter().any(|r| (-1999..=-1000).contains(&r.entry.id)));
    assert!(rows.iter().any(|r| (-2999..=-2000).contains(&r.entry.id)));
}

#[test]
fn parent_pointers_match_tree_shape() {
    let schema = timing_schema();
    let oracle = NoExistingEntries;
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };
    let state = run_pipeline(&est_input("TFG"), &ctx).unwrap();

    fn check(node: &ResolvedEntry) {
        for child in &node.children {
            assert_eq!(child.entry.parent_entry, Some(node.entry.id));
            check(child);
        }
    }
    check(&state.root);
    assert_eq!(state.root.entry.parent_entry, None);
}

#[test]
fn out_of_range_hierarchy_index_is_a_subdivision_error() {
    let schema = SchemaIndex::build(
        vec![metric(EST, "EST"), attribute(A_STRING, "text", Datatype::String)],
        vec![formula_field(23, EST, "proj2", A_STRING, "subdivision[2]")],
    )
    .unwrap();
    let oracle = NoExistingEntries;
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };

    let mut input = MetricEntryInput::new("EST", day());
    input.subdivision = Some("TFG/coding".to_string());
    // Index 1 is fine...
    let ok_schema = SchemaIndex::build(
        vec![metric(EST, "EST"), attribute(A_STRING, "text", Datatype::String)],
        vec![formula_field(23, EST, "proj", A_STRING, "subdivision[1]")],
    )
    .unwrap();
    let ok_ctx = PipelineContext {
        schema: &ok_schema,
        existing: &oracle,
        user_id: 1,
    };
    let state = run_pipeline(&input, &ok_ctx).unwrap();
    assert_eq!(
        attr_value(&state.root, "proj", &ok_schema),
        Some(ScalarValue::Str {
            value: "coding".into()
        })
    );

    // ...index 2 is out of range for a two-token subdivision.
    let err = run_pipeline(&input, &ctx).unwrap_err();
    match err {
        PipelineError::Subdivision {
            field_name,
            formula,
            message,
            ..
        } => {
            assert_eq!(field_name, "proj2");
            assert_eq!(formula, "subdivision[2]");
            assert!(message.contains("index 2"));
            assert!(message.contains("2 tokens"));
        }
        other => panic!("expected subdivision error, got {other:?}"),
    }
}

fn book_schema() -> SchemaIndex {
    SchemaIndex::build(
        vec![
            Definition {
                id: DefinitionId::new(3),
                code: "BOOK".into(),
                display_name: "Book".into(),
                kind: DefinitionKind::Metric {
                    primary_identifier_field: Some(FieldId::new(40)),
                },
                parent_definition: None,
            },
            metric(4, "READ"),
            attribute(A_INT, "number", Datatype::Int),
            attribute(A_STRING, "text", Datatype::String),
        ],
        vec![
            input_field(40, 3, "title", A_STRING, 1, Some(1)),
            input_field(41, 4, "book", 3, 1, Some(1)),
            input_field(42, 4, "pages_read", A_INT, 1, Some(1)),
        ],
    )
    .unwrap()
}

fn dune_tree(schema: &SchemaIndex) -> ResolvedEntry {
    // An already-persisted BOOK entry, as the oracle would return it.
    let title_field = schema
        .field_by_name(DefinitionId::new(3), "title")
        .unwrap();
    ResolvedEntry {
        entry: Entry {
            id: 900,
            definition: DefinitionId::new(3),
            parent_entry: None,
            timestamp: midnight(day()),
            subdivision: None,
            comments: None,
        },
        metric: Some(MetricEntryMarker),
        attribute: None,
        field: None,
        children: vec![ResolvedEntry {
            entry: Entry {
                id: 901,
                definition: DefinitionId::new(A_STRING),
                parent_entry: Some(900),
                timestamp: midnight(day()),
                subdivision: None,
                comments: None,
            },
            metric: None,
            attribute: Some(AttributeEntry {
                field: title_field.id,
                value: AttributeValue::string("Dune"),
            }),
            field: Some(title_field.id),
            children: vec![],
        }],
    }
}

fn read_input(title: &str) -> MetricEntryInput {
    let mut input = MetricEntryInput::new("READ", day());
    input.fields = vec![
        FieldInput {
            field: "book".into(),
            values: vec![AttributeValueInput::string(title)],
        },
        FieldInput {
            field: "pages_read".into(),
            values: vec![AttributeValueInput::int(42)],
        },
    ];
    input
}

#[test]
fn instance_resolution_replaces_placeholder_with_oracle_tree() {
    let schema = book_schema();
    let mut oracle = InMemoryEntries::new();
    oracle.insert(
        DefinitionId::new(3),
        IdentifierValue::Str {
            value: "Dune".into(),
        },
        dune_tree(&schema),
    );
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };

    let state = run_pipeline(&read_input("Dune"), &ctx).unwrap();
    let book_field = schema.field_by_name(DefinitionId::new(4), "book").unwrap();
    let book = state
        .root
        .children_for_field(book_field.id)
        .next()
        .expect("resolved book subtree");
    assert!(book.is_metric());
    assert!(book.attribute.is_none());
    assert_eq!(book.entry.id, 900);
    assert_eq!(book.entry.parent_entry, Some(state.root.entry.id));
    assert_eq!(book.children.len(), 1);
}

#[test]
fn instance_resolution_errors_carry_match_count() {
    let schema = book_schema();
    let oracle = InMemoryEntries::new();
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };

    match run_pipeline(&read_input("Dune"), &ctx).unwrap_err() {
        PipelineError::InstanceResolution {
            field_name,
            metric_definition,
            identifier,
            match_count,
            ..
        } => {
            assert_eq!(field_name, "book");
            assert_eq!(metric_definition, "BOOK");
            assert_eq!(
                identifier,
                IdentifierValue::Str {
                    value: "Dune".into()
                }
            );
            assert_eq!(match_count, 0);
        }
        other => panic!("expected instance resolution error, got {other:?}"),
    }

    // Two matching books are just as fatal.
    let mut ambiguous = InMemoryEntries::new();
    for _ in 0..2 {
        ambiguous.insert(
            DefinitionId::new(3),
            IdentifierValue::Str {
                value: "Dune".into(),
            },
            dune_tree(&schema),
        );
    }
    let ctx = PipelineContext {
        schema: &schema,
        existing: &ambiguous,
        user_id: 1,
    };
    match run_pipeline(&read_input("Dune"), &ctx).unwrap_err() {
        PipelineError::InstanceResolution { match_count, .. } => assert_eq!(match_count, 2),
        other => panic!("expected instance resolution error, got {other:?}"),
    }
}

#[test]
fn cardinality_violations_abort() {
    let schema = book_schema();
    let mut oracle = InMemoryEntries::new();
    oracle.insert(
        DefinitionId::new(3),
        IdentifierValue::Str {
            value: "Dune".into(),
        },
        dune_tree(&schema),
    );
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };

    // Two values for the (1, 1) pages_read field.
    let mut input = read_input("Dune");
    input.fields[1].values.push(AttributeValueInput::int(7));
    match run_pipeline(&input, &ctx).unwrap_err() {
        PipelineError::Cardinality {
            field_name,
            min,
            max,
            actual,
            ..
        } => {
            assert_eq!(field_name, "pages_read");
            assert_eq!((min, max), (1, Some(1)));
            assert_eq!(actual, 2);
        }
        other => panic!("expected cardinality error, got {other:?}"),
    }

    // A missing required field is the other direction.
    let mut input = read_input("Dune");
    input.fields.remove(1);
    match run_pipeline(&input, &ctx).unwrap_err() {
        PipelineError::Cardinality { field_name, actual, .. } => {
            assert_eq!(field_name, "pages_read");
            assert_eq!(actual, 0);
        }
        other => panic!("expected cardinality error, got {other:?}"),
    }
}

#[test]
fn formula_referencing_earlier_formula_in_same_node() {
    let schema = SchemaIndex::build(
        vec![
            metric(EST, "EST"),
            attribute(13, "real", Datatype::Float),
            attribute(A_INT, "number", Datatype::Int),
        ],
        vec![
            input_field(20, EST, "score", A_INT, 1, Some(1)),
            formula_field(23, EST, "doubled", 13, "self.score * 2"),
            formula_field(24, EST, "quadrupled", 13, "doubled * 2"),
        ],
    )
    .unwrap();
    let oracle = NoExistingEntries;
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };

    let mut input = MetricEntryInput::new("EST", day());
    input.fields = vec![FieldInput {
        field: "score".into(),
        values: vec![AttributeValueInput::int(3)],
    }];
    let state = run_pipeline(&input, &ctx).unwrap();
    assert_eq!(
        attr_value(&state.root, "doubled", &schema),
        Some(ScalarValue::Float { value: 6.0 })
    );
    assert_eq!(
        attr_value(&state.root, "quadrupled", &schema),
        Some(ScalarValue::Float { value: 12.0 })
    );
}

#[test]
fn formula_result_shape_errors() {
    let oracle = NoExistingEntries;

    // A list result is rejected.
    let schema = SchemaIndex::build(
        vec![
            metric(EST, "EST"),
            attribute(13, "real", Datatype::Float),
            attribute(A_INT, "number", Datatype::Int),
        ],
        vec![
            input_field(20, EST, "score", A_INT, 0, None),
            formula_field(23, EST, "bad", 13, "self.score"),
        ],
    )
    .unwrap();
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };
    let mut input = MetricEntryInput::new("EST", day());
    input.fields = vec![FieldInput {
        field: "score".into(),
        values: vec![AttributeValueInput::int(1), AttributeValueInput::int(2)],
    }];
    match run_pipeline(&input, &ctx).unwrap_err() {
        PipelineError::Formula { message, .. } => {
            assert!(message.contains("single value"), "{message}");
        }
        other => panic!("expected formula error, got {other:?}"),
    }

    // A null result is rejected with its own message.
    let mut input = MetricEntryInput::new("EST", day());
    input.fields = vec![];
    match run_pipeline(&input, &ctx).unwrap_err() {
        PipelineError::Formula { message, .. } => {
            assert!(message.contains("null"), "{message}");
        }
        other => panic!("expected formula error, got {other:?}"),
    }
}

#[test]
fn unknown_definition_and_field_are_formula_errors() {
    let schema = book_schema();
    let oracle = NoExistingEntries;
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 1,
    };

    let input = MetricEntryInput::new("NOPE", day());
    assert!(matches!(
        run_pipeline(&input, &ctx).unwrap_err(),
        PipelineError::Formula { .. }
    ));

    let mut input = MetricEntryInput::new("READ", day());
    input.fields = vec![FieldInput {
        field: "nope".into(),
        values: vec![AttributeValueInput::int(1)],
    }];
    assert!(matches!(
        run_pipeline(&input, &ctx).unwrap_err(),
        PipelineError::Formula { .. }
    ));
}

#[test]
fn rows_flatten_depth_first_with_specializations() {
    let schema = timing_schema();
    let oracle = NoExistingEntries;
    let ctx = PipelineContext {
        schema: &schema,
        existing: &oracle,
        user_id: 77,
    };
    let state = run_pipeline(&est_input("TFG"), &ctx).unwrap();
    let rows = flatten(&state, 77);

    assert_eq!(rows[0].entry.id, state.root.entry.id);
    assert!(rows[0].metric);
    assert!(rows[0].attribute.is_none());
    assert!(rows.iter().all(|r| r.user_id == 77));
    // Exactly one specialization per row.
    for row in &rows {
        assert!(
            row.metric != row.attribute.is_some(),
            "row {} must be exactly one of metric/attribute",
            row.entry.id
        );
    }
    // Every attribute row has exactly one populated column.
    for row in &rows {
        if let Some(attr) = &row.attribute {
            let populated = [
                attr.value.value_int.is_some(),
                attr.value.value_float.is_some(),
                attr.value.value_string.is_some(),
                attr.value.value_bool.is_some(),
                attr.value.value_timestamp.is_some(),
                attr.value.value_hierarchy.is_some(),
            ]
            .iter()
            .filter(|p| **p)
            .count();
            assert_eq!(populated, 1);
        }
    }

    // Rows are the persistence handoff; they must survive serialization.
    let json = serde_json::to_string(&rows).unwrap();
    let restored: Vec<EntryRow> = serde_json::from_str(&json).unwrap();
    assert_eq!(rows, restored);
}

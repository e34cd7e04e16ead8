//! End-to-end tests for the scan pipeline over an in-memory row source:
//! bind-style schema handling, batched scanning, conversion, degrade policy
//! and resource accounting.

use daxql::core::db::binding::{BindingStrategy, NATIVE_TEXT_CAPACITY};
use daxql::core::db::statement::{describe_columns, RawColumn};
use daxql::core::value::{DbType, LogicalType, Value};
use daxql::core::variant::Variant;
use daxql::scanner::{scan, DataChunk, ScanOptions, ScanState};
use daxql::test_utils::MockRowSource;

fn native_options(batch_size: usize) -> ScanOptions {
    ScanOptions {
        batch_size,
        strategy: BindingStrategy::Native,
        ..ScanOptions::default()
    }
}

/// Drains a scan into (rows, per-scan cardinalities).
fn drain(state: &mut ScanState) -> (Vec<Vec<Value>>, Vec<usize>) {
    let mut chunk = DataChunk::new(state.columns().len());
    let mut rows = Vec::new();
    let mut batches = Vec::new();
    loop {
        scan(state, &mut chunk).unwrap();
        if chunk.cardinality() == 0 {
            break;
        }
        batches.push(chunk.cardinality());
        for row in 0..chunk.cardinality() {
            rows.push(
                (0..chunk.column_count())
                    .map(|col| chunk.column(col)[row].clone())
                    .collect(),
            );
        }
    }
    (rows, batches)
}

#[test]
fn three_rows_scan_cleanly_with_no_leaked_handles() {
    let source = MockRowSource::new(&[
        ("id", DbType::I8),
        ("label", DbType::WStr),
        ("active", DbType::Bool),
    ])
    .with_row(vec![
        Variant::I8(1),
        Variant::Text("first".into()),
        Variant::Bool(true),
    ])
    .with_row(vec![
        Variant::I8(2),
        Variant::Text("second".into()),
        Variant::Bool(false),
    ])
    .with_row(vec![Variant::I8(3), Variant::Null, Variant::Bool(true)]);
    let stats = source.stats();

    let mut state = ScanState::from_source(Box::new(source), &native_options(2)).unwrap();
    let (rows, batches) = drain(&mut state);

    // Exactly 3 converted rows, then a clean end-of-data signal
    assert_eq!(rows.len(), 3);
    assert_eq!(batches, vec![2, 1]);
    assert_eq!(
        rows[0],
        vec![
            Value::BigInt(1),
            Value::Varchar("first".into()),
            Value::Boolean(true)
        ]
    );
    assert_eq!(rows[2][1], Value::Null(LogicalType::Varchar));

    // release-count == fetch-count: no row handle leaked
    assert_eq!(stats.fetched(), 3);
    assert_eq!(stats.released(), 3);
}

#[test]
fn typed_values_convert_through_the_pipeline() {
    let source = MockRowSource::new(&[
        ("small", DbType::I2),
        ("price", DbType::Currency),
        ("ratio", DbType::R8),
        ("when", DbType::Date),
    ])
    .with_row(vec![
        Variant::I2(-7),
        Variant::Currency(1_234_500),
        Variant::R8(0.25),
        // 2006-01-15 12:00:00
        Variant::Date(38_732.5),
    ]);

    let mut state = ScanState::from_source(Box::new(source), &native_options(64)).unwrap();
    let (rows, _) = drain(&mut state);

    assert_eq!(rows[0][0], Value::SmallInt(-7));
    assert_eq!(rows[0][1], Value::Double(123.45));
    assert_eq!(rows[0][2], Value::Double(0.25));
    // DATE columns arrive as automation dates and land as host days
    let Value::Date(days) = rows[0][3] else {
        panic!("expected a date value");
    };
    assert_eq!(days, 38_732 - 25_569);
}

#[test]
fn truncated_text_keeps_partial_data() {
    let long_text = "y".repeat(4000);
    let source = MockRowSource::new(&[("notes", DbType::WStr)])
        .with_row(vec![Variant::Text(long_text.clone())]);

    let mut state = ScanState::from_source(Box::new(source), &native_options(8)).unwrap();
    let (rows, _) = drain(&mut state);

    // Policy: truncation degrades to partial data, never to NULL
    let Value::Varchar(text) = &rows[0][0] else {
        panic!("expected partial text, got {:?}", rows[0][0]);
    };
    assert_eq!(text.len(), (NATIVE_TEXT_CAPACITY - 2) / 2);
    assert!(long_text.starts_with(text.as_str()));
}

#[test]
fn failing_row_becomes_nulls_but_scan_continues() {
    let source = MockRowSource::new(&[("id", DbType::I8), ("label", DbType::WStr)])
        .with_row(vec![Variant::I8(1), Variant::Text("ok".into())])
        .with_row(vec![Variant::I8(2), Variant::Text("broken".into())])
        .with_row(vec![Variant::I8(3), Variant::Text("ok again".into())])
        .with_failing_row(1);
    let stats = source.stats();

    let mut state = ScanState::from_source(Box::new(source), &native_options(16)).unwrap();
    let (rows, _) = drain(&mut state);

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], Value::BigInt(1));
    assert_eq!(rows[1][0], Value::Null(LogicalType::BigInt));
    assert_eq!(rows[1][1], Value::Null(LogicalType::Varchar));
    assert_eq!(rows[2][0], Value::BigInt(3));
    assert_eq!(stats.fetched(), stats.released());
}

#[test]
fn closing_a_scan_twice_is_a_noop() {
    let source = MockRowSource::new(&[("id", DbType::I8)]).with_row(vec![Variant::I8(1)]);
    let mut state = ScanState::from_source(Box::new(source), &native_options(4)).unwrap();

    state.close();
    state.close();

    let mut chunk = DataChunk::new(1);
    scan(&mut state, &mut chunk).unwrap();
    assert_eq!(chunk.cardinality(), 0);
}

#[test]
fn provider_column_names_become_safe_and_distinct() {
    let raw = vec![
        RawColumn {
            ordinal: 1,
            name: Some("Sales[Amount]".into()),
            type_tag: DbType::Currency.raw(),
        },
        RawColumn {
            ordinal: 2,
            name: Some("Sales[Amount)".into()),
            type_tag: DbType::R8.raw(),
        },
        RawColumn {
            ordinal: 3,
            name: None,
            type_tag: DbType::WStr.raw(),
        },
    ];
    let columns = describe_columns(&raw);

    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names[0], "Sales_Amount_");
    assert_ne!(names[1], names[0]);
    assert_eq!(names[2], "column2");
    assert!(names
        .iter()
        .all(|n| n.chars().all(|c| c.is_alphanumeric() || c == '_')));

    assert_eq!(columns[0].logical_type(), LogicalType::Double);
    assert_eq!(columns[2].logical_type(), LogicalType::Varchar);
}

#[test]
fn empty_rowset_scans_to_immediate_end_of_data() {
    let source = MockRowSource::new(&[("id", DbType::I8)]);
    let stats = source.stats();

    let mut state = ScanState::from_source(Box::new(source), &native_options(32)).unwrap();
    let (rows, batches) = drain(&mut state);

    assert!(rows.is_empty());
    assert!(batches.is_empty());
    assert_eq!(stats.fetched(), 0);
    assert_eq!(stats.released(), 0);
}

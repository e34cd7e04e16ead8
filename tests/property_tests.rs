//! Property-based tests for value conversion and column-name handling
//!
//! These tests verify the correctness of the conversion layer through
//! property-based testing, ensuring that:
//! - Column-name sanitization is idempotent and collision-free
//! - The two automation-date conversion paths agree on every input
//! - Numeric round trips through text are lossless
//! - NULL always wins over the declared target type

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use daxql::core::convert::{
        automation_date_to_datetime, automation_date_to_unix_micros, currency_to_double,
        sanitize_column_name, sanitize_column_names, variant_to_value,
    };
    use daxql::core::value::{DbType, LogicalType, Value};
    use daxql::core::variant::Variant;

    fn arb_column_name() -> impl Strategy<Value = String> {
        // Provider-style names: identifiers, bracketed measure references,
        // and arbitrary unicode noise
        prop_oneof![
            "[a-zA-Z][a-zA-Z0-9_]{0,29}",
            "[a-zA-Z]{1,8}\\[[a-zA-Z ]{1,12}\\]",
            ".{0,24}",
        ]
    }

    fn arb_target_type() -> impl Strategy<Value = LogicalType> {
        prop_oneof![
            Just(LogicalType::Boolean),
            Just(LogicalType::TinyInt),
            Just(LogicalType::SmallInt),
            Just(LogicalType::Integer),
            Just(LogicalType::BigInt),
            Just(LogicalType::Float),
            Just(LogicalType::Double),
            Just(LogicalType::Date),
            Just(LogicalType::Timestamp),
            Just(LogicalType::Varchar),
        ]
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(name in arb_column_name()) {
            let once = sanitize_column_name(&name);
            let twice = sanitize_column_name(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn sanitize_preserves_character_count(name in arb_column_name()) {
            let sanitized = sanitize_column_name(&name);
            prop_assert_eq!(sanitized.chars().count(), name.chars().count());
        }

        #[test]
        fn sanitize_emits_only_identifier_characters(name in arb_column_name()) {
            let sanitized = sanitize_column_name(&name);
            prop_assert!(sanitized.chars().all(|c| c.is_alphanumeric() || c == '_'));
        }

        #[test]
        fn sanitized_name_sets_never_collide(names in prop::collection::vec(arb_column_name(), 0..12)) {
            let out = sanitize_column_names(&names);
            let mut seen = std::collections::HashSet::new();
            for name in &out {
                prop_assert!(seen.insert(name.clone()), "duplicate output name {}", name);
            }
            prop_assert_eq!(out.len(), names.len());
        }

        #[test]
        fn automation_date_paths_agree(raw in -650_000.0f64..2_900_000.0f64) {
            let micros = automation_date_to_unix_micros(raw);
            let dt = automation_date_to_datetime(raw);
            prop_assert!(dt.is_some(), "calendar path failed for {}", raw);
            prop_assert_eq!(dt.unwrap().and_utc().timestamp_micros(), micros);
        }

        #[test]
        fn currency_scales_by_ten_thousand(scaled in proptest::num::i64::ANY) {
            let value = currency_to_double(scaled);
            prop_assert_eq!(value, scaled as f64 / 10_000.0);
        }

        #[test]
        fn integer_round_trip_through_text(v in proptest::num::i64::ANY) {
            let text = variant_to_value(&Variant::I8(v), LogicalType::Varchar).unwrap();
            let Value::Varchar(s) = text else {
                panic!("expected text value");
            };
            let back = variant_to_value(&Variant::Text(s), LogicalType::BigInt).unwrap();
            prop_assert_eq!(back, Value::BigInt(v));
        }

        #[test]
        fn null_always_wins(target in arb_target_type()) {
            let converted = variant_to_value(&Variant::Null, target).unwrap();
            prop_assert!(converted.is_null());
            prop_assert_eq!(converted.logical_type(), target);
        }

        #[test]
        fn db_type_raw_round_trip(raw in proptest::num::u16::ANY) {
            prop_assert_eq!(DbType::from_raw(raw).raw(), raw);
        }
    }
}

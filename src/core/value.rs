/// Value Domain Module
///
/// This module defines the host engine's typed value representation and the
/// provider's native column type tags. Column metadata arrives from the
/// provider as raw 16-bit type tags; the scan pipeline maps each tag to a
/// host logical type once at bind time and converts every fetched cell into
/// a [`Value`] of that type.
use std::fmt;

use chrono::NaiveDate;

/// Days from 0001-01-01 (chrono's CE day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Logical column types of the host engine's output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    /// Days since 1970-01-01
    Date,
    /// Microseconds since 1970-01-01 00:00:00
    Timestamp,
    Varchar,
}

impl LogicalType {
    /// Returns the display name used in schema listings.
    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::TinyInt => "TINYINT",
            LogicalType::SmallInt => "SMALLINT",
            LogicalType::Integer => "INTEGER",
            LogicalType::BigInt => "BIGINT",
            LogicalType::Float => "FLOAT",
            LogicalType::Double => "DOUBLE",
            LogicalType::Date => "DATE",
            LogicalType::Timestamp => "TIMESTAMP",
            LogicalType::Varchar => "VARCHAR",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed cell value produced by the scan pipeline.
///
/// `Null` carries the column's logical type so that downstream consumers can
/// keep columnar buffers homogeneously typed even for missing data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null(LogicalType),
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    /// Days since 1970-01-01
    Date(i32),
    /// Microseconds since 1970-01-01 00:00:00
    Timestamp(i64),
    Varchar(String),
}

impl Value {
    /// Returns the logical type this value belongs to.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Null(ty) => *ty,
            Value::Boolean(_) => LogicalType::Boolean,
            Value::TinyInt(_) => LogicalType::TinyInt,
            Value::SmallInt(_) => LogicalType::SmallInt,
            Value::Integer(_) => LogicalType::Integer,
            Value::BigInt(_) => LogicalType::BigInt,
            Value::Float(_) => LogicalType::Float,
            Value::Double(_) => LogicalType::Double,
            Value::Date(_) => LogicalType::Date,
            Value::Timestamp(_) => LogicalType::Timestamp,
            Value::Varchar(_) => LogicalType::Varchar,
        }
    }

    /// Returns true for NULL cells.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null(_) => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Date(days) => {
                match NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_DAYS_FROM_CE + days) {
                    Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
                    None => write!(f, "DATE({})", days),
                }
            }
            Value::Timestamp(micros) => match chrono::DateTime::from_timestamp_micros(*micros) {
                Some(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
                None => write!(f, "TIMESTAMP({})", micros),
            },
            Value::Varchar(s) => f.write_str(s),
        }
    }
}

/// Native OLE DB column type tags as reported by the provider.
///
/// The raw 16-bit tag values are part of the provider wire contract and are
/// preserved so bindings can echo the exact tag back when requesting native
/// conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Empty,
    Null,
    I2,
    I4,
    R4,
    R8,
    Currency,
    Date,
    Bstr,
    Error,
    Bool,
    Variant,
    Decimal,
    I1,
    UI1,
    UI2,
    UI4,
    I8,
    UI8,
    Guid,
    Bytes,
    Str,
    WStr,
    Numeric,
    Udt,
    DbDate,
    DbTime,
    DbTimestamp,
    Unknown(u16),
}

impl DbType {
    /// Decodes a raw provider type tag.
    pub fn from_raw(raw: u16) -> DbType {
        match raw {
            0 => DbType::Empty,
            1 => DbType::Null,
            2 => DbType::I2,
            3 => DbType::I4,
            4 => DbType::R4,
            5 => DbType::R8,
            6 => DbType::Currency,
            7 => DbType::Date,
            8 => DbType::Bstr,
            10 => DbType::Error,
            11 => DbType::Bool,
            12 => DbType::Variant,
            14 => DbType::Decimal,
            16 => DbType::I1,
            17 => DbType::UI1,
            18 => DbType::UI2,
            19 => DbType::UI4,
            20 => DbType::I8,
            21 => DbType::UI8,
            72 => DbType::Guid,
            128 => DbType::Bytes,
            129 => DbType::Str,
            130 => DbType::WStr,
            131 => DbType::Numeric,
            132 => DbType::Udt,
            133 => DbType::DbDate,
            134 => DbType::DbTime,
            135 => DbType::DbTimestamp,
            other => DbType::Unknown(other),
        }
    }

    /// Returns the raw provider tag for this type.
    pub fn raw(&self) -> u16 {
        match self {
            DbType::Empty => 0,
            DbType::Null => 1,
            DbType::I2 => 2,
            DbType::I4 => 3,
            DbType::R4 => 4,
            DbType::R8 => 5,
            DbType::Currency => 6,
            DbType::Date => 7,
            DbType::Bstr => 8,
            DbType::Error => 10,
            DbType::Bool => 11,
            DbType::Variant => 12,
            DbType::Decimal => 14,
            DbType::I1 => 16,
            DbType::UI1 => 17,
            DbType::UI2 => 18,
            DbType::UI4 => 19,
            DbType::I8 => 20,
            DbType::UI8 => 21,
            DbType::Guid => 72,
            DbType::Bytes => 128,
            DbType::Str => 129,
            DbType::WStr => 130,
            DbType::Numeric => 131,
            DbType::Udt => 132,
            DbType::DbDate => 133,
            DbType::DbTime => 134,
            DbType::DbTimestamp => 135,
            DbType::Unknown(raw) => *raw,
        }
    }

    /// Human-readable tag name for diagnostics.
    pub fn name(&self) -> String {
        match self {
            DbType::Empty => "EMPTY".to_string(),
            DbType::Null => "NULL".to_string(),
            DbType::I2 => "I2".to_string(),
            DbType::I4 => "I4".to_string(),
            DbType::R4 => "R4".to_string(),
            DbType::R8 => "R8".to_string(),
            DbType::Currency => "CY".to_string(),
            DbType::Date => "DATE".to_string(),
            DbType::Bstr => "BSTR".to_string(),
            DbType::Error => "ERROR".to_string(),
            DbType::Bool => "BOOL".to_string(),
            DbType::Variant => "VARIANT".to_string(),
            DbType::Decimal => "DECIMAL".to_string(),
            DbType::I1 => "I1".to_string(),
            DbType::UI1 => "UI1".to_string(),
            DbType::UI2 => "UI2".to_string(),
            DbType::UI4 => "UI4".to_string(),
            DbType::I8 => "I8".to_string(),
            DbType::UI8 => "UI8".to_string(),
            DbType::Guid => "GUID".to_string(),
            DbType::Bytes => "BYTES".to_string(),
            DbType::Str => "STR".to_string(),
            DbType::WStr => "WSTR".to_string(),
            DbType::Numeric => "NUMERIC".to_string(),
            DbType::Udt => "UDT".to_string(),
            DbType::DbDate => "DBDATE".to_string(),
            DbType::DbTime => "DBTIME".to_string(),
            DbType::DbTimestamp => "DBTIMESTAMP".to_string(),
            DbType::Unknown(raw) => format!("UNKNOWN({})", raw),
        }
    }

    /// Maps the native tag to the host logical type used for output columns.
    ///
    /// Currency, decimal and numeric columns are widened to DOUBLE; string-ish
    /// and unrecognized tags fall back to VARCHAR so no column is ever
    /// unrepresentable.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            DbType::Bool => LogicalType::Boolean,
            DbType::I1 | DbType::UI1 => LogicalType::TinyInt,
            DbType::I2 | DbType::UI2 => LogicalType::SmallInt,
            DbType::I4 | DbType::UI4 => LogicalType::Integer,
            DbType::I8 | DbType::UI8 => LogicalType::BigInt,
            DbType::R4 => LogicalType::Float,
            DbType::R8 | DbType::Decimal | DbType::Numeric | DbType::Currency => {
                LogicalType::Double
            }
            DbType::Date | DbType::DbDate => LogicalType::Date,
            DbType::DbTime | DbType::DbTimestamp => LogicalType::Timestamp,
            _ => LogicalType::Varchar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_tag_round_trip() {
        for raw in [0u16, 2, 3, 5, 6, 7, 8, 11, 12, 20, 72, 130, 135, 999] {
            assert_eq!(DbType::from_raw(raw).raw(), raw);
        }
    }

    #[test]
    fn test_logical_type_mapping() {
        assert_eq!(DbType::Bool.logical_type(), LogicalType::Boolean);
        assert_eq!(DbType::I8.logical_type(), LogicalType::BigInt);
        assert_eq!(DbType::Currency.logical_type(), LogicalType::Double);
        assert_eq!(DbType::Date.logical_type(), LogicalType::Date);
        assert_eq!(DbType::DbTimestamp.logical_type(), LogicalType::Timestamp);
        assert_eq!(DbType::Unknown(4711).logical_type(), LogicalType::Varchar);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null(LogicalType::Integer).to_string(), "NULL");
        assert_eq!(Value::BigInt(42).to_string(), "42");
        assert_eq!(Value::Varchar("abc".to_string()).to_string(), "abc");
        // 2024-03-01 is 19783 days after the Unix epoch
        assert_eq!(Value::Date(19_783).to_string(), "2024-03-01");
    }

    #[test]
    fn test_null_keeps_logical_type() {
        let v = Value::Null(LogicalType::Timestamp);
        assert!(v.is_null());
        assert_eq!(v.logical_type(), LogicalType::Timestamp);
    }
}

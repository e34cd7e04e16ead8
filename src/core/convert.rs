/// Value Conversion Module
///
/// This module converts decoded provider values into the host engine's typed
/// value domain: explicit numeric promotion, automation-date calendar math,
/// fixed-point currency scaling, UTF-16 text translation, and the column-name
/// sanitization applied to provider metadata.
///
/// Scan paths treat conversion failures as degradable: the caller maps an
/// `Err` to a NULL cell and keeps the scan alive, so nothing in here panics
/// on malformed provider data.
use crate::core::variant::Variant;
use crate::core::value::{LogicalType, Value};
use crate::core::{DaxqlError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;

/// Days between the automation epoch (1899-12-30) and the Unix epoch.
pub const AUTOMATION_EPOCH_OFFSET_DAYS: i64 = 25_569;

/// Microseconds per day.
const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Currency values are 64-bit integers scaled by 10,000.
const CURRENCY_SCALE: f64 = 10_000.0;

/// Total microseconds since the automation epoch for an automation date.
///
/// The fractional part of the input carries the time of day. Rounding happens
/// exactly once here so every downstream interpretation of the same input
/// agrees on the instant.
fn automation_date_total_micros(automation_date: f64) -> i64 {
    (automation_date * MICROS_PER_DAY as f64).round() as i64
}

/// Converts an automation date (days since 1899-12-30, fraction = time of
/// day) to microseconds since the Unix epoch, via the 25,569 day offset.
pub fn automation_date_to_unix_micros(automation_date: f64) -> i64 {
    automation_date_total_micros(automation_date) - AUTOMATION_EPOCH_OFFSET_DAYS * MICROS_PER_DAY
}

/// Converts an automation date to a calendar date-time by decomposing it into
/// whole days from the 1899-12-30 base plus an intra-day offset.
///
/// Agrees with [`automation_date_to_unix_micros`] on every input: both derive
/// from the same single rounding of the raw value.
pub fn automation_date_to_datetime(automation_date: f64) -> Option<NaiveDateTime> {
    let total = automation_date_total_micros(automation_date);
    let days = total.div_euclid(MICROS_PER_DAY);
    let intra_day = total.rem_euclid(MICROS_PER_DAY);

    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = base.checked_add_signed(chrono::Duration::days(days))?;
    let secs = (intra_day / 1_000_000) as u32;
    let micros = (intra_day % 1_000_000) as u32;
    date.and_hms_micro_opt(secs / 3600, (secs / 60) % 60, secs % 60, micros)
}

/// Converts an automation date to a host date (days since the Unix epoch).
pub fn automation_date_to_unix_days(automation_date: f64) -> i32 {
    automation_date_to_unix_micros(automation_date).div_euclid(MICROS_PER_DAY) as i32
}

/// Converts a currency value (scaled by 10,000) to a double.
pub fn currency_to_double(scaled: i64) -> f64 {
    scaled as f64 / CURRENCY_SCALE
}

/// Converts UTF-16 code units to a host string.
///
/// Falls back to a best-effort lossy translation when the input is not valid
/// UTF-16 rather than failing the cell.
pub fn utf16_to_string(units: &[u16]) -> String {
    match String::from_utf16(units) {
        Ok(s) => s,
        Err(_) => {
            warn!(units = units.len(), "invalid UTF-16 in text value, converting lossily");
            String::from_utf16_lossy(units)
        }
    }
}

fn variant_to_i64(var: &Variant) -> Result<i64> {
    match var {
        Variant::I1(v) => Ok(*v as i64),
        Variant::I2(v) => Ok(*v as i64),
        Variant::I4(v) => Ok(*v as i64),
        Variant::I8(v) => Ok(*v),
        Variant::UI1(v) => Ok(*v as i64),
        Variant::UI2(v) => Ok(*v as i64),
        Variant::UI4(v) => Ok(*v as i64),
        Variant::UI8(v) => i64::try_from(*v)
            .map_err(|_| DaxqlError::Convert(format!("unsigned value {} overflows BIGINT", v))),
        Variant::R4(v) => Ok(*v as i64),
        Variant::R8(v) => Ok(*v as i64),
        Variant::Bool(v) => Ok(*v as i64),
        // Scaled fixed-point narrows to its integral part
        Variant::Currency(v) => Ok(v / 10_000),
        Variant::Date(v) => Ok(*v as i64),
        Variant::Text(s) => s.trim().parse::<i64>().map_err(|e| {
            DaxqlError::Convert(format!("cannot parse '{}' as an integer: {}", s, e))
        }),
        other => Err(DaxqlError::Convert(format!(
            "cannot convert {} to an integer",
            other.tag_name()
        ))),
    }
}

fn variant_to_f64(var: &Variant) -> Result<f64> {
    match var {
        Variant::I1(v) => Ok(*v as f64),
        Variant::I2(v) => Ok(*v as f64),
        Variant::I4(v) => Ok(*v as f64),
        Variant::I8(v) => Ok(*v as f64),
        Variant::UI1(v) => Ok(*v as f64),
        Variant::UI2(v) => Ok(*v as f64),
        Variant::UI4(v) => Ok(*v as f64),
        Variant::UI8(v) => Ok(*v as f64),
        Variant::R4(v) => Ok(*v as f64),
        Variant::R8(v) => Ok(*v),
        Variant::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
        Variant::Currency(v) => Ok(currency_to_double(*v)),
        Variant::Date(v) => Ok(*v),
        Variant::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| DaxqlError::Convert(format!("cannot parse '{}' as a number: {}", s, e))),
        other => Err(DaxqlError::Convert(format!(
            "cannot convert {} to a number",
            other.tag_name()
        ))),
    }
}

fn variant_to_bool(var: &Variant) -> Result<bool> {
    match var {
        Variant::Bool(v) => Ok(*v),
        Variant::I1(v) => Ok(*v != 0),
        Variant::I2(v) => Ok(*v != 0),
        Variant::I4(v) => Ok(*v != 0),
        Variant::I8(v) => Ok(*v != 0),
        Variant::UI1(v) => Ok(*v != 0),
        Variant::UI2(v) => Ok(*v != 0),
        Variant::UI4(v) => Ok(*v != 0),
        Variant::UI8(v) => Ok(*v != 0),
        Variant::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(DaxqlError::Convert(format!(
                "cannot parse '{}' as a boolean",
                s
            ))),
        },
        other => Err(DaxqlError::Convert(format!(
            "cannot convert {} to a boolean",
            other.tag_name()
        ))),
    }
}

/// Converts a decoded provider value into a host value of the target type.
///
/// # Arguments
///
/// * `var` - The decoded slot content
/// * `target` - The column's logical type, fixed at bind time
///
/// # Returns
///
/// A typed value, or `Value::Null(target)` when the variant signals missing
/// data. A provider-side error variant or an impossible conversion returns
/// `DaxqlError::Convert`; scan paths degrade that to NULL.
pub fn variant_to_value(var: &Variant, target: LogicalType) -> Result<Value> {
    if var.is_missing() {
        return Ok(Value::Null(target));
    }
    if let Variant::Error(code) = var {
        return Err(DaxqlError::Convert(format!(
            "provider reported cell error 0x{:08X}",
            code
        )));
    }

    match target {
        LogicalType::Boolean => Ok(Value::Boolean(variant_to_bool(var)?)),
        LogicalType::TinyInt => {
            let v = variant_to_i64(var)?;
            i8::try_from(v)
                .map(Value::TinyInt)
                .map_err(|_| DaxqlError::Convert(format!("{} overflows TINYINT", v)))
        }
        LogicalType::SmallInt => {
            let v = variant_to_i64(var)?;
            i16::try_from(v)
                .map(Value::SmallInt)
                .map_err(|_| DaxqlError::Convert(format!("{} overflows SMALLINT", v)))
        }
        LogicalType::Integer => {
            let v = variant_to_i64(var)?;
            i32::try_from(v)
                .map(Value::Integer)
                .map_err(|_| DaxqlError::Convert(format!("{} overflows INTEGER", v)))
        }
        LogicalType::BigInt => Ok(Value::BigInt(variant_to_i64(var)?)),
        LogicalType::Float => Ok(Value::Float(variant_to_f64(var)? as f32)),
        LogicalType::Double => Ok(Value::Double(variant_to_f64(var)?)),
        LogicalType::Date => match var {
            Variant::Date(d) => Ok(Value::Date(automation_date_to_unix_days(*d))),
            other => Err(DaxqlError::Convert(format!(
                "cannot convert {} to a date",
                other.tag_name()
            ))),
        },
        LogicalType::Timestamp => match var {
            Variant::Date(d) => Ok(Value::Timestamp(automation_date_to_unix_micros(*d))),
            other => Err(DaxqlError::Convert(format!(
                "cannot convert {} to a timestamp",
                other.tag_name()
            ))),
        },
        LogicalType::Varchar => Ok(Value::Varchar(var.to_string())),
    }
}

/// Sanitizes a provider column name into an identifier-safe form.
///
/// Structurally unsafe characters (brackets, punctuation, whitespace:
/// anything that is not alphanumeric or an underscore) are replaced
/// one-for-one with `_`, preserving length and character positions. The
/// transform is idempotent.
pub fn sanitize_column_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Fallback name for columns the provider reports without a name.
pub fn default_column_name(index: usize) -> String {
    format!("column{}", index)
}

/// Sanitizes and de-duplicates a full set of column names.
///
/// Distinct originals that collide after sanitization are disambiguated by
/// suffixing the 0-based column index (repeatedly, in the pathological case
/// where the suffixed name is itself taken).
pub fn sanitize_column_names(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let mut candidate = sanitize_column_name(name);
        while out.contains(&candidate) {
            candidate = format!("{}_{}", candidate, i);
        }
        out.push(candidate);
    }
    out
}

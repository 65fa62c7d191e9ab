use crate::db_operations::SqlValue;
use crate::error::{PodError, PodResult};
use crate::schema::FieldType;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

/// Numeric filter operand, keeping integers exact when bound as parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    Int(i64),
    Float(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            NumberValue::Int(i) => *i as f64,
            NumberValue::Float(f) => *f,
        }
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            NumberValue::Int(i) => SqlValue::Integer(*i),
            NumberValue::Float(f) => SqlValue::Real(*f),
        }
    }

    /// Exact ordering, the way the relational backend compares numbers:
    /// integers against integers without going through `f64`, and mixed
    /// pairs without rounding the integer side.
    pub fn compare_exact(&self, other: &NumberValue) -> Option<Ordering> {
        match (self, other) {
            (NumberValue::Int(a), NumberValue::Int(b)) => Some(a.cmp(b)),
            (NumberValue::Float(a), NumberValue::Float(b)) => a.partial_cmp(b),
            (NumberValue::Int(a), NumberValue::Float(b)) => int_float_cmp(*a, *b),
            (NumberValue::Float(a), NumberValue::Int(b)) => {
                int_float_cmp(*b, *a).map(Ordering::reverse)
            }
        }
    }

    pub(crate) fn from_json(value: &Value) -> Option<Self> {
        value
            .as_i64()
            .map(NumberValue::Int)
            .or_else(|| value.as_f64().map(NumberValue::Float))
    }
}

fn int_float_cmp(int: i64, float: f64) -> Option<Ordering> {
    if float.is_nan() {
        return None;
    }
    // 2^63 is exactly representable; anything at or past it is out of i64 range.
    if float >= 9_223_372_036_854_775_808.0 {
        return Some(Ordering::Less);
    }
    if float < -9_223_372_036_854_775_808.0 {
        return Some(Ordering::Greater);
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(float - whole)),
        unequal => Some(unequal),
    }
}

/// A typed filter operand. The variant decides which predicate family is built.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(NumberValue),
    Identifier(Uuid),
    Temporal(DateTime<Utc>),
}

impl FilterValue {
    /// Convert a JSON operand using the declared type of the filtered field
    pub fn from_typed(value: &Value, field_type: FieldType) -> PodResult<Self> {
        let mismatch = || {
            PodError::validation(format!(
                "Filter value {} does not match field type {:?}",
                value, field_type
            ))
        };
        match field_type {
            FieldType::String => value
                .as_str()
                .map(|s| FilterValue::Text(s.to_string()))
                .ok_or_else(mismatch),
            FieldType::Integer | FieldType::Number => NumberValue::from_json(value)
                .map(FilterValue::Number)
                .ok_or_else(mismatch),
            FieldType::Uuid => value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(FilterValue::Identifier)
                .ok_or_else(mismatch),
            FieldType::Datetime => parse_datetime(value)
                .map(FilterValue::Temporal)
                .ok_or_else(mismatch),
            FieldType::Boolean | FieldType::Array | FieldType::Object => Err(
                PodError::validation(format!("Fields of type {:?} cannot be filtered", field_type)),
            ),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Number(NumberValue::Int(value as i64))
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(NumberValue::Int(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Number(NumberValue::Float(value))
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        FilterValue::Identifier(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Temporal(value)
    }
}

/// Epoch seconds with microsecond resolution; the stored form of temporal fields.
pub fn datetime_to_epoch(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp_micros() as f64 / 1_000_000.0
}

pub fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

/// Accepts an RFC 3339 string or a number of epoch seconds
pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        _ => None,
    }
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Current time as epoch seconds
pub fn now_epoch() -> f64 {
    datetime_to_epoch(&Utc::now())
}

//! Typed filter predicates.
//!
//! Each predicate can be evaluated against an in-memory row and rendered as a
//! parameterized SQL fragment. The two paths must agree for every stored row:
//! a missing or NULL field never matches, text comparisons are byte-wise,
//! identifiers compare in canonical lower-case form and temporal values
//! compare as epoch seconds with microsecond resolution.

use super::value::{datetime_to_epoch, parse_datetime, FilterValue, NumberValue};
use crate::db_operations::{quote_ident, SqlValue};
use crate::error::{PodError, PodResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Operator names accepted in filter requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Eq,
    Ne,
    Contains,
    NotContains,
    Regex,
    Gt,
    Lt,
    Ge,
    Le,
    At,
    NotAt,
    After,
    Before,
    AtOrAfter,
    AtOrBefore,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "not_contains",
            FilterOperator::Regex => "regex",
            FilterOperator::Gt => "gt",
            FilterOperator::Lt => "lt",
            FilterOperator::Ge => "ge",
            FilterOperator::Le => "le",
            FilterOperator::At => "at",
            FilterOperator::NotAt => "not_at",
            FilterOperator::After => "after",
            FilterOperator::Before => "before",
            FilterOperator::AtOrAfter => "at_or_after",
            FilterOperator::AtOrBefore => "at_or_before",
        }
    }
}

impl FromStr for FilterOperator {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(FilterOperator::Eq),
            "ne" => Ok(FilterOperator::Ne),
            "contains" => Ok(FilterOperator::Contains),
            "not_contains" => Ok(FilterOperator::NotContains),
            "regex" => Ok(FilterOperator::Regex),
            "gt" => Ok(FilterOperator::Gt),
            "lt" => Ok(FilterOperator::Lt),
            "ge" => Ok(FilterOperator::Ge),
            "le" => Ok(FilterOperator::Le),
            "at" => Ok(FilterOperator::At),
            "not_at" => Ok(FilterOperator::NotAt),
            "after" => Ok(FilterOperator::After),
            "before" => Ok(FilterOperator::Before),
            "at_or_after" => Ok(FilterOperator::AtOrAfter),
            "at_or_before" => Ok(FilterOperator::AtOrBefore),
            other => Err(PodError::validation(format!("Unknown filter operator '{}'", other))),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How parameters are spelled in generated fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    Question,
    /// `?N`, numbered from the supplied index
    Numbered,
    /// `:field_N`
    Named,
}

impl PlaceholderStyle {
    pub fn render(&self, field: &str, index: usize) -> String {
        match self {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Numbered => format!("?{}", index),
            PlaceholderStyle::Named => format!(":{}_{}", field, index),
        }
    }
}

/// A rendered predicate: SQL text, the placeholder it uses, and the bound value.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFragment {
    pub sql: String,
    pub placeholder: String,
    pub value: SqlValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Eq,
    Ne,
    Contains,
    NotContains,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOp {
    At,
    NotAt,
    After,
    Before,
    AtOrAfter,
    AtOrBefore,
}

#[derive(Debug, Clone)]
pub struct TextFilter {
    pub field: String,
    pub op: TextOp,
    pub value: String,
    regex: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct NumberFilter {
    pub field: String,
    pub op: NumberOp,
    pub value: NumberValue,
}

#[derive(Debug, Clone)]
pub struct IdFilter {
    pub field: String,
    pub op: IdOp,
    pub value: Uuid,
}

#[derive(Debug, Clone)]
pub struct TimeFilter {
    pub field: String,
    pub op: TimeOp,
    pub value: DateTime<Utc>,
}

/// A single (field, operator, value) predicate.
#[derive(Debug, Clone)]
pub enum FilterPredicate {
    Text(TextFilter),
    Number(NumberFilter),
    Identifier(IdFilter),
    Temporal(TimeFilter),
}

fn unsupported(op: FilterOperator, kind: &str) -> PodError {
    PodError::validation(format!("Operator '{}' is not supported for {} values", op, kind))
}

impl FilterPredicate {
    /// Build a predicate, dispatching on the operand type
    pub fn create(field: &str, op: FilterOperator, value: FilterValue) -> PodResult<Self> {
        let field = field.to_string();
        match value {
            FilterValue::Text(value) => {
                let op = match op {
                    FilterOperator::Eq => TextOp::Eq,
                    FilterOperator::Ne => TextOp::Ne,
                    FilterOperator::Contains => TextOp::Contains,
                    FilterOperator::NotContains => TextOp::NotContains,
                    FilterOperator::Regex => TextOp::Regex,
                    other => return Err(unsupported(other, "text")),
                };
                let regex = if op == TextOp::Regex {
                    Some(Regex::new(&value).map_err(|e| {
                        PodError::validation(format!("Invalid regex '{}': {}", value, e))
                    })?)
                } else {
                    None
                };
                Ok(FilterPredicate::Text(TextFilter {
                    field,
                    op,
                    value,
                    regex,
                }))
            }
            FilterValue::Number(value) => {
                let op = match op {
                    FilterOperator::Eq => NumberOp::Eq,
                    FilterOperator::Ne => NumberOp::Ne,
                    FilterOperator::Gt => NumberOp::Gt,
                    FilterOperator::Lt => NumberOp::Lt,
                    FilterOperator::Ge => NumberOp::Ge,
                    FilterOperator::Le => NumberOp::Le,
                    other => return Err(unsupported(other, "number")),
                };
                Ok(FilterPredicate::Number(NumberFilter { field, op, value }))
            }
            FilterValue::Identifier(value) => {
                let op = match op {
                    FilterOperator::Eq => IdOp::Eq,
                    FilterOperator::Ne => IdOp::Ne,
                    other => return Err(unsupported(other, "identifier")),
                };
                Ok(FilterPredicate::Identifier(IdFilter { field, op, value }))
            }
            FilterValue::Temporal(value) => {
                // Ordering operators are accepted as aliases of their temporal names.
                let op = match op {
                    FilterOperator::At | FilterOperator::Eq => TimeOp::At,
                    FilterOperator::NotAt | FilterOperator::Ne => TimeOp::NotAt,
                    FilterOperator::After | FilterOperator::Gt => TimeOp::After,
                    FilterOperator::Before | FilterOperator::Lt => TimeOp::Before,
                    FilterOperator::AtOrAfter | FilterOperator::Ge => TimeOp::AtOrAfter,
                    FilterOperator::AtOrBefore | FilterOperator::Le => TimeOp::AtOrBefore,
                    other => return Err(unsupported(other, "temporal")),
                };
                Ok(FilterPredicate::Temporal(TimeFilter { field, op, value }))
            }
        }
    }

    pub fn field(&self) -> &str {
        match self {
            FilterPredicate::Text(f) => &f.field,
            FilterPredicate::Number(f) => &f.field,
            FilterPredicate::Identifier(f) => &f.field,
            FilterPredicate::Temporal(f) => &f.field,
        }
    }

    /// Evaluate against the field's value in an in-memory row
    pub fn compare(&self, candidate: Option<&Value>) -> bool {
        let Some(candidate) = candidate.filter(|v| !v.is_null()) else {
            return false;
        };
        match self {
            FilterPredicate::Text(f) => {
                let Some(text) = candidate.as_str() else {
                    return false;
                };
                match f.op {
                    TextOp::Eq => text == f.value,
                    TextOp::Ne => text != f.value,
                    TextOp::Contains => text.contains(f.value.as_str()),
                    TextOp::NotContains => !text.contains(f.value.as_str()),
                    TextOp::Regex => f.regex.as_ref().is_some_and(|re| re.is_match(text)),
                }
            }
            FilterPredicate::Number(f) => {
                let Some(ordering) =
                    NumberValue::from_json(candidate).and_then(|n| n.compare_exact(&f.value))
                else {
                    return false;
                };
                match f.op {
                    NumberOp::Eq => ordering == Ordering::Equal,
                    NumberOp::Ne => ordering != Ordering::Equal,
                    NumberOp::Gt => ordering == Ordering::Greater,
                    NumberOp::Lt => ordering == Ordering::Less,
                    NumberOp::Ge => ordering != Ordering::Less,
                    NumberOp::Le => ordering != Ordering::Greater,
                }
            }
            FilterPredicate::Identifier(f) => {
                let Some(id) = candidate.as_str().and_then(|s| Uuid::parse_str(s).ok()) else {
                    return false;
                };
                match f.op {
                    IdOp::Eq => id == f.value,
                    IdOp::Ne => id != f.value,
                }
            }
            FilterPredicate::Temporal(f) => {
                let Some(dt) = parse_datetime(candidate) else {
                    return false;
                };
                let n = datetime_to_epoch(&dt);
                let v = datetime_to_epoch(&f.value);
                match f.op {
                    TimeOp::At => n == v,
                    TimeOp::NotAt => n != v,
                    TimeOp::After => n > v,
                    TimeOp::Before => n < v,
                    TimeOp::AtOrAfter => n >= v,
                    TimeOp::AtOrBefore => n <= v,
                }
            }
        }
    }

    /// Evaluate against a whole row
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        self.compare(row.get(self.field()))
    }

    /// Render as a SQL fragment bound to one parameter
    pub fn to_query_fragment(&self, style: PlaceholderStyle, index: usize) -> QueryFragment {
        let column = quote_ident(self.field());
        let placeholder = style.render(self.field(), index);
        let (sql, value) = match self {
            FilterPredicate::Text(f) => {
                let sql = match f.op {
                    TextOp::Eq => format!("{} = {}", column, placeholder),
                    TextOp::Ne => format!("{} <> {}", column, placeholder),
                    TextOp::Contains => format!("instr({}, {}) > 0", column, placeholder),
                    TextOp::NotContains => format!("instr({}, {}) = 0", column, placeholder),
                    TextOp::Regex => format!("regexp({}, {})", placeholder, column),
                };
                (sql, SqlValue::Text(f.value.clone()))
            }
            FilterPredicate::Number(f) => {
                let sql_op = match f.op {
                    NumberOp::Eq => "=",
                    NumberOp::Ne => "<>",
                    NumberOp::Gt => ">",
                    NumberOp::Lt => "<",
                    NumberOp::Ge => ">=",
                    NumberOp::Le => "<=",
                };
                (
                    format!("{} {} {}", column, sql_op, placeholder),
                    f.value.to_sql(),
                )
            }
            FilterPredicate::Identifier(f) => {
                let sql_op = match f.op {
                    IdOp::Eq => "=",
                    IdOp::Ne => "<>",
                };
                (
                    format!("{} {} {}", column, sql_op, placeholder),
                    SqlValue::Text(f.value.hyphenated().to_string()),
                )
            }
            FilterPredicate::Temporal(f) => {
                let sql_op = match f.op {
                    TimeOp::At => "=",
                    TimeOp::NotAt => "<>",
                    TimeOp::After => ">",
                    TimeOp::Before => "<",
                    TimeOp::AtOrAfter => ">=",
                    TimeOp::AtOrBefore => "<=",
                };
                (
                    format!("{} {} {}", column, sql_op, placeholder),
                    SqlValue::Real(datetime_to_epoch(&f.value)),
                )
            }
        };
        QueryFragment {
            sql,
            placeholder,
            value,
        }
    }
}

use super::predicate::{FilterOperator, FilterPredicate, PlaceholderStyle};
use super::value::FilterValue;
use crate::db_operations::SqlValue;
use crate::error::{PodError, PodResult};
use crate::log_filter_debug;
use crate::schema::DataClass;
use serde_json::{Map, Value};

/// An immutable conjunction of predicates.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    predicates: Vec<FilterPredicate>,
}

impl FilterSet {
    pub fn new(predicates: Vec<FilterPredicate>) -> Self {
        Self { predicates }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterPredicate> {
        self.predicates.iter()
    }

    /// Build from a structured request, typed by the class's field declarations.
    ///
    /// Each entry is either `{"field": {"op": value, ...}}` or the shorthand
    /// `{"field": value}` meaning equality.
    pub fn from_request(request: &Map<String, Value>, class: &DataClass) -> PodResult<Self> {
        let mut predicates = Vec::new();
        for (field, condition) in request {
            let field_type = class.require_field(field)?;
            match condition {
                Value::Object(ops) => {
                    if ops.is_empty() {
                        return Err(PodError::validation(format!(
                            "Filter on '{}' names no operator",
                            field
                        )));
                    }
                    for (op, operand) in ops {
                        let op: FilterOperator = op.parse()?;
                        let value = FilterValue::from_typed(operand, field_type)?;
                        predicates.push(FilterPredicate::create(field, op, value)?);
                    }
                }
                literal => {
                    let value = FilterValue::from_typed(literal, field_type)?;
                    predicates.push(FilterPredicate::create(field, FilterOperator::Eq, value)?);
                }
            }
        }
        log_filter_debug!(
            "Built {} predicates for class '{}'",
            predicates.len(),
            class.name
        );
        Ok(Self::new(predicates))
    }

    /// Equality on every required field of the class, taken from `data`
    pub fn for_required_fields(class: &DataClass, data: &Map<String, Value>) -> PodResult<Self> {
        let mut predicates = Vec::with_capacity(class.required.len());
        for field in &class.required {
            let field_type = class.require_field(field)?;
            let value = data
                .get(field)
                .filter(|v| !v.is_null())
                .ok_or_else(|| {
                    PodError::validation(format!(
                        "Missing required field '{}' for class '{}'",
                        field, class.name
                    ))
                })?;
            let value = FilterValue::from_typed(value, field_type)?;
            predicates.push(FilterPredicate::create(field, FilterOperator::Eq, value)?);
        }
        Ok(Self::new(predicates))
    }

    /// Reject predicates on fields the class does not declare
    pub fn check_fields(&self, class: &DataClass) -> PodResult<()> {
        for predicate in &self.predicates {
            class.require_field(predicate.field())?;
        }
        Ok(())
    }

    /// In-memory evaluation; an empty set matches everything
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Render every predicate, numbering placeholders from `start_index`.
    ///
    /// Returns the individual clauses (to be ANDed by the caller) and the
    /// parameters in placeholder order.
    pub fn to_sql(&self, style: PlaceholderStyle, start_index: usize) -> (Vec<String>, Vec<SqlValue>) {
        let mut clauses = Vec::with_capacity(self.predicates.len());
        let mut params = Vec::with_capacity(self.predicates.len());
        for (offset, predicate) in self.predicates.iter().enumerate() {
            let fragment = predicate.to_query_fragment(style, start_index + offset);
            clauses.push(fragment.sql);
            params.push(fragment.value);
        }
        (clauses, params)
    }
}

impl From<Vec<FilterPredicate>> for FilterSet {
    fn from(predicates: Vec<FilterPredicate>) -> Self {
        Self::new(predicates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    fn class() -> DataClass {
        DataClass::array("posts")
            .with_required("id", FieldType::Uuid)
            .with_field("age", FieldType::Integer)
            .with_field("body", FieldType::String)
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_structured_request() {
        let set = FilterSet::from_request(
            &map(json!({"age": {"gt": 30, "le": 40}, "body": "hi"})),
            &class(),
        )
        .unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.matches(&map(json!({"age": 35, "body": "hi"}))));
        assert!(!set.matches(&map(json!({"age": 41, "body": "hi"}))));
        assert!(!set.matches(&map(json!({"age": 35}))));
    }

    #[test]
    fn test_unknown_field_and_operator_rejected() {
        assert!(FilterSet::from_request(&map(json!({"nope": 1})), &class()).is_err());
        assert!(
            FilterSet::from_request(&map(json!({"age": {"between": 1}})), &class()).is_err()
        );
        assert!(FilterSet::from_request(&map(json!({"age": {}})), &class()).is_err());
        assert!(FilterSet::from_request(&map(json!({"age": "old"})), &class()).is_err());
    }

    #[test]
    fn test_required_fields() {
        let id = "6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11";
        let set = FilterSet::for_required_fields(&class(), &map(json!({"id": id, "age": 3})))
            .unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.matches(&map(json!({"id": id}))));
        assert!(FilterSet::for_required_fields(&class(), &map(json!({"age": 3}))).is_err());
    }

    #[test]
    fn test_sql_rendering_order() {
        let set = FilterSet::from_request(&map(json!({"age": {"ge": 1}, "body": "x"})), &class())
            .unwrap();
        let (clauses, params) = set.to_sql(PlaceholderStyle::Numbered, 3);
        assert_eq!(clauses, vec!["\"age\" >= ?3", "\"body\" = ?4"]);
        assert_eq!(params, vec![SqlValue::Integer(1), SqlValue::from("x")]);
    }

    #[test]
    fn test_empty_set_matches_everything() {
        assert!(FilterSet::empty().matches(&map(json!({}))));
        assert!(FilterSet::from_request(&Map::new(), &class()).unwrap().is_empty());
    }
}

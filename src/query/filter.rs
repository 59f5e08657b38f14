use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::{get_field_value, stringify, to_number};

/// Predicate operators understood by [`MetricFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Contains,
    Between,
    /// Anything else on the wire. Always matches.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOperator {
    And,
    Or,
}

/// A single field/operator/value predicate.
///
/// `logic_operator` is carried for callers but does not change evaluation:
/// every filter in a list must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricFilter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_operator: Option<LogicOperator>,
}

impl MetricFilter {
    pub fn new(field: &str, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value: value.into(),
            logic_operator: None,
        }
    }

    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, FilterOperator::In, Value::Array(values))
    }

    pub fn contains(field: &str, needle: &str) -> Self {
        Self::new(field, FilterOperator::Contains, needle)
    }

    pub fn between(field: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(
            field,
            FilterOperator::Between,
            Value::Array(vec![low.into(), high.into()]),
        )
    }

    pub fn with_logic(mut self, logic: LogicOperator) -> Self {
        self.logic_operator = Some(logic);
        self
    }

    /// Evaluate this filter against one record.
    pub fn matches(&self, record: &Value) -> bool {
        let field = get_field_value(record, &self.field);
        match self.operator {
            FilterOperator::Eq => field.is_some_and(|v| strict_eq(v, &self.value)),
            FilterOperator::Ne => !field.is_some_and(|v| strict_eq(v, &self.value)),
            FilterOperator::Gt => compare(field, &self.value) == Some(Ordering::Greater),
            FilterOperator::Lt => compare(field, &self.value) == Some(Ordering::Less),
            FilterOperator::Gte => matches!(
                compare(field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lte => matches!(
                compare(field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::In => match (field, &self.value) {
                (Some(v), Value::Array(candidates)) => {
                    candidates.iter().any(|c| strict_eq(v, c))
                }
                _ => false,
            },
            FilterOperator::Contains => field.is_some_and(|v| {
                stringify(v)
                    .to_lowercase()
                    .contains(&stringify(&self.value).to_lowercase())
            }),
            FilterOperator::Between => match &self.value {
                Value::Array(bounds) if bounds.len() == 2 => {
                    matches!(
                        compare(field, &bounds[0]),
                        Some(Ordering::Greater | Ordering::Equal)
                    ) && matches!(
                        compare(field, &bounds[1]),
                        Some(Ordering::Less | Ordering::Equal)
                    )
                }
                _ => false,
            },
            FilterOperator::Unknown => true,
        }
    }
}

/// Keep the records for which every filter holds.
pub fn apply_filters(data: &[Value], filters: &[MetricFilter]) -> Vec<Value> {
    data.iter()
        .filter(|record| filters.iter().all(|f| f.matches(record)))
        .cloned()
        .collect()
}

/// Strict equality: same JSON type and value, numbers compared numerically.
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Relational comparison. Two strings compare lexicographically; anything
/// else is coerced to numbers. A missing field or NaN yields `None`.
pub fn compare(field: Option<&Value>, other: &Value) -> Option<Ordering> {
    let field = field?;
    if let (Value::String(a), Value::String(b)) = (field, other) {
        return Some(a.cmp(b));
    }
    let a = to_number(field)?;
    let b = to_number(other)?;
    a.partial_cmp(&b)
}

/// UI-level filter selections, converted to [`MetricFilter`]s for calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub status: Vec<String>,
    pub priority: Vec<String>,
    pub assignee: Vec<String>,
    pub site: Vec<String>,
    pub tags: Vec<String>,
    /// Extra `field -> allowed values` selections.
    pub custom: BTreeMap<String, Vec<Value>>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
            && self.priority.is_empty()
            && self.assignee.is_empty()
            && self.site.is_empty()
            && self.tags.is_empty()
            && self.custom.values().all(Vec::is_empty)
    }

    /// Every non-empty selection becomes an `in` filter; each tag becomes its
    /// own `contains` filter annotated `OR`.
    pub fn to_filters(&self) -> Vec<MetricFilter> {
        let mut filters = Vec::new();
        let named = [
            ("status", &self.status),
            ("priority", &self.priority),
            ("assigneeId", &self.assignee),
            ("siteId", &self.site),
        ];
        for (field, values) in named {
            if !values.is_empty() {
                let values = values.iter().cloned().map(Value::String).collect();
                filters.push(MetricFilter::is_in(field, values));
            }
        }
        for tag in &self.tags {
            filters.push(MetricFilter::contains("tags", tag).with_logic(LogicOperator::Or));
        }
        for (field, values) in &self.custom {
            if !values.is_empty() {
                filters.push(MetricFilter::is_in(field, values.clone()));
            }
        }
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tasks() -> Vec<Value> {
        vec![
            json!({"id": 1, "status": "completed", "priority": "high", "hours": 4, "title": "Fix Pump", "tags": ["urgent", "field"]}),
            json!({"id": 2, "status": "blocked", "priority": "low", "hours": 10, "title": "Inspect valve", "tags": ["field"]}),
            json!({"id": 3, "status": "completed", "priority": "low", "hours": 7, "title": "Replace pump seal"}),
            json!({"id": 4, "status": "todo", "priority": "medium", "site": {"region": "north"}}),
        ]
    }

    fn ids(records: &[Value]) -> Vec<i64> {
        records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_eq_and_ne() {
        let data = tasks();
        assert_eq!(ids(&apply_filters(&data, &[MetricFilter::equals("status", "completed")])), vec![1, 3]);
        let ne = MetricFilter::new("status", FilterOperator::Ne, "completed");
        assert_eq!(ids(&apply_filters(&data, &[ne])), vec![2, 4]);
    }

    #[test]
    fn test_eq_is_strict_about_types() {
        let record = json!({"count": 5});
        assert!(!MetricFilter::equals("count", "5").matches(&record));
        assert!(MetricFilter::equals("count", 5.0).matches(&record));
    }

    #[test]
    fn test_relational_operators() {
        let data = tasks();
        let gt = MetricFilter::new("hours", FilterOperator::Gt, 4);
        assert_eq!(ids(&apply_filters(&data, &[gt])), vec![2, 3]);
        let gte = MetricFilter::new("hours", FilterOperator::Gte, 4);
        assert_eq!(ids(&apply_filters(&data, &[gte])), vec![1, 2, 3]);
        let lt = MetricFilter::new("hours", FilterOperator::Lt, 7);
        assert_eq!(ids(&apply_filters(&data, &[lt])), vec![1]);
        let lte = MetricFilter::new("hours", FilterOperator::Lte, 7);
        assert_eq!(ids(&apply_filters(&data, &[lte])), vec![1, 3]);
    }

    #[test]
    fn test_relational_lexicographic_strings() {
        let record = json!({"createdAt": "2025-03-10"});
        assert!(MetricFilter::new("createdAt", FilterOperator::Gt, "2025-03-01").matches(&record));
        assert!(!MetricFilter::new("createdAt", FilterOperator::Lt, "2025-03-01").matches(&record));
    }

    #[test]
    fn test_in_operator() {
        let data = tasks();
        let f = MetricFilter::is_in("priority", vec![json!("high"), json!("medium")]);
        assert_eq!(ids(&apply_filters(&data, &[f])), vec![1, 4]);

        // Non-array value never matches
        let bad = MetricFilter::new("priority", FilterOperator::In, "high");
        assert!(apply_filters(&data, &[bad]).is_empty());
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let data = tasks();
        let f = MetricFilter::contains("title", "PUMP");
        assert_eq!(ids(&apply_filters(&data, &[f])), vec![1, 3]);
        let tag = MetricFilter::contains("tags", "urgent");
        assert_eq!(ids(&apply_filters(&data, &[tag])), vec![1]);
    }

    #[test]
    fn test_between_inclusive() {
        let data = tasks();
        let f = MetricFilter::between("hours", 4, 7);
        assert_eq!(ids(&apply_filters(&data, &[f])), vec![1, 3]);
        let malformed = MetricFilter::new("hours", FilterOperator::Between, json!([4]));
        assert!(apply_filters(&data, &[malformed]).is_empty());
    }

    #[test]
    fn test_missing_field_fails_soft() {
        let data = tasks();
        let f = MetricFilter::equals("site.region", "north");
        assert_eq!(ids(&apply_filters(&data, &[f])), vec![4]);
        let gt = MetricFilter::new("site.region.code", FilterOperator::Gt, 0);
        assert!(apply_filters(&data, &[gt]).is_empty());
    }

    #[test]
    fn test_unknown_operator_fails_open() {
        let f: MetricFilter =
            serde_json::from_value(json!({"field": "status", "operator": "regex", "value": ".*"}))
                .unwrap();
        assert_eq!(f.operator, FilterOperator::Unknown);
        assert_eq!(apply_filters(&tasks(), &[f]).len(), 4);
    }

    #[test]
    fn test_filters_are_conjunctive_even_with_or() {
        let data = tasks();
        let filters = vec![
            MetricFilter::contains("tags", "urgent").with_logic(LogicOperator::Or),
            MetricFilter::contains("tags", "field").with_logic(LogicOperator::Or),
        ];
        let kept = apply_filters(&data, &filters);
        assert_eq!(ids(&kept), vec![1]);
        for record in &kept {
            assert!(filters.iter().all(|f| f.matches(record)));
        }
    }

    #[test]
    fn test_empty_filters_keep_everything() {
        assert_eq!(apply_filters(&tasks(), &[]).len(), 4);
    }

    #[test]
    fn test_filter_state_to_filters() {
        let state = FilterState {
            status: vec!["completed".into()],
            assignee: vec!["u1".into(), "u2".into()],
            tags: vec!["urgent".into(), "field".into()],
            ..Default::default()
        };
        let filters = state.to_filters();
        assert_eq!(filters.len(), 4);
        assert_eq!(filters[0].field, "status");
        assert_eq!(filters[0].operator, FilterOperator::In);
        assert_eq!(filters[1].field, "assigneeId");
        assert_eq!(filters[1].value, json!(["u1", "u2"]));
        assert_eq!(filters[2].operator, FilterOperator::Contains);
        assert_eq!(filters[2].logic_operator, Some(LogicOperator::Or));
        assert_eq!(filters[3].value, json!("field"));
    }

    #[test]
    fn test_filter_state_empty() {
        assert!(FilterState::default().is_empty());
        assert!(FilterState::default().to_filters().is_empty());
    }

    #[test]
    fn test_filter_wire_format() {
        let f = MetricFilter::contains("tags", "x").with_logic(LogicOperator::Or);
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(
            json,
            json!({"field": "tags", "operator": "contains", "value": "x", "logicOperator": "OR"})
        );
    }
}

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::{field_number, get_field_value, stringify};
use crate::query::filter::compare;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    Sum,
    Average,
    Min,
    Max,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Reduce a numeric sequence. Every kind yields 0 for an empty input.
pub fn aggregate(values: &[f64], kind: AggregationKind) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match kind {
        AggregationKind::Sum => values.iter().sum(),
        AggregationKind::Average => values.iter().sum::<f64>() / values.len() as f64,
        AggregationKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregationKind::Count => values.len() as f64,
    }
}

/// Per-record numeric value of `field`, with missing or non-numeric as 0.
pub fn extract_numbers(data: &[Value], field: &str) -> Vec<f64> {
    data.iter().map(|r| field_number(r, field)).collect()
}

/// Bucket records by the string form of `field`; missing values go under `"unknown"`.
pub fn group_by(data: &[Value], field: &str) -> BTreeMap<String, Vec<Value>> {
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for record in data {
        let key = get_field_value(record, field)
            .map(stringify)
            .unwrap_or_else(|| "unknown".to_string());
        groups.entry(key).or_default().push(record.clone());
    }
    groups
}

/// Stable sort by `field`. Records missing the field (or incomparable) sort last.
pub fn sort_by(data: &[Value], field: &str, direction: SortDirection) -> Vec<Value> {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| {
        let va = get_field_value(a, field);
        let vb = get_field_value(b, field);
        match (va, vb) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare(Some(x), y).unwrap_or(Ordering::Equal);
                match direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            }
        }
    });
    sorted
}

/// Cross-tabulate `value_field` by row and column keys.
pub fn pivot(
    data: &[Value],
    row_field: &str,
    column_field: &str,
    value_field: &str,
    kind: AggregationKind,
) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut cells: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
    for (row, records) in group_by(data, row_field) {
        let columns = cells.entry(row).or_default();
        for (column, members) in group_by(&records, column_field) {
            columns
                .entry(column)
                .or_default()
                .extend(extract_numbers(&members, value_field));
        }
    }
    cells
        .into_iter()
        .map(|(row, columns)| {
            let reduced = columns
                .into_iter()
                .map(|(column, values)| (column, aggregate(&values, kind)))
                .collect();
            (row, reduced)
        })
        .collect()
}

/// The `n` records with the largest numeric `field`.
pub fn top_n(data: &[Value], field: &str, n: usize) -> Vec<Value> {
    let mut ranked: Vec<(f64, &Value)> = data.iter().map(|r| (field_number(r, field), r)).collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    ranked.into_iter().take(n).map(|(_, r)| r.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregate_kinds() {
        let values = [2.0, 4.0, 6.0];
        assert_eq!(aggregate(&values, AggregationKind::Sum), 12.0);
        assert_eq!(aggregate(&values, AggregationKind::Average), 4.0);
        assert_eq!(aggregate(&values, AggregationKind::Min), 2.0);
        assert_eq!(aggregate(&values, AggregationKind::Max), 6.0);
        assert_eq!(aggregate(&values, AggregationKind::Count), 3.0);
    }

    #[test]
    fn test_aggregate_empty_is_zero() {
        for kind in [
            AggregationKind::Sum,
            AggregationKind::Average,
            AggregationKind::Min,
            AggregationKind::Max,
            AggregationKind::Count,
        ] {
            assert_eq!(aggregate(&[], kind), 0.0, "{kind:?}");
        }
    }

    #[test]
    fn test_aggregate_negative_extremes() {
        assert_eq!(aggregate(&[-3.0, -1.0], AggregationKind::Max), -1.0);
        assert_eq!(aggregate(&[-3.0, -1.0], AggregationKind::Min), -3.0);
    }

    #[test]
    fn test_group_by() {
        let data = vec![
            json!({"status": "open"}),
            json!({"status": "done"}),
            json!({"status": "open"}),
            json!({"other": 1}),
        ];
        let groups = group_by(&data, "status");
        assert_eq!(groups["open"].len(), 2);
        assert_eq!(groups["done"].len(), 1);
        assert_eq!(groups["unknown"].len(), 1);
    }

    #[test]
    fn test_sort_by_missing_last() {
        let data = vec![json!({"n": 3}), json!({}), json!({"n": 1}), json!({"n": 2})];
        let asc = sort_by(&data, "n", SortDirection::Ascending);
        assert_eq!(asc[0]["n"], json!(1));
        assert_eq!(asc[2]["n"], json!(3));
        assert!(asc[3].get("n").is_none());

        let desc = sort_by(&data, "n", SortDirection::Descending);
        assert_eq!(desc[0]["n"], json!(3));
        assert!(desc[3].get("n").is_none());
    }

    #[test]
    fn test_pivot() {
        let data = vec![
            json!({"site": "A", "status": "done", "hours": 2}),
            json!({"site": "A", "status": "done", "hours": 3}),
            json!({"site": "A", "status": "open", "hours": 1}),
            json!({"site": "B", "status": "open", "hours": 4}),
        ];
        let table = pivot(&data, "site", "status", "hours", AggregationKind::Sum);
        assert_eq!(table["A"]["done"], 5.0);
        assert_eq!(table["A"]["open"], 1.0);
        assert_eq!(table["B"]["open"], 4.0);
        assert!(!table["B"].contains_key("done"));
    }

    #[test]
    fn test_top_n() {
        let data = vec![
            json!({"id": 1, "score": 10}),
            json!({"id": 2, "score": 30}),
            json!({"id": 3, "score": 20}),
        ];
        let top = top_n(&data, "score", 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0]["id"], json!(2));
        assert_eq!(top[1]["id"], json!(3));
        assert_eq!(top_n(&data, "score", 10).len(), 3);
    }

    #[test]
    fn test_extract_numbers() {
        let data = vec![json!({"h": 4}), json!({"h": "x"}), json!({})];
        assert_eq!(extract_numbers(&data, "h"), vec![4.0, 0.0, 0.0]);
    }
}

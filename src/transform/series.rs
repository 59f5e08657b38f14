use std::collections::BTreeMap;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::{field_number, get_field_value};
use crate::date_util::{month_start, parse_instant, week_start};
use crate::transform::aggregate::{aggregate, AggregationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Day,
    Week,
    Month,
}

impl Interval {
    fn bucket(&self, day: NaiveDate) -> NaiveDate {
        match self {
            Interval::Day => day,
            Interval::Week => week_start(day),
            Interval::Month => month_start(day),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    /// Bucket start (local date).
    pub date: NaiveDate,
    pub value: f64,
    pub count: usize,
}

/// Bucket records by local date of `date_field` and aggregate each bucket.
///
/// Without a `value_field` every record contributes 1, so `Sum` and `Count`
/// both count records. Undated records are skipped.
pub fn create_time_series(
    data: &[Value],
    date_field: &str,
    value_field: Option<&str>,
    interval: Interval,
    kind: AggregationKind,
) -> Vec<TimeSeriesPoint> {
    let mut buckets: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for record in data {
        let Some(at) = get_field_value(record, date_field).and_then(parse_instant) else {
            continue;
        };
        let day = interval.bucket(at.with_timezone(&Local).date_naive());
        let value = value_field.map_or(1.0, |field| field_number(record, field));
        buckets.entry(day).or_default().push(value);
    }
    buckets
        .into_iter()
        .map(|(date, values)| TimeSeriesPoint {
            date,
            value: aggregate(&values, kind),
            count: values.len(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Vec<Value> {
        vec![
            json!({"createdAt": "2025-01-06T10:00:00", "hours": 2}),
            json!({"createdAt": "2025-01-06T15:00:00", "hours": 3}),
            json!({"createdAt": "2025-01-08T09:00:00", "hours": 4}),
            json!({"createdAt": "2025-02-03T09:00:00", "hours": 1}),
            json!({"hours": 100}),
        ]
    }

    #[test]
    fn test_daily_counts() {
        let series = create_time_series(&data(), "createdAt", None, Interval::Day, AggregationKind::Count);
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());
        assert_eq!(series[0].value, 2.0);
        assert_eq!(series[1].value, 1.0);
    }

    #[test]
    fn test_weekly_sum() {
        let series = create_time_series(&data(), "createdAt", Some("hours"), Interval::Week, AggregationKind::Sum);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());
        assert_eq!(series[0].value, 9.0);
        assert_eq!(series[0].count, 3);
        assert_eq!(series[1].date, NaiveDate::from_ymd_opt(2025, 2, 3).unwrap());
    }

    #[test]
    fn test_monthly_average() {
        let series = create_time_series(&data(), "createdAt", Some("hours"), Interval::Month, AggregationKind::Average);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(series[0].value, 3.0);
        assert_eq!(series[1].value, 1.0);
    }
}

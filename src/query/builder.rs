use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::query::filter::{apply_filters, MetricFilter};
use crate::query::period::{filter_by_time_range_at, filter_preceding, CustomRange, TimeRange};

/// Filters and time window that parameterize one metric calculation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricQuery {
    filters: Vec<MetricFilter>,
    time_range: Option<TimeRange>,
    custom_range: Option<CustomRange>,
    as_of: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheKeyParts<'a> {
    filters: &'a [MetricFilter],
    time_range: Option<TimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_range: Option<&'a CustomRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_of: Option<DateTime<Utc>>,
}

impl MetricQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: MetricFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = MetricFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn maybe_time_range(mut self, range: Option<TimeRange>) -> Self {
        self.time_range = range;
        self
    }

    /// Explicit window; also sets the range to [`TimeRange::Custom`].
    pub fn custom_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange::Custom);
        self.custom_range = Some(CustomRange::new(start, end));
        self
    }

    /// Pin "now" for relative windows. Defaults to the wall clock.
    pub fn as_of(mut self, now: DateTime<Utc>) -> Self {
        self.as_of = Some(now);
        self
    }

    pub fn get_filters(&self) -> &[MetricFilter] {
        &self.filters
    }

    pub fn get_time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    pub fn get_custom_range(&self) -> Option<&CustomRange> {
        self.custom_range.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }

    /// Apply the filters, then the time window on `date_field`.
    pub fn select(&self, data: &[Value], date_field: &str) -> Vec<Value> {
        let filtered = apply_filters(data, &self.filters);
        match self.time_range {
            Some(range) => filter_by_time_range_at(
                &filtered,
                range,
                self.custom_range.as_ref(),
                date_field,
                self.now(),
            ),
            None => filtered,
        }
    }

    /// Apply the filters, then restrict to the window preceding the current one.
    /// It stops just before the current window's first local day.
    ///
    /// `None` when there is no resolvable window to compare against.
    pub fn select_previous(&self, data: &[Value], date_field: &str) -> Option<Vec<Value>> {
        let range = self.time_range?;
        let previous = range.previous_window_at(self.now(), self.custom_range.as_ref())?;
        let filtered = apply_filters(data, &self.filters);
        Some(filter_preceding(&filtered, previous.start, previous.end, date_field))
    }

    /// Length of the active window in days, if any.
    pub fn window_days(&self) -> Option<f64> {
        self.time_range?
            .window_days_at(self.now(), self.custom_range.as_ref())
    }

    /// `metric:{id}:{json}` where the JSON holds the filters and time range,
    /// plus the custom window and pinned "now" when they are set.
    ///
    /// Key order inside filter values follows `serde_json`'s map ordering, so
    /// equal filter lists always produce the same key.
    pub fn cache_key(&self, metric_id: &str) -> String {
        let parts = CacheKeyParts {
            filters: &self.filters,
            time_range: self.time_range,
            custom_range: self.custom_range.as_ref(),
            as_of: self.as_of,
        };
        let json = serde_json::to_string(&parts).unwrap_or_default();
        format!("metric:{metric_id}:{json}")
    }
}

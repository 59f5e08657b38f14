use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::get_field_value;
use crate::date_util::{end_of_day, parse_instant, start_of_day, start_of_year};
use crate::error::{Error, Result};

pub const DEFAULT_DATE_FIELD: &str = "createdAt";

/// A named or explicit window used to restrict records by date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "90d")]
    Last90Days,
    #[serde(rename = "ytd")]
    YearToDate,
    /// Requires a [`CustomRange`] alongside it.
    #[serde(rename = "custom")]
    Custom,
    /// Any other value: no windowing is applied.
    #[serde(rename = "all")]
    #[serde(other)]
    AllTime,
}

/// Explicit `[start, end]` instants for [`TimeRange::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CustomRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

impl TimeRange {
    /// Parse a range string.
    ///
    /// Supported formats: `7d`, `30d`, `90d`, `ytd`, `custom`, `all`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "7d" => Ok(TimeRange::Last7Days),
            "30d" => Ok(TimeRange::Last30Days),
            "90d" => Ok(TimeRange::Last90Days),
            "ytd" => Ok(TimeRange::YearToDate),
            "custom" => Ok(TimeRange::Custom),
            "all" => Ok(TimeRange::AllTime),
            other => Err(Error::Config(format!("unrecognized time range: {other}"))),
        }
    }

    pub fn to_key(&self) -> &'static str {
        match self {
            TimeRange::Last7Days => "7d",
            TimeRange::Last30Days => "30d",
            TimeRange::Last90Days => "90d",
            TimeRange::YearToDate => "ytd",
            TimeRange::Custom => "custom",
            TimeRange::AllTime => "all",
        }
    }

    /// Resolve the `[start, end]` instants for this range as of `now`.
    ///
    /// Returns `None` when no windowing applies (`AllTime`, or `Custom`
    /// without an explicit range).
    pub fn resolve_at(
        &self,
        now: DateTime<Utc>,
        custom: Option<&CustomRange>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            TimeRange::Last7Days => Some((now - Duration::days(7), now)),
            TimeRange::Last30Days => Some((now - Duration::days(30), now)),
            TimeRange::Last90Days => Some((now - Duration::days(90), now)),
            TimeRange::YearToDate => Some((start_of_year(now), now)),
            TimeRange::Custom => custom.map(|r| (r.start, r.end)),
            TimeRange::AllTime => None,
        }
    }

    pub fn resolve(&self, custom: Option<&CustomRange>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.resolve_at(Utc::now(), custom)
    }

    /// The window of the same length that ends where this one starts.
    ///
    /// Select its records with [`filter_preceding`] so the boundary day is
    /// counted only in the current window.
    pub fn previous_window_at(
        &self,
        now: DateTime<Utc>,
        custom: Option<&CustomRange>,
    ) -> Option<CustomRange> {
        let (start, end) = self.resolve_at(now, custom)?;
        let length = end - start;
        let previous_start = start
            .checked_sub_signed(length)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Some(CustomRange::new(previous_start, start))
    }

    /// Length of the resolved window in days, at least one.
    pub fn window_days_at(&self, now: DateTime<Utc>, custom: Option<&CustomRange>) -> Option<f64> {
        let (start, end) = self.resolve_at(now, custom)?;
        let days = (end - start).num_milliseconds() as f64 / 86_400_000.0;
        Some(days.max(1.0))
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

/// Keep records whose `date_field` falls inside the resolved window,
/// widened to whole local days.
pub fn filter_by_time_range(
    data: &[Value],
    range: TimeRange,
    custom: Option<&CustomRange>,
    date_field: &str,
) -> Vec<Value> {
    filter_by_time_range_at(data, range, custom, date_field, Utc::now())
}

pub fn filter_by_time_range_at(
    data: &[Value],
    range: TimeRange,
    custom: Option<&CustomRange>,
    date_field: &str,
    now: DateTime<Utc>,
) -> Vec<Value> {
    let Some((start, end)) = range.resolve_at(now, custom) else {
        if range == TimeRange::Custom {
            log::warn!("custom time range requested without start/end; returning data unfiltered");
        }
        return data.to_vec();
    };
    filter_between(data, start, end, date_field)
}

/// Keep records dated within `[start_of_day(start), end_of_day(end)]`.
/// Records without a parsable date are dropped.
pub fn filter_between(
    data: &[Value],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    date_field: &str,
) -> Vec<Value> {
    let lower = start_of_day(start);
    let upper = end_of_day(end);
    data.iter()
        .filter(|record| {
            get_field_value(record, date_field)
                .and_then(parse_instant)
                .is_some_and(|at| at >= lower && at <= upper)
        })
        .cloned()
        .collect()
}

/// Keep records dated within `[start_of_day(start), start_of_day(end))`.
///
/// The upper bound is the lower bound [`filter_between`] uses for a window
/// starting at `end`, so the two selections never share a record.
pub fn filter_preceding(
    data: &[Value],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    date_field: &str,
) -> Vec<Value> {
    let lower = start_of_day(start);
    let upper = start_of_day(end);
    data.iter()
        .filter(|record| {
            get_field_value(record, date_field)
                .and_then(parse_instant)
                .is_some_and(|at| at >= lower && at < upper)
        })
        .cloned()
        .collect()
}

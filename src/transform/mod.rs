//! Pure data-transformation helpers shared by the metric calculators.
//!
//! Everything here is a total function over its inputs: no hidden state,
//! safe to call from any thread.

pub mod aggregate;
pub mod series;
pub mod stats;

pub use aggregate::{
    aggregate, extract_numbers, group_by, pivot, sort_by, top_n, AggregationKind, SortDirection,
};
pub use series::{create_time_series, Interval, TimeSeriesPoint};
pub use stats::{
    calculate_percentage, calculate_trend, detect_outliers, moving_average, normalize, round1,
};

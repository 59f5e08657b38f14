pub mod builder;
pub mod filter;
pub mod period;

pub use builder::MetricQuery;
pub use filter::{apply_filters, FilterOperator, FilterState, LogicOperator, MetricFilter};
pub use period::{filter_by_time_range, CustomRange, TimeRange, DEFAULT_DATE_FIELD};

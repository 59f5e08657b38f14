use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::{DataSource, Dataset};
use crate::error::{Error, Result};
use crate::query::filter::apply_filters;
use crate::query::{CustomRange, MetricFilter, MetricQuery, TimeRange, DEFAULT_DATE_FIELD};
use crate::transform::{aggregate, calculate_percentage, extract_numbers, round1, AggregationKind};

use super::formula::{evaluate_formula, Formula};
use super::{metric_value, MetricValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationType {
    Count,
    Sum,
    Average,
    Min,
    Max,
    Percentage,
    Formula,
}

impl CalculationType {
    fn aggregation(&self) -> Option<AggregationKind> {
        match self {
            CalculationType::Sum => Some(AggregationKind::Sum),
            CalculationType::Average => Some(AggregationKind::Average),
            CalculationType::Min => Some(AggregationKind::Min),
            CalculationType::Max => Some(AggregationKind::Max),
            _ => None,
        }
    }
}

/// A user-authored metric run through the pipeline instead of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMetric {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub data_source: DataSource,
    pub calculation_type: CalculationType,
    /// Aggregation target for sum/average/min/max.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default)]
    pub filters: Vec<MetricFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_range: Option<CustomRange>,
    /// Date field for the time range; `createdAt` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_field: Option<String>,
    /// Numerator selection for `percentage`, applied on top of `filters`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub numerator_filters: Vec<MetricFilter>,
}

impl CustomMetric {
    pub fn builder(
        id: &str,
        name: &str,
        data_source: DataSource,
        calculation_type: CalculationType,
    ) -> CustomMetricBuilder {
        CustomMetricBuilder {
            metric: CustomMetric {
                id: id.to_string(),
                name: name.to_string(),
                description: String::new(),
                data_source,
                calculation_type,
                field: None,
                formula: None,
                filters: Vec::new(),
                time_range: None,
                custom_range: None,
                date_field: None,
                numerator_filters: Vec::new(),
            },
        }
    }

    /// Load and validate a definition from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let metric: CustomMetric = serde_json::from_str(&text)?;
        metric.validate()?;
        Ok(metric)
    }

    /// Check that the definition carries what its calculation type needs.
    pub fn validate(&self) -> Result<()> {
        if self.calculation_type.aggregation().is_some() && self.field.is_none() {
            return Err(Error::InvalidMetric(format!(
                "{}: {:?} requires a field",
                self.id, self.calculation_type
            )));
        }
        if self.calculation_type == CalculationType::Formula {
            let source = self.formula.as_deref().ok_or_else(|| {
                Error::InvalidMetric(format!("{}: formula metric has no formula", self.id))
            })?;
            Formula::parse(source)?;
        }
        Ok(())
    }

    pub fn query(&self) -> MetricQuery {
        let query = MetricQuery::new()
            .filters(self.filters.iter().cloned())
            .maybe_time_range(self.time_range);
        match self.custom_range {
            Some(range) => query.custom_range(range.start, range.end),
            None => query,
        }
    }

    pub fn calculate(&self, data: &Dataset) -> Result<MetricValue> {
        self.calculate_query(data, &self.query())
    }

    /// As [`calculate`](Self::calculate) with relative windows pinned to `now`.
    pub fn calculate_at(&self, data: &Dataset, now: DateTime<Utc>) -> Result<MetricValue> {
        self.calculate_query(data, &self.query().as_of(now))
    }

    fn calculate_query(&self, data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
        let date_field = self.date_field.as_deref().unwrap_or(DEFAULT_DATE_FIELD);
        let records = query.select(data.slice(self.data_source), date_field);
        let value = match self.calculation_type {
            CalculationType::Count => records.len() as f64,
            CalculationType::Percentage => self.percentage(&records),
            CalculationType::Formula => {
                let source = self.formula.as_deref().ok_or_else(|| {
                    Error::calculation(&self.id, "formula metric has no formula")
                })?;
                evaluate_formula(source, &records)
            }
            kind => {
                let field = self.field.as_deref().ok_or_else(|| {
                    Error::calculation(&self.id, format!("{kind:?} requires a field"))
                })?;
                let aggregation = kind.aggregation().unwrap_or(AggregationKind::Count);
                aggregate(&extract_numbers(&records, field), aggregation)
            }
        };
        Ok(metric_value(value, self.name.clone(), None))
    }

    fn percentage(&self, records: &[Value]) -> f64 {
        if self.numerator_filters.is_empty() {
            return if records.is_empty() { 0.0 } else { 100.0 };
        }
        let matched = apply_filters(records, &self.numerator_filters).len();
        round1(calculate_percentage(matched as f64, records.len() as f64))
    }
}

/// Builder for [`CustomMetric`]; `build` validates the result.
#[derive(Debug, Clone)]
pub struct CustomMetricBuilder {
    metric: CustomMetric,
}

impl CustomMetricBuilder {
    pub fn description(mut self, description: &str) -> Self {
        self.metric.description = description.to_string();
        self
    }

    pub fn field(mut self, field: &str) -> Self {
        self.metric.field = Some(field.to_string());
        self
    }

    pub fn formula(mut self, formula: &str) -> Self {
        self.metric.formula = Some(formula.to_string());
        self
    }

    pub fn filter(mut self, filter: MetricFilter) -> Self {
        self.metric.filters.push(filter);
        self
    }

    pub fn numerator_filter(mut self, filter: MetricFilter) -> Self {
        self.metric.numerator_filters.push(filter);
        self
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.metric.time_range = Some(range);
        self
    }

    pub fn custom_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.metric.time_range = Some(TimeRange::Custom);
        self.metric.custom_range = Some(CustomRange::new(start, end));
        self
    }

    pub fn date_field(mut self, field: &str) -> Self {
        self.metric.date_field = Some(field.to_string());
        self
    }

    pub fn build(self) -> Result<CustomMetric> {
        self.metric.validate()?;
        Ok(self.metric)
    }
}

/// Run a custom metric over `data`. Errors are returned, not logged.
pub fn calculate_custom_metric(metric: &CustomMetric, data: &Dataset) -> Result<MetricValue> {
    metric.calculate(data)
}

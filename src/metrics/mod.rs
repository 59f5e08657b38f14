pub mod builtin;
pub mod custom;
pub mod formula;
pub mod types;

pub use types::*;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use serde::Serialize;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::query::MetricQuery;
use crate::transform::calculate_trend;

/// A pure calculator: dataset snapshot plus query in, one value out.
pub type Calculator = fn(&Dataset, &MetricQuery) -> Result<MetricValue>;

/// A registered metric: identity, presentation metadata, and its calculator.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: MetricCategory,
    pub format: MetricFormat,
    pub unit: Option<String>,
    pub target: Option<f64>,
    pub chart_type: ChartType,
    #[serde(skip)]
    pub calculator: Calculator,
}

impl std::fmt::Debug for MetricDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl MetricDefinition {
    pub fn calculate(&self, data: &Dataset, query: &MetricQuery) -> Result<MetricValue> {
        (self.calculator)(data, query)
    }
}

/// Lookup table of metric definitions, kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    definitions: Vec<MetricDefinition>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed table of built-in dashboard metrics.
    pub fn builtin() -> Self {
        builtin::definitions()
            .into_iter()
            .fold(Self::new(), |registry, def| registry.register(def))
    }

    /// Add a definition, replacing any existing one with the same id.
    pub fn register(mut self, definition: MetricDefinition) -> Self {
        match self.definitions.iter_mut().find(|d| d.id == definition.id) {
            Some(existing) => *existing = definition,
            None => self.definitions.push(definition),
        }
        self
    }

    pub fn get_metric(&self, id: &str) -> Option<&MetricDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn get_metrics_by_category(&self, category: MetricCategory) -> Vec<&MetricDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.category == category)
            .collect()
    }

    pub fn grouped_by_category(&self) -> BTreeMap<MetricCategory, Vec<&MetricDefinition>> {
        let mut groups: BTreeMap<MetricCategory, Vec<&MetricDefinition>> = BTreeMap::new();
        for def in &self.definitions {
            groups.entry(def.category).or_default().push(def);
        }
        groups
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    pub fn ids(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

static BUILTIN_REGISTRY: LazyLock<Arc<MetricRegistry>> =
    LazyLock::new(|| Arc::new(MetricRegistry::builtin()));

/// Shared, immutable built-in registry.
pub fn registry() -> Arc<MetricRegistry> {
    Arc::clone(&BUILTIN_REGISTRY)
}

/// Wrap a computed value. A trend is attached only when `previous`
/// (value and comparison label) is supplied.
pub fn metric_value(
    value: impl Into<MetricScalar>,
    label: impl Into<String>,
    previous: Option<(f64, &str)>,
) -> MetricValue {
    let value = value.into();
    let trend = match (value.as_f64(), previous) {
        (Some(current), Some((prev, period))) => {
            let (direction, percentage) = calculate_trend(current, prev);
            Some(Trend {
                direction,
                percentage,
                comparison_period: period.to_string(),
            })
        }
        _ => None,
    };
    MetricValue {
        value,
        label: label.into(),
        trend,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

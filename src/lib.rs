pub mod cache;
pub mod config;
pub mod dataset;
pub mod date_util;
pub mod error;
pub mod metrics;
pub mod query;
pub mod transform;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use cache::{CacheConfig, CacheManager, CacheStats};
pub use config::EngineConfig;
pub use dataset::{DataSource, Dataset};
pub use error::{Error, Result};
pub use metrics::custom::{CalculationType, CustomMetric, CustomMetricBuilder};
pub use metrics::formula::{evaluate_formula, Formula, FormulaError};
pub use metrics::{
    MetricCategory, MetricDefinition, MetricRegistry, MetricScalar, MetricValue, Trend,
    TrendDirection,
};
pub use query::{FilterState, MetricFilter, MetricQuery, TimeRange};

const DEFAULT_METRIC_TTL: Duration = Duration::from_secs(5 * 60);

/// Main entry point: resolves metrics through the registry, memoized in the cache.
pub struct AnalyticsEngine {
    registry: Arc<MetricRegistry>,
    cache: Arc<CacheManager<MetricValue>>,
    metric_ttl: Duration,
}

impl AnalyticsEngine {
    pub fn new(registry: Arc<MetricRegistry>, cache: Arc<CacheManager<MetricValue>>) -> Self {
        Self {
            registry,
            cache,
            metric_ttl: DEFAULT_METRIC_TTL,
        }
    }

    /// Built-in registry with a fresh cache sized by `config`.
    pub fn with_config(config: &EngineConfig) -> Self {
        Self::new(
            metrics::registry(),
            Arc::new(CacheManager::new(config.cache.clone())),
        )
        .with_metric_ttl(config.metric_ttl())
    }

    pub fn with_metric_ttl(mut self, ttl: Duration) -> Self {
        self.metric_ttl = ttl;
        self
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheManager<MetricValue>> {
        &self.cache
    }

    pub fn metric_definition(&self, id: &str) -> Result<&MetricDefinition> {
        self.registry
            .get_metric(id)
            .ok_or_else(|| Error::UnknownMetric(id.to_string()))
    }

    // ── Calculation ────────────────────────────────────────────────

    /// Compute one metric, serving from the cache when a fresh value exists.
    ///
    /// Unknown ids and calculator failures are logged and yield `None`.
    pub fn calculate_metric(
        &self,
        id: &str,
        data: &Dataset,
        query: &MetricQuery,
    ) -> Option<MetricValue> {
        let key = query.cache_key(id);
        if let Some(hit) = self.cache.get(&key) {
            log::trace!("Cache hit for {key}");
            return Some(hit);
        }
        let definition = match self.metric_definition(id) {
            Ok(definition) => definition,
            Err(e) => {
                log::warn!("{e}");
                return None;
            }
        };
        match definition.calculate(data, query) {
            Ok(value) => {
                self.cache.set_with_ttl(key, value.clone(), self.metric_ttl);
                Some(value)
            }
            Err(e) => {
                log::error!("Failed to calculate {id}: {e}");
                None
            }
        }
    }

    /// Compute several metrics with UI-level filters. Ids yielding `None` are skipped.
    pub fn calculate_metrics<S: AsRef<str>>(
        &self,
        ids: &[S],
        data: &Dataset,
        filters: Option<&FilterState>,
        time_range: Option<TimeRange>,
    ) -> BTreeMap<String, MetricValue> {
        let query = MetricQuery::new()
            .filters(filters.map(FilterState::to_filters).unwrap_or_default())
            .maybe_time_range(time_range);
        self.calculate_metrics_with(ids, data, &query)
    }

    /// Compute several metrics sharing one query.
    pub fn calculate_metrics_with<S: AsRef<str>>(
        &self,
        ids: &[S],
        data: &Dataset,
        query: &MetricQuery,
    ) -> BTreeMap<String, MetricValue> {
        ids.iter()
            .filter_map(|id| {
                let id = id.as_ref();
                self.calculate_metric(id, data, query)
                    .map(|value| (id.to_string(), value))
            })
            .collect()
    }

    /// Run a user-authored metric. Not cached. Failures are logged and yield `None`.
    pub fn calculate_custom_metric(
        &self,
        metric: &CustomMetric,
        data: &Dataset,
    ) -> Option<MetricValue> {
        match metrics::custom::calculate_custom_metric(metric, data) {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("Failed to calculate custom metric {}: {e}", metric.id);
                None
            }
        }
    }

    // ── Cache control ──────────────────────────────────────────────

    /// Drop cached values for one metric, or for every metric. Returns the count removed.
    pub fn invalidate_metric_cache(&self, id: Option<&str>) -> usize {
        let pattern = match id {
            Some(id) => format!("^metric:{}:", regex::escape(id)),
            None => "^metric:".to_string(),
        };
        match self.cache.invalidate_matching(&pattern) {
            Ok(removed) => removed,
            Err(e) => {
                log::error!("Cache invalidation failed: {e}");
                0
            }
        }
    }

    /// Invalidate everything, then recompute every registered metric unfiltered.
    pub fn refresh_all_metrics(&self, data: &Dataset) -> BTreeMap<String, MetricValue> {
        let removed = self.invalidate_metric_cache(None);
        log::info!("Refreshing all metrics ({removed} cached values dropped)");
        let ids = self.registry.ids();
        self.calculate_metrics_with(&ids, data, &MetricQuery::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{metric_value, ChartType, MetricFormat};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting(data: &Dataset, _query: &MetricQuery) -> Result<MetricValue> {
        CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(metric_value(data.tasks.len() as f64, "tasks", None))
    }

    fn failing(_data: &Dataset, _query: &MetricQuery) -> Result<MetricValue> {
        Err(Error::calculation("failing", "boom"))
    }

    fn definition(id: &str, calculator: metrics::Calculator) -> MetricDefinition {
        MetricDefinition {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            category: MetricCategory::Performance,
            format: MetricFormat::Number,
            unit: None,
            target: None,
            chart_type: ChartType::Number,
            calculator,
        }
    }

    fn engine_with(registry: MetricRegistry) -> AnalyticsEngine {
        AnalyticsEngine::new(
            Arc::new(registry),
            Arc::new(CacheManager::new(CacheConfig::default())),
        )
    }

    fn sample() -> Dataset {
        let mut data = Dataset::new();
        for i in 0..10 {
            let status = if i < 6 { "completed" } else { "todo" };
            data.tasks.push(json!({"id": i, "status": status, "assigneeId": format!("u{}", i % 2)}));
        }
        data
    }

    #[test]
    fn test_cached_calculation_is_idempotent() {
        let engine = engine_with(MetricRegistry::new().register(definition("counting", counting)));
        let data = sample();
        let query = MetricQuery::new();
        let before = CALLS.load(Ordering::SeqCst);
        let first = engine.calculate_metric("counting", &data, &query).unwrap();
        let second = engine.calculate_metric("counting", &data, &query).unwrap();
        assert_eq!(first, second);
        assert_eq!(CALLS.load(Ordering::SeqCst) - before, 1);

        // A different query is a different cache key
        let filtered = MetricQuery::new().filter(MetricFilter::equals("status", "todo"));
        engine.calculate_metric("counting", &data, &filtered).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst) - before, 2);
        assert_eq!(engine.cache().len(), 2);
    }

    #[test]
    fn test_unknown_metric_is_none() {
        let engine = AnalyticsEngine::with_config(&EngineConfig::default());
        assert!(engine.calculate_metric("nope", &sample(), &MetricQuery::new()).is_none());
        assert!(matches!(engine.metric_definition("nope"), Err(Error::UnknownMetric(_))));
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_calculator_failure_is_none_and_not_cached() {
        let engine = engine_with(MetricRegistry::new().register(definition("failing", failing)));
        assert!(engine.calculate_metric("failing", &sample(), &MetricQuery::new()).is_none());
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_completion_rate_through_engine() {
        let engine = AnalyticsEngine::with_config(&EngineConfig::default());
        let value = engine
            .calculate_metric("completion_rate", &sample(), &MetricQuery::new())
            .unwrap();
        assert_eq!(value.value, MetricScalar::Number(60.0));
        assert_eq!(value.label, "6/10 tasks completed");
        assert!(engine
            .cache()
            .contains_key(r#"metric:completion_rate:{"filters":[],"timeRange":null}"#));
    }

    #[test]
    fn test_extreme_due_date_through_engine() {
        let engine = AnalyticsEngine::with_config(&EngineConfig::default());
        let mut data = Dataset::new();
        data.tasks.push(json!({
            "status": "completed",
            "completedAt": "2025-01-10T12:00:00Z",
            "dueDate": 8_210_266_876_799_999i64,
        }));
        let value = engine
            .calculate_metric("on_time_delivery", &data, &MetricQuery::new())
            .unwrap();
        assert_eq!(value.value, MetricScalar::Number(100.0));
    }

    #[test]
    fn test_calculate_metrics_with_filter_state() {
        let engine = AnalyticsEngine::with_config(&EngineConfig::default());
        let filters = FilterState {
            assignee: vec!["u0".into()],
            ..Default::default()
        };
        let results = engine.calculate_metrics(
            &["completion_rate", "blocked_tasks", "unknown_metric"],
            &sample(),
            Some(&filters),
            None,
        );
        assert_eq!(results.len(), 2);
        assert!(!results.contains_key("unknown_metric"));
        // u0 owns ids 0,2,4,6,8: three completed
        assert_eq!(results["completion_rate"].label, "3/5 tasks completed");
    }

    #[test]
    fn test_invalidate_metric_cache() {
        let engine = AnalyticsEngine::with_config(&EngineConfig::default());
        let data = sample();
        let week = MetricQuery::new().time_range(TimeRange::Last7Days);
        engine.calculate_metric("completion_rate", &data, &MetricQuery::new());
        engine.calculate_metric("completion_rate", &data, &week);
        engine.calculate_metric("blocked_tasks", &data, &MetricQuery::new());
        engine.cache().set("unrelated", metric_value(1.0, "x", None));

        assert_eq!(engine.invalidate_metric_cache(Some("completion_rate")), 2);
        assert_eq!(engine.invalidate_metric_cache(Some("completion_rate")), 0);
        assert_eq!(engine.invalidate_metric_cache(None), 1);
        assert_eq!(engine.cache().keys(), vec!["unrelated"]);
    }

    #[test]
    fn test_refresh_all_metrics() {
        let engine = AnalyticsEngine::with_config(&EngineConfig::default());
        let data = sample();
        let results = engine.refresh_all_metrics(&data);
        assert_eq!(results.len(), engine.registry().len());
        assert_eq!(engine.cache().len(), engine.registry().len());
        assert_eq!(results["completion_rate"].value, MetricScalar::Number(60.0));
    }

    #[test]
    fn test_custom_metric_failure_is_none() {
        let engine = AnalyticsEngine::with_config(&EngineConfig::default());
        let mut metric = CustomMetric::builder("c", "Count", DataSource::Tasks, CalculationType::Count)
            .build()
            .unwrap();
        assert_eq!(
            engine.calculate_custom_metric(&metric, &sample()).unwrap().value,
            MetricScalar::Number(10.0)
        );
        metric.calculation_type = CalculationType::Sum;
        assert!(engine.calculate_custom_metric(&metric, &sample()).is_none());
    }
}

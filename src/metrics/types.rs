use serde::{Deserialize, Serialize};

/// A metric's displayable value: numeric, or a text placeholder such as `"N/A"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricScalar {
    Number(f64),
    Text(String),
}

impl MetricScalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricScalar::Number(n) => Some(*n),
            MetricScalar::Text(_) => None,
        }
    }
}

impl From<f64> for MetricScalar {
    fn from(n: f64) -> Self {
        MetricScalar::Number(n)
    }
}

impl From<&str> for MetricScalar {
    fn from(s: &str) -> Self {
        MetricScalar::Text(s.to_string())
    }
}

impl std::fmt::Display for MetricScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricScalar::Number(n) => write!(f, "{n}"),
            MetricScalar::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

/// Change against the previous period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub direction: TrendDirection,
    /// Absolute relative change, always >= 0.
    pub percentage: f64,
    pub comparison_period: String,
}

/// Result of one metric calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: MetricScalar,
    pub label: String,
    /// Present only when a previous-period value was computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    /// RFC 3339 computation time.
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    Performance,
    Operations,
    Compliance,
    Financial,
    Team,
    Resources,
}

impl MetricCategory {
    pub const ALL: [MetricCategory; 6] = [
        MetricCategory::Performance,
        MetricCategory::Operations,
        MetricCategory::Compliance,
        MetricCategory::Financial,
        MetricCategory::Team,
        MetricCategory::Resources,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::Performance => "performance",
            MetricCategory::Operations => "operations",
            MetricCategory::Compliance => "compliance",
            MetricCategory::Financial => "financial",
            MetricCategory::Team => "team",
            MetricCategory::Resources => "resources",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFormat {
    Percentage,
    Number,
    Currency,
    Duration,
}

/// Default visualization hint for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Gauge,
    Area,
    Number,
}

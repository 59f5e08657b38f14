use thiserror::Error;

use crate::metrics::formula::FormulaError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Calculation error for {metric_id}: {message}")]
    Calculation { metric_id: String, message: String },

    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),

    #[error("Invalid invalidation pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid metric definition: {0}")]
    InvalidMetric(String),
}

impl Error {
    pub(crate) fn calculation(metric_id: &str, message: impl Into<String>) -> Self {
        Error::Calculation {
            metric_id: metric_id.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

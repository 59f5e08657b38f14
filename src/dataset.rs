use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// The five entity kinds a dataset snapshot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Tasks,
    Sites,
    Users,
    Resources,
    Documents,
}

impl DataSource {
    pub const ALL: [DataSource; 5] = [
        DataSource::Tasks,
        DataSource::Sites,
        DataSource::Users,
        DataSource::Resources,
        DataSource::Documents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Tasks => "tasks",
            DataSource::Sites => "sites",
            DataSource::Users => "users",
            DataSource::Resources => "resources",
            DataSource::Documents => "documents",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of the dashboard's entities, supplied fresh per call.
///
/// Records are loosely typed JSON objects; calculators read only the fields
/// they need and treat anything missing as falsy or zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub tasks: Vec<Value>,
    pub sites: Vec<Value>,
    pub users: Vec<Value>,
    pub resources: Vec<Value>,
    pub documents: Vec<Value>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot from a JSON file with any subset of the five arrays.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn slice(&self, source: DataSource) -> &[Value] {
        match source {
            DataSource::Tasks => &self.tasks,
            DataSource::Sites => &self.sites,
            DataSource::Users => &self.users,
            DataSource::Resources => &self.resources,
            DataSource::Documents => &self.documents,
        }
    }
}

/// Resolve a dot-separated path such as `site.location.region`.
///
/// Returns `None` as soon as any intermediate key is missing or is not an object.
pub fn get_field_value<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, key| current.as_object()?.get(key))
}

/// `Number(x) || 0` coercion for numeric fields.
pub fn field_number(record: &Value, path: &str) -> f64 {
    get_field_value(record, path)
        .and_then(to_number)
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

pub fn field_str<'a>(record: &'a Value, path: &str) -> Option<&'a str> {
    get_field_value(record, path).and_then(Value::as_str)
}

/// Numeric coercion for a JSON value. `None` stands in for NaN.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Some(0.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// String form used by `contains` matching and grouping keys.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

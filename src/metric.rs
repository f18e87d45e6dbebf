//! Metric samples produced by probes
//!
//! A [`Metric`] is what probes emit and what flows through the metric
//! channel. [`MetricValue`] is the JSON shape the backend accepts for host
//! metrics (`hostId`, `name`, `time` in epoch seconds, `value`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One measurement for one host at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub host_id: String,
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(host_id: impl Into<String>, name: impl Into<String>, value: f64) -> Self {
        Self::at(host_id, name, value, Utc::now())
    }

    pub fn at(
        host_id: impl Into<String>,
        name: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            host_id: host_id.into(),
            name: name.into(),
            value,
            timestamp,
        }
    }

    /// Convert into the backend wire representation
    pub fn to_wire(&self) -> MetricValue {
        MetricValue {
            host_id: self.host_id.clone(),
            name: self.name.clone(),
            time: self.timestamp.timestamp(),
            value: self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub host_id: String,
    pub name: String,
    pub time: i64,
    pub value: f64,
}

/// Convert a boolean check result into the 1/0 convention used by check metrics
pub fn check_value(ok: bool) -> f64 {
    if ok { 1.0 } else { 0.0 }
}

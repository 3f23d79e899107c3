//! Telemetry samples and query results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::directory::ControllerId;

/// Longest accepted metric name, in characters.
pub const MAX_METRIC_LEN: usize = 50;

/// Why a sample was refused.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SampleError {
    #[error("metric name is empty")]
    EmptyMetric,

    #[error("metric name exceeds 50 characters: {0}")]
    MetricTooLong(usize),

    #[error("value is not a finite number: {0}")]
    NonFiniteValue(f64),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A single sensor reading from a controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySample {
    /// Internal controller id
    pub controller_id: ControllerId,
    pub metric: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    /// Device-reported measurement time
    pub timestamp: DateTime<Utc>,
    /// When the gateway received the message
    pub received_at: DateTime<Utc>,
}

impl TelemetrySample {
    /// Create a sample stamped with the current time.
    pub fn new(controller_id: impl Into<String>, metric: impl Into<String>, value: f64) -> Self {
        let now = Utc::now();
        Self {
            controller_id: controller_id.into(),
            metric: metric.into(),
            value,
            unit: None,
            timestamp: now,
            received_at: now,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    /// Check the invariants a sample must satisfy before buffering.
    pub fn validate(&self) -> Result<(), SampleError> {
        if self.metric.trim().is_empty() {
            return Err(SampleError::EmptyMetric);
        }
        let len = self.metric.chars().count();
        if len > MAX_METRIC_LEN {
            return Err(SampleError::MetricTooLong(len));
        }
        if !self.value.is_finite() {
            return Err(SampleError::NonFiniteValue(self.value));
        }
        Ok(())
    }
}

/// Outcome of an unordered bulk insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkInsertReport {
    /// Records written
    pub inserted: usize,
    /// Index into the submitted batch and the failure reason
    pub failures: Vec<(usize, String)>,
}

impl BulkInsertReport {
    pub fn all(inserted: usize) -> Self {
        Self {
            inserted,
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Aggregate over a metric in a time window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricStats {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricStats {
    /// Fold values into stats; `None` for an empty input.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        if count == 0 {
            return None;
        }
        Some(Self {
            count,
            avg: sum / count as f64,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_metric_bounds() {
        assert!(TelemetrySample::new("C1", "temp", 21.5).validate().is_ok());
        assert_eq!(
            TelemetrySample::new("C1", "  ", 1.0).validate(),
            Err(SampleError::EmptyMetric)
        );
        let long = "m".repeat(MAX_METRIC_LEN + 1);
        assert_eq!(
            TelemetrySample::new("C1", long, 1.0).validate(),
            Err(SampleError::MetricTooLong(51))
        );
        assert!(TelemetrySample::new("C1", "m".repeat(MAX_METRIC_LEN), 1.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_nan() {
        let s = TelemetrySample::new("C1", "temp", f64::NAN);
        assert!(matches!(s.validate(), Err(SampleError::NonFiniteValue(_))));
    }

    #[test]
    fn test_stats_from_values() {
        let stats = MetricStats::from_values([20.0, 22.0, 24.0]).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.avg, 22.0);
        assert_eq!(stats.min, 20.0);
        assert_eq!(stats.max, 24.0);
        assert!(MetricStats::from_values(std::iter::empty()).is_none());
    }
}

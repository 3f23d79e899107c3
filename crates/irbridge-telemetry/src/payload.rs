//! Telemetry payload decoding.
//!
//! ```json
//! {"metric": "temperature", "value": 23.5, "unit": "C", "ts": "2024-05-01T10:00:00Z"}
//! ```

use chrono::{DateTime, Utc};
use irbridge_core::{SampleError, TelemetrySample};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawTelemetry {
    metric: Option<String>,
    value: Option<Value>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    ts: Option<Value>,
}

/// Decode a payload into a sample attributed to `controller_id`.
///
/// `value` may be a number or a numeric string. `ts` may be RFC 3339 or
/// epoch milliseconds; when absent the receipt time is used.
pub fn parse_sample(
    controller_id: &str,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<TelemetrySample, SampleError> {
    let raw: RawTelemetry =
        serde_json::from_slice(payload).map_err(|e| SampleError::InvalidField {
            field: "payload",
            reason: e.to_string(),
        })?;

    let metric = raw.metric.ok_or(SampleError::MissingField("metric"))?;
    let value = match raw.value {
        None | Some(Value::Null) => return Err(SampleError::MissingField("value")),
        Some(v) => parse_value(&v)?,
    };
    let timestamp = match raw.ts {
        None | Some(Value::Null) => received_at,
        Some(v) => parse_timestamp(&v)?,
    };

    let sample = TelemetrySample {
        controller_id: controller_id.to_string(),
        metric,
        value,
        unit: raw.unit.filter(|u| !u.is_empty()),
        timestamp,
        received_at,
    };
    sample.validate()?;
    Ok(sample)
}

fn parse_value(v: &Value) -> Result<f64, SampleError> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SampleError::InvalidField {
        field: "value",
        reason: format!("not numeric: {}", v),
    })
}

fn parse_timestamp(v: &Value) -> Result<DateTime<Utc>, SampleError> {
    let parsed = match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    parsed.ok_or_else(|| SampleError::InvalidField {
        field: "ts",
        reason: format!("not a timestamp: {}", v),
    })
}

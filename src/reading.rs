use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error, PartialEq)]
pub enum CoercionError {
    #[error("field `{field}` is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },
}

/// One row of the `sensor_logs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorReading {
    /// Raw soil moisture ADC value.
    pub moisture: f64,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    /// Processing time, ISO-8601 UTC.
    pub timestamp: String,
}

impl SensorReading {
    /// Build a reading from a decoded payload, stamped with `now`.
    ///
    /// An absent field defaults to `0.0`. A field that is present but not
    /// numeric fails the whole reading; `null` counts as present.
    pub fn from_payload(
        payload: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Self, CoercionError> {
        Ok(Self {
            moisture: field(payload, "moisture")?,
            temperature: field(payload, "temperature")?,
            humidity: field(payload, "humidity")?,
            timestamp: format_timestamp(now),
        })
    }
}

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn field(payload: &Map<String, Value>, name: &'static str) -> Result<f64, CoercionError> {
    match payload.get(name) {
        None => Ok(0.0),
        Some(value) => coerce_f64(value).ok_or_else(|| CoercionError::NotNumeric {
            field: name,
            value: value.to_string(),
        }),
    }
}

/// Numbers pass through, booleans become 1/0 and strings are parsed after
/// trimming surrounding whitespace. Everything else is rejected, and so is
/// any non-finite result: JSON has no encoding for NaN or infinity.
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    };
    f.filter(|f| f.is_finite())
}

//! Telemetry normalization
//!
//! Devices report in three encodings: flat system fields (`cpu`, `ram`,
//! `disk`), a nested `metrics` object, and legacy aliases (`cpu_load`,
//! `storage`, `load`). Every payload, live or historical, goes through
//! [`normalize_value`] and comes out as a [`MetricRecord`].
//!
//! Resolution order, first defined value wins:
//!
//! ```text
//! cpu   = data.cpu   ?? data.cpu_load ?? metrics.cpu
//! ram   = data.ram   ?? metrics.ram
//! disk  = data.disk  ?? data.storage  ?? metrics.disk ?? metrics.storage
//! value = data.value ?? data.load     ?? cpu          ?? 0
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::MetricRecord;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("telemetry payload has no device_id")]
    MissingDevice,
    #[error("invalid telemetry payload: {0}")]
    InvalidPayload(String),
    #[error("telemetry payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a metric field is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Top level of `data`
    Flat(&'static str),
    /// Inside `data.metrics`
    Nested(&'static str),
}

pub const CPU_CHAIN: [FieldSource; 3] = [
    FieldSource::Flat("cpu"),
    FieldSource::Flat("cpu_load"),
    FieldSource::Nested("cpu"),
];

pub const RAM_CHAIN: [FieldSource; 2] = [FieldSource::Flat("ram"), FieldSource::Nested("ram")];

pub const DISK_CHAIN: [FieldSource; 4] = [
    FieldSource::Flat("disk"),
    FieldSource::Flat("storage"),
    FieldSource::Nested("disk"),
    FieldSource::Nested("storage"),
];

/// Which link of the value chain produced `value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Value,
    Load,
    Cpu,
    Default,
}

/// Outcome of resolving one `data` object
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub cpu: Option<f64>,
    pub ram: Option<f64>,
    pub disk: Option<f64>,
    pub value: f64,
    pub value_source: ValueSource,
}

/// Envelope shared by `new_metric` events and history documents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryEnvelope {
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub device_id: Option<Value>,
    #[serde(default)]
    pub owner_id: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Resolve cpu/ram/disk/value from a `data` object.
pub fn resolve(data: &Value) -> Resolved {
    let empty = Map::new();
    let flat = data.as_object().unwrap_or(&empty);
    let nested = flat.get("metrics").and_then(Value::as_object).unwrap_or(&empty);

    let cpu = first_defined(flat, nested, &CPU_CHAIN);
    let ram = first_defined(flat, nested, &RAM_CHAIN);
    let disk = first_defined(flat, nested, &DISK_CHAIN);

    let (value, value_source) = if let Some(v) = number_at(flat, "value") {
        (v, ValueSource::Value)
    } else if let Some(v) = number_at(flat, "load") {
        (v, ValueSource::Load)
    } else if let Some(v) = cpu {
        (v, ValueSource::Cpu)
    } else {
        (0.0, ValueSource::Default)
    };

    Resolved { cpu, ram, disk, value, value_source }
}

fn first_defined(flat: &Map<String, Value>, nested: &Map<String, Value>, chain: &[FieldSource]) -> Option<f64> {
    chain.iter().find_map(|source| match *source {
        FieldSource::Flat(key) => number_at(flat, key),
        FieldSource::Nested(key) => number_at(nested, key),
    })
}

fn number_at(map: &Map<String, Value>, key: &str) -> Option<f64> {
    let raw = map.get(key)?;
    let number = as_number(raw);
    if number.is_none() && !raw.is_null() {
        debug!("ignoring non-numeric telemetry field {key}={raw}");
    }
    number
}

/// Numbers and numeric strings count; `null` and anything else do not.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Normalize one envelope. `received_at` stands in for a missing or
/// unreadable timestamp.
pub fn normalize(envelope: &TelemetryEnvelope, received_at: DateTime<Utc>) -> Result<MetricRecord, NormalizeError> {
    let device_id = envelope
        .device_id
        .as_ref()
        .ok_or(NormalizeError::MissingDevice)
        .and_then(device_id_string)?;

    let timestamp = match envelope.timestamp.as_ref() {
        Some(Value::String(raw)) => parse_timestamp(raw).unwrap_or_else(|| {
            warn!("unreadable telemetry timestamp {raw:?} for device {device_id}, using receipt time");
            received_at
        }),
        _ => received_at,
    };

    let data = envelope.data.clone().unwrap_or(Value::Null);
    let resolved = resolve(&data);

    Ok(MetricRecord {
        timestamp,
        device_id,
        value: resolved.value,
        cpu: resolved.cpu,
        ram: resolved.ram,
        disk: resolved.disk,
        unit: data.get("unit").and_then(Value::as_str).map(str::to_owned),
        data_type: data.get("type").and_then(Value::as_str).map(str::to_owned),
        owner_id: envelope.owner_id.as_ref().and_then(owner_id),
    })
}

/// Normalize a raw payload that may be a JSON object or JSON text.
pub fn normalize_value(raw: &Value, received_at: DateTime<Utc>) -> Result<MetricRecord, NormalizeError> {
    let envelope: TelemetryEnvelope = match raw {
        Value::String(text) => serde_json::from_str(text)?,
        Value::Object(_) => serde_json::from_value(raw.clone())?,
        other => {
            return Err(NormalizeError::InvalidPayload(format!(
                "expected object or JSON text, got {other}"
            )))
        }
    };
    normalize(&envelope, received_at)
}

/// Normalize a history response, dropping unreadable items, ascending by timestamp.
pub fn normalize_history(items: &[Value], fetched_at: DateTime<Utc>) -> Vec<MetricRecord> {
    let mut records: Vec<MetricRecord> = items
        .iter()
        .filter_map(|item| match normalize_value(item, fetched_at) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("skipping history item: {e}");
                None
            }
        })
        .collect();
    records.sort_by_key(|r| r.timestamp);
    records
}

fn device_id_string(raw: &Value) -> Result<String, NormalizeError> {
    match raw {
        Value::Null => Err(NormalizeError::MissingDevice),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(NormalizeError::InvalidPayload(format!("device_id must be scalar, got {other}"))),
    }
}

fn owner_id(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// RFC 3339, or naive ISO-8601 read as UTC (what the monitoring store emits).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Value push: POST {base}devices/{device_id}/sensors/{sensor_id}/value
//
//   { "value": 17.26, "timestamp": "2020-02-01T11:59:00Z" }
//   { "value": "open", "timestamp": "2020-02-01T11:59:00Z" }
//
// Success is signalled by `204 No Content`.
// ---------------------------------------------------------------------------

/// A stored raw value encoded for the sink: a JSON number when it parses as a
/// finite float, otherwise a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PushValue {
    Number(f64),
    Text(String),
}

impl PushValue {
    pub fn from_raw(raw: &str) -> Self {
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => PushValue::Number(v),
            _ => PushValue::Text(raw.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushBody {
    pub value: PushValue,
    /// RFC 3339, UTC, second precision.
    pub timestamp: String,
}

impl PushBody {
    pub fn new(raw: &str, at: DateTime<Utc>) -> Self {
        Self {
            value: PushValue::from_raw(raw),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

// ---------------------------------------------------------------------------
// Token: POST {base}auth/token
//
// Request: { "username": "...", "password": "..." }
// Response: 200 with the bearer token as plain text.
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

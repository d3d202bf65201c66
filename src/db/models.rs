use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A source channel. `last_entry_id` is the ingestion cursor: every feed entry
/// up to this id has been persisted.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub last_entry_id: i64,
}

/// One `(channel, field name)` pair observed in feed data.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Sensor {
    pub id: i64,
    pub channel_id: i64,
    pub name: String,
}

/// A single recorded sample. `(entry_id, sensor_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SensorValue {
    pub entry_id: i64,
    pub sensor_id: i64,
    /// Raw upstream value; numeric or free text.
    pub value: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub token: Option<String>,
}

/// A user's forwarding rule from one local sensor to one remote device sensor.
/// `last_pushed_entry_id` is the forwarding cursor.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PushSetting {
    pub id: i64,
    pub user_id: i64,
    pub sensor_id: i64,
    pub target_device_id: String,
    pub target_sensor_id: String,
    pub active: bool,
    /// Minutes; one of `PushInterval::ALL`.
    pub push_interval: i32,
    pub last_pushed_entry_id: i64,
    pub last_push_time: Option<DateTime<Utc>>,
    pub use_original_time: bool,
    pub pushed_count: i64,
}

/// An active forwarding subscription joined with its owner's current token,
/// as selected by one scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DuePush {
    pub id: i64,
    pub user_id: i64,
    pub sensor_id: i64,
    pub target_device_id: String,
    pub target_sensor_id: String,
    pub push_interval: i32,
    pub last_pushed_entry_id: i64,
    pub use_original_time: bool,
    pub token: String,
}

/// Stored totals reported by the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct Statistics {
    pub total_channels: i64,
    pub total_sensors: i64,
    pub total_sensor_values: i64,
}

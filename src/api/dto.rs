use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{db::models::Statistics, ingest::ProgressSnapshot};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CollectionStatusDto {
    /// A channel discovery phase is in progress.
    pub channels_running: bool,
    /// A value ingestion phase is in progress.
    pub sensors_running: bool,
    /// Percentage of channels processed in the current or last value phase.
    pub sensors_progress: u8,
    pub new_channels: u64,
    pub new_sensors: u64,
    pub new_values: u64,
    /// When the last full ingestion cycle finished.
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl From<ProgressSnapshot> for CollectionStatusDto {
    fn from(s: ProgressSnapshot) -> Self {
        Self {
            channels_running: s.channels_running,
            sensors_running: s.sensors_running,
            sensors_progress: s.sensors_progress,
            new_channels: s.new_channels,
            new_sensors: s.new_sensors,
            new_values: s.new_values,
            last_cycle_at: s.last_cycle_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatisticsDto {
    pub total_channels: i64,
    pub total_sensors: i64,
    pub total_sensor_values: i64,
}

impl From<Statistics> for StatisticsDto {
    fn from(s: Statistics) -> Self {
        Self {
            total_channels: s.total_channels,
            total_sensors: s.total_sensors,
            total_sensor_values: s.total_sensor_values,
        }
    }
}

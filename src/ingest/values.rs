use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use tracing::{debug, info, warn};

use super::progress::Progress;
use crate::{
    db::{
        models::{Channel, SensorValue},
        store::{Store, StoreError},
    },
    source::SourceApi,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOutcome {
    /// The feed's high-water mark equals the stored cursor.
    UpToDate,
    Ingested {
        new_values: u64,
        new_sensors: u64,
        /// Whether the channel cursor moved to the feed's high-water mark.
        cursor_advanced: bool,
    },
}

/// Pulls a channel's latest feed and stores every unseen entry as one value
/// row per named field.
#[derive(Clone)]
pub struct ValueFetcher {
    store: Arc<dyn Store>,
    source: Arc<dyn SourceApi>,
    progress: Arc<Progress>,
}

impl ValueFetcher {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn SourceApi>, progress: Arc<Progress>) -> Self {
        Self { store, source, progress }
    }

    /// Ingests the current feed snapshot of `channel`.
    ///
    /// Entries are deduplicated by `entry_id` alone: upstream ids are unique
    /// across channels. Duplicate inserts from racing tasks are ignored; any
    /// other failing row is skipped and keeps the cursor where it is, so the
    /// cursor only ever covers values that were stored.
    pub async fn fetch_channel(&self, channel: &Channel) -> Result<ValueOutcome> {
        let feed = self.source.channel_feed(channel.id).await?;
        let high_water = feed.channel.high_water();

        if high_water == channel.last_entry_id {
            debug!(channel_id = channel.id, high_water, "Channel already current");
            return Ok(ValueOutcome::UpToDate);
        }

        let named: Vec<(usize, &str)> = feed.channel.named_fields().collect();
        // slot -> sensor id, for this pass only
        let mut sensor_ids: HashMap<usize, i64> = HashMap::new();
        let mut new_values = 0u64;
        let mut new_sensors = 0u64;
        let mut failures = 0u64;

        for entry in &feed.feeds {
            match self.store.entry_exists(entry.entry_id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(channel_id = channel.id, entry_id = entry.entry_id, error = %e, "Entry lookup failed");
                    failures += 1;
                    continue;
                }
            }

            for &(slot, name) in &named {
                let Some(value) = entry.value(slot) else {
                    continue;
                };

                let sensor_id = match sensor_ids.get(&slot) {
                    Some(id) => *id,
                    None => match self.store.resolve_sensor(channel.id, name).await {
                        Ok(resolved) => {
                            if resolved.created {
                                new_sensors += 1;
                            }
                            sensor_ids.insert(slot, resolved.id);
                            resolved.id
                        }
                        Err(e) => {
                            warn!(channel_id = channel.id, sensor = %name, error = %e, "Sensor resolution failed");
                            failures += 1;
                            continue;
                        }
                    },
                };

                let row = SensorValue {
                    entry_id: entry.entry_id,
                    sensor_id,
                    value: Some(value),
                    created_at: entry.created_at,
                };
                match self.store.insert_value(&row).await {
                    Ok(()) => new_values += 1,
                    Err(StoreError::Duplicate) => {
                        debug!(entry_id = row.entry_id, sensor_id, "Value inserted concurrently");
                    }
                    Err(e) => {
                        warn!(channel_id = channel.id, entry_id = row.entry_id, sensor_id, error = %e, "Value insert failed");
                        failures += 1;
                    }
                }
            }
        }

        self.progress.add_sensors(new_sensors);
        self.progress.add_values(new_values);

        let cursor_advanced = if new_values > 0 && failures == 0 {
            self.store.advance_channel_cursor(channel.id, high_water).await?
        } else {
            false
        };

        info!(
            channel_id = channel.id,
            new_values,
            new_sensors,
            failures,
            cursor = if cursor_advanced { high_water } else { channel.last_entry_id },
            "Channel values ingested"
        );

        Ok(ValueOutcome::Ingested { new_values, new_sensors, cursor_advanced })
    }
}

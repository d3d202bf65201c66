use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::{Channel, DuePush, PushSetting, SensorValue, Statistics, User};
use crate::push::interval::PushInterval;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row with the same unique key already exists. Expected when concurrent
    /// tasks race on the same channel, sensor or entry.
    #[error("duplicate key")]
    Duplicate,

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        let duplicate = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if duplicate {
            Self::Duplicate
        } else {
            Self::Database(e)
        }
    }
}

/// Outcome of looking up the sensor for a `(channel, field name)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSensor {
    pub id: i64,
    /// `true` if this call created the row.
    pub created: bool,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Durable state shared by the ingestion and forwarding pipelines.
///
/// Implementations must enforce the uniqueness of channel ids,
/// `(channel_id, name)` sensors and `(entry_id, sensor_id)` values, and must
/// never move a cursor backwards. Concurrent tasks rely on these guarantees
/// instead of in-process locking.
#[async_trait]
pub trait Store: Send + Sync {
    async fn channel_exists(&self, id: i64) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the channel is already known.
    async fn insert_channel(&self, channel: &Channel) -> Result<(), StoreError>;

    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError>;

    /// Moves the channel cursor forward to `last_entry_id`. Returns `false`
    /// if the stored cursor was already at or beyond it.
    async fn advance_channel_cursor(
        &self,
        channel_id: i64,
        last_entry_id: i64,
    ) -> Result<bool, StoreError>;

    /// Upstream entry ids are unique across all channels, so this is not
    /// scoped by channel.
    async fn entry_exists(&self, entry_id: i64) -> Result<bool, StoreError>;

    async fn resolve_sensor(
        &self,
        channel_id: i64,
        name: &str,
    ) -> Result<ResolvedSensor, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if `(entry_id, sensor_id)` exists.
    async fn insert_value(&self, value: &SensorValue) -> Result<(), StoreError>;

    /// Active subscriptions on `interval` with their owner's token. An owner
    /// without a token yields an empty one, which the sink rejects and the
    /// executor then refreshes.
    async fn due_pushes(&self, interval: PushInterval) -> Result<Vec<DuePush>, StoreError>;

    /// The lowest-`entry_id` value of `sensor_id` strictly after `after_entry_id`.
    async fn next_value_to_push(
        &self,
        sensor_id: i64,
        after_entry_id: i64,
    ) -> Result<Option<SensorValue>, StoreError>;

    /// Advances the subscription cursor after a confirmed delivery, stamps
    /// `last_push_time` and bumps `pushed_count`. Returns `false` if the
    /// cursor was already at or beyond `entry_id`.
    async fn record_push(
        &self,
        setting_id: i64,
        entry_id: i64,
        pushed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn user(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    async fn save_user_token(&self, user_id: i64, token: &str) -> Result<(), StoreError>;

    async fn statistics(&self) -> Result<Statistics, StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn push_setting(&self, id: i64) -> Result<Option<PushSetting>, StoreError> {
        let row = sqlx::query_as::<_, PushSetting>(
            r#"
            SELECT id, user_id, sensor_id, target_device_id, target_sensor_id, active,
                   push_interval, last_pushed_entry_id, last_push_time,
                   use_original_time, pushed_count
            FROM push_settings
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn channel_exists(&self, id: i64) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM channels WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channels
                (id, name, description, latitude, longitude, url, created_at, last_entry_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(channel.id)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(channel.latitude)
        .bind(channel.longitude)
        .bind(&channel.url)
        .bind(channel.created_at)
        .bind(channel.last_entry_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, name, description, latitude, longitude, url, created_at, last_entry_id
            FROM channels
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn advance_channel_cursor(
        &self,
        channel_id: i64,
        last_entry_id: i64,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE channels SET last_entry_id = $2 WHERE id = $1 AND last_entry_id < $2",
        )
        .bind(channel_id)
        .bind(last_entry_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn entry_exists(&self, entry_id: i64) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sensor_values WHERE entry_id = $1)")
                .bind(entry_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn resolve_sensor(
        &self,
        channel_id: i64,
        name: &str,
    ) -> Result<ResolvedSensor, StoreError> {
        let select = "SELECT id FROM sensors WHERE channel_id = $1 AND name = $2";

        let existing: Option<i64> = sqlx::query_scalar(select)
            .bind(channel_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(id) = existing {
            return Ok(ResolvedSensor { id, created: false });
        }

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO sensors (channel_id, name)
            VALUES ($1, $2)
            ON CONFLICT (channel_id, name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(channel_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            return Ok(ResolvedSensor { id, created: true });
        }

        // Lost the race to a sibling task; its row is visible now.
        let id: i64 = sqlx::query_scalar(select)
            .bind(channel_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(ResolvedSensor { id, created: false })
    }

    async fn insert_value(&self, value: &SensorValue) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sensor_values (entry_id, sensor_id, value, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(value.entry_id)
        .bind(value.sensor_id)
        .bind(&value.value)
        .bind(value.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_pushes(&self, interval: PushInterval) -> Result<Vec<DuePush>, StoreError> {
        let rows = sqlx::query_as::<_, DuePush>(
            r#"
            SELECT p.id,
                   p.user_id,
                   p.sensor_id,
                   p.target_device_id,
                   p.target_sensor_id,
                   p.push_interval,
                   p.last_pushed_entry_id,
                   p.use_original_time,
                   COALESCE(u.token, '') AS token
            FROM push_settings AS p
            JOIN users AS u ON u.id = p.user_id
            WHERE p.active
              AND p.push_interval = $1
            ORDER BY p.id
            "#,
        )
        .bind(interval.minutes())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn next_value_to_push(
        &self,
        sensor_id: i64,
        after_entry_id: i64,
    ) -> Result<Option<SensorValue>, StoreError> {
        let row = sqlx::query_as::<_, SensorValue>(
            r#"
            SELECT entry_id, sensor_id, value, created_at
            FROM sensor_values
            WHERE sensor_id = $1
              AND entry_id  > $2
            ORDER BY entry_id ASC
            LIMIT 1
            "#,
        )
        .bind(sensor_id)
        .bind(after_entry_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_push(
        &self,
        setting_id: i64,
        entry_id: i64,
        pushed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE push_settings
            SET last_pushed_entry_id = $2,
                last_push_time       = $3,
                pushed_count         = pushed_count + 1
            WHERE id = $1
              AND last_pushed_entry_id < $2
            "#,
        )
        .bind(setting_id)
        .bind(entry_id)
        .bind(pushed_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, username, password, token FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn save_user_token(&self, user_id: i64, token: &str) -> Result<(), StoreError> {
        // The session hash was derived from the old token; drop it with it.
        sqlx::query("UPDATE users SET token = $2, token_hash = NULL WHERE id = $1")
            .bind(user_id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn statistics(&self) -> Result<Statistics, StoreError> {
        let stats = sqlx::query_as::<_, Statistics>(
            r#"
            SELECT (SELECT COUNT(*) FROM channels)      AS total_channels,
                   (SELECT COUNT(*) FROM sensors)       AS total_sensors,
                   (SELECT COUNT(*) FROM sensor_values) AS total_sensor_values
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    db::{models::DuePush, store::Store},
    sink::{models::PushBody, PushError, SinkApi},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// No stored value newer than the subscription's cursor.
    NothingToPush,
    /// The value was accepted and the cursor moved to `entry_id`.
    Pushed { entry_id: i64 },
}

/// Forwards the next pending value of one subscription to the sink.
#[derive(Clone)]
pub struct PushExecutor {
    store: Arc<dyn Store>,
    sink: Arc<dyn SinkApi>,
}

impl PushExecutor {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn SinkApi>) -> Self {
        Self { store, sink }
    }

    /// Pushes the lowest-entry value after the subscription's cursor.
    ///
    /// An auth rejection triggers exactly one token refresh and one retry.
    /// The cursor only moves after the sink accepted the value, so a failed
    /// push is attempted again on the next tick.
    pub async fn push_one(&self, sub: &DuePush) -> Result<PushOutcome> {
        let Some(value) = self
            .store
            .next_value_to_push(sub.sensor_id, sub.last_pushed_entry_id)
            .await?
        else {
            debug!(setting_id = sub.id, "Nothing new to push");
            return Ok(PushOutcome::NothingToPush);
        };

        let at = if sub.use_original_time { value.created_at } else { Utc::now() };
        let body = PushBody::new(value.value.as_deref().unwrap_or_default(), at);

        match self.deliver(&sub.token, sub, &body).await {
            Ok(()) => {}
            Err(e) if e.is_auth_rejection() => {
                info!(setting_id = sub.id, user_id = sub.user_id, "Sink token rejected; refreshing");
                let token = self.refresh_token(sub.user_id).await?;
                self.deliver(&token, sub, &body)
                    .await
                    .with_context(|| format!("Push for setting {} failed after token refresh", sub.id))?;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Push for setting {} failed", sub.id));
            }
        }

        let moved = self.store.record_push(sub.id, value.entry_id, Utc::now()).await?;
        if !moved {
            warn!(setting_id = sub.id, entry_id = value.entry_id, "Push cursor already past this entry");
        }

        info!(
            setting_id = sub.id,
            entry_id = value.entry_id,
            device_id = %sub.target_device_id,
            sensor_id = %sub.target_sensor_id,
            "Value pushed"
        );
        Ok(PushOutcome::Pushed { entry_id: value.entry_id })
    }

    async fn deliver(&self, token: &str, sub: &DuePush, body: &PushBody) -> Result<(), PushError> {
        self.sink
            .push_value(token, &sub.target_device_id, &sub.target_sensor_id, body)
            .await
    }

    /// Exchanges the user's stored credentials for a new token and persists it.
    async fn refresh_token(&self, user_id: i64) -> Result<String> {
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| anyhow!("User {user_id} not found"))?;

        let token = self
            .sink
            .issue_token(&user.username, &user.password)
            .await
            .with_context(|| format!("Failed to refresh sink token for user {user_id}"))?;

        self.store.save_user_token(user_id, &token).await?;
        debug!(user_id, "Sink token refreshed");
        Ok(token)
    }
}

pub mod models;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::config::Config;

use self::models::{PushBody, TokenRequest};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The bearer token is expired or invalid.
    #[error("sink rejected the token ({0})")]
    AuthRejected(StatusCode),

    #[error("sink answered {0}, expected 204")]
    Status(StatusCode),

    #[error("sink request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl PushError {
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, PushError::AuthRejected(_))
    }
}

/// Maps a delivery response status onto the push outcome.
pub(crate) fn classify_push_status(status: StatusCode) -> Result<(), PushError> {
    match status {
        StatusCode::NO_CONTENT => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PushError::AuthRejected(status)),
        other => Err(PushError::Status(other)),
    }
}

/// Write side: the forwarding platform and its identity provider.
#[async_trait]
pub trait SinkApi: Send + Sync {
    /// Deliver one value to `(device_id, sensor_id)` on behalf of the token owner.
    async fn push_value(
        &self,
        token: &str,
        device_id: &str,
        sensor_id: &str,
        body: &PushBody,
    ) -> Result<(), PushError>;

    /// Exchange stored credentials for a fresh bearer token.
    async fn issue_token(&self, username: &str, password: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct WaziupClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    /// Ends with `/`.
    base_url: String,
}

impl WaziupClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_base_url(&config.sink_api_url, config.http_timeout())
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build sink HTTP client")?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.to_owned(),
            }),
        })
    }

    fn value_url(&self, device_id: &str, sensor_id: &str) -> String {
        format!(
            "{}devices/{}/sensors/{}/value",
            self.inner.base_url, device_id, sensor_id
        )
    }

    fn token_url(&self) -> String {
        format!("{}auth/token", self.inner.base_url)
    }
}

#[async_trait]
impl SinkApi for WaziupClient {
    async fn push_value(
        &self,
        token: &str,
        device_id: &str,
        sensor_id: &str,
        body: &PushBody,
    ) -> Result<(), PushError> {
        let url = self.value_url(device_id, sensor_id);
        debug!(url = %url, "Pushing value to sink");

        let resp = self
            .inner
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(PushError::Transport)?;

        classify_push_status(resp.status())
    }

    async fn issue_token(&self, username: &str, password: &str) -> anyhow::Result<String> {
        let url = self.token_url();
        info!(username = %username, "Requesting sink token");

        let resp = self
            .inner
            .http
            .post(&url)
            .json(&TokenRequest { username, password })
            .send()
            .await
            .context("Sink token request failed")?;

        let status = resp.status();
        if status != StatusCode::OK {
            bail!("Sink token endpoint answered {status}");
        }

        let token = resp
            .text()
            .await
            .context("Failed to read sink token response body")?
            .trim()
            .to_owned();
        if token.is_empty() {
            bail!("Sink token endpoint returned an empty token");
        }

        Ok(token)
    }
}

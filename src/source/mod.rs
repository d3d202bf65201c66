pub mod models;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;

use self::models::{ChannelPage, Feed};

/// Read side of the upstream sensor platform.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// One page of the public channel directory. Pages are numbered from 1;
    /// a page past the end comes back empty.
    async fn channel_page(&self, page: u32) -> Result<ChannelPage>;

    /// The latest feed snapshot of one channel.
    async fn channel_feed(&self, channel_id: i64) -> Result<Feed>;
}

#[derive(Debug, Clone)]
pub struct ThingSpeakClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    api_url: String,
    feed_url: String,
}

impl ThingSpeakClient {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_urls(
            &config.source_api_url,
            &config.source_feed_url,
            config.http_timeout(),
        )
    }

    pub fn with_urls(api_url: &str, feed_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build source HTTP client")?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                api_url: api_url.to_owned(),
                feed_url: feed_url.to_owned(),
            }),
        })
    }

    fn page_url(&self, page: u32) -> String {
        format!("{}/channels/public.json?page={}", self.inner.api_url, page)
    }

    fn feed_url(&self, channel_id: i64) -> String {
        format!("{}/channels/{}/feed.json", self.inner.feed_url, channel_id)
    }

    /// GET `url` and decode the JSON body into `T`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self
            .inner
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("Source request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("Source returned error status: {url}"))?
            .bytes()
            .await
            .with_context(|| format!("Failed to read source response body: {url}"))?;

        serde_json::from_slice::<T>(&bytes)
            .with_context(|| format!("Failed to deserialize source response: {url}"))
    }
}

#[async_trait]
impl SourceApi for ThingSpeakClient {
    async fn channel_page(&self, page: u32) -> Result<ChannelPage> {
        let url = self.page_url(page);
        debug!(page, url = %url, "Fetching channel directory page");

        self.get_json(&url).await
    }

    async fn channel_feed(&self, channel_id: i64) -> Result<Feed> {
        let url = self.feed_url(channel_id);
        debug!(channel_id, url = %url, "Fetching channel feed");

        self.get_json(&url).await
    }
}

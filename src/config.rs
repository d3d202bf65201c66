use std::{str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Host serving the public channel directory (`/channels/public.json`).
    pub source_api_url: String,
    /// Host serving per-channel feeds (`/channels/{id}/feed.json`).
    pub source_feed_url: String,
    /// Base URL of the forwarding platform, including the API version path.
    /// Always normalised to end with `/`.
    pub sink_api_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub ingest: IngestSettings,
    pub http_timeout_secs: u64,
    pub ingest_enabled: bool,
    pub push_enabled: bool,
}

/// Knobs of the ingestion pipeline, handed to the orchestrator at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Upper bound on concurrently running fetch tasks.
    pub max_in_flight: usize,
    /// Pause between the discovery phase and the value phase.
    pub phase_pause: Duration,
    /// Pause after a complete cycle before the next one starts.
    pub cycle_interval: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            phase_pause: Duration::from_secs(30),
            cycle_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let max_in_flight: usize = parse_var("MAX_IN_FLIGHT", "64")?;
        if max_in_flight == 0 {
            bail!("MAX_IN_FLIGHT must be greater than zero");
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            source_api_url: trim_base(&optional("SOURCE_API_URL", "https://api.thingspeak.com")),
            source_feed_url: trim_base(&optional("SOURCE_FEED_URL", "https://thingspeak.com")),
            sink_api_url: with_trailing_slash(&required("SINK_API_URL")?),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: parse_var("SERVER_PORT", "8080")?,
            ingest: IngestSettings {
                max_in_flight,
                phase_pause: Duration::from_secs(parse_var("PHASE_PAUSE_SECS", "30")?),
                cycle_interval: Duration::from_secs(
                    parse_var::<u64>("CYCLE_INTERVAL_MINS", "60")? * 60,
                ),
            },
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", "30")?,
            ingest_enabled: parse_flag("INGEST_ENABLED", &optional("INGEST_ENABLED", "true"))?,
            push_enabled: parse_flag("PUSH_ENABLED", &optional("PUSH_ENABLED", "true"))?,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    optional(key, default)
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a valid non-negative integer"))
}

/// Accepts the usual spellings of a boolean switch.
fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean, got: {other:?}"),
    }
}

fn trim_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_owned()
}

fn with_trailing_slash(raw: &str) -> String {
    format!("{}/", trim_base(raw))
}

//! In-memory stand-ins for the store, the upstream source and the sink.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::json;

use crate::{
    db::{
        models::{Channel, DuePush, PushSetting, Sensor, SensorValue, Statistics, User},
        store::{ResolvedSensor, Store, StoreError},
    },
    push::interval::PushInterval,
    sink::{models::PushBody, PushError, SinkApi},
    source::{
        models::{ChannelDescriptor, ChannelPage, Feed},
        SourceApi,
    },
};

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
}

pub fn channel(id: i64, last_entry_id: i64) -> Channel {
    Channel {
        id,
        name: format!("channel {id}"),
        description: String::new(),
        latitude: 0.0,
        longitude: 0.0,
        url: String::new(),
        created_at: ts(0),
        last_entry_id,
    }
}

pub fn descriptor(id: i64) -> ChannelDescriptor {
    serde_json::from_value(json!({
        "id": id,
        "name": format!("channel {id}"),
        "description": "",
        "latitude": "1.5",
        "longitude": "2.5",
        "created_at": "2020-01-01T00:00:00Z",
        "url": ""
    }))
    .unwrap()
}

/// Builds a feed snapshot. `entries` are `(entry_id, values by slot)`.
pub fn feed(channel_id: i64, high_water: i64, names: &[&str], entries: &[(i64, &[Option<&str>])]) -> Feed {
    let mut ch = serde_json::Map::new();
    ch.insert("id".into(), json!(channel_id));
    ch.insert("last_entry_id".into(), json!(high_water));
    for (i, name) in names.iter().enumerate() {
        ch.insert(format!("field{}", i + 1), json!(name));
    }

    let feeds: Vec<_> = entries
        .iter()
        .map(|(entry_id, values)| {
            let mut e = serde_json::Map::new();
            e.insert("entry_id".into(), json!(entry_id));
            e.insert("created_at".into(), json!(ts(*entry_id).to_rfc3339()));
            for (i, v) in values.iter().enumerate() {
                e.insert(format!("field{}", i + 1), json!(v));
            }
            serde_json::Value::Object(e)
        })
        .collect();

    serde_json::from_value(json!({ "channel": ch, "feeds": feeds })).unwrap()
}

pub fn setting(id: i64, user_id: i64, sensor_id: i64, device: &str, interval: i32) -> PushSetting {
    PushSetting {
        id,
        user_id,
        sensor_id,
        target_device_id: device.to_owned(),
        target_sensor_id: format!("{device}-sensor"),
        active: true,
        push_interval: interval,
        last_pushed_entry_id: 0,
        last_push_time: None,
        use_original_time: false,
        pushed_count: 0,
    }
}

/// Serves `app` on an ephemeral local port and returns `http://127.0.0.1:{port}`.
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    channels: BTreeMap<i64, Channel>,
    sensors: Vec<Sensor>,
    values: BTreeMap<(i64, i64), SensorValue>,
    users: HashMap<i64, User>,
    settings: BTreeMap<i64, PushSetting>,
}

/// Enforces the same uniqueness and cursor rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_value_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_value_inserts(&self, fail: bool) {
        self.fail_value_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn add_channel(&self, ch: Channel) {
        self.state.lock().unwrap().channels.insert(ch.id, ch);
    }

    pub fn add_user(&self, id: i64, token: &str) {
        self.state.lock().unwrap().users.insert(
            id,
            User {
                id,
                username: format!("user{id}"),
                password: format!("pw{id}"),
                token: Some(token.to_owned()),
            },
        );
    }

    pub fn clear_token(&self, user_id: i64) {
        if let Some(u) = self.state.lock().unwrap().users.get_mut(&user_id) {
            u.token = None;
        }
    }

    pub fn add_setting(&self, s: PushSetting) {
        self.state.lock().unwrap().settings.insert(s.id, s);
    }

    pub fn add_value(&self, sensor_id: i64, entry_id: i64, value: &str) {
        self.state.lock().unwrap().values.insert(
            (entry_id, sensor_id),
            SensorValue {
                entry_id,
                sensor_id,
                value: Some(value.to_owned()),
                created_at: ts(entry_id),
            },
        );
    }

    pub fn channel(&self, id: i64) -> Option<Channel> {
        self.state.lock().unwrap().channels.get(&id).cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().unwrap().channels.len()
    }

    pub fn sensors(&self) -> Vec<Sensor> {
        self.state.lock().unwrap().sensors.clone()
    }

    pub fn values(&self) -> Vec<SensorValue> {
        self.state.lock().unwrap().values.values().cloned().collect()
    }

    pub fn setting(&self, id: i64) -> PushSetting {
        self.state.lock().unwrap().settings[&id].clone()
    }

    pub fn token_of(&self, user_id: i64) -> Option<String> {
        self.state.lock().unwrap().users[&user_id].token.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn channel_exists(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.state.lock().unwrap().channels.contains_key(&id))
    }

    async fn insert_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let mut st = self.state.lock().unwrap();
        if st.channels.contains_key(&channel.id) {
            return Err(StoreError::Duplicate);
        }
        st.channels.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        Ok(self.state.lock().unwrap().channels.values().cloned().collect())
    }

    async fn advance_channel_cursor(&self, channel_id: i64, last_entry_id: i64) -> Result<bool, StoreError> {
        let mut st = self.state.lock().unwrap();
        match st.channels.get_mut(&channel_id) {
            Some(ch) if ch.last_entry_id < last_entry_id => {
                ch.last_entry_id = last_entry_id;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn entry_exists(&self, entry_id: i64) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .values
            .keys()
            .any(|(e, _)| *e == entry_id))
    }

    async fn resolve_sensor(&self, channel_id: i64, name: &str) -> Result<ResolvedSensor, StoreError> {
        let mut st = self.state.lock().unwrap();
        if let Some(s) = st.sensors.iter().find(|s| s.channel_id == channel_id && s.name == name) {
            return Ok(ResolvedSensor { id: s.id, created: false });
        }
        let id = st.sensors.len() as i64 + 1;
        st.sensors.push(Sensor { id, channel_id, name: name.to_owned() });
        Ok(ResolvedSensor { id, created: true })
    }

    async fn insert_value(&self, value: &SensorValue) -> Result<(), StoreError> {
        if self.fail_value_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut st = self.state.lock().unwrap();
        let key = (value.entry_id, value.sensor_id);
        if st.values.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }
        st.values.insert(key, value.clone());
        Ok(())
    }

    async fn due_pushes(&self, interval: PushInterval) -> Result<Vec<DuePush>, StoreError> {
        let st = self.state.lock().unwrap();
        Ok(st
            .settings
            .values()
            .filter(|s| s.active && s.push_interval == interval.minutes())
            .filter_map(|s| {
                let token = st.users.get(&s.user_id)?.token.clone().unwrap_or_default();
                Some(DuePush {
                    id: s.id,
                    user_id: s.user_id,
                    sensor_id: s.sensor_id,
                    target_device_id: s.target_device_id.clone(),
                    target_sensor_id: s.target_sensor_id.clone(),
                    push_interval: s.push_interval,
                    last_pushed_entry_id: s.last_pushed_entry_id,
                    use_original_time: s.use_original_time,
                    token,
                })
            })
            .collect())
    }

    async fn next_value_to_push(&self, sensor_id: i64, after_entry_id: i64) -> Result<Option<SensorValue>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .values
            .values()
            .filter(|v| v.sensor_id == sensor_id && v.entry_id > after_entry_id)
            .min_by_key(|v| v.entry_id)
            .cloned())
    }

    async fn record_push(&self, setting_id: i64, entry_id: i64, pushed_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut st = self.state.lock().unwrap();
        match st.settings.get_mut(&setting_id) {
            Some(s) if s.last_pushed_entry_id < entry_id => {
                s.last_pushed_entry_id = entry_id;
                s.last_push_time = Some(pushed_at);
                s.pushed_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn save_user_token(&self, user_id: i64, token: &str) -> Result<(), StoreError> {
        if let Some(u) = self.state.lock().unwrap().users.get_mut(&user_id) {
            u.token = Some(token.to_owned());
        }
        Ok(())
    }

    async fn statistics(&self) -> Result<Statistics, StoreError> {
        let st = self.state.lock().unwrap();
        Ok(Statistics {
            total_channels: st.channels.len() as i64,
            total_sensors: st.sensors.len() as i64,
            total_sensor_values: st.values.len() as i64,
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Directory pages are served from `pages` (page 1 = index 0); anything past
/// the end is empty. Tracks how many calls overlap.
#[derive(Default)]
pub struct ScriptedSource {
    pub pages: Vec<Vec<ChannelDescriptor>>,
    pub failing_pages: HashSet<u32>,
    pub feeds: HashMap<i64, Feed>,
    pub page_calls: AtomicUsize,
    pub feed_calls: AtomicUsize,
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedSource {
    pub fn with_pages(pages: Vec<Vec<ChannelDescriptor>>) -> Self {
        Self { pages, ..Default::default() }
    }

    pub fn with_feeds(feeds: Vec<Feed>) -> Self {
        Self {
            feeds: feeds.into_iter().map(|f| (f.channel.id, f)).collect(),
            ..Default::default()
        }
    }

    async fn busy(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceApi for ScriptedSource {
    async fn channel_page(&self, page: u32) -> Result<ChannelPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.busy().await;
        if self.failing_pages.contains(&page) {
            bail!("page {page} unavailable");
        }
        let channels = (page as usize)
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .cloned()
            .unwrap_or_default();
        Ok(ChannelPage { channels })
    }

    async fn channel_feed(&self, channel_id: i64) -> Result<Feed> {
        self.feed_calls.fetch_add(1, Ordering::SeqCst);
        self.busy().await;
        self.feeds
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| anyhow!("no feed for channel {channel_id}"))
    }
}

// ---------------------------------------------------------------------------
// ScriptedSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accept,
    Reject,
    Fail,
}

/// Replies are queued per target device; an empty queue accepts.
#[derive(Default)]
pub struct ScriptedSink {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    hang_devices: HashSet<String>,
    pushes: Mutex<Vec<(String, String, PushBody)>>,
    pub token_calls: AtomicUsize,
    pub token_fails: AtomicBool,
}

impl ScriptedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hanging_on(device: &str) -> Self {
        Self {
            hang_devices: HashSet::from([device.to_owned()]),
            ..Default::default()
        }
    }

    pub fn queue(&self, device: &str, replies: &[Reply]) {
        self.replies
            .lock()
            .unwrap()
            .entry(device.to_owned())
            .or_default()
            .extend(replies.iter().copied());
    }

    /// `(token, device, body)` of every delivery attempt, in order.
    pub fn pushes(&self) -> Vec<(String, String, PushBody)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SinkApi for ScriptedSink {
    async fn push_value(&self, token: &str, device_id: &str, _sensor_id: &str, body: &PushBody) -> Result<(), PushError> {
        self.pushes
            .lock()
            .unwrap()
            .push((token.to_owned(), device_id.to_owned(), body.clone()));

        if self.hang_devices.contains(device_id) {
            std::future::pending::<()>().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(device_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Accept);

        match reply {
            Reply::Accept => Ok(()),
            Reply::Reject => Err(PushError::AuthRejected(StatusCode::FORBIDDEN)),
            Reply::Fail => Err(PushError::Status(StatusCode::BAD_GATEWAY)),
        }
    }

    async fn issue_token(&self, username: &str, _password: &str) -> Result<String> {
        let n = self.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.token_fails.load(Ordering::SeqCst) {
            bail!("identity provider unavailable");
        }
        Ok(format!("fresh-{username}-{n}"))
    }
}

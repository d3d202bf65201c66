use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::Channel;

/// Number of named field slots a feed carries.
pub const FIELD_SLOTS: usize = 8;

// ---------------------------------------------------------------------------
// RawValue: scalars that arrive either quoted or bare
//
// The directory reports coordinates as strings ("52.37") on most channels and
// as numbers on a few; feed field values are strings in practice but numbers
// have been observed. Untagged so serde tries each shape in order.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Text(String),
    Number(serde_json::Number),
}

impl RawValue {
    /// The value as the upstream would print it.
    pub fn into_text(self) -> String {
        match self {
            RawValue::Text(s) => s,
            RawValue::Number(n) => n.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Text(s) => s.trim().parse().ok(),
            RawValue::Number(n) => n.as_f64(),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel directory: GET /channels/public.json?page={n}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChannelPage {
    /// Empty once `page` runs past the last directory page.
    #[serde(default)]
    pub channels: Vec<ChannelDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDescriptor {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latitude: Option<RawValue>,
    #[serde(default)]
    pub longitude: Option<RawValue>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
}

impl From<ChannelDescriptor> for Channel {
    /// A freshly discovered channel; nothing has been ingested for it yet.
    fn from(d: ChannelDescriptor) -> Self {
        let coord = |v: Option<RawValue>| v.and_then(|v| v.as_f64()).unwrap_or(0.0);
        Channel {
            id: d.id,
            name: d.name.unwrap_or_default(),
            description: d.description.unwrap_or_default(),
            latitude: coord(d.latitude),
            longitude: coord(d.longitude),
            url: d.url.unwrap_or_default(),
            created_at: d.created_at,
            last_entry_id: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel feed: GET /channels/{id}/feed.json
//
// {
//   "channel": { "id": 9, "field1": "Light", "field2": "Outside Temperature",
//                "last_entry_id": 10872213, ... },
//   "feeds":   [ { "created_at": "...", "entry_id": 10872114,
//                  "field1": "203", "field2": "17.26" }, ... ]
// }
//
// Field values are aligned positionally with the channel's field names.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Feed {
    pub channel: FeedChannel,
    #[serde(default)]
    pub feeds: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedChannel {
    pub id: i64,
    /// Absent on channels that never recorded anything.
    #[serde(default)]
    pub last_entry_id: Option<i64>,
    #[serde(flatten)]
    pub fields: FieldSlots<String>,
}

impl FeedChannel {
    /// High-water entry id reported by the upstream (0 when unreported).
    pub fn high_water(&self) -> i64 {
        self.last_entry_id.unwrap_or(0)
    }

    /// `(slot index, name)` for every slot with a non-empty field name.
    pub fn named_fields(&self) -> impl Iterator<Item = (usize, &str)> {
        self.fields
            .iter()
            .enumerate()
            .filter_map(|(i, name)| match name {
                Some(n) if !n.trim().is_empty() => Some((i, n.as_str())),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedEntry {
    pub entry_id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: FieldSlots<RawValue>,
}

impl FeedEntry {
    /// The raw value recorded in `slot`, if the entry carries one.
    pub fn value(&self, slot: usize) -> Option<String> {
        self.fields.get(slot).cloned().map(RawValue::into_text)
    }
}

/// The eight `field1`..`field8` keys shared by feed channel and feed entries.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSlots<T> {
    pub field1: Option<T>,
    pub field2: Option<T>,
    pub field3: Option<T>,
    pub field4: Option<T>,
    pub field5: Option<T>,
    pub field6: Option<T>,
    pub field7: Option<T>,
    pub field8: Option<T>,
}

impl<T> FieldSlots<T> {
    pub fn get(&self, slot: usize) -> Option<&T> {
        match slot {
            0 => self.field1.as_ref(),
            1 => self.field2.as_ref(),
            2 => self.field3.as_ref(),
            3 => self.field4.as_ref(),
            4 => self.field5.as_ref(),
            5 => self.field6.as_ref(),
            6 => self.field7.as_ref(),
            7 => self.field8.as_ref(),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&T>> {
        (0..FIELD_SLOTS).map(move |i| self.get(i))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

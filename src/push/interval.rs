use std::{fmt, time::Duration};

use anyhow::anyhow;

/// The forwarding intervals the scheduler runs a timer for. Subscriptions with
/// any other `push_interval` are never picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PushInterval(i32);

impl PushInterval {
    pub const ALL: [PushInterval; 12] = [
        PushInterval(1),
        PushInterval(3),
        PushInterval(5),
        PushInterval(10),
        PushInterval(30),
        PushInterval(60),
        PushInterval(2 * 60),
        PushInterval(3 * 60),
        PushInterval(5 * 60),
        PushInterval(24 * 60),
        PushInterval(2 * 24 * 60),
        PushInterval(3 * 24 * 60),
    ];

    pub fn minutes(self) -> i32 {
        self.0
    }

    pub fn period(self) -> Duration {
        Duration::from_secs(self.0 as u64 * 60)
    }
}

impl TryFrom<i32> for PushInterval {
    type Error = anyhow::Error;

    fn try_from(minutes: i32) -> anyhow::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|i| i.0 == minutes)
            .ok_or_else(|| anyhow!("unsupported push interval: {minutes} minutes"))
    }
}

impl fmt::Display for PushInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

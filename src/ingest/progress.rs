use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};

/// Live counters of the ingestion pipeline, shared by every fetch task.
///
/// All fields are atomics so concurrent tasks can bump them without locking.
/// Counters are cumulative over the process lifetime.
#[derive(Debug, Default)]
pub struct Progress {
    channels_running: AtomicBool,
    sensors_running: AtomicBool,
    sensors_progress: AtomicU8,
    new_channels: AtomicU64,
    new_sensors: AtomicU64,
    new_values: AtomicU64,
    /// Unix millis of the last completed cycle, 0 if none yet.
    last_cycle_at: AtomicI64,
}

/// Point-in-time copy of [`Progress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub channels_running: bool,
    pub sensors_running: bool,
    /// Share of channels processed in the current (or last) value phase, 0–100.
    pub sensors_progress: u8,
    pub new_channels: u64,
    pub new_sensors: u64,
    pub new_values: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Which phase a [`RunningGuard`] flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovery,
    Values,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `phase` as running until the returned guard is dropped.
    pub fn enter(&self, phase: Phase) -> RunningGuard<'_> {
        self.flag(phase).store(true, Ordering::Release);
        if phase == Phase::Values {
            self.sensors_progress.store(0, Ordering::Relaxed);
        }
        RunningGuard { progress: self, phase }
    }

    fn flag(&self, phase: Phase) -> &AtomicBool {
        match phase {
            Phase::Discovery => &self.channels_running,
            Phase::Values => &self.sensors_running,
        }
    }

    /// Records `done` out of `total` channels finished in the value phase.
    ///
    /// Tasks report out of order, so the percentage only ever rises until
    /// the next [`Phase::Values`] resets it.
    pub fn set_value_progress(&self, done: usize, total: usize) {
        let pct = if total == 0 {
            100
        } else {
            ((done.min(total) as f64 * 100.0) / total as f64).round() as u8
        };
        self.sensors_progress.fetch_max(pct, Ordering::Relaxed);
    }

    pub fn add_channels(&self, n: u64) {
        self.new_channels.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_sensors(&self, n: u64) {
        self.new_sensors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_values(&self, n: u64) {
        self.new_values.fetch_add(n, Ordering::Relaxed);
    }

    pub fn cycle_completed(&self, at: DateTime<Utc>) {
        self.last_cycle_at.store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let last = self.last_cycle_at.load(Ordering::Acquire);
        ProgressSnapshot {
            channels_running: self.channels_running.load(Ordering::Acquire),
            sensors_running: self.sensors_running.load(Ordering::Acquire),
            sensors_progress: self.sensors_progress.load(Ordering::Relaxed),
            new_channels: self.new_channels.load(Ordering::Relaxed),
            new_sensors: self.new_sensors.load(Ordering::Relaxed),
            new_values: self.new_values.load(Ordering::Relaxed),
            last_cycle_at: (last != 0)
                .then(|| DateTime::from_timestamp_millis(last))
                .flatten(),
        }
    }
}

/// Clears the running flag of its phase on drop, including on early return.
#[derive(Debug)]
pub struct RunningGuard<'a> {
    progress: &'a Progress,
    phase: Phase,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.progress.flag(self.phase).store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn fresh_progress_is_idle() {
        let s = Progress::new().snapshot();
        assert!(!s.channels_running);
        assert!(!s.sensors_running);
        assert_eq!(s.new_values, 0);
        assert_eq!(s.last_cycle_at, None);
    }

    #[test]
    fn guard_clears_flag_on_drop() {
        let p = Progress::new();
        {
            let _g = p.enter(Phase::Discovery);
            assert!(p.snapshot().channels_running);
            assert!(!p.snapshot().sensors_running);
        }
        assert!(!p.snapshot().channels_running);
    }

    #[test]
    fn value_progress_is_rounded_percentage() {
        let p = Progress::new();
        p.set_value_progress(1, 3);
        assert_eq!(p.snapshot().sensors_progress, 33);
        p.set_value_progress(2, 3);
        assert_eq!(p.snapshot().sensors_progress, 67);
        p.set_value_progress(3, 3);
        assert_eq!(p.snapshot().sensors_progress, 100);
        p.set_value_progress(0, 0);
        assert_eq!(p.snapshot().sensors_progress, 100);
    }

    #[test]
    fn late_report_does_not_lower_percentage() {
        let p = Progress::new();
        let _g = p.enter(Phase::Values);
        p.set_value_progress(3, 3);
        p.set_value_progress(2, 3);
        assert_eq!(p.snapshot().sensors_progress, 100);
    }

    #[test]
    fn entering_value_phase_resets_percentage() {
        let p = Progress::new();
        p.set_value_progress(3, 3);
        let _g = p.enter(Phase::Values);
        assert_eq!(p.snapshot().sensors_progress, 0);
    }

    #[test]
    fn last_cycle_roundtrips_through_millis() {
        let p = Progress::new();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        p.cycle_completed(at);
        assert_eq!(p.snapshot().last_cycle_at, Some(at));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let p = Arc::new(Progress::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    p.add_values(1);
                    p.add_sensors(1);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let s = p.snapshot();
        assert_eq!(s.new_values, 16_000);
        assert_eq!(s.new_sensors, 16_000);
    }
}

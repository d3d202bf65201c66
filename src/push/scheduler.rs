use std::sync::Arc;

use tokio::{
    task::JoinSet,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    executor::{PushExecutor, PushOutcome},
    interval::PushInterval,
};
use crate::db::store::Store;

/// One timer per supported interval. Each timer only serves subscriptions
/// configured with its interval, and a slow bucket never delays another.
pub struct PushScheduler {
    store: Arc<dyn Store>,
    executor: PushExecutor,
}

impl PushScheduler {
    pub fn new(store: Arc<dyn Store>, executor: PushExecutor) -> Self {
        Self { store, executor }
    }

    /// Spawns every interval loop. The returned set finishes once `cancel`
    /// fires and each loop has completed its current tick.
    pub fn spawn(self, cancel: CancellationToken) -> JoinSet<()> {
        let shared = Arc::new(self);
        let mut loops = JoinSet::new();
        for interval in PushInterval::ALL {
            let scheduler = shared.clone();
            let cancel = cancel.clone();
            loops.spawn(async move { scheduler.run_interval(interval, cancel).await });
        }
        info!(timers = PushInterval::ALL.len(), "Push scheduler started");
        loops
    }

    async fn run_interval(&self, interval: PushInterval, cancel: CancellationToken) {
        let period = interval.period();
        // First tick one full period after start, like a fixed-rate timer.
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(interval).await;
        }

        info!(interval = %interval, "Push timer stopped");
    }

    /// Processes every active subscription of `interval` once, in order.
    pub async fn tick(&self, interval: PushInterval) {
        let due = match self.store.due_pushes(interval).await {
            Ok(due) => due,
            Err(e) => {
                error!(interval = %interval, error = %e, "Failed to load push subscriptions");
                return;
            }
        };

        let mut pushed = 0usize;
        for sub in &due {
            match self.executor.push_one(sub).await {
                Ok(PushOutcome::Pushed { .. }) => pushed += 1,
                Ok(PushOutcome::NothingToPush) => {}
                Err(e) => warn!(interval = %interval, setting_id = sub.id, error = %e, "Push failed"),
            }
        }

        if !due.is_empty() {
            info!(interval = %interval, subscriptions = due.len(), pushed, "Push tick done");
        }
    }
}

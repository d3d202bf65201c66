use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    admission::Admission,
    discovery::{DiscoveryFetcher, PageOutcome},
    progress::{Phase, Progress},
    values::ValueFetcher,
};
use crate::{config::IngestSettings, db::store::Store, source::SourceApi};

/// Discovery stops launching pages after this many page failures in a row,
/// so an unreachable directory cannot keep the phase spinning forever.
const MAX_CONSECUTIVE_PAGE_FAILURES: u32 = 10;

/// How a discovery pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Directory pages launched.
    pub pages: u32,
    /// Launching stopped on repeated page failures before an empty page
    /// was seen, so the directory may not have been walked to the end.
    pub abandoned: bool,
}

/// Drives ingestion cycles: one discovery pass over the channel directory,
/// then one value pass over every known channel, then a pause.
pub struct IngestService {
    store: Arc<dyn Store>,
    discovery: DiscoveryFetcher,
    values: ValueFetcher,
    progress: Arc<Progress>,
    settings: IngestSettings,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn SourceApi>,
        progress: Arc<Progress>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            discovery: DiscoveryFetcher::new(store.clone(), source.clone(), progress.clone()),
            values: ValueFetcher::new(store.clone(), source, progress.clone()),
            store,
            progress,
            settings,
        }
    }

    /// Runs cycles until `cancel` fires. Spawn this via `tokio::spawn`.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            max_in_flight = self.settings.max_in_flight,
            cycle_interval_secs = self.settings.cycle_interval.as_secs(),
            "Ingestion loop started"
        );

        loop {
            self.run_cycle(&cancel).await;

            if !pause(&cancel, self.settings.cycle_interval).await {
                break;
            }
        }

        info!("Ingestion loop stopped");
    }

    /// One full cycle. Returns early, after in-flight tasks finish, if
    /// `cancel` fires. A cycle whose discovery was abandoned still runs the
    /// value phase but is not recorded as completed.
    pub async fn run_cycle(&self, cancel: &CancellationToken) {
        let discovery = self.discovery_phase(cancel).await;
        info!(pages = discovery.pages, abandoned = discovery.abandoned, "Channel discovery finished");

        if !pause(cancel, self.settings.phase_pause).await {
            return;
        }

        let channels = self.value_phase(cancel).await;
        info!(channels, "Value ingestion finished");

        if cancel.is_cancelled() {
            return;
        }
        if discovery.abandoned {
            warn!("Discovery did not reach the end of the directory; cycle not marked complete");
            return;
        }
        self.progress.cycle_completed(Utc::now());
    }

    /// Launches directory pages 1, 2, 3, … until some task sees an empty
    /// page, then waits for the pages still in flight.
    pub async fn discovery_phase(&self, cancel: &CancellationToken) -> DiscoveryReport {
        let _running = self.progress.enter(Phase::Discovery);
        let exhausted = Arc::new(AtomicBool::new(false));
        let failures_in_row = Arc::new(AtomicU32::new(0));
        let mut admission = Admission::new(self.settings.max_in_flight);
        let mut page = 0u32;
        let mut abandoned = false;

        while !exhausted.load(Ordering::Acquire) && !cancel.is_cancelled() {
            if failures_in_row.load(Ordering::Relaxed) >= MAX_CONSECUTIVE_PAGE_FAILURES {
                error!(page, "Channel directory keeps failing; abandoning discovery pass");
                abandoned = true;
                break;
            }

            page += 1;
            let discovery = self.discovery.clone();
            let exhausted = exhausted.clone();
            let failures_in_row = failures_in_row.clone();

            admission
                .spawn(async move {
                    match discovery.fetch_page(page).await {
                        Ok(PageOutcome::Exhausted) => exhausted.store(true, Ordering::Release),
                        Ok(PageOutcome::Fetched { .. }) => failures_in_row.store(0, Ordering::Relaxed),
                        Err(e) => {
                            failures_in_row.fetch_add(1, Ordering::Relaxed);
                            warn!(page, error = %e, "Channel page failed; skipping");
                        }
                    }
                })
                .await;
        }

        admission.drain().await;
        DiscoveryReport {
            pages: page,
            abandoned: abandoned && !exhausted.load(Ordering::Acquire),
        }
    }

    /// Launches one value fetch per stored channel. Returns the number of
    /// channels launched.
    pub async fn value_phase(&self, cancel: &CancellationToken) -> usize {
        let _running = self.progress.enter(Phase::Values);

        let channels = match self.store.list_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                error!(error = %e, "Failed to load channels; skipping value pass");
                return 0;
            }
        };

        let total = channels.len();
        let done = Arc::new(AtomicUsize::new(0));
        let mut admission = Admission::new(self.settings.max_in_flight);
        let mut launched = 0;
        self.progress.set_value_progress(0, total);

        for channel in channels {
            if cancel.is_cancelled() {
                break;
            }
            launched += 1;

            let values = self.values.clone();
            let progress = self.progress.clone();
            let done = done.clone();

            admission
                .spawn(async move {
                    if let Err(e) = values.fetch_channel(&channel).await {
                        warn!(channel_id = channel.id, error = %e, "Channel value fetch failed; skipping");
                    }
                    let finished = done.fetch_add(1, Ordering::AcqRel) + 1;
                    progress.set_value_progress(finished, total);
                })
                .await;
        }

        admission.drain().await;
        if launched == total {
            self.progress.set_value_progress(total, total);
        }
        launched
    }
}

/// Sleeps for `period` unless cancelled first. Returns `false` on cancel.
async fn pause(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = time::sleep(period) => true,
    }
}

use std::{future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{error, warn};

/// Bounds the number of concurrently running fetch tasks.
///
/// The launching loop calls [`Admission::spawn`] once per unit of work; the
/// call waits until fewer than `max_in_flight` tasks are running. Each task
/// owns its permit, so finishing a task immediately admits the next one.
#[derive(Debug)]
pub struct Admission {
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    max_in_flight: usize,
}

impl Admission {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            tasks: JoinSet::new(),
            max_in_flight,
        }
    }

    /// Waits for a free slot, then spawns `task` into it.
    pub async fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap_finished();

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "Admission semaphore closed; task dropped");
                return;
            }
        };

        self.tasks.spawn(async move {
            let _permit = permit;
            task.await;
        });
    }

    /// Tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Waits until every spawned task has finished.
    pub async fn drain(&mut self) {
        while let Some(res) = self.tasks.join_next().await {
            log_join_failure(res);
        }
    }

    fn reap_finished(&mut self) {
        while let Some(res) = self.tasks.try_join_next() {
            log_join_failure(res);
        }
    }
}

fn log_join_failure(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        warn!(error = %e, "Fetch task aborted");
    }
}

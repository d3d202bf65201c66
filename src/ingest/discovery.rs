use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use super::progress::Progress;
use crate::{
    db::{
        models::Channel,
        store::{Store, StoreError},
    },
    source::SourceApi,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The directory has no channels on this page: discovery is done.
    Exhausted,
    Fetched { channels: usize, new_channels: u64 },
}

/// Walks the public channel directory one page at a time and records channels
/// not seen before.
#[derive(Clone)]
pub struct DiscoveryFetcher {
    store: Arc<dyn Store>,
    source: Arc<dyn SourceApi>,
    progress: Arc<Progress>,
}

impl DiscoveryFetcher {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn SourceApi>, progress: Arc<Progress>) -> Self {
        Self { store, source, progress }
    }

    /// Fetches `page` and inserts every channel not already stored.
    ///
    /// Errors cover the page as a whole (transport, decode); a failing row is
    /// logged and skipped.
    pub async fn fetch_page(&self, page: u32) -> Result<PageOutcome> {
        let listing = self.source.channel_page(page).await?;
        if listing.channels.is_empty() {
            debug!(page, "Channel directory exhausted");
            return Ok(PageOutcome::Exhausted);
        }

        let channels = listing.channels.len();
        let mut new_channels = 0;

        for descriptor in listing.channels {
            let id = descriptor.id;
            match self.store.channel_exists(id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(page, channel_id = id, error = %e, "Channel lookup failed");
                    continue;
                }
            }

            match self.store.insert_channel(&Channel::from(descriptor)).await {
                Ok(()) => new_channels += 1,
                Err(StoreError::Duplicate) => {
                    debug!(page, channel_id = id, "Channel inserted concurrently");
                }
                Err(e) => warn!(page, channel_id = id, error = %e, "Channel insert failed"),
            }
        }

        self.progress.add_channels(new_channels);
        debug!(page, channels, new_channels, "Channel page done");

        Ok(PageOutcome::Fetched { channels, new_channels })
    }
}

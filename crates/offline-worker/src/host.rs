//! State shared by every generation of one origin.

use std::sync::Arc;

use offline_net::Fetcher;
use tokio::sync::{mpsc, RwLock};

use crate::{CacheStorage, Clients, WorkerEvent};

/// Cache storage, pages, and network shared across generations.
#[derive(Clone)]
pub struct WorkerHost {
    /// Cache storage.
    pub caches: Arc<RwLock<CacheStorage>>,

    /// Clients.
    pub clients: Arc<RwLock<Clients>>,

    /// Network access.
    pub fetcher: Arc<dyn Fetcher>,

    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHost {
    /// Create a host over `storage`.
    pub fn new(
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                caches: Arc::new(RwLock::new(storage)),
                clients: Arc::new(RwLock::new(Clients::new())),
                fetcher,
                events,
            },
            event_rx,
        )
    }

    /// Emit a diagnostic event. A dropped receiver is fine.
    pub(crate) fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost").finish_non_exhaustive()
    }
}

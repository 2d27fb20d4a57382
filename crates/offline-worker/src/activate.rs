//! Activation handler: garbage-collect superseded stores, then take over pages.

use tracing::info;

use crate::{Worker, WorkerEvent};

/// What an activation did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivationReport {
    /// Stores deleted because their name was not the current tag.
    pub deleted: Vec<String>,
    /// Pages whose controller changed.
    pub claimed: usize,
}

impl Worker {
    /// Delete every store but this generation's, then claim all clients.
    ///
    /// Afterwards the set of stores is exactly `{version}`.
    pub async fn activate(&self) -> ActivationReport {
        info!(version = %self.version, "Activating");

        let deleted = self.retire_other_stores().await;

        let claimed = self.host.clients.write().await.claim(&self.version);
        info!(version = %self.version, claimed, "Activation complete");
        self.host.emit(WorkerEvent::ClientsClaimed {
            version: self.version.clone(),
            count: claimed,
        });

        ActivationReport { deleted, claimed }
    }

    /// Make this generation's store the only one. Returns the deleted names.
    pub(crate) async fn retire_other_stores(&self) -> Vec<String> {
        let mut caches = self.host.caches.write().await;
        caches.open(self.version.as_str());

        let stale: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|name| name != self.version.as_str())
            .collect();

        for name in &stale {
            info!(cache = %name, "Deleting superseded cache");
            caches.delete(name);
            self.host.emit(WorkerEvent::CacheDeleted { name: name.clone() });
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheStorage, CacheVersion, ClientMessage, ClientType, WorkerHost, WorkerSettings};
    use offline_common::OfflineConfig;
    use offline_net::testing::ScriptedFetcher;
    use std::sync::Arc;
    use url::Url;

    fn worker_with(storage: CacheStorage, tag: &str) -> (Worker, tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>) {
        let scope = Url::parse("https://app.example/").unwrap();
        let (host, events) = WorkerHost::new(storage, Arc::new(ScriptedFetcher::new(&scope)));
        let settings = WorkerSettings::from_config(&OfflineConfig::default()).unwrap();
        (Worker::new(CacheVersion::new(tag).unwrap(), settings, host), events)
    }

    #[tokio::test]
    async fn test_activate_deletes_other_generations() {
        let mut storage = CacheStorage::new();
        storage.open("app-v0");
        storage.open("app-v1");
        storage.open("app-v2");
        storage.open("unrelated");
        let (worker, mut events) = worker_with(storage, "app-v2");

        let report = worker.activate().await;

        assert_eq!(report.deleted, vec!["app-v0", "app-v1", "unrelated"]);
        assert_eq!(worker.host().caches.read().await.keys(), vec!["app-v2"]);

        let mut deleted_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, WorkerEvent::CacheDeleted { .. }) {
                deleted_events += 1;
            }
        }
        assert_eq!(deleted_events, 3);
    }

    #[tokio::test]
    async fn test_activate_leaves_exactly_current_store_when_missing() {
        let mut storage = CacheStorage::new();
        storage.open("app-v1");
        let (worker, _events) = worker_with(storage, "app-v2");

        worker.activate().await;
        assert_eq!(worker.host().caches.read().await.keys(), vec!["app-v2"]);
    }

    #[tokio::test]
    async fn test_activate_claims_open_pages() {
        let (worker, _events) = worker_with(CacheStorage::new(), "app-v1");
        let (id, mut rx) = worker
            .host()
            .clients
            .write()
            .await
            .connect(Url::parse("https://app.example/").unwrap(), ClientType::Window);

        let report = worker.activate().await;

        assert_eq!(report.claimed, 1);
        let clients = worker.host().clients.read().await;
        assert_eq!(clients.get(id).unwrap().controller.as_ref(), Some(worker.version()));
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientMessage::ControllerChange {
                version: worker.version().clone()
            }
        );
    }
}

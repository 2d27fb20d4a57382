//! Install handler: all-or-nothing pre-caching of the manifest.

use futures::future::try_join_all;
use offline_net::{Request, ResponseType};
use tracing::{debug, info, warn};

use crate::{CacheEntry, Worker, WorkerError};

/// What an install stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    /// Entries written to the generation's store.
    pub stored: usize,
    /// Bytes written.
    pub bytes: u64,
}

impl Worker {
    /// Fetch every manifest resource and store them under this generation's
    /// tag. Nothing is written unless every fetch succeeds. On success the
    /// worker asks to skip the waiting phase.
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        info!(
            version = %self.version,
            resources = self.settings.manifest.len(),
            "Installing"
        );

        let fetcher = &self.host.fetcher;
        let fetches = self.settings.manifest.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = fetcher
                .fetch(&request)
                .await
                .map_err(|e| WorkerError::InstallFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

            if !response.ok() || response.response_type == ResponseType::Error {
                return Err(WorkerError::InstallFailed {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }

            debug!(url = %url, status = %response.status, "Manifest resource fetched");
            Ok(CacheEntry::from_response(&request, &response))
        });

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(version = %self.version, error = %e, "Install failed");
                return Err(e);
            }
        };

        let report = InstallReport {
            stored: entries.len(),
            bytes: entries.iter().map(CacheEntry::size).sum(),
        };

        let written = self
            .host
            .caches
            .write()
            .await
            .put_all(self.version.as_str(), entries);
        if let Err(e) = written {
            warn!(version = %self.version, error = %e, "Install failed writing cache");
            return Err(e.into());
        }

        info!(
            version = %self.version,
            stored = report.stored,
            bytes = report.bytes,
            "Install complete"
        );
        self.skip_waiting();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheStorage, CacheVersion, RequestKey, WorkerHost, WorkerSettings};
    use offline_common::OfflineConfig;
    use offline_net::testing::ScriptedFetcher;
    use std::sync::Arc;
    use url::Url;

    fn setup(manifest: &[&str], storage: CacheStorage) -> (Worker, Arc<ScriptedFetcher>) {
        let scope = Url::parse("https://app.example/").unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(&scope));
        let (host, _events) = WorkerHost::new(storage, fetcher.clone());
        let config = OfflineConfig {
            scope,
            manifest: manifest.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let settings = WorkerSettings::from_config(&config).unwrap();
        let worker = Worker::new(CacheVersion::new("app-v1").unwrap(), settings, host);
        (worker, fetcher)
    }

    #[tokio::test]
    async fn test_install_stores_every_resource() {
        let (worker, fetcher) = setup(&["/a.html", "/b.js"], CacheStorage::new());
        fetcher
            .route("https://app.example/a.html", 200, "<p>a</p>")
            .route("https://app.example/b.js", 200, "b()");

        let report = worker.install().await.unwrap();
        assert_eq!(report.stored, 2);
        assert!(worker.skip_waiting_requested());

        let caches = worker.host().caches.read().await;
        let store = caches.get("app-v1").unwrap();
        assert_eq!(store.len(), 2);
        let a = RequestKey::get(&Url::parse("https://app.example/a.html").unwrap());
        assert_eq!(&store.match_request(&a).unwrap().body[..], b"<p>a</p>");
    }

    #[tokio::test]
    async fn test_install_accepts_cross_origin_entries() {
        let (worker, fetcher) = setup(&["/", "https://cdn.example/lib.js"], CacheStorage::new());
        fetcher
            .route("https://app.example/", 200, "root")
            .route("https://cdn.example/lib.js", 200, "lib");

        assert_eq!(worker.install().await.unwrap().stored, 2);
    }

    #[tokio::test]
    async fn test_install_fails_when_any_fetch_fails() {
        let (worker, fetcher) = setup(&["/a.html", "/b.js"], CacheStorage::new());
        fetcher
            .route("https://app.example/a.html", 200, "a")
            .fail("https://app.example/b.js");

        let err = worker.install().await.unwrap_err();
        assert!(matches!(err, WorkerError::InstallFailed { ref url, .. } if url == "https://app.example/b.js"));
        assert!(!worker.skip_waiting_requested());
        assert!(!worker.host().caches.read().await.has("app-v1"));
    }

    #[tokio::test]
    async fn test_install_fails_on_error_status() {
        let (worker, fetcher) = setup(&["/a.html", "https://cdn.example/gone.js"], CacheStorage::new());
        fetcher.route("https://app.example/a.html", 200, "a");

        let err = worker.install().await.unwrap_err();
        assert!(err.to_string().contains("404"));
        assert!(!worker.host().caches.read().await.has("app-v1"));
    }

    #[tokio::test]
    async fn test_install_fails_over_quota() {
        let (worker, fetcher) = setup(&["/big.bin"], CacheStorage::new().with_quota(Some(4)));
        fetcher.route("https://app.example/big.bin", 200, "0123456789");

        let err = worker.install().await.unwrap_err();
        assert!(matches!(err, WorkerError::Cache(crate::CacheError::QuotaExceeded { .. })));
        assert!(!worker.skip_waiting_requested());
    }
}

//! Fetch interception policy.
//!
//! Applied to every request, in order:
//!
//! 1. non-GET requests and bypassed URLs pass through untouched
//! 2. a cache hit is served at once while a background fetch refreshes it
//! 3. a miss goes to the network; cacheable answers are stored
//! 4. a network failure falls back to the cached root document for
//!    navigations, or a synthesized offline response otherwise

use http::{Method, StatusCode};
use offline_net::{Request, Response};
use tracing::{debug, trace, warn};

use crate::{CacheEntry, CacheError, CacheVersion, RequestKey, WaitUntil, Worker, WorkerEvent, WorkerHost};

/// Why a request was left to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Not a GET.
    Method,
    /// URL matched a bypass pattern.
    Bypass,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Served from a store.
    Cache,
    /// Fetched by the worker.
    Network,
    /// Not handled by the worker; fetched directly.
    Passthrough,
    /// Cached root document, served to a navigation while offline.
    OfflineDocument,
    /// Synthesized offline notice.
    OfflineFallback,
}

/// A response produced by the worker.
#[derive(Debug)]
pub struct Responded {
    pub response: Response,
    pub source: ResponseSource,
    /// Background work the event still owns.
    pub wait_until: WaitUntil,
}

/// Result of [`Worker::handle_fetch`].
#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker did not respond; the host performs the default fetch.
    Passthrough(PassthroughReason),
    /// The worker responded.
    Respond(Responded),
}

impl Worker {
    /// Run the interception policy for one request.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if request.method != Method::GET {
            trace!(url = %request.url, method = %request.method, "Ignoring non-GET request");
            return FetchOutcome::Passthrough(PassthroughReason::Method);
        }

        if let Some(pattern) = self.settings.bypass.matching(&request.url) {
            debug!(url = %request.url, pattern = %pattern.pattern, "Bypassing cache for live data");
            return FetchOutcome::Passthrough(PassthroughReason::Bypass);
        }

        let mut wait_until = WaitUntil::new();
        let key = RequestKey::of(request);

        let cached = self.host.caches.read().await.match_request(&key);
        if let Some(entry) = cached {
            debug!(url = %request.url, "Serving from cache");
            wait_until.spawn(revalidate(
                self.host.clone(),
                self.version.clone(),
                request.clone(),
            ));
            return FetchOutcome::Respond(Responded {
                response: entry.to_response(),
                source: ResponseSource::Cache,
                wait_until,
            });
        }

        match self.host.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    // Snapshot before the caller gets the response.
                    let entry = CacheEntry::from_response(request, &response);
                    let host = self.host.clone();
                    let version = self.version.clone();
                    wait_until.spawn(async move { store(&host, &version, entry).await });
                } else {
                    trace!(
                        url = %request.url,
                        status = %response.status,
                        response_type = %response.response_type,
                        "Response not cacheable"
                    );
                }
                FetchOutcome::Respond(Responded {
                    response,
                    source: ResponseSource::Network,
                    wait_until,
                })
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network unavailable");
                let (response, source) = self.offline_fallback(request).await;
                FetchOutcome::Respond(Responded {
                    response,
                    source,
                    wait_until,
                })
            }
        }
    }

    async fn offline_fallback(&self, request: &Request) -> (Response, ResponseSource) {
        if request.is_navigation() {
            let key = RequestKey::get(&self.settings.offline_document);
            let document = self.host.caches.read().await.match_request(&key);
            if let Some(entry) = document {
                debug!(url = %request.url, "Offline: serving cached root document");
                return (entry.to_response(), ResponseSource::OfflineDocument);
            }
            warn!(
                document = %self.settings.offline_document,
                "Offline: root document is not cached"
            );
        }

        debug!(url = %request.url, status = %self.settings.offline_status, "Offline: synthesizing response");
        let response = Response::synthesized(
            request.url.clone(),
            self.settings.offline_status,
            self.settings.offline_body.clone(),
        );
        (response, ResponseSource::OfflineFallback)
    }
}

/// Refresh a cached entry. Failures are reported as events and otherwise dropped.
async fn revalidate(host: WorkerHost, version: CacheVersion, request: Request) {
    match host.fetcher.fetch(&request).await {
        Ok(response) if response.status == StatusCode::OK => {
            let entry = CacheEntry::from_response(&request, &response);
            store(&host, &version, entry).await;
        }
        Ok(response) => {
            trace!(url = %request.url, status = %response.status, "Revalidation not stored");
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Background revalidation failed");
            host.emit(WorkerEvent::RevalidationFailed {
                url: request.url.to_string(),
                error: e.to_string(),
            });
        }
    }
}

/// Write to the generation's store. A failed write is logged and dropped.
///
/// The store must still exist: once activation of a newer generation has
/// deleted it, late writes are discarded.
async fn store(host: &WorkerHost, version: &CacheVersion, entry: CacheEntry) {
    let url = entry.url.to_string();
    let result = host.caches.write().await.put(version.as_str(), entry);
    match result {
        Ok(()) => {
            trace!(cache = %version, url = %url, "Cached response");
            host.emit(WorkerEvent::EntryStored {
                cache: version.to_string(),
                url,
            });
        }
        Err(e @ CacheError::NotFound(_)) => {
            debug!(cache = %version, url = %url, "Store retired, dropping cache write");
            host.emit(WorkerEvent::CacheWriteFailed {
                url,
                error: e.to_string(),
            });
        }
        Err(e) => {
            warn!(cache = %version, url = %url, error = %e, "Dropping cache write");
            host.emit(WorkerEvent::CacheWriteFailed {
                url,
                error: e.to_string(),
            });
        }
    }
}

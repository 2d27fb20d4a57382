//! One cache generation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use http::StatusCode;
use offline_common::OfflineConfig;
use offline_net::BypassList;
use tracing::{debug, info};
use url::Url;

use crate::{CacheVersion, WorkerError, WorkerEvent, WorkerHost};

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// Per-generation policy inputs.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Resources cached at install time, in order.
    pub manifest: Vec<Url>,
    /// Requests that never touch the cache.
    pub bypass: BypassList,
    /// Root document served to navigations while offline.
    pub offline_document: Url,
    /// Body of the synthesized offline response.
    pub offline_body: String,
    /// Status of the synthesized offline response.
    pub offline_status: StatusCode,
}

impl WorkerSettings {
    /// Build settings from the configuration file model.
    pub fn from_config(config: &OfflineConfig) -> Result<Self, WorkerError> {
        config.validate()?;
        let offline_status = StatusCode::from_u16(config.offline_status).map_err(|e| {
            WorkerError::StateError(format!("invalid offline status: {e}"))
        })?;

        Ok(Self {
            manifest: config.manifest_urls()?,
            bypass: BypassList::from_substrings(&config.bypass),
            offline_document: config.resolve(&config.offline_document)?,
            offline_body: config.offline_body.clone(),
            offline_status,
        })
    }
}

/// A cache generation: its tag, its policy, and its lifecycle state.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    pub(crate) version: CacheVersion,
    pub(crate) settings: Arc<WorkerSettings>,
    pub(crate) host: WorkerHost,
    state: Mutex<WorkerState>,
    skip_waiting: AtomicBool,
}

impl Worker {
    /// Create a worker for `version`.
    pub fn new(version: CacheVersion, settings: WorkerSettings, host: WorkerHost) -> Self {
        debug!(version = %version, "Worker created");
        Self {
            id: WorkerId::new(),
            version,
            settings: Arc::new(settings),
            host,
            state: Mutex::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn host(&self) -> &WorkerHost {
        &self.host
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set state.
    pub(crate) fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        debug!(version = %self.version, ?state, "Worker state changed");
        self.host.emit(WorkerEvent::StateChange {
            version: self.version.clone(),
            worker_id: self.id,
            state,
        });
    }

    /// Ask to become active without waiting for pages to close.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            info!(version = %self.version, "Skip waiting requested");
            self.host.emit(WorkerEvent::SkipWaitingRequested {
                version: self.version.clone(),
            });
        }
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state() == WorkerState::Redundant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheStorage;
    use offline_net::testing::ScriptedFetcher;

    fn host() -> WorkerHost {
        let scope = Url::parse("https://app.example/").unwrap();
        WorkerHost::new(CacheStorage::new(), Arc::new(ScriptedFetcher::new(&scope))).0
    }

    #[test]
    fn test_settings_from_config() {
        let config = OfflineConfig {
            scope: Url::parse("https://app.example/formation/").unwrap(),
            ..Default::default()
        };
        let settings = WorkerSettings::from_config(&config).unwrap();

        assert_eq!(settings.manifest.len(), config.manifest.len());
        assert_eq!(
            settings.offline_document.as_str(),
            "https://app.example/formation/index.html"
        );
        assert_eq!(settings.offline_status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(settings.bypass.len(), 2);
    }

    #[test]
    fn test_worker_creation() {
        let settings = WorkerSettings::from_config(&OfflineConfig::default()).unwrap();
        let worker = Worker::new(CacheVersion::new("app-v1").unwrap(), settings, host());

        assert_eq!(worker.state(), WorkerState::Parsed);
        assert!(!worker.is_active());
        assert!(!worker.skip_waiting_requested());
    }

    #[test]
    fn test_worker_state_transitions() {
        let settings = WorkerSettings::from_config(&OfflineConfig::default()).unwrap();
        let worker = Worker::new(CacheVersion::new("app-v1").unwrap(), settings, host());

        worker.set_state(WorkerState::Installing);
        assert_eq!(worker.state(), WorkerState::Installing);

        worker.set_state(WorkerState::Activated);
        assert!(worker.is_active());
    }

    #[test]
    fn test_skip_waiting_emits_once() {
        let scope = Url::parse("https://app.example/").unwrap();
        let (host, mut events) =
            WorkerHost::new(CacheStorage::new(), Arc::new(ScriptedFetcher::new(&scope)));
        let settings = WorkerSettings::from_config(&OfflineConfig::default()).unwrap();
        let worker = Worker::new(CacheVersion::new("app-v1").unwrap(), settings, host);

        worker.skip_waiting();
        worker.skip_waiting();

        assert!(worker.skip_waiting_requested());
        assert!(matches!(
            events.try_recv().unwrap(),
            WorkerEvent::SkipWaitingRequested { .. }
        ));
        assert!(events.try_recv().is_err());
    }
}

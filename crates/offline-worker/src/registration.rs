//! Registration: the installing, waiting and active generations of one scope.

use std::sync::Arc;

use offline_net::{NetError, Request};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    ActivationReport, CacheVersion, FetchOutcome, InstallReport, MessageEvent, MessageOutcome,
    Responded, ResponseSource, WaitUntil, Worker, WorkerError, WorkerHost, WorkerSettings,
    WorkerState,
};

/// Which generation a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSlot {
    Installing,
    Waiting,
    Active,
}

/// A scope's registration.
#[derive(Debug)]
pub struct Registration {
    scope: Url,
    host: WorkerHost,
    installing: Option<Arc<Worker>>,
    waiting: Option<Arc<Worker>>,
    active: Option<Arc<Worker>>,
}

impl Registration {
    /// Create an empty registration for `scope`.
    pub fn new(scope: Url, host: WorkerHost) -> Self {
        Self {
            scope,
            host,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn host(&self) -> &WorkerHost {
        &self.host
    }

    pub fn installing(&self) -> Option<&Arc<Worker>> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&Arc<Worker>> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&Arc<Worker>> {
        self.active.as_ref()
    }

    /// Tag of the generation currently serving pages.
    pub fn controller_version(&self) -> Option<&CacheVersion> {
        self.active.as_ref().map(|w| w.version())
    }

    /// Create a worker that shares this registration's host.
    pub fn new_worker(&self, version: CacheVersion, settings: WorkerSettings) -> Arc<Worker> {
        Arc::new(Worker::new(version, settings, self.host.clone()))
    }

    /// Register a generation: install it, then activate it if nothing is
    /// active yet or it asked to skip waiting.
    ///
    /// Registering the tag that is already active is a no-op. On failure the
    /// active generation keeps control.
    pub async fn register(
        &mut self,
        version: CacheVersion,
        settings: WorkerSettings,
    ) -> Result<WorkerSlot, WorkerError> {
        if self.controller_version() == Some(&version) {
            debug!(version = %version, "Version already active");
            return Ok(WorkerSlot::Active);
        }

        let worker = self.new_worker(version, settings);
        self.install(worker.clone()).await?;

        if self.active.is_none() || worker.skip_waiting_requested() {
            self.activate_waiting().await?;
            Ok(WorkerSlot::Active)
        } else {
            Ok(WorkerSlot::Waiting)
        }
    }

    /// Resume a generation whose store survived a restart, without
    /// reinstalling. Returns `false` if no store exists for `version`.
    ///
    /// Stores of other generations are deleted, as on activation.
    pub async fn resume(&mut self, version: CacheVersion, settings: WorkerSettings) -> bool {
        if !self.host.caches.read().await.has(version.as_str()) {
            return false;
        }

        let worker = self.new_worker(version, settings);
        let deleted = worker.retire_other_stores().await;
        worker.set_state(WorkerState::Activated);
        info!(
            version = %worker.version(),
            deleted = deleted.len(),
            "Resumed persisted generation"
        );
        if let Some(old) = self.active.replace(worker) {
            old.set_state(WorkerState::Redundant);
        }
        true
    }

    /// Run `worker`'s install. On success it becomes the waiting generation,
    /// replacing any previous one.
    pub async fn install(&mut self, worker: Arc<Worker>) -> Result<InstallReport, WorkerError> {
        worker.set_state(WorkerState::Installing);
        self.installing = Some(worker.clone());

        let result = worker.install().await;
        self.installing = None;

        match result {
            Ok(report) => {
                worker.set_state(WorkerState::Installed);
                if let Some(old) = self.waiting.replace(worker) {
                    debug!(version = %old.version(), "Replacing waiting worker");
                    old.set_state(WorkerState::Redundant);
                }
                Ok(report)
            }
            Err(e) => {
                warn!(
                    version = %worker.version(),
                    controller = ?self.controller_version().map(CacheVersion::as_str),
                    "Install rejected, keeping current controller"
                );
                worker.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Promote the waiting generation. The previous one becomes redundant.
    pub async fn activate_waiting(&mut self) -> Result<ActivationReport, WorkerError> {
        let worker = self
            .waiting
            .take()
            .ok_or_else(|| WorkerError::NotFound("no waiting worker".into()))?;

        worker.set_state(WorkerState::Activating);
        if let Some(old) = self.active.take() {
            old.set_state(WorkerState::Redundant);
        }

        let report = worker.activate().await;
        worker.set_state(WorkerState::Activated);
        info!(version = %worker.version(), scope = %self.scope, "Worker activated");
        self.active = Some(worker);
        Ok(report)
    }

    /// Deliver a control message. `skipWaiting` sent to the waiting
    /// generation promotes it.
    pub async fn post_message(
        &mut self,
        slot: WorkerSlot,
        event: MessageEvent,
    ) -> Result<MessageOutcome, WorkerError> {
        let worker = match slot {
            WorkerSlot::Installing => self.installing.as_ref(),
            WorkerSlot::Waiting => self.waiting.as_ref(),
            WorkerSlot::Active => self.active.as_ref(),
        }
        .ok_or_else(|| WorkerError::NotFound(format!("no {slot:?} worker")))?;

        let outcome = worker.handle_message(event)?;
        if outcome == MessageOutcome::SkipWaitingRequested && slot == WorkerSlot::Waiting {
            self.activate_waiting().await?;
        }
        Ok(outcome)
    }

    /// Route a page's request through the active generation. Requests it
    /// leaves alone, and every request when nothing is active, go straight to
    /// the network.
    pub async fn dispatch_fetch(&self, request: &Request) -> Result<Responded, NetError> {
        if let Some(worker) = &self.active {
            if let FetchOutcome::Respond(responded) = worker.handle_fetch(request).await {
                return Ok(responded);
            }
        }

        let response = self.host.fetcher.fetch(request).await?;
        Ok(Responded {
            response,
            source: ResponseSource::Passthrough,
            wait_until: WaitUntil::new(),
        })
    }

    /// Drop every generation. Stores are left in place.
    pub fn unregister(&mut self) {
        for worker in [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
        {
            worker.set_state(WorkerState::Redundant);
        }
        info!(scope = %self.scope, "Unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheStorage;
    use offline_common::OfflineConfig;
    use offline_net::testing::ScriptedFetcher;
    use serde_json::json;

    fn setup() -> (Registration, Arc<ScriptedFetcher>, WorkerSettings) {
        let scope = Url::parse("https://app.example/").unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(&scope));
        fetcher
            .route("https://app.example/index.html", 200, "<html>v1</html>")
            .route("https://app.example/app.js", 200, "app()");
        let (host, _events) = WorkerHost::new(CacheStorage::new(), fetcher.clone());
        let config = OfflineConfig {
            scope: scope.clone(),
            manifest: vec!["./index.html".into(), "./app.js".into()],
            ..Default::default()
        };
        let settings = WorkerSettings::from_config(&config).unwrap();
        (Registration::new(scope, host), fetcher, settings)
    }

    fn tag(s: &str) -> CacheVersion {
        CacheVersion::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_first_register_activates() {
        let (mut reg, _fetcher, settings) = setup();

        let slot = reg.register(tag("app-v1"), settings).await.unwrap();

        assert_eq!(slot, WorkerSlot::Active);
        assert_eq!(reg.controller_version().unwrap(), "app-v1");
        assert!(reg.active().unwrap().is_active());
        assert!(reg.waiting().is_none());
        assert!(reg.installing().is_none());
    }

    #[tokio::test]
    async fn test_register_same_version_is_noop() {
        let (mut reg, fetcher, settings) = setup();
        reg.register(tag("app-v1"), settings.clone()).await.unwrap();
        let calls = fetcher.total_calls();

        reg.register(tag("app-v1"), settings).await.unwrap();
        assert_eq!(fetcher.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_upgrade_replaces_previous_generation() {
        let (mut reg, _fetcher, settings) = setup();
        reg.register(tag("app-v1"), settings.clone()).await.unwrap();
        let old = reg.active().unwrap().clone();

        reg.register(tag("app-v2"), settings).await.unwrap();

        assert_eq!(reg.controller_version().unwrap(), "app-v2");
        assert!(old.is_redundant());
        assert_eq!(reg.host().caches.read().await.keys(), vec!["app-v2"]);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_controller() {
        let (mut reg, fetcher, settings) = setup();
        reg.register(tag("app-v1"), settings.clone()).await.unwrap();

        fetcher.fail("https://app.example/app.js");
        let err = reg.register(tag("app-v2"), settings).await.unwrap_err();

        assert!(matches!(err, WorkerError::InstallFailed { .. }));
        assert_eq!(reg.controller_version().unwrap(), "app-v1");
        assert!(reg.waiting().is_none());
        let caches = reg.host().caches.read().await;
        assert!(caches.has("app-v1"));
        assert!(!caches.has("app-v2"));
    }

    #[tokio::test]
    async fn test_skip_waiting_message_promotes_waiting() {
        let (mut reg, _fetcher, settings) = setup();
        reg.register(tag("app-v1"), settings.clone()).await.unwrap();

        let worker = reg.new_worker(tag("app-v2"), settings);
        reg.install(worker.clone()).await.unwrap();
        assert_eq!(reg.waiting().unwrap().state(), WorkerState::Installed);
        assert_eq!(reg.controller_version().unwrap(), "app-v1");

        let outcome = reg
            .post_message(WorkerSlot::Waiting, MessageEvent::new(json!("skipWaiting")))
            .await
            .unwrap();

        assert_eq!(outcome, MessageOutcome::SkipWaitingRequested);
        assert_eq!(reg.controller_version().unwrap(), "app-v2");
        assert!(worker.is_active());
    }

    #[tokio::test]
    async fn test_post_message_to_empty_slot() {
        let (mut reg, _fetcher, _settings) = setup();
        let err = reg
            .post_message(WorkerSlot::Active, MessageEvent::new(json!("skipWaiting")))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatch_without_worker_goes_to_network() {
        let (reg, fetcher, _settings) = setup();
        let request = Request::parse("https://app.example/app.js").unwrap();

        let responded = reg.dispatch_fetch(&request).await.unwrap();
        assert_eq!(responded.source, ResponseSource::Passthrough);
        assert_eq!(fetcher.calls("https://app.example/app.js"), 1);

        fetcher.set_online(false);
        assert!(reg.dispatch_fetch(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_bypass_goes_to_network() {
        let (mut reg, fetcher, settings) = setup();
        reg.register(tag("app-v1"), settings).await.unwrap();
        fetcher.route("https://db.firebaseio.com/x.json", 200, "{}");

        let request = Request::parse("https://db.firebaseio.com/x.json").unwrap();
        let responded = reg.dispatch_fetch(&request).await.unwrap();
        assert_eq!(responded.source, ResponseSource::Passthrough);
    }

    #[tokio::test]
    async fn test_resume_requires_store() {
        let (mut reg, fetcher, settings) = setup();
        assert!(!reg.resume(tag("app-v1"), settings.clone()).await);
        assert!(reg.controller_version().is_none());

        reg.host().caches.write().await.open("app-v1");
        assert!(reg.resume(tag("app-v1"), settings).await);
        assert_eq!(reg.controller_version().unwrap(), "app-v1");
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_resume_deletes_other_generations() {
        let (mut reg, _fetcher, settings) = setup();
        {
            let mut caches = reg.host().caches.write().await;
            caches.open("app-v0");
            caches.open("app-v1");
            caches.open("app-v2");
        }

        assert!(reg.resume(tag("app-v1"), settings).await);
        assert_eq!(reg.host().caches.read().await.keys(), vec!["app-v1"]);
    }

    #[tokio::test]
    async fn test_unregister() {
        let (mut reg, _fetcher, settings) = setup();
        reg.register(tag("app-v1"), settings).await.unwrap();
        let worker = reg.active().unwrap().clone();

        reg.unregister();

        assert!(reg.controller_version().is_none());
        assert!(worker.is_redundant());
        assert!(reg.host().caches.read().await.has("app-v1"));
    }
}

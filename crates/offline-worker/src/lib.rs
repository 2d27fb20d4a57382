//! # Offline Worker
//!
//! Versioned offline cache controller for a hosted web application.
//!
//! ## Features
//!
//! - **Version registry**: one immutable tag names the current generation and its store
//! - **Install**: all-or-nothing pre-caching of the resource manifest
//! - **Activation**: garbage-collects superseded stores, then claims every open page
//! - **Fetch interception**: stale-while-revalidate with offline fallbacks
//! - **Control channel**: `skipWaiting` and `GET_VERSION` messages
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     ├── installing (Worker)
//!     ├── waiting (Worker)
//!     └── active (Worker) ──► handle_fetch / handle_message
//!
//! WorkerHost (shared by every generation)
//!     ├── CacheStorage ── Cache ── RequestKey → CacheEntry
//!     ├── Clients
//!     ├── Fetcher
//!     └── WorkerEvent channel
//! ```

use offline_common::OfflineError;
use thiserror::Error;

pub mod activate;
pub mod clients;
pub mod fetch;
pub mod host;
pub mod install;
pub mod lifetime;
pub mod message;
pub mod registration;
pub mod storage;
pub mod version;
pub mod worker;

pub use activate::ActivationReport;
pub use clients::{Client, ClientId, ClientMatchOptions, ClientMessage, ClientType, Clients};
pub use fetch::{FetchOutcome, PassthroughReason, Responded, ResponseSource};
pub use host::WorkerHost;
pub use install::InstallReport;
pub use lifetime::WaitUntil;
pub use message::{ControlMessage, MessageEvent, MessageOutcome, ReplyPort, VersionReply};
pub use registration::{Registration, WorkerSlot};
pub use storage::{Cache, CacheEntry, CacheError, CacheStats, CacheStorage, RequestKey};
pub use version::{CacheVersion, BUILD_VERSION};
pub use worker::{Worker, WorkerId, WorkerSettings, WorkerState};

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Install failed for {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] OfflineError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ==================== Events ====================

/// Diagnostics emitted by workers. Delivery never blocks and nobody has to listen.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Lifecycle state changed.
    StateChange {
        version: CacheVersion,
        worker_id: WorkerId,
        state: WorkerState,
    },
    /// The worker asked to skip the waiting phase.
    SkipWaitingRequested { version: CacheVersion },
    /// A superseded store was deleted during activation.
    CacheDeleted { name: String },
    /// Open pages were taken over by a generation.
    ClientsClaimed { version: CacheVersion, count: usize },
    /// A runtime response was written to the store.
    EntryStored { cache: String, url: String },
    /// A runtime cache write was dropped.
    CacheWriteFailed { url: String, error: String },
    /// A background refresh of a cached entry failed.
    RevalidationFailed { url: String, error: String },
}

//! Page contexts controlled by a generation.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;

use crate::{CacheVersion, WorkerError};

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Messages delivered to a page.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// A new generation now serves this page.
    ControllerChange { version: CacheVersion },
    /// Message posted by the worker.
    Message(Value),
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: ClientId,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Generation currently serving this client.
    pub controller: Option<CacheVersion>,

    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl Client {
    /// Post message to client.
    pub fn post_message(&self, message: ClientMessage) -> Result<(), WorkerError> {
        self.tx
            .send(message)
            .map_err(|_| WorkerError::StateError(format!("client {} is gone", self.id.0)))
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a page. The receiver gets every message posted to it.
    pub fn connect(
        &mut self,
        url: Url,
        client_type: ClientType,
    ) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::new();
        debug!(client = id.0, url = %url, "Client connected");
        self.clients.insert(
            id,
            Client {
                id,
                url,
                client_type,
                controller: None,
                tx,
            },
        );
        (id, rx)
    }

    /// Disconnect a page.
    pub fn disconnect(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Get a client by ID.
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Match all clients.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    /// Make `version` the controller of every connected client. Returns the
    /// number of clients whose controller changed.
    pub fn claim(&mut self, version: &CacheVersion) -> usize {
        let mut changed = 0;
        for client in self.clients.values_mut() {
            if client.controller.as_ref() == Some(version) {
                continue;
            }
            client.controller = Some(version.clone());
            changed += 1;
            let message = ClientMessage::ControllerChange {
                version: version.clone(),
            };
            if client.tx.send(message).is_err() {
                trace!(client = client.id.0, "Client receiver dropped");
            }
        }
        changed
    }

    /// Number of clients served by `version`.
    pub fn controlled_by(&self, version: &CacheVersion) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller.as_ref() == Some(version))
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

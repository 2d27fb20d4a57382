//! Control channel between pages and the worker.
//!
//! Two messages are understood:
//!
//! - `"skipWaiting"` or `{"command": "skipWaiting"}`: activate without waiting
//! - `{"type": "GET_VERSION"}`: reply `{"version": <tag>}` on the first port
//!
//! Anything else is ignored.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{Worker, WorkerError};

const SKIP_WAITING: &str = "skipWaiting";
const GET_VERSION: &str = "GET_VERSION";

/// A recognized control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Activate the waiting generation now.
    SkipWaiting,
    /// Ask for the current version tag.
    GetVersion,
}

impl ControlMessage {
    /// Recognize a message payload. Unknown payloads yield `None`.
    pub fn parse(data: &Value) -> Option<Self> {
        match data {
            Value::String(s) if s == SKIP_WAITING => Some(Self::SkipWaiting),
            Value::Object(map) => {
                if map.get("command").and_then(Value::as_str) == Some(SKIP_WAITING) {
                    Some(Self::SkipWaiting)
                } else if map.get("type").and_then(Value::as_str) == Some(GET_VERSION) {
                    Some(Self::GetVersion)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Wire form of the message.
    pub fn to_value(self) -> Value {
        match self {
            Self::SkipWaiting => json!({ "command": SKIP_WAITING }),
            Self::GetVersion => json!({ "type": GET_VERSION }),
        }
    }
}

/// Reply to `GET_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

/// Caller-supplied reply channel.
pub type ReplyPort = mpsc::UnboundedSender<Value>;

/// An inbound message with its transferred ports.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: Value,
    pub ports: Vec<ReplyPort>,
}

impl MessageEvent {
    /// Message without reply ports.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ports: Vec::new(),
        }
    }

    /// Message carrying one reply port. Returns the receiving end.
    pub fn with_port(data: Value) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                data,
                ports: vec![tx],
            },
            rx,
        )
    }
}

/// What handling a message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Not a control message.
    Ignored,
    /// The worker asked to skip waiting.
    SkipWaitingRequested,
    /// A version reply was posted.
    VersionReplied,
}

impl Worker {
    /// Handle one control message.
    ///
    /// `GET_VERSION` without a reply port, or with a closed one, is an error.
    pub fn handle_message(&self, event: MessageEvent) -> Result<MessageOutcome, WorkerError> {
        let Some(message) = ControlMessage::parse(&event.data) else {
            trace!(data = %event.data, "Ignoring unrecognized message");
            return Ok(MessageOutcome::Ignored);
        };

        match message {
            ControlMessage::SkipWaiting => {
                self.skip_waiting();
                Ok(MessageOutcome::SkipWaitingRequested)
            }
            ControlMessage::GetVersion => {
                let port = event.ports.first().ok_or_else(|| {
                    WorkerError::StateError("GET_VERSION sent without a reply port".into())
                })?;
                let reply = VersionReply {
                    version: self.version.to_string(),
                };
                let value = serde_json::to_value(&reply).map_err(|e| {
                    WorkerError::StateError(format!("failed to encode version reply: {e}"))
                })?;
                port.send(value)
                    .map_err(|_| WorkerError::StateError("reply port closed".into()))?;
                debug!(version = %self.version, "Version reply posted");
                Ok(MessageOutcome::VersionReplied)
            }
        }
    }
}

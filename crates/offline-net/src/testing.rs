//! Scripted in-memory [`Fetcher`] for deterministic tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use url::{Origin, Url};

use crate::{Fetcher, NetError, Request, Response, ResponseType};

#[derive(Debug, Clone)]
enum Route {
    Respond {
        status: StatusCode,
        body: Bytes,
        response_type: Option<ResponseType>,
    },
    Fail,
}

/// Serves canned responses keyed by URL. Unknown URLs answer 404.
pub struct ScriptedFetcher {
    origin: Origin,
    routes: Mutex<HashMap<String, Route>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
    online: AtomicBool,
}

impl ScriptedFetcher {
    /// Create a fetcher for the application served at `scope`.
    pub fn new(scope: &Url) -> Self {
        Self {
            origin: scope.origin(),
            routes: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Answer `url` with `status` and `body`.
    pub fn route(&self, url: &str, status: u16, body: impl Into<Bytes>) -> &Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route::Respond {
                status,
                body: body.into(),
                response_type: None,
            },
        );
        self
    }

    /// Answer `url` with a fixed response type regardless of origin.
    pub fn route_typed(
        &self,
        url: &str,
        status: u16,
        response_type: ResponseType,
        body: impl Into<Bytes>,
    ) -> &Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route::Respond {
                status,
                body: body.into(),
                response_type: Some(response_type),
            },
        );
        self
    }

    /// Make `url` fail at the transport level.
    pub fn fail(&self, url: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Fail);
        self
    }

    /// Hold requests for `url` for `delay` before answering.
    pub fn delay(&self, url: &str, delay: Duration) -> &Self {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
        self
    }

    /// Toggle the whole network.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of requests made for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    /// Number of requests made overall.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.url.to_string();
        self.calls.lock().unwrap().push(key.clone());

        let delay = self.delays.lock().unwrap().get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(key));
        }

        let route = self.routes.lock().unwrap().get(&key).cloned();
        let natural_type = if request.url.origin() == self.origin {
            ResponseType::Basic
        } else {
            ResponseType::Opaque
        };

        match route {
            Some(Route::Respond {
                status,
                body,
                response_type,
            }) => Ok(Response::new(
                request.url.clone(),
                status,
                response_type.unwrap_or(natural_type),
                body,
            )),
            Some(Route::Fail) => Err(NetError::Unreachable(key)),
            None => Ok(Response::new(
                request.url.clone(),
                StatusCode::NOT_FOUND,
                natural_type,
                Bytes::new(),
            )),
        }
    }
}

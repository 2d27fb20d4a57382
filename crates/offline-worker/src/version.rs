//! Cache generation tag.

use std::fmt;
use std::sync::Arc;

use offline_common::OfflineConfig;

use crate::WorkerError;

/// Tag baked in at compile time. Set `OFFLINE_CACHE_VERSION` when building to
/// cut a new generation.
pub const BUILD_VERSION: &str = match option_env!("OFFLINE_CACHE_VERSION") {
    Some(tag) => tag,
    None => concat!("offline-shell-v", env!("CARGO_PKG_VERSION")),
};

/// Immutable identifier of one cache generation. It names the generation's
/// store and is the answer to version queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheVersion(Arc<str>);

impl CacheVersion {
    /// Create a version from a tag.
    pub fn new(tag: impl AsRef<str>) -> Result<Self, WorkerError> {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            return Err(WorkerError::StateError(
                "cache version tag must not be empty".to_string(),
            ));
        }
        Ok(Self(Arc::from(tag)))
    }

    /// The compile-time tag.
    pub fn build() -> Self {
        Self(Arc::from(BUILD_VERSION))
    }

    /// Deploy-time tag from the config when pinned, the build tag otherwise.
    pub fn resolve(config: &OfflineConfig) -> Result<Self, WorkerError> {
        match &config.version {
            Some(tag) => Self::new(tag),
            None => Ok(Self::build()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for CacheVersion {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for CacheVersion {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

//! Offline Shell configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::{OfflineError, Result, ResultExt};

/// Offline Shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Cache generation tag pinned at deploy time (overrides the build-time tag)
    pub version: Option<String>,

    /// Base URL of the hosted application
    pub scope: Url,

    /// Resources that must be cached at install time
    pub manifest: Vec<String>,

    /// URL substrings that bypass the cache entirely
    pub bypass: Vec<String>,

    /// Root document served to navigations while offline
    pub offline_document: String,

    /// Body of the synthesized offline response
    pub offline_body: String,

    /// Status of the synthesized offline response
    pub offline_status: u16,

    /// Directory holding persisted cache stores
    pub storage_dir: PathBuf,

    /// Total storage quota in bytes
    pub quota_bytes: Option<u64>,

    /// User agent string for network requests
    pub user_agent: String,

    /// Network request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            version: None,
            scope: default_scope(),
            manifest: vec![
                "./".to_string(),
                "./index.html".to_string(),
                "./manifest.json".to_string(),
                "./icons/icon-192x192.png".to_string(),
                "./icons/icon-512x512.png".to_string(),
                "https://cdn.tailwindcss.com".to_string(),
                "https://unpkg.com/firebase@10.7.1/firebase-app-compat.js".to_string(),
                "https://unpkg.com/firebase@10.7.1/firebase-database-compat.js".to_string(),
            ],
            bypass: vec!["firebaseio.com".to_string(), "googleapis.com".to_string()],
            offline_document: "./index.html".to_string(),
            offline_body: "Hors ligne".to_string(),
            offline_status: 503,
            storage_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("offline-shell"),
            quota_bytes: None,
            user_agent: format!("OfflineShell/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
        }
    }
}

fn default_scope() -> Url {
    Url::parse("http://localhost:8080/").expect("static scope URL is valid")
}

impl OfflineConfig {
    /// Load a configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .config_context(format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.scope.scheme(), "http" | "https") {
            return Err(OfflineError::config(format!(
                "scope must be an http(s) URL, got {}",
                self.scope
            )));
        }
        if !(100..=599).contains(&self.offline_status) {
            return Err(OfflineError::config(format!(
                "offline_status {} is not an HTTP status",
                self.offline_status
            )));
        }
        if self.bypass.iter().any(|p| p.is_empty()) {
            return Err(OfflineError::config("bypass patterns must not be empty"));
        }
        Ok(())
    }

    /// Resolve a manifest-style entry against the scope.
    pub fn resolve(&self, entry: &str) -> Result<Url> {
        Ok(self.scope.join(entry)?)
    }

    /// Resolve every manifest entry, preserving order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.manifest.iter().map(|entry| self.resolve(entry)).collect()
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-shell")
            .join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OfflineConfig::default();
        assert_eq!(config.offline_status, 503);
        assert_eq!(config.offline_body, "Hors ligne");
        assert_eq!(config.bypass, vec!["firebaseio.com", "googleapis.com"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_manifest_resolution() {
        let config = OfflineConfig {
            scope: Url::parse("https://app.example/formation/").unwrap(),
            manifest: vec!["./".into(), "./index.html".into(), "https://cdn.example/x.js".into()],
            ..Default::default()
        };

        let urls: Vec<String> = config
            .manifest_urls()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://app.example/formation/",
                "https://app.example/formation/index.html",
                "https://cdn.example/x.js",
            ]
        );
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "version": "app-v2", "offline_status": 504 }"#).unwrap();

        let config = OfflineConfig::load(&path).unwrap();
        assert_eq!(config.version.as_deref(), Some("app-v2"));
        assert_eq!(config.offline_status, 504);
        assert_eq!(config.offline_document, "./index.html");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = OfflineConfig {
            quota_bytes: Some(1024),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = OfflineConfig::load(&path).unwrap();
        assert_eq!(loaded.quota_bytes, Some(1024));
        assert_eq!(loaded.manifest, config.manifest);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = OfflineConfig {
            offline_status: 42,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OfflineError::Config { .. })));

        let config = OfflineConfig {
            scope: Url::parse("file:///tmp/app/").unwrap(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Command-line host for the offline cache controller.
//!
//! Drives one registration against a real network and a persistent store
//! directory, so a deployment can be pre-cached and checked from a shell.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the manifest and activate the configured generation
//! offline-shell install
//!
//! # Fetch through the controller (relative URLs resolve against the scope)
//! offline-shell fetch ./index.html --navigate
//!
//! # Show the active tag and the stores on disk
//! offline-shell version
//! offline-shell caches
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use offline_common::{init_logging, LogConfig, LogFormat, OfflineConfig, OptionExt};
use offline_net::{Destination, HttpFetcher, LoaderConfig, Request};
use offline_worker::{
    CacheStorage, CacheVersion, MessageEvent, Registration, VersionReply, WorkerHost,
    WorkerSettings, WorkerSlot,
};
use serde_json::json;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "offline-shell")]
#[command(about = "Versioned offline cache for a hosted web application")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-cache the manifest and activate the configured generation
    Install,

    /// Fetch a URL through the active generation
    Fetch {
        /// Absolute URL, or a path relative to the scope
        url: String,
        /// Treat the request as a document navigation
        #[arg(long)]
        navigate: bool,
        /// Request destination (image, script, style, ...)
        #[arg(long)]
        destination: Option<Destination>,
        /// Write the response body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the version tag of the active generation
    Version {
        /// Print the reply as JSON
        #[arg(long)]
        json: bool,
    },

    /// List persisted stores
    Caches,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format));

    let config_path = cli.config.unwrap_or_else(OfflineConfig::default_path);

    match cli.command {
        Commands::InitConfig { force } => init_config(&config_path, force),
        command => {
            let config = load_config(&config_path)?;
            run(command, config).await
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<OfflineConfig> {
    if path.exists() {
        let config = OfflineConfig::load(path)
            .inspect_err(|e| warn!(category = e.category(), "Configuration rejected"))
            .with_context(|| format!("loading {}", path.display()))?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    } else {
        info!(path = %path.display(), "No configuration file, using defaults");
        Ok(OfflineConfig::default())
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    OfflineConfig::default().save(path)?;
    println!("Configuration written to: {}", path.display());
    Ok(())
}

async fn run(command: Commands, config: OfflineConfig) -> anyhow::Result<()> {
    let version = CacheVersion::resolve(&config)?;
    let settings = WorkerSettings::from_config(&config)?;

    let storage = CacheStorage::load(&config.storage_dir)
        .await
        .with_context(|| format!("opening {}", config.storage_dir.display()))?
        .with_quota(config.quota_bytes);

    let loader = LoaderConfig {
        user_agent: config.user_agent.clone(),
        default_timeout: std::time::Duration::from_secs(config.request_timeout_secs),
        ..LoaderConfig::default()
    };
    let fetcher = Arc::new(HttpFetcher::new(&config.scope, loader)?);
    let (host, mut events) = WorkerHost::new(storage, fetcher);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "Worker event");
        }
    });
    let mut registration = Registration::new(config.scope.clone(), host);

    match command {
        Commands::Install => {
            registration.register(version.clone(), settings).await?;
            let caches = registration.host().caches.read().await;
            let stored = caches.get(version.as_str()).ok_or_not_found(version.as_str())?.len();
            println!("Installed {version}: {stored} entries");
        }

        Commands::Fetch {
            url,
            navigate,
            destination,
            output,
        } => {
            if !registration.resume(version.clone(), settings).await {
                info!(version = %version, "Generation not installed, fetching directly");
            }

            let url = config.resolve(&url)?;
            let mut request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            if let Some(destination) = destination {
                request = request.destination(destination);
            }

            let responded = registration.dispatch_fetch(&request).await?;
            println!(
                "{} {} ({:?}, {} bytes)",
                responded.response.status,
                responded.response.url,
                responded.source,
                responded.response.body().len()
            );
            if let Some(path) = output {
                tokio::fs::write(&path, responded.response.body()).await?;
                println!("Body written to: {}", path.display());
            }
            responded.wait_until.settled().await;
        }

        Commands::Version { json } => {
            if !registration.resume(version.clone(), settings).await {
                bail!("{version} is not installed");
            }
            let (event, mut replies) = MessageEvent::with_port(json!({ "type": "GET_VERSION" }));
            registration.post_message(WorkerSlot::Active, event).await?;
            let reply = replies.recv().await.context("no version reply")?;
            if json {
                println!("{reply}");
            } else {
                let reply: VersionReply = serde_json::from_value(reply)?;
                println!("{}", reply.version);
            }
        }

        Commands::Caches => {
            let caches = registration.host().caches.read().await;
            for name in caches.keys() {
                if let Some(cache) = caches.get(&name) {
                    let marker = if version == name.as_str() { "*" } else { " " };
                    println!("{marker} {name}: {} entries, {} bytes", cache.len(), cache.size());
                }
            }
            match caches.quota_bytes() {
                Some(quota) => println!("Total: {} / {quota} bytes", caches.total_bytes()),
                None => println!("Total: {} bytes", caches.total_bytes()),
            }
        }

        Commands::InitConfig { .. } => unreachable!("handled before storage is opened"),
    }

    registration.host().caches.write().await.persist().await?;
    Ok(())
}

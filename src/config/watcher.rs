//! Configuration file watcher for hot reload.
//!
//! # Design Decisions
//! - Every change is re-parsed and re-validated; an invalid file is logged and
//!   the running configuration stays in place
//! - An empty read is a writer mid-truncate and is skipped
//! - A reload identical to the last one forwarded is dropped, since one save
//!   usually fires several modify events

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::ServiceConfig;

/// Watches one config file and forwards validated reloads.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ServiceConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver that validated configs arrive on.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ServiceConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching. Keep the returned watcher alive for as long as updates
    /// are wanted; dropping it stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, updates } = self;
        let reload_path = path.clone();
        let mut last: Option<ServiceConfig> = None;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match reload(&reload_path) {
                        Ok(Some(config)) if last.as_ref() != Some(&config) => {
                            tracing::info!(path = ?reload_path, service = %config.service.name, "Config file reloaded");
                            last = Some(config.clone());
                            let _ = updates.send(config);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(path = ?reload_path, error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

/// `Ok(None)` when the file is momentarily empty.
fn reload(path: &Path) -> Result<Option<ServiceConfig>, ConfigError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    parse_config(&content).map(Some)
}

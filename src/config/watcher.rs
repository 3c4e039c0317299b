//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself, so editors that save by
//! writing a temporary file and renaming it over the original still trigger a reload.
//! `notify` reports a single save as a burst of events; a reload is only forwarded when the
//! parsed configuration differs from the last one applied.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

/// Watches one configuration file and sends every new, validated config.
pub struct ConfigWatcher {
    path: PathBuf,
    reloader: Reloader,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, which currently holds `current`.
    ///
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path, current: &ProxyConfig) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let reloader = Reloader {
            path: path.to_path_buf(),
            file_name: path.file_name().map(OsString::from),
            update_tx,
            last_applied: fingerprint(current),
        };

        (
            Self {
                path: path.to_path_buf(),
                reloader,
            },
            update_rx,
        )
    }

    /// Start watching. Keep the returned watcher alive for as long as reloads are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut reloader = self.reloader;
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| reloader.handle(res),
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, dir = ?dir, "Config watcher started");
        Ok(watcher)
    }
}

struct Reloader {
    path: PathBuf,
    file_name: Option<OsString>,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
    last_applied: Option<String>,
}

impl Reloader {
    fn handle(&mut self, res: notify::Result<Event>) {
        match res {
            Ok(event) if self.is_relevant(&event) => self.reload(),
            Ok(_) => {}
            Err(e) => tracing::error!(error = ?e, "Watch error"),
        }
    }

    fn is_relevant(&self, event: &Event) -> bool {
        (event.kind.is_modify() || event.kind.is_create())
            && event
                .paths
                .iter()
                .any(|p| p.file_name().map(OsString::from) == self.file_name)
    }

    /// Load the file and forward it unless it matches what was last applied.
    fn reload(&mut self) {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Failed to reload config, keeping current configuration");
                return;
            }
        };

        let print = fingerprint(&config);
        if print.is_some() && print == self.last_applied {
            tracing::debug!(path = ?self.path, "Config unchanged, skipping reload");
            return;
        }

        tracing::info!(path = ?self.path, backends = config.backends.len(), "Config file changed, reloading");
        if self.update_tx.send(config).is_ok() {
            self.last_applied = print;
        }
    }
}

fn fingerprint(config: &ProxyConfig) -> Option<String> {
    serde_json::to_string(config).ok()
}

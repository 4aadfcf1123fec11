//! Configuration file watcher for hot reload.
//!
//! Reloaded snapshots replace the shared config atomically. Values read
//! lazily (the dashboard URL) pick the change up immediately; everything
//! already resolved into the server descriptor keeps its startup value.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::load_config;
use crate::config::SharedConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    shared: SharedConfig,
}

impl ConfigWatcher {
    pub fn new(path: &Path, shared: SharedConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            shared,
        }
    }

    /// Start watching the file. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let shared = self.shared.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        reload(&path, &shared);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Load `path` and publish it, keeping the current snapshot on failure.
pub fn reload(path: &Path, shared: &SharedConfig) -> bool {
    match load_config(path) {
        Ok(new_config) => {
            let old = shared.load();
            if old.kubeconfig != new_config.kubeconfig
                || old.authentication != new_config.authentication
                || old.webhook != new_config.webhook
            {
                tracing::warn!("Cluster or authentication settings changed; restart to apply them");
            }
            shared.store(Arc::new(new_config));
            tracing::info!(path = %path.display(), "Configuration reloaded");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Config;
    use arc_swap::ArcSwap;
    use std::fs;

    #[test]
    fn test_reload_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        fs::write(&path, "dashboard-url = \"https://ui.example.com/index.html\"\n").unwrap();

        let shared: SharedConfig = Arc::new(ArcSwap::from_pointee(Config::default()));
        assert!(reload(&path, &shared));
        assert_eq!(shared.load().dashboard_url, "https://ui.example.com/index.html");
    }

    #[test]
    fn test_reload_keeps_snapshot_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        fs::write(&path, "dashboard-url = [").unwrap();

        let shared: SharedConfig = Arc::new(ArcSwap::from_pointee(Config::default()));
        assert!(!reload(&path, &shared));
        assert_eq!(*shared.load_full(), Config::default());
    }
}

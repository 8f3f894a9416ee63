//! Configuration file watcher for hot reload.
//!
//! Reloads the configuration when the file changes or on SIGHUP and hands
//! the new, validated configuration to a callback. Invalid files are logged
//! and the current configuration stays in effect.

use crate::config::{load_config, Config};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Callback type for config reload.
pub type ReloadCallback = Box<dyn Fn(Config) + Send + Sync>;

/// Configuration file watcher.
pub struct ConfigWatcher {
    /// Path to the config file.
    config_path: PathBuf,
    /// Poll interval for backends that cannot deliver native events.
    poll_interval: Duration,
    /// Callback to invoke when config is reloaded.
    reload_callback: ReloadCallback,
}

impl ConfigWatcher {
    pub fn new(config_path: PathBuf, poll_interval: Duration, reload_callback: ReloadCallback) -> Self {
        Self {
            config_path,
            poll_interval,
            reload_callback,
        }
    }

    /// Get the path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Run until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(path = %self.config_path.display(), "config watcher starting");

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let _watcher = match self.watch(tx) {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(error = %e, "failed to watch config file, hot reload disabled");
                let _ = shutdown.recv().await;
                return;
            }
        };

        #[cfg(unix)]
        let mut sighup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, "failed to setup SIGHUP handler");
                    None
                }
            };

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    if self.should_reload(&event) {
                        self.try_reload();
                    }
                }

                _ = async {
                    #[cfg(unix)]
                    {
                        match sighup.as_mut() {
                            Some(sig) => sig.recv().await,
                            None => std::future::pending::<Option<()>>().await,
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    info!("received SIGHUP, reloading configuration");
                    self.try_reload();
                }

                _ = shutdown.recv() => {
                    info!("config watcher shutting down");
                    break;
                }
            }
        }
    }

    /// Start a filesystem watcher on the config file's directory.
    fn watch(&self, tx: mpsc::UnboundedSender<Event>) -> notify::Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default().with_poll_interval(self.poll_interval),
        )?;

        // Editors often replace the file, so watch the directory rather than the file.
        let directory = match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        watcher.watch(directory, RecursiveMode::NonRecursive)?;

        info!(directory = %directory.display(), "config watcher ready");
        Ok(watcher)
    }

    /// Check if this event should trigger a reload.
    fn should_reload(&self, event: &Event) -> bool {
        let is_our_file = event
            .paths
            .iter()
            .any(|p| p.file_name() == self.config_path.file_name());

        is_our_file && matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
    }

    /// Reload and apply the configuration, keeping the current one on error.
    fn try_reload(&self) {
        match load_config(&self.config_path) {
            Ok(config) => {
                info!(path = %self.config_path.display(), "configuration reloaded");
                (self.reload_callback)(config);
            }
            Err(e) => {
                error!(error = %e, "failed to reload config, keeping current");
            }
        }
    }
}

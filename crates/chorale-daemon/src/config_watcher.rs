//! Configuration file watcher for hot-reload support.
//!
//! Changes to `config.json` are picked up and the new `hub` section is handed
//! to the registry, which applies it to sessions created afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use chorale_core::config::Config;
use notify::Watcher;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info};

use crate::error::{DaemonError, Result};
use crate::registry::SessionRegistry;

const RELOAD_SETTLE_DELAY: Duration = Duration::from_millis(100);
const CONFIG_DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

pub struct ConfigWatcher {
    _watcher_thread: std::thread::JoinHandle<()>,
    _bridge_thread: std::thread::JoinHandle<()>,
}

/// Watch `config_path` on background threads, signalling `tx` after each
/// settled change.
pub fn spawn_config_watcher(
    config_path: PathBuf,
    tx: tokio_mpsc::UnboundedSender<()>,
) -> ConfigWatcher {
    let (sync_tx, sync_rx) = mpsc::channel::<()>();

    let watcher_thread = std::thread::spawn(move || {
        if let Err(e) = watch_config_file(&config_path, &sync_tx) {
            error!("Config watcher error: {e}");
        }
    });

    let bridge_thread = std::thread::spawn(move || {
        while sync_rx.recv().is_ok() {
            debug!("Config file changed, sending reload notification");
            std::thread::sleep(RELOAD_SETTLE_DELAY);
            if tx.send(()).is_err() {
                debug!("Config reload receiver dropped, stopping watcher");
                return;
            }
        }
        debug!("Config watcher channel closed");
    });

    ConfigWatcher {
        _watcher_thread: watcher_thread,
        _bridge_thread: bridge_thread,
    }
}

fn watch_config_file(config_path: &Path, tx: &mpsc::Sender<()>) -> Result<()> {
    let debounce = Arc::new(StdMutex::new(
        Instant::now()
            .checked_sub(CONFIG_DEBOUNCE_DURATION)
            .unwrap_or_else(Instant::now),
    ));
    let file_name = config_path.file_name().map(ToOwned::to_owned);

    let (watcher_tx, watcher_rx) = mpsc::channel();

    let mut watcher =
        notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) {
                    return;
                }
                if !event
                    .paths
                    .iter()
                    .any(|p| p.file_name().is_some() && p.file_name() == file_name.as_deref())
                {
                    return;
                }
                let Ok(mut last_event) = debounce.lock() else {
                    error!("[config_watcher] Debounce mutex poisoned, skipping event");
                    return;
                };
                let now = Instant::now();
                if now.duration_since(*last_event) > CONFIG_DEBOUNCE_DURATION {
                    *last_event = now;
                    let _ = watcher_tx.send(());
                }
            }
            Err(e) => error!("Watcher error: {e}"),
        })?;

    let parent = config_path.parent().ok_or_else(|| {
        DaemonError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Invalid config path",
        ))
    })?;
    watcher.watch(parent, notify::RecursiveMode::NonRecursive)?;
    info!("Watching config directory: {}", parent.display());

    while watcher_rx.recv().is_ok() {
        let _ = tx.send(());
    }

    Ok(())
}

/// Reload `config_path` into `registry` on every change until the watcher stops.
pub async fn run_config_reloader(config_path: PathBuf, registry: SessionRegistry) {
    let (reload_tx, mut reload_rx) = tokio_mpsc::unbounded_channel::<()>();
    let _watcher = spawn_config_watcher(config_path.clone(), reload_tx);

    while reload_rx.recv().await.is_some() {
        debug!("Config reload event received");
        reload(&config_path, &registry).await;
    }

    debug!("Config watcher task ended");
}

async fn reload(config_path: &Path, registry: &SessionRegistry) {
    match Config::load(config_path) {
        Ok(config) => {
            registry.update_config(config.hub).await;
            info!("Config reloaded successfully");
        }
        Err(e) => error!("Failed to reload config: {e}"),
    }
}

//! Filesystem watching with a single debounce timer.
//!
//! [`VaultWatcher`] forwards `notify` events from every memory root into a
//! [`Debouncer`]. Each relevant event resets the timer; the action fires
//! once the roots have been quiet for the configured delay. A bulk edit
//! (a `git checkout` touching hundreds of notes) therefore triggers one
//! indexing pass, not hundreds.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::ingest::is_markdown;

type Action = Arc<dyn Fn() + Send + Sync>;

/// Runs `action` once after `delay` has elapsed since the last
/// [`schedule`](Debouncer::schedule) call.
///
/// The action should be cheap (typically spawning a task): cancelling a
/// pending timer never interrupts an action that already started.
pub struct Debouncer {
    delay: Duration,
    action: Action,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            delay,
            action: Arc::new(action),
            pending: Mutex::new(None),
        }
    }

    /// (Re)start the quiet-period timer.
    pub fn schedule(&self) {
        let delay = self.delay;
        let action = self.action.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Drop the pending timer, if any.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Watches the vault, workspace memory and extra paths.
pub struct VaultWatcher {
    watcher: Option<RecommendedWatcher>,
    forwarder: JoinHandle<()>,
    debouncer: Arc<Debouncer>,
}

impl VaultWatcher {
    pub fn start(config: &Config, debouncer: Arc<Debouncer>) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .context("Failed to create file watcher")?;

        for (path, mode) in watch_roots(config) {
            watcher
                .watch(&path, mode)
                .with_context(|| format!("Failed to watch {}", path.display()))?;
            tracing::debug!(path = %path.display(), "watching");
        }

        let ignored = vec![config.lexical_state_path(), config.graph_state_path()];
        let forward_to = debouncer.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) if is_relevant(&event, &ignored) => forward_to.schedule(),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "file watcher error"),
                }
            }
        });

        tracing::info!("file watcher started");
        Ok(Self {
            watcher: Some(watcher),
            forwarder,
            debouncer,
        })
    }

    /// Stop delivering events and cancel any pending re-index.
    pub fn stop(&mut self) {
        self.watcher.take();
        self.forwarder.abort();
        self.debouncer.cancel();
    }
}

impl Drop for VaultWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_roots(config: &Config) -> Vec<(PathBuf, RecursiveMode)> {
    let paths = &config.paths;
    let mut roots = vec![(paths.vault.clone(), RecursiveMode::Recursive)];

    let memory_file = paths.memory_file_path();
    if memory_file.is_file() {
        roots.push((memory_file, RecursiveMode::NonRecursive));
    }
    let memory_dir = paths.memory_dir_path();
    if memory_dir.is_dir() {
        roots.push((memory_dir, RecursiveMode::Recursive));
    }
    for extra in &paths.extra {
        if extra.is_dir() {
            roots.push((extra.clone(), RecursiveMode::Recursive));
        } else if extra.is_file() {
            roots.push((extra.clone(), RecursiveMode::NonRecursive));
        }
    }
    roots
}

/// Markdown changes and directory-level changes count; reads and our own
/// state files do not.
fn is_relevant(event: &Event, ignored: &[PathBuf]) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| !ignored.contains(p) && (is_markdown(p) || p.extension().is_none()))
}

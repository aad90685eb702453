//! # Notes watcher
//!
//! An alternative rebuild trigger for people who edit `notes.txt` in their own
//! editor instead of through `cfa notes set`. It watches the directory that
//! holds the note file and rebuilds the index whenever the file changes.
//!
//! - Only events for the note file itself count; siblings such as the
//!   `vectorstore/` directory are ignored.
//! - Debouncing is trailing-edge. The first change opens a window of the
//!   debounce interval, later changes inside it are folded in, and one rebuild
//!   runs when the window closes, so a burst of saves is indexed once at its
//!   final content. Changes made during a rebuild open the next window.
//! - A rebuild is skipped when the notes hash still matches the index.
//!
//! The watcher does not coordinate with interactive saves. Another process
//! holding a cached index sees the watcher's rebuild once its cache expires.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::notebook::Notebook;

/// Trailing-edge debounce window for note changes.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Record a change at `now`. Returns true when it opened a new window.
    pub fn observe(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.window);
        true
    }

    /// When the open window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Close the window once its rebuild starts.
    pub fn fire(&mut self) {
        self.deadline = None;
    }
}

/// True for create/modify events that touch `notes_path`.
pub fn is_notes_event(event: &Event, notes_path: &Path) -> bool {
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }
    let Some(name) = notes_path.file_name() else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(name))
}

pub struct NotesWatcher {
    notebook: Arc<Notebook>,
    notes_path: PathBuf,
    debouncer: Debouncer,
    events: mpsc::Receiver<Event>,
    _watcher: RecommendedWatcher,
}

impl NotesWatcher {
    /// Start watching the notebook's note file. Events are queued from this
    /// point on, before [`NotesWatcher::run`] is awaited.
    ///
    /// # Errors
    /// I/O errors creating the user directory, or [`Error::Watch`] when the
    /// platform watcher cannot be set up.
    pub fn new(notebook: Arc<Notebook>, debounce: Duration) -> Result<Self> {
        let notes_path = notebook.session().notes_path.clone();
        let dir = notes_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        // notify calls back on its own thread, so bridge into tokio with a channel.
        let (tx, rx) = mpsc::channel(100);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!("Watch error: {e}"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching {} (debounce {:?})", notes_path.display(), debounce);

        Ok(Self {
            notebook,
            notes_path,
            debouncer: Debouncer::new(debounce),
            events: rx,
            _watcher: watcher,
        })
    }

    /// Process events until `shutdown` resolves. Returns how many rebuilds ran.
    ///
    /// A failed rebuild is logged and the watcher keeps going.
    pub async fn run<F>(mut self, shutdown: F) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut rebuilds = 0;

        loop {
            let pending = self.debouncer.deadline();
            let deadline = tokio::time::Instant::from_std(pending.unwrap_or_else(Instant::now));

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Watcher shutting down after {rebuilds} rebuild(s)");
                    break;
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        warn!("Watch channel closed");
                        break;
                    };
                    if !is_notes_event(&event, &self.notes_path) {
                        continue;
                    }
                    if self.debouncer.observe(Instant::now()) {
                        debug!("Notes changed, rebuilding in {:?}", self.debouncer.window);
                    } else {
                        debug!("Rebuild already scheduled, coalescing change");
                    }
                }
                _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                    self.debouncer.fire();

                    let notebook = Arc::clone(&self.notebook);
                    match tokio::task::spawn_blocking(move || notebook.rebuild_if_stale()).await? {
                        Ok(Some(summary)) => {
                            rebuilds += 1;
                            info!("Rebuilt index: {} chunks", summary.chunks);
                        }
                        Ok(None) => debug!("Notes unchanged, rebuild skipped"),
                        Err(e) => error!("Rebuild failed: {e}"),
                    }
                }
            }
        }

        Ok(rebuilds)
    }
}

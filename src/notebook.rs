//! # Notebook
//!
//! Owns one user's notes and the index derived from them.
//!
//! The note file is a single UTF-8 document that is only ever replaced as a
//! whole. Saving it is not complete until the index has been rebuilt from the
//! new text and persisted: [`Notebook::save_notes`] writes, chunks, embeds and
//! stores before returning. A missing note file reads as empty notes.
//!
//! Indexes are read through an [`IndexCache`], so repeated questions do not
//! reload from disk. A save made through this notebook invalidates its own
//! cache entry; rebuilds made anywhere else (the file watcher, another process)
//! become visible once the cached copy expires.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use cf_assistant::{chunker::Chunker, embeddings::HashingEmbedder};
//! use cf_assistant::{notebook::Notebook, session::UserSession};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = UserSession::new("data", "alice")?;
//! let notebook = Notebook::new(
//!     session,
//!     Chunker::new(2000, 300)?,
//!     Arc::new(HashingEmbedder::new(384)),
//!     Duration::from_secs(30),
//! );
//! notebook.save_notes("AWS S3 buckets must block public access by default.")?;
//! let hits = notebook.retrieve("how do I secure an S3 bucket?", 4)?;
//! assert_eq!(hits.len(), 1);
//! # Ok(()) }
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::chunker::Chunker;
use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::index_cache::IndexCache;
use crate::retriever::{RetrievedChunk, Retriever};
use crate::session::UserSession;
use crate::vector_store::{VectorIndex, build_index, load_or_init, write_atomically};

/// Whole-file reads and writes of the note document.
#[derive(Debug, Clone)]
pub struct NoteStore {
    path: PathBuf,
}

impl NoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the notes. A file that does not exist yet is empty notes.
    pub fn load(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No notes at {}, treating as empty", self.path.display());
                Ok(String::new())
            }
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }

    /// Replace the notes with `text`.
    pub fn save(&self, text: &str) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        write_atomically(&self.path, text.as_bytes())
    }
}

/// blake3 hex digest identifying a version of the notes.
pub fn notes_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildSummary {
    pub chunks: usize,
    pub source_hash: String,
}

pub struct Notebook {
    session: UserSession,
    store: NoteStore,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    cache: IndexCache,
    show_progress: bool,
}

impl Notebook {
    pub fn new(
        session: UserSession,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store: NoteStore::new(&session.notes_path),
            session,
            chunker,
            embedder,
            cache: IndexCache::new(cache_ttl),
            show_progress: false,
        }
    }

    /// Draw a progress bar while embedding chunks.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn session(&self) -> &UserSession {
        &self.session
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn load_notes(&self) -> Result<String> {
        self.store.load()
    }

    /// Overwrite the notes and rebuild the index before returning.
    pub fn save_notes(&self, text: &str) -> Result<RebuildSummary> {
        self.store.save(text)?;
        info!("Saved notes to {}", self.store.path().display());

        let summary = self.rebuild_from(text)?;
        self.cache.invalidate(&self.session.index_dir);
        Ok(summary)
    }

    /// Add `text` as a new line at the end of the notes, then rebuild.
    pub fn append_notes(&self, text: &str) -> Result<RebuildSummary> {
        let mut notes = self.store.load()?;
        if !notes.is_empty() && !notes.ends_with('\n') {
            notes.push('\n');
        }
        notes.push_str(text);
        notes.push('\n');
        self.save_notes(&notes)
    }

    /// Rebuild the index from the notes currently on disk.
    pub fn rebuild(&self) -> Result<RebuildSummary> {
        let text = self.store.load()?;
        self.rebuild_from(&text)
    }

    /// Rebuild only when the notes or the embedding model changed since the
    /// index was built.
    ///
    /// An index that cannot be loaded because it is corrupted or has the wrong
    /// dimension counts as stale and is replaced.
    pub fn rebuild_if_stale(&self) -> Result<Option<RebuildSummary>> {
        let text = self.store.load()?;
        match self.load_index_uncached() {
            Ok(index) if !index_is_stale(&index, &text, self.embedder.model_id()) => {
                debug!("Index already matches the notes, skipping rebuild");
                return Ok(None);
            }
            Ok(_) => {}
            Err(e @ (Error::CorruptedIndex { .. } | Error::DimensionMismatch { .. })) => {
                warn!("Replacing unreadable index: {e}");
            }
            Err(e) => return Err(e),
        }
        self.rebuild_from(&text).map(Some)
    }

    fn rebuild_from(&self, text: &str) -> Result<RebuildSummary> {
        let source_hash = notes_hash(text);
        let chunks = self.chunker.split(text);
        let index = build_index(
            &chunks,
            self.embedder.as_ref(),
            Some(source_hash.clone()),
            &self.session.index_dir,
            self.show_progress,
        )?;
        Ok(RebuildSummary {
            chunks: index.len(),
            source_hash,
        })
    }

    fn load_index_uncached(&self) -> Result<VectorIndex> {
        load_or_init(
            &self.session.index_dir,
            self.embedder.dimension(),
            self.embedder.model_id(),
        )
    }

    /// The user's index, served from the cache while it is fresh.
    pub fn index(&self) -> Result<Arc<VectorIndex>> {
        let index = self
            .cache
            .get_or_load(&self.session.index_dir, || self.load_index_uncached())?;
        let built_with = &index.metadata().embedding_model;
        if built_with != self.embedder.model_id() {
            warn!(
                "Index was built with {built_with} but queries use {}; run a rebuild",
                self.embedder.model_id()
            );
        }
        Ok(index)
    }

    /// The user's index read from disk, refreshing the cache.
    pub fn index_fresh(&self) -> Result<Arc<VectorIndex>> {
        self.cache
            .load_fresh(&self.session.index_dir, || self.load_index_uncached())
    }

    /// Drop the cached index so the next [`Notebook::index`] reads from disk.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate(&self.session.index_dir);
    }

    /// Whether the persisted index was built from different notes or by a
    /// different embedding model.
    pub fn is_stale(&self) -> Result<bool> {
        let text = self.store.load()?;
        let index = self.index_fresh()?;
        Ok(index_is_stale(&index, &text, self.embedder.model_id()))
    }

    /// Top-k chunks for `query` from the (possibly cached) index.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let index = self.index()?;
        Retriever::new(self.embedder.as_ref(), &index).retrieve(query, top_k)
    }
}

/// Whether `index` was built from notes other than `notes`, or by an embedding
/// model other than `model_id`.
pub fn index_is_stale(index: &VectorIndex, notes: &str, model_id: &str) -> bool {
    if index.metadata().embedding_model != model_id {
        return true;
    }
    match &index.metadata().source_hash {
        Some(hash) => *hash != notes_hash(notes),
        None => !notes.is_empty(),
    }
}

//! # VectorStore
//!
//! Persistent nearest-neighbour index over embedded note chunks.
//!
//! A [`VectorIndex`] pairs an exact L2 index from the `hora` crate with the chunk
//! records needed to turn a vector match back into text. It is always rebuilt in
//! full from the current notes; there is no incremental update path.
//!
//! ## Responsibilities
//! - **Building**: [`build_index`] embeds every chunk (in parallel) and writes a
//!   complete index, replacing whatever was there. An empty chunk list produces a
//!   valid, content-free index instead of an error.
//! - **Loading**: [`load_or_init`] self-heals a missing index by persisting an
//!   empty one first; a present but unreadable index is reported, never repaired.
//! - **Searching**: [`VectorIndex::search`] returns the `k` nearest chunks under
//!   Euclidean distance.
//!
//! ## Serialization layout
//! Two files in the per-user index directory:
//! - `index.bin`: vector data (`bincode`), the dimension plus one vector per chunk.
//! - `index.yaml`: metadata (dimension, metric, embedding model, source hash,
//!   build time and the chunk records).
//!
//! Both are replaced atomically. The loader cross-checks them: a count or
//! dimension disagreement is treated as corruption.
//!
//! ## Quick Example
//! ```no_run
//! use cf_assistant::chunker::Chunker;
//! use cf_assistant::embeddings::HashingEmbedder;
//! use cf_assistant::vector_store::{build_index, load_or_init};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = HashingEmbedder::new(384);
//! let chunks = Chunker::new(2000, 300)?.split("Rust is great!");
//! build_index(&chunks, &embedder, None, "vectorstore".as_ref(), false)?;
//! let index = load_or_init("vectorstore".as_ref(), 384, "hashing-bow")?;
//! println!("{} chunks indexed", index.len());
//! # Ok(()) }
//! ```

use chrono::{DateTime, Utc};
use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::bruteforce_idx::BruteForceIndex;
use hora::index::bruteforce_params::BruteForceParams;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::chunker::Chunk;
use crate::embeddings::Embedder;
use crate::error::{Error, Result};

/// File holding the vector data.
pub const VECTORS_FILE: &str = "index.bin";
/// File holding the chunk metadata.
pub const METADATA_FILE: &str = "index.yaml";
/// Both persisted index files, in backup order.
pub const INDEX_FILES: [&str; 2] = [VECTORS_FILE, METADATA_FILE];

const METRIC_L2: &str = "l2";

/// Text of one indexed chunk and where it came from in the notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Everything needed besides the raw vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub dimension: usize,
    pub metric: String,
    pub embedding_model: String,
    /// blake3 hash of the note text the index was built from. `None` for an
    /// index created by self-healing.
    pub source_hash: Option<String>,
    pub built_at: DateTime<Utc>,
    pub chunks: Vec<ChunkRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorData {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

/// A chunk returned by a search, with its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    pub chunk: &'a ChunkRecord,
    pub distance: f32,
}

/// In-memory nearest-neighbour index over chunk embeddings.
pub struct VectorIndex {
    index: BruteForceIndex<f32, usize>,
    vectors: Vec<Vec<f32>>,
    metadata: IndexMetadata,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.metadata.dimension)
            .field("len", &self.vectors.len())
            .field("embedding_model", &self.metadata.embedding_model)
            .finish()
    }
}

impl VectorIndex {
    /// A structurally valid index with zero vectors.
    pub fn empty(dimension: usize, embedding_model: &str) -> Self {
        Self {
            index: BruteForceIndex::new(dimension, &BruteForceParams::default()),
            vectors: Vec::new(),
            metadata: IndexMetadata {
                dimension,
                metric: METRIC_L2.to_string(),
                embedding_model: embedding_model.to_string(),
                source_hash: None,
                built_at: Utc::now(),
                chunks: Vec::new(),
            },
        }
    }

    /// Assemble an index from chunk records and their vectors.
    ///
    /// # Errors
    /// - [`Error::DimensionMismatch`] if any vector is not `metadata.dimension` long.
    /// - [`Error::Index`] if the underlying ANN index rejects an insert or the build.
    fn from_parts(metadata: IndexMetadata, vectors: Vec<Vec<f32>>) -> Result<Self> {
        let mut index = BruteForceIndex::new(metadata.dimension, &BruteForceParams::default());
        for (id, vector) in vectors.iter().enumerate() {
            if vector.len() != metadata.dimension {
                return Err(Error::DimensionMismatch {
                    expected: metadata.dimension,
                    actual: vector.len(),
                });
            }
            index.add(vector, id).map_err(Error::Index)?;
        }
        if !vectors.is_empty() {
            index.build(Metric::Euclidean).map_err(Error::Index)?;
        }
        Ok(Self {
            index,
            vectors,
            metadata,
        })
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn dimension(&self) -> usize {
        self.metadata.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn chunk(&self, id: usize) -> Option<&ChunkRecord> {
        self.metadata.chunks.get(id)
    }

    /// The `top_k` chunks nearest to `query`, closest first.
    ///
    /// Asking for more chunks than are stored returns all of them; an empty index
    /// returns nothing.
    ///
    /// # Errors
    /// [`Error::DimensionMismatch`] if `query` does not match the index dimension.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit<'_>>> {
        if query.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let k = top_k.min(self.len());
        let mut hits: Vec<SearchHit<'_>> = self
            .index
            .search_nodes(query, k)
            .into_iter()
            .filter_map(|(node, _)| *node.idx())
            .filter_map(|id| {
                let chunk = self.metadata.chunks.get(id)?;
                let vector = self.vectors.get(id)?;
                Some(SearchHit {
                    chunk,
                    distance: euclidean_distance(query, vector),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Persist both index files into `dir`, replacing earlier ones.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let data = VectorData {
            dimension: self.metadata.dimension,
            vectors: self.vectors.clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&data, bincode::config::standard())
            .map_err(|e| Error::corrupted(dir, format!("cannot encode vectors: {e}")))?;
        let yaml = serde_yaml::to_string(&self.metadata)?;

        write_atomically(&dir.join(VECTORS_FILE), &bytes)?;
        write_atomically(&dir.join(METADATA_FILE), yaml.as_bytes())?;

        debug!("Saved index with {} vectors to {}", self.len(), dir.display());
        Ok(())
    }

    /// Read both index files from `dir` and rebuild the in-memory index.
    ///
    /// # Errors
    /// [`Error::CorruptedIndex`] when a file is missing, undecodable, or the two
    /// files disagree with each other or with `expected_dimension`.
    pub fn load(dir: &Path, expected_dimension: usize) -> Result<Self> {
        let vectors_path = dir.join(VECTORS_FILE);
        let metadata_path = dir.join(METADATA_FILE);

        let bytes = fs::read(&vectors_path)
            .map_err(|e| Error::corrupted(dir, format!("cannot read {VECTORS_FILE}: {e}")))?;
        let yaml = fs::read_to_string(&metadata_path)
            .map_err(|e| Error::corrupted(dir, format!("cannot read {METADATA_FILE}: {e}")))?;

        let (data, _): (VectorData, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| Error::corrupted(dir, format!("bad vector data: {e}")))?;
        let metadata: IndexMetadata = serde_yaml::from_str(&yaml)
            .map_err(|e| Error::corrupted(dir, format!("bad metadata: {e}")))?;

        if metadata.metric != METRIC_L2 {
            return Err(Error::corrupted(
                dir,
                format!("unsupported metric {:?}", metadata.metric),
            ));
        }
        if data.dimension != metadata.dimension {
            return Err(Error::corrupted(
                dir,
                format!(
                    "vector dimension {} does not match metadata dimension {}",
                    data.dimension, metadata.dimension
                ),
            ));
        }
        if metadata.dimension != expected_dimension {
            return Err(Error::DimensionMismatch {
                expected: expected_dimension,
                actual: metadata.dimension,
            });
        }
        if data.vectors.len() != metadata.chunks.len() {
            return Err(Error::corrupted(
                dir,
                format!(
                    "{} vectors but {} chunk records",
                    data.vectors.len(),
                    metadata.chunks.len()
                ),
            ));
        }
        if metadata.chunks.iter().enumerate().any(|(i, c)| c.id != i) {
            return Err(Error::corrupted(dir, "chunk ids are not sequential"));
        }

        Self::from_parts(metadata, data.vectors).map_err(|e| match e {
            Error::DimensionMismatch { expected, actual } => Error::corrupted(
                dir,
                format!("stored vector of length {actual}, expected {expected}"),
            ),
            other => other,
        })
    }
}

/// Whether any of the index files exist in `dir`.
pub fn index_files_present(dir: &Path) -> (bool, bool) {
    (
        dir.join(VECTORS_FILE).is_file(),
        dir.join(METADATA_FILE).is_file(),
    )
}

/// Embed `chunks` and write a complete index to `dir`, replacing any prior one.
///
/// With no chunks the embedder is never called and an empty index is written.
///
/// # Parameters
/// - `source_hash`: hash of the note text the chunks came from, recorded for
///   staleness checks.
/// - `show_progress`: draw an `indicatif` progress bar while embedding.
///
/// # Errors
/// Embedding failures and I/O errors abort the build; the previous index files
/// stay untouched in that case.
pub fn build_index(
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    source_hash: Option<String>,
    dir: &Path,
    show_progress: bool,
) -> Result<VectorIndex> {
    let dimension = embedder.dimension();

    let vectors: Vec<Vec<f32>> = if chunks.is_empty() {
        info!("No chunks to embed, writing an empty index");
        Vec::new()
    } else {
        let progress = if show_progress {
            let bar = ProgressBar::new(chunks.len() as u64);
            if let Ok(style) =
                ProgressStyle::with_template("{spinner} embedding {pos}/{len} chunks {wide_bar}")
            {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        let vectors = chunks
            .par_iter()
            .progress_with(progress.clone())
            .map(|chunk| embedder.embed(&chunk.text))
            .collect::<Result<Vec<_>>>()?;
        progress.finish_and_clear();
        vectors
    };

    let metadata = IndexMetadata {
        dimension,
        metric: METRIC_L2.to_string(),
        embedding_model: embedder.model_id().to_string(),
        source_hash,
        built_at: Utc::now(),
        chunks: chunks
            .iter()
            .enumerate()
            .map(|(id, chunk)| ChunkRecord {
                id,
                text: chunk.text.clone(),
                start: chunk.start,
                end: chunk.end,
            })
            .collect(),
    };

    let index = VectorIndex::from_parts(metadata, vectors)?;
    index.save(dir)?;

    info!(
        "Built index with {} chunks (dimension {}) at {}",
        index.len(),
        dimension,
        dir.display()
    );
    Ok(index)
}

/// Load the index in `dir`, creating and persisting an empty one when absent.
///
/// # Errors
/// - [`Error::CorruptedIndex`] when the files are unreadable or only one of them
///   exists. Nothing is repaired.
/// - [`Error::DimensionMismatch`] when the stored index was built for another
///   dimension.
pub fn load_or_init(dir: &Path, dimension: usize, embedding_model: &str) -> Result<VectorIndex> {
    match index_files_present(dir) {
        (false, false) => {
            warn!("No index at {}, creating an empty one", dir.display());
            VectorIndex::empty(dimension, embedding_model).save(dir)?;
        }
        (true, true) => {}
        (has_vectors, _) => {
            let missing = if has_vectors { METADATA_FILE } else { VECTORS_FILE };
            return Err(Error::corrupted(dir, format!("{missing} is missing")));
        }
    }
    VectorIndex::load(dir, dimension)
}

/// Euclidean distance `sqrt(Σ (a[i] - b[i])^2)` between equal-length vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Replace `path` with `bytes` via a temp file in the same directory.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

//! Top-k retrieval of note chunks for a query.

use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::vector_store::VectorIndex;

/// A chunk selected for the prompt, owned so it can outlive the index it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub distance: f32,
}

pub struct Retriever<'a> {
    embedder: &'a dyn Embedder,
    index: &'a VectorIndex,
}

impl<'a> Retriever<'a> {
    pub fn new(embedder: &'a dyn Embedder, index: &'a VectorIndex) -> Self {
        Self { embedder, index }
    }

    /// Embed `query` and return the `top_k` nearest chunks, closest first.
    ///
    /// An empty index answers with no chunks without touching the embedder.
    ///
    /// # Errors
    /// [`Error::DimensionMismatch`] when the embedder and the index disagree on
    /// the vector size, or any embedding failure.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        if self.embedder.dimension() != self.index.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.index.dimension(),
                actual: self.embedder.dimension(),
            });
        }
        if self.index.is_empty() {
            tracing::debug!("Index is empty, nothing to retrieve");
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query)?;
        let hits = self.index.search(&vector, top_k)?;
        tracing::debug!("Retrieved {} chunks for query", hits.len());

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                id: hit.chunk.id,
                text: hit.chunk.text.clone(),
                start: hit.chunk.start,
                end: hit.chunk.end,
                distance: hit.distance,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::embeddings::HashingEmbedder;
    use crate::vector_store::build_index;

    #[test]
    fn test_retrieve_closest_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(128);
        let notes = "VPC flow logs capture IP traffic.\n\nGuardDuty detects threats in accounts.\n\nMacie finds sensitive data in S3.";
        let chunks = Chunker::new(45, 0).unwrap().split(notes);
        assert_eq!(chunks.len(), 3);
        let index = build_index(&chunks, &embedder, None, dir.path(), false).unwrap();

        let retriever = Retriever::new(&embedder, &index);
        let results = retriever
            .retrieve("GuardDuty detects threats in accounts.", 2)
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert_eq!(&notes[results[0].start..results[0].end], results[0].text);
    }

    #[test]
    fn test_retrieve_from_empty_index() {
        let embedder = HashingEmbedder::new(16);
        let index = VectorIndex::empty(16, embedder.model_id());
        let results = Retriever::new(&embedder, &index).retrieve("q", 4).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_embedder_index_dimension_mismatch() {
        let embedder = HashingEmbedder::new(16);
        let index = VectorIndex::empty(32, "hashing-bow");
        let err = Retriever::new(&embedder, &index).retrieve("q", 4).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}

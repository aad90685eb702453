//! # Chunker
//!
//! Splits note text into overlapping passages sized for embedding.
//!
//! The strategy is the familiar recursive character splitter: cut on paragraph
//! breaks first, fall back to line breaks, then spaces, and finally to raw
//! characters for runs that contain no separator at all. The resulting pieces
//! are merged greedily into windows of at most `chunk_size` characters, and
//! each new window starts with up to `chunk_overlap` characters carried over
//! from the end of the previous one.
//!
//! Separators stay attached to the piece they terminate, so every chunk is an
//! exact substring of the input and records its byte span. Consecutive chunks
//! either touch or overlap, which means the chunks always cover the whole text.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};

/// Separators tried in order before falling back to single characters.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// A passage of the note text. `start..end` is a byte range into the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Contiguous piece of the source, never longer than the chunk size.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    chars: usize,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// # Errors
    /// [`Error::Config`] when `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into ordered, overlapping chunks. Empty input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut spans = Vec::new();
        self.split_spans(text, 0, text.len(), SEPARATORS, &mut spans);
        let chunks = self.merge_spans(text, &spans);

        tracing::debug!(
            "Split {} bytes into {} chunks (size {}, overlap {})",
            text.len(),
            chunks.len(),
            self.chunk_size,
            self.chunk_overlap
        );
        chunks
    }

    fn split_spans(
        &self,
        text: &str,
        start: usize,
        end: usize,
        separators: &[&str],
        out: &mut Vec<Span>,
    ) {
        let piece = &text[start..end];
        let chars = piece.chars().count();
        if chars <= self.chunk_size {
            out.push(Span { start, end, chars });
            return;
        }

        match separators.split_first() {
            Some((separator, rest)) => {
                if !piece.contains(separator) {
                    self.split_spans(text, start, end, rest, out);
                    return;
                }
                let mut offset = start;
                for part in piece.split_inclusive(separator) {
                    let part_end = offset + part.len();
                    self.split_spans(text, offset, part_end, rest, out);
                    offset = part_end;
                }
            }
            None => {
                // No separator left: cut every `chunk_size` characters.
                let mut segment_start = start;
                let mut count = 0;
                for (i, _) in piece.char_indices() {
                    if count == self.chunk_size {
                        out.push(Span {
                            start: segment_start,
                            end: start + i,
                            chars: count,
                        });
                        segment_start = start + i;
                        count = 0;
                    }
                    count += 1;
                }
                out.push(Span {
                    start: segment_start,
                    end,
                    chars: count,
                });
            }
        }
    }

    fn merge_spans(&self, text: &str, spans: &[Span]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<Span> = VecDeque::new();
        let mut total = 0;

        for span in spans {
            if total + span.chars > self.chunk_size && !window.is_empty() {
                chunks.push(Self::window_to_chunk(text, &window));

                // Keep a tail of at most `chunk_overlap` characters that still
                // leaves room for the incoming span.
                while total > self.chunk_overlap
                    || (total + span.chars > self.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some(dropped) => total -= dropped.chars,
                        None => break,
                    }
                }
            }
            window.push_back(*span);
            total += span.chars;
        }

        if !window.is_empty() {
            chunks.push(Self::window_to_chunk(text, &window));
        }
        chunks
    }

    fn window_to_chunk(text: &str, window: &VecDeque<Span>) -> Chunk {
        let start = window.front().map(|s| s.start).unwrap_or(0);
        let end = window.back().map(|s| s.end).unwrap_or(start);
        Chunk {
            text: text[start..end].to_string(),
            start,
            end,
        }
    }
}

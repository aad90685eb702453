//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`RagConfig`] struct, which holds the configuration parameters,
//! and [`load_config`] / [`save_config`] to move it to and from YAML.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use cf_assistant::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, path::PathBuf};

use crate::error::{Error, Result};

use tracing::*;

/// Represents the application's configuration.
///
/// Only the endpoint triple (`api_key`, `api_base`, `model`) is mandatory; every
/// other section falls back to the defaults the assistant ships with.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RagConfig {
    /// The API key used to authenticate requests to the API. Local endpoints ignore it.
    pub api_key: String,

    /// The base URL of the OpenAI compatible API (e.g. `http://localhost:11434/v1`).
    pub api_base: String,

    /// The name of the model to be used for generating responses.
    pub model: String,

    /// Sampling temperature in `[0.0, 1.0]`.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Reveal the answer incrementally instead of waiting for the full text.
    #[serde(default)]
    pub should_stream: Option<bool>,

    // Token budget of the model; exceeding it only produces a warning.
    #[serde(default = "default_context_max_tokens")]
    pub context_max_tokens: usize,

    // Root of the per-user data tree. Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    // User id used when `--user` is not given.
    #[serde(default)]
    pub user: Option<String>,

    // Name of a prompt template under `<config_dir>/templates`.
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub cloud: Option<CloudConfig>,
}

/// Character-based chunking parameters.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 300,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the prompt assembler.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

/// Which embedder turns text into vectors.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// all-MiniLM-L6-v2 sentence embeddings through candle.
    #[default]
    Minilm,
    /// Feature-hashed bag of words. No model download, lexical matching only.
    Hashing,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model_id: String,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Minilm,
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimension: 384,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct IndexConfig {
    /// How long a loaded index is served from memory.
    pub cache_ttl_secs: u64,
    /// Minimum interval between two watcher-triggered rebuilds.
    pub watch_debounce_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            watch_debounce_secs: 5,
        }
    }
}

/// Remote backup target. Either an HTTP document store or a local directory.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct CloudConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_context_max_tokens() -> usize {
    8192
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            api_key: "CHANGEME".to_string(),
            api_base: "http://localhost:11434/v1".to_string(),
            model: "llama3.2".to_string(),
            temperature: default_temperature(),
            should_stream: Some(true),
            context_max_tokens: default_context_max_tokens(),
            data_dir: None,
            user: None,
            template: None,
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            cloud: None,
        }
    }
}

impl RagConfig {
    /// Reject settings the rest of the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "temperature must be within [0.0, 1.0], got {}",
                self.temperature
            )));
        }
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding dimension must be positive".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("top_k must be positive".into()));
        }
        Ok(())
    }

    pub fn streaming(&self) -> bool {
        self.should_stream.unwrap_or(true)
    }
}

/// Coarse label for the sampling temperature, shown next to the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStyle {
    Precise,
    Balanced,
    Creative,
}

impl ResponseStyle {
    pub fn from_temperature(temperature: f32) -> Self {
        if temperature < 0.4 {
            ResponseStyle::Precise
        } else if temperature > 0.6 {
            ResponseStyle::Creative
        } else {
            ResponseStyle::Balanced
        }
    }
}

impl fmt::Display for ResponseStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStyle::Precise => f.write_str("Precise"),
            ResponseStyle::Balanced => f.write_str("Balanced"),
            ResponseStyle::Creative => f.write_str("Creative"),
        }
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Returns
///
/// - `Ok(RagConfig)`: The loaded and validated configuration.
/// - `Err(Error)`: The file could not be read, parsed, or failed validation.
pub fn load_config(file: impl AsRef<Path>) -> Result<RagConfig> {
    let file = file.as_ref();
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(file).map_err(|e| Error::io(file, e))?;
    let config: RagConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Writes the configuration as YAML, creating parent directories as needed.
pub fn save_config(config: &RagConfig, file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let yaml = serde_yaml::to_string(config)?;
    fs::write(file, yaml).map_err(|e| Error::io(file, e))?;
    info!("Wrote config file: {}", file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "example_api_key"
api_base: "http://example.com/v1"
model: "example_model"
temperature: 0.5
chunking:
  chunk_size: 500
  chunk_overlap: 50
"#
        )
        .unwrap();

        let config = load_config(temp_file.path());

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.api_key, "example_api_key");
        assert_eq!(config.api_base, "http://example.com/v1");
        assert_eq!(config.model, "example_model");
        assert_eq!(config.temperature, 0.5);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        // Sections that were left out fall back to their defaults.
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.index.cache_ttl_secs, 30);
        assert!(config.cloud.is_none());
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(matches!(config, Err(Error::Io { .. })));
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path());
        assert!(config.is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_temperature_out_of_range() {
        let config = RagConfig {
            temperature: 1.5,
            ..RagConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");
        let config = RagConfig {
            user: Some("alice".into()),
            ..RagConfig::default()
        };
        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_response_style() {
        assert_eq!(ResponseStyle::from_temperature(0.0), ResponseStyle::Precise);
        assert_eq!(ResponseStyle::from_temperature(0.5), ResponseStyle::Balanced);
        assert_eq!(ResponseStyle::from_temperature(0.9), ResponseStyle::Creative);
    }
}

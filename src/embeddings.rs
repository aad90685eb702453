//! # Embeddings
//!
//! Text → fixed-length vector conversion.
//!
//! The assistant ships two [`Embedder`] implementations:
//!
//! - [`SentenceEmbeddingsModel`]: all-MiniLM-L6-v2 run through Candle (pure Rust ML
//!   framework). Weights come from the Hugging Face hub cache. Output is a
//!   mean-pooled, L2-normalised 384-d vector.
//! - [`HashingEmbedder`]: feature-hashed bag of words. It needs no model files and is
//!   fully deterministic, which makes it the embedder used by the test-suite and a
//!   usable offline fallback.
//!
//! Every vector stored in one index must come from the same embedder; the index
//! records the model id and dimension and refuses vectors of another size.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{Error, Result};

/// Maximum number of tokens BERT position embeddings cover.
const MAX_SEQUENCE_TOKENS: usize = 512;

/// Model id recorded by [`HashingEmbedder`].
pub const HASHING_MODEL_ID: &str = "hashing-bow";

/// Maps text to vectors of a fixed dimension.
pub trait Embedder: Send + Sync {
    /// Identifier recorded in index metadata.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the embedder selected in the configuration.
///
/// # Errors
/// [`Error::EmbeddingModel`] when the model files cannot be fetched or loaded, and
/// [`Error::DimensionMismatch`] when the model's output size differs from the
/// configured index dimension.
pub fn load_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Minilm => {
            let model = SentenceEmbeddingsModel::load(&config.model_id)?;
            if model.dimension() != config.dimension {
                return Err(Error::DimensionMismatch {
                    expected: config.dimension,
                    actual: model.dimension(),
                });
            }
            Ok(Arc::new(model))
        }
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
    }
}

/// Model id the configured backend records in index metadata, without loading it.
pub fn configured_model_id(config: &EmbeddingConfig) -> &str {
    match config.backend {
        EmbeddingBackend::Minilm => &config.model_id,
        EmbeddingBackend::Hashing => HASHING_MODEL_ID,
    }
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbeddingsModel {
    /// Load the model from the Hugging Face hub (cached after the first download).
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;
        let revision = "main";

        tracing::info!("Loading embedding model {model_id}");

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let api = Api::new().map_err(|e| Error::EmbeddingModel(e.to_string()))?;
        let api_repo = api.repo(repo);

        let fetch = |name: &str| {
            api_repo
                .get(name)
                .map_err(|e| Error::EmbeddingModel(format!("{name}: {e}")))
        };
        let config_filename = fetch("config.json")?;
        let tokenizer_filename = fetch("tokenizer.json")?;
        let weights_filename = fetch("model.safetensors")?;

        let config = std::fs::read_to_string(&config_filename)
            .map_err(|e| Error::io(&config_filename, e))?;
        let config: Config =
            serde_json::from_str(&config).map_err(|e| Error::EmbeddingModel(e.to_string()))?;
        let dimension = config.hidden_size;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| Error::EmbeddingModel(format!("Failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| Error::EmbeddingModel(format!("Failed to configure tokenizer: {e}")))?;

        // SAFETY: the weights file lives in the hub cache and is not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(|e| Error::EmbeddingModel(e.to_string()))?
        };
        let model =
            BertModel::load(vb, &config).map_err(|e| Error::EmbeddingModel(e.to_string()))?;

        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask reshaped to [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let masked = embeddings.broadcast_mul(&mask)?;
        let sum = masked.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        let mean = sum.broadcast_div(&count)?;

        Ok(mean.squeeze(0)?)
    }

    fn normalize(&self, tensor: &Tensor) -> Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl Embedder for SentenceEmbeddingsModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let embedding = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let embedding = self.normalize(&embedding)?;

        Ok(embedding.to_vec1::<f32>()?)
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed with blake3 into one of
/// `dimension` buckets with a ±1 sign; the result is L2-normalised. Texts
/// without tokens map to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        HASHING_MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];
        if self.dimension == 0 {
            return Ok(vector);
        }

        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedder_dimension_and_norm() {
        let embedder = HashingEmbedder::new(384);
        let v = embedder.embed("Rust is cool.").unwrap();
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_case_insensitive() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(
            embedder.embed("S3 Bucket").unwrap(),
            embedder.embed("s3 bucket").unwrap()
        );
    }

    #[test]
    fn test_hashing_embedder_empty_text_is_zero() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed("  ...  ").unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_load_hashing_backend() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Hashing,
            dimension: 32,
            ..EmbeddingConfig::default()
        };
        let embedder = load_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 32);
        assert_eq!(embedder.model_id(), "hashing-bow");
        assert_eq!(configured_model_id(&config), embedder.model_id());
        assert_eq!(
            configured_model_id(&EmbeddingConfig::default()),
            "sentence-transformers/all-MiniLM-L6-v2"
        );
    }
}

use crate::core::error::{Error, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::api::sync::Api;
use std::path::{Path, PathBuf};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info};

/// Texts per forward pass
const ENCODE_BATCH_SIZE: usize = 16;

/// Longest input the BERT position embeddings accept
const MAX_SEQUENCE_LENGTH: usize = 512;

/// Whether a text is indexed content or a search query.
///
/// Retrieval models such as E5 are trained with different prefixes for the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Passage,
    Query,
}

/// A loaded embedding model: text in, fixed-length vectors out
pub trait Encoder {
    /// One vector per input text, in input order
    fn encode(&self, texts: &[&str], kind: TextKind) -> Result<Vec<Vec<f32>>>;
}

/// Loads an [`Encoder`] by model identifier.
///
/// Failures are reported as [`Error::ModelUnavailable`].
pub trait EncoderLoader {
    fn load(&self, model_id: &str) -> Result<Box<dyn Encoder>>;
}

/// Loads BERT-family sentence embedding models with candle.
///
/// `model_id` is either a HuggingFace Hub repository (downloaded on first use
/// into the hub cache) or a local directory holding `config.json`,
/// `tokenizer.json` and `model.safetensors`.
#[derive(Debug, Clone, Default)]
pub struct CandleLoader;

impl EncoderLoader for CandleLoader {
    fn load(&self, model_id: &str) -> Result<Box<dyn Encoder>> {
        let files = resolve_model_files(model_id)?;
        let encoder = BertEncoder::load(model_id, &files)?;
        Ok(Box::new(encoder))
    }
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

fn resolve_model_files(model_id: &str) -> Result<ModelFiles> {
    let local = Path::new(model_id);
    if local.is_dir() {
        let files = ModelFiles {
            config: local.join("config.json"),
            tokenizer: local.join("tokenizer.json"),
            weights: local.join("model.safetensors"),
        };
        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.exists() {
                return Err(Error::ModelUnavailable(format!(
                    "missing model file: {}",
                    path.display()
                )));
            }
        }
        return Ok(files);
    }

    info!(model = model_id, "fetching embedding model from HuggingFace Hub");
    let api = Api::new().map_err(|e| {
        Error::ModelUnavailable(format!("failed to create HuggingFace API client: {}", e))
    })?;
    let repo = api.model(model_id.to_string());

    let fetch = |name: &str| {
        repo.get(name).map_err(|e| {
            Error::ModelUnavailable(format!("failed to download {} from {}: {}", name, model_id, e))
        })
    };

    Ok(ModelFiles {
        config: fetch("config.json")?,
        tokenizer: fetch("tokenizer.json")?,
        weights: fetch("model.safetensors")?,
    })
}

/// BERT encoder with attention-masked mean pooling and L2 normalization
pub struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    prefixed: bool,
}

impl BertEncoder {
    fn load(model_id: &str, files: &ModelFiles) -> Result<Self> {
        let config_content = std::fs::read_to_string(&files.config)
            .map_err(|e| Error::ModelUnavailable(format!("failed to read model config: {}", e)))?;
        let bert_config: BertConfig = serde_json::from_str(&config_content)
            .map_err(|e| Error::ModelUnavailable(format!("failed to parse model config: {}", e)))?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| Error::ModelUnavailable(format!("failed to load tokenizer: {}", e)))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| Error::ModelUnavailable(format!("failed to configure tokenizer: {}", e)))?;

        // CPU only: the thread limit is meaningless on an accelerator.
        let device = Device::Cpu;

        // SAFETY: the weights file comes from the hub cache or the operator's model
        // directory and is not modified while the model is alive.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DTYPE, &device)
                .map_err(|e| Error::ModelUnavailable(format!("failed to load weights: {}", e)))?
        };
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| Error::ModelUnavailable(format!("failed to build model: {}", e)))?;

        info!(model = model_id, "embedding model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            prefixed: uses_e5_prefixes(model_id),
        })
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Tokenizer(format!("Tokenization failed: {}", e)))?;

        let mut ids = Vec::with_capacity(encodings.len());
        let mut masks = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            ids.push(Tensor::new(encoding.get_ids(), &self.device)?);
            masks.push(Tensor::new(encoding.get_attention_mask(), &self.device)?);
        }

        let token_ids = Tensor::stack(&ids, 0)?;
        let token_type_ids = token_ids.zeros_like()?;
        let attention_mask = Tensor::stack(&masks, 0)?;

        // [batch, seq, hidden]
        let hidden = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean over real tokens only; padding positions have mask 0.
        let mask = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;

        let normalized = normalize_l2(&pooled)?;
        Ok(normalized.to_vec2::<f32>()?)
    }
}

impl Encoder for BertEncoder {
    fn encode(&self, texts: &[&str], kind: TextKind) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| match (self.prefixed, kind) {
                (true, TextKind::Passage) => format!("passage: {}", t),
                (true, TextKind::Query) => format!("query: {}", t),
                (false, _) => t.to_string(),
            })
            .collect();

        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(ENCODE_BATCH_SIZE) {
            debug!(texts = batch.len(), "encoding batch");
            vectors.extend(self.encode_batch(batch)?);
        }
        Ok(vectors)
    }
}

/// E5 models expect "query: " / "passage: " prefixes
pub fn uses_e5_prefixes(model_id: &str) -> bool {
    model_id
        .rsplit('/')
        .next()
        .map(|name| name.to_lowercase().starts_with("e5"))
        .unwrap_or(false)
}

/// L2 normalization
fn normalize_l2(v: &Tensor) -> Result<Tensor> {
    Ok(v.broadcast_div(&v.sqr()?.sum_keepdim(1)?.sqrt()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_e5_prefix_detection() {
        assert!(uses_e5_prefixes("intfloat/e5-small-v2"));
        assert!(uses_e5_prefixes("intfloat/E5-base"));
        assert!(uses_e5_prefixes("e5-local"));
        assert!(!uses_e5_prefixes("BAAI/bge-small-en-v1.5"));
        assert!(!uses_e5_prefixes("sentence-transformers/all-MiniLM-L6-v2"));
    }

    #[test]
    fn test_local_model_dir_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_str().unwrap().to_string();
        let result = CandleLoader.load(&dir);
        assert!(matches!(result, Err(Error::ModelUnavailable(_))));
    }

    #[test]
    fn test_normalize_l2() {
        let t = Tensor::new(&[[3.0f32, 4.0], [0.0, 2.0]], &Device::Cpu).unwrap();
        let n = normalize_l2(&t).unwrap().to_vec2::<f32>().unwrap();
        assert!((n[0][0] - 0.6).abs() < 1e-6);
        assert!((n[0][1] - 0.8).abs() < 1e-6);
        assert!((n[1][1] - 1.0).abs() < 1e-6);
    }
}

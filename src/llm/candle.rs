//! Candle-based local models.
//!
//! Runs Phi-3 generation and BERT embeddings in-process using the `candle`
//! crate. No external API calls, pure Rust inference. Weights come from the
//! HuggingFace hub cache.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::phi3::{Config as Phi3Config, Model as Phi3};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use super::local::{CompletionPipeline, EmbeddingPipeline, Generation, ModelLoader};
use super::types::FinishReason;
use super::SYSTEM_INSTRUCTION;
use crate::catalog::{self, Architecture};
use crate::embed::BertEmbedder;

const SEED: u64 = 299792458;
const TOP_P: f64 = 0.9;
const EOS_TOKENS: &[&str] = &["<|end|>", "<|endoftext|>"];

/// Loads whitelisted models with candle.
#[derive(Debug, Clone)]
pub struct CandleLoader {
    device: Device,
}

impl CandleLoader {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// Use a GPU when one is available, else the CPU.
    pub fn detect() -> Self {
        let device = if candle_core::utils::cuda_is_available() {
            Device::new_cuda(0)
        } else if candle_core::utils::metal_is_available() {
            Device::new_metal(0)
        } else {
            Ok(Device::Cpu)
        };

        match device {
            Ok(device) => Self::new(device),
            Err(err) => {
                warn!("GPU detected but unusable, falling back to CPU: {err}");
                Self::default()
            }
        }
    }
}

impl Default for CandleLoader {
    fn default() -> Self {
        Self::new(Device::Cpu)
    }
}

fn check_architecture(model_id: &str, expected: Architecture) -> Result<()> {
    if let Some(model) = catalog::find(model_id) {
        if model.architecture != expected {
            bail!("{model_id} is a {:?} model, expected {expected:?}", model.architecture);
        }
    }
    Ok(())
}

#[async_trait]
impl ModelLoader for CandleLoader {
    async fn load_embeddings(&self, model_id: &str) -> Result<Arc<dyn EmbeddingPipeline>> {
        check_architecture(model_id, Architecture::Bert)?;
        let id = model_id.to_string();
        let device = self.device.clone();
        let embedder = tokio::task::spawn_blocking(move || BertEmbedder::load(&id, &device))
            .await
            .context("Model loading task failed")??;
        Ok(Arc::new(embedder))
    }

    async fn load_completion(&self, model_id: &str) -> Result<Arc<dyn CompletionPipeline>> {
        check_architecture(model_id, Architecture::Phi3)?;
        let id = model_id.to_string();
        let device = self.device.clone();
        let generator = tokio::task::spawn_blocking(move || Phi3Generator::load(&id, &device))
            .await
            .context("Model loading task failed")??;
        Ok(Arc::new(generator))
    }
}

/// Phi-3 text generation.
pub struct Phi3Generator {
    model_id: String,
    model: Mutex<Phi3>,
    tokenizer: Tokenizer,
    device: Device,
    eos_tokens: Vec<u32>,
}

impl Phi3Generator {
    /// Download (if needed) and load a model. Blocking.
    pub fn load(model_id: &str, device: &Device) -> Result<Self> {
        info!(model = model_id, "Loading completion model");

        let api = ApiBuilder::new()
            .with_progress(false)
            .build()
            .context("Failed to create HuggingFace API")?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo.get("config.json").context("Failed to get config.json")?;
        let tokenizer_path = repo.get("tokenizer.json").context("Failed to get tokenizer.json")?;
        let weights = weight_files(&repo)?;

        let config: Phi3Config = serde_json::from_slice(&std::fs::read(&config_path)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(anyhow::Error::msg)?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, DType::F32, device)? };
        let model = Phi3::new(&config, vb)?;

        let eos_tokens = EOS_TOKENS
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();

        Ok(Self {
            model_id: model_id.to_string(),
            model: Mutex::new(model),
            tokenizer,
            device: device.clone(),
            eos_tokens,
        })
    }
}

/// Single `model.safetensors`, or every shard listed in the index.
fn weight_files(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    let index_path = match repo.get("model.safetensors.index.json") {
        Ok(path) => path,
        Err(_) => {
            return Ok(vec![repo
                .get("model.safetensors")
                .context("Failed to get model.safetensors")?])
        }
    };

    let index: serde_json::Value = serde_json::from_slice(&std::fs::read(&index_path)?)?;
    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .context("Invalid safetensors index: missing weight_map")?;

    let mut shards: Vec<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();
    shards.sort_unstable();
    shards.dedup();

    shards
        .into_iter()
        .map(|shard| repo.get(shard).with_context(|| format!("Failed to get {shard}")))
        .collect()
}

impl CompletionPipeline for Phi3Generator {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(&self, prompt: &str, max_tokens: usize, temperature: f32) -> Result<Generation> {
        let formatted = format_phi3_prompt(SYSTEM_INSTRUCTION, prompt);
        let encoding = self.tokenizer.encode(formatted, true).map_err(anyhow::Error::msg)?;
        let prompt_ids = encoding.get_ids().to_vec();

        let temperature = (temperature > 0.0).then_some(f64::from(temperature));
        let mut logits_processor = LogitsProcessor::new(SEED, temperature, Some(TOP_P));

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("Model lock poisoned"))?;
        model.clear_kv_cache();

        let mut output_tokens = Vec::with_capacity(max_tokens);
        let mut finish_reason = FinishReason::Length;
        let mut input_ids = prompt_ids.clone();
        let mut offset = 0;

        for _ in 0..max_tokens {
            let input = Tensor::new(input_ids.as_slice(), &self.device)?.unsqueeze(0)?;
            let logits = model.forward(&input, offset)?;
            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = logits.get(logits.dim(0)? - 1)?;

            let next_token = logits_processor.sample(&logits)?;
            offset += input_ids.len();

            if self.eos_tokens.contains(&next_token) {
                finish_reason = FinishReason::Stop;
                break;
            }

            output_tokens.push(next_token);
            // KV cache holds the prefix, feed only the new token
            input_ids = vec![next_token];
        }

        let text = self
            .tokenizer
            .decode(&output_tokens, true)
            .map_err(anyhow::Error::msg)?;

        Ok(Generation {
            text: text.replace("<|end|>", "").trim().to_string(),
            prompt_tokens: prompt_ids.len(),
            completion_tokens: output_tokens.len(),
            finish_reason,
        })
    }
}

fn format_phi3_prompt(system: &str, prompt: &str) -> String {
    format!("<|system|>\n{system}<|end|>\n<|user|>\n{prompt}<|end|>\n<|assistant|>\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_phi3_prompt() {
        let prompt = format_phi3_prompt("Be brief.", "Hello");
        assert_eq!(
            prompt,
            "<|system|>\nBe brief.<|end|>\n<|user|>\nHello<|end|>\n<|assistant|>\n"
        );
    }

    #[test]
    fn test_architecture_mismatch_rejected() {
        assert!(check_architecture(crate::catalog::DEFAULT_EMBEDDING_MODEL, Architecture::Phi3).is_err());
        assert!(check_architecture("microsoft/Phi-3-mini-4k-instruct", Architecture::Phi3).is_ok());
        // Off-catalog models are left to the loader
        assert!(check_architecture("someone/custom", Architecture::Bert).is_ok());
    }

    #[tokio::test]
    async fn test_loader_rejects_wrong_family_before_download() {
        let loader = CandleLoader::default();
        let result = loader.load_completion(crate::catalog::DEFAULT_EMBEDDING_MODEL).await;
        assert!(result.is_err());
    }
}

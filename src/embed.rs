//! Local embeddings using Candle (pure Rust)
//!
//! BERT-family sentence embedding models downloaded from HuggingFace.
//! No ONNX runtime - pure Rust implementation.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::info;

use crate::llm::local::EmbeddingPipeline;

// BERT models have max 512 position embeddings - must truncate
const MAX_SEQ_LEN: usize = 512;

#[derive(Deserialize)]
struct ModelShape {
    hidden_size: usize,
}

pub struct BertEmbedder {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimensions: usize,
}

impl BertEmbedder {
    /// Download (if needed) and load a model. Blocking.
    pub fn load(model_id: &str, device: &Device) -> Result<Self> {
        info!(model = model_id, "Loading embedding model");

        let api = ApiBuilder::new()
            .with_progress(false)
            .build()
            .context("Failed to create HuggingFace API")?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo.get("config.json").context("Failed to get config.json")?;
        let tokenizer_path = repo.get("tokenizer.json").context("Failed to get tokenizer.json")?;
        let weights_path = repo.get("model.safetensors").context("Failed to get model.safetensors")?;

        let config_str = std::fs::read_to_string(&config_path)?;
        let bert_config: BertConfig = serde_json::from_str(&config_str)?;
        let ModelShape { hidden_size } = serde_json::from_str(&config_str)
            .context("config.json has no hidden_size")?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, device)?
        };
        let model = BertModel::load(vb, &bert_config)?;

        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device: device.clone(),
            dimensions: hidden_size,
        })
    }

    /// Create embeddings for multiple texts
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self.tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let max_len = tokens.iter()
            .map(|t| t.get_ids().len().min(MAX_SEQ_LEN))
            .max()
            .unwrap_or(0)
            .max(1);

        let mut input_ids_vec = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask_vec = Vec::with_capacity(texts.len() * max_len);

        for encoding in &tokens {
            let mut ids: Vec<u32> = encoding.get_ids().iter().take(MAX_SEQ_LEN).copied().collect();
            let mut mask: Vec<u32> = encoding.get_attention_mask().iter().take(MAX_SEQ_LEN).copied().collect();

            ids.resize(max_len, 0);
            mask.resize(max_len, 0);

            input_ids_vec.extend(ids);
            attention_mask_vec.extend(mask);
        }

        let batch_size = texts.len();
        let token_type_ids_vec = vec![0u32; batch_size * max_len];

        let input_ids = Tensor::from_vec(input_ids_vec, (batch_size, max_len), &self.device)?;
        let attention_mask = Tensor::from_vec(attention_mask_vec, (batch_size, max_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(token_type_ids_vec, (batch_size, max_len), &self.device)?;

        let embeddings = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over sequence dimension
        let attention_mask_f = attention_mask.to_dtype(DTYPE)?;
        let mask_expanded = attention_mask_f.unsqueeze(2)?.broadcast_as(embeddings.shape())?;

        let sum_embeddings = (embeddings * mask_expanded)?.sum(1)?;
        let sum_mask = attention_mask_f.sum(1)?.unsqueeze(1)?;
        let mean_embeddings = sum_embeddings.broadcast_div(&sum_mask)?;

        // L2 normalize
        let norms = mean_embeddings.sqr()?.sum(1)?.sqrt()?.unsqueeze(1)?;
        let normalized = mean_embeddings.broadcast_div(&norms)?;

        Ok(normalized.to_vec2()?)
    }
}

impl EmbeddingPipeline for BertEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .context("Model returned no embedding")
    }
}

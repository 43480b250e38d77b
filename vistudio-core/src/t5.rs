use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::t5::{self, T5ForConditionalGeneration};
use hf_hub::api::tokio::Api;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::{ExpansionParams, Summarizer, SummaryParams, TextExpander};

const SUMMARIZE_PREFIX: &str = "summarize: ";

/// A T5 encoder-decoder (e.g. flan-t5) serving both summarization and
/// instruction-following expansion.
pub struct T5TextModel {
    device: Device,
    config: t5::Config,
    tokenizer: Tokenizer,
    // The decoder keeps a KV cache, so a generation needs exclusive access.
    model: Mutex<T5ForConditionalGeneration>,
}

struct Decoding {
    max_new_tokens: usize,
    min_new_tokens: usize,
    sampling: Sampling,
    seed: u64,
}

impl T5TextModel {
    pub async fn load(api: &Api, model_id: &str, device: Device) -> Result<Self> {
        let repo = api.model(model_id.to_string());
        let config_file = repo
            .get("config.json")
            .await
            .context("failed to get T5 config")?;
        let tokenizer_file = repo
            .get("tokenizer.json")
            .await
            .context("failed to get T5 tokenizer")?;
        let weights_file = repo
            .get("model.safetensors")
            .await
            .context("failed to get T5 model file")?;

        tokio::task::spawn_blocking(move || {
            Self::from_files(config_file, tokenizer_file, weights_file, device)
        })
        .await?
    }

    fn from_files(
        config_file: PathBuf,
        tokenizer_file: PathBuf,
        weights_file: PathBuf,
        device: Device,
    ) -> Result<Self> {
        let config_str =
            std::fs::read_to_string(&config_file).context("failed to read T5 config")?;
        let mut config: t5::Config =
            serde_json::from_str(&config_str).context("failed to parse T5 config")?;
        config.use_cache = true;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load T5 tokenizer")?;
        // T5 overflows in half precision, keep it in F32 everywhere.
        let vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[weights_file], DType::F32, &device)
                .context("failed to build T5 var builder")?
        };
        let model =
            T5ForConditionalGeneration::load(vb, &config).context("failed to load T5 model")?;

        Ok(Self {
            device,
            config,
            tokenizer,
            model: Mutex::new(model),
        })
    }

    fn generate(&self, prompt: &str, decoding: Decoding) -> Result<String> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("T5 model lock poisoned"))?;
        model.clear_kv_cache();

        let tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let input_ids = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let encoder_output = model.encode(&input_ids)?;

        let start_token = self
            .config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32;
        let eos_token = self.config.eos_token_id as u32;
        let mut output = vec![start_token];
        let mut logits_processor = LogitsProcessor::from_sampling(decoding.seed, decoding.sampling);

        for index in 0..decoding.max_new_tokens {
            // With the KV cache warm only the newest token is fed back.
            let context = if index == 0 {
                &output[..]
            } else {
                &output[output.len() - 1..]
            };
            let decoder_ids = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = model
                .decode(&decoder_ids, &encoder_output)?
                .squeeze(0)?
                .to_dtype(DType::F32)?;
            let logits = if index < decoding.min_new_tokens {
                suppress_token(&logits, eos_token)?
            } else {
                logits
            };
            let next_token = logits_processor.sample(&logits)?;
            if next_token == eos_token {
                break;
            }
            output.push(next_token);
        }
        model.clear_kv_cache();
        debug!(tokens = output.len() - 1, "T5 generation finished");

        let text = self
            .tokenizer
            .decode(&output[1..], true)
            .map_err(Error::msg)?;
        Ok(text.trim().to_string())
    }
}

/// Makes `token` impossible to sample.
fn suppress_token(logits: &Tensor, token: u32) -> Result<Tensor> {
    let mut values = logits.to_vec1::<f32>()?;
    if let Some(value) = values.get_mut(token as usize) {
        *value = f32::NEG_INFINITY;
    }
    let len = values.len();
    Ok(Tensor::from_vec(values, len, logits.device())?)
}

impl Summarizer for T5TextModel {
    fn summarize(&self, text: &str, params: &SummaryParams) -> Result<String> {
        self.generate(
            &format!("{SUMMARIZE_PREFIX}{text}"),
            Decoding {
                max_new_tokens: params.max_length,
                min_new_tokens: params.min_length,
                sampling: Sampling::ArgMax,
                seed: 0,
            },
        )
    }
}

impl TextExpander for T5TextModel {
    fn expand(&self, instruction: &str, params: &ExpansionParams) -> Result<String> {
        self.generate(
            instruction,
            Decoding {
                max_new_tokens: params.max_new_tokens,
                min_new_tokens: 0,
                sampling: Sampling::TopP {
                    p: params.top_p,
                    temperature: params.temperature,
                },
                seed: params.seed,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppressed_token_is_never_picked_greedily() {
        let logits = Tensor::new(&[0.1f32, 5.0, 0.3], &Device::Cpu).unwrap();
        let suppressed = suppress_token(&logits, 1).unwrap();
        let mut processor = LogitsProcessor::from_sampling(0, Sampling::ArgMax);
        assert_eq!(processor.sample(&logits).unwrap(), 1);
        assert_eq!(processor.sample(&suppressed).unwrap(), 2);
    }

    #[test]
    fn suppressing_out_of_range_token_is_a_no_op() {
        let logits = Tensor::new(&[1f32, 2.0], &Device::Cpu).unwrap();
        let same = suppress_token(&logits, 9).unwrap();
        assert_eq!(same.to_vec1::<f32>().unwrap(), vec![1.0, 2.0]);
    }
}

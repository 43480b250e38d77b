use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::blip::{self, BlipForConditionalGeneration};
use candle_transformers::utils::apply_repeat_penalty;
use hf_hub::api::tokio::Api;
use image::RgbImage;
use tokenizers::Tokenizer;

use crate::util::image_to_normalized_tensor;
use crate::{CaptionParams, Captioner};

const IMAGE_SIZE: u32 = 384;
const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];
/// `[DEC]`, the decoder's beginning-of-sequence token.
const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

/// BLIP image captioning (ViT encoder + BERT-style text decoder).
pub struct BlipCaptioner {
    device: Device,
    tokenizer: Tokenizer,
    model: Mutex<BlipForConditionalGeneration>,
}

impl BlipCaptioner {
    pub async fn load(api: &Api, model_id: &str, revision: &str, device: Device) -> Result<Self> {
        let repo = api.repo(hf_hub::Repo::with_revision(
            model_id.to_string(),
            hf_hub::RepoType::Model,
            revision.to_string(),
        ));
        let weights_file = repo
            .get("model.safetensors")
            .await
            .context("failed to get BLIP model file")?;
        let tokenizer_file = repo
            .get("tokenizer.json")
            .await
            .context("failed to get BLIP tokenizer")?;

        tokio::task::spawn_blocking(move || Self::from_files(weights_file, tokenizer_file, device))
            .await?
    }

    fn from_files(weights_file: PathBuf, tokenizer_file: PathBuf, device: Device) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load BLIP tokenizer")?;
        let vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[weights_file], DType::F32, &device)
                .context("failed to build BLIP var builder")?
        };
        let config = blip::Config::image_captioning_large();
        let model =
            BlipForConditionalGeneration::new(&config, vb).context("failed to load BLIP model")?;
        Ok(Self {
            device,
            tokenizer,
            model: Mutex::new(model),
        })
    }
}

impl Captioner for BlipCaptioner {
    fn caption(&self, image: &RgbImage, params: &CaptionParams) -> Result<String> {
        let pixels =
            image_to_normalized_tensor(image, IMAGE_SIZE, IMAGE_MEAN, IMAGE_STD, &self.device)?;

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("BLIP model lock poisoned"))?;
        model.reset_kv_cache();
        let image_embeds = pixels.unsqueeze(0)?.apply(model.vision_model())?;

        // The captioning pipeline decodes greedily; temperature and top_p only
        // matter for sampling.
        let mut logits_processor = LogitsProcessor::from_sampling(0, Sampling::ArgMax);
        let mut token_ids = vec![BOS_TOKEN_ID];
        for index in 0..params.max_new_tokens {
            let context_size = if index > 0 { 1 } else { token_ids.len() };
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = model.text_decoder().forward(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            let logits = if params.repetition_penalty == 1.0 {
                logits
            } else {
                apply_repeat_penalty(&logits, params.repetition_penalty, &token_ids[1..])?
            };
            let token = logits_processor.sample(&logits)?;
            if token == SEP_TOKEN_ID {
                break;
            }
            token_ids.push(token);
        }
        model.reset_kv_cache();

        let caption = self
            .tokenizer
            .decode(&token_ids[1..], true)
            .map_err(Error::msg)?;
        Ok(caption.trim().to_string())
    }
}

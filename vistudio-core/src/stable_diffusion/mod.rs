use std::path::PathBuf;

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
};
use hf_hub::api::tokio::Api;
use image::RgbImage;
use tokenizers::Tokenizer;
use tracing::{debug, info};

mod sampling;

use crate::util::tensor_to_image;
use crate::{
    diffusion_dtype, select_best_device, DeviceMap, ImageGenerator, ImageModelFamily, ImageParams,
};

const VAE_SCALE: f64 = 0.18215;
const LATENT_CHANNELS: usize = 4;
/// Weights don't depend on the output size; this only seeds the base config.
const LOAD_SIZE: usize = 512;

pub struct StableDiffusionGenerator {
    device: Device,
    dtype: DType,
    family: ImageModelFamily,
    tokenizer: Tokenizer,
    pad_id: u32,
    max_tokens: usize,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
}

struct WeightFiles {
    unet: PathBuf,
    vae: PathBuf,
    clip: PathBuf,
    tokenizer: PathBuf,
}

/// Diffusers repos ship optional `.fp16` variants next to the full weights.
fn weight_name(stem: &str, fp16: bool) -> String {
    if fp16 {
        format!("{stem}.fp16.safetensors")
    } else {
        format!("{stem}.safetensors")
    }
}

impl StableDiffusionGenerator {
    pub async fn load(api: &Api, model_id: &str, device_map: DeviceMap) -> Result<Self> {
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = diffusion_dtype(&device);
        let family = ImageModelFamily::from_name(model_id);
        let fp16 = dtype == DType::F16;
        info!(model_id, ?family, ?dtype, "loading Stable Diffusion");

        let repo = api.model(model_id.to_string());
        let unet = repo
            .get(&weight_name("unet/diffusion_pytorch_model", fp16))
            .await
            .context("failed to get UNet weights")?;
        let vae = repo
            .get(&weight_name("vae/diffusion_pytorch_model", fp16))
            .await
            .context("failed to get VAE weights")?;
        let clip = repo
            .get(&weight_name("text_encoder/model", fp16))
            .await
            .context("failed to get CLIP text encoder weights")?;
        let tokenizer = api
            .model(family.tokenizer_repo().to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let files = WeightFiles {
            unet,
            vae,
            clip,
            tokenizer,
        };

        tokio::task::spawn_blocking(move || Self::from_files(files, family, device, dtype)).await?
    }

    fn from_files(
        files: WeightFiles,
        family: ImageModelFamily,
        device: Device,
        dtype: DType,
    ) -> Result<Self> {
        let sd_config = family.config(LOAD_SIZE, LOAD_SIZE);

        let tokenizer = Tokenizer::from_file(files.tokenizer)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = sd_config
            .clip
            .pad_with
            .clone()
            .unwrap_or_else(|| "<|endoftext|>".to_string());
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token.as_str())
            .with_context(|| format!("tokenizer has no {pad_token:?} token"))?;

        // The text encoder stays in F32, its activations overflow in F16.
        let text_model = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            files.clip,
            &device,
            DType::F32,
        )
        .context("failed to load CLIP text encoder")?;
        let vae = sd_config
            .build_vae(files.vae, &device, dtype)
            .context("failed to load VAE")?;
        let unet = sd_config
            .build_unet(
                files.unet,
                &device,
                LATENT_CHANNELS,
                cfg!(feature = "flash-attn"),
                dtype,
            )
            .context("failed to load UNet")?;

        Ok(Self {
            device,
            dtype,
            family,
            tokenizer,
            pad_id,
            max_tokens: sd_config.clip.max_position_embeddings,
            text_model,
            vae,
            unet,
        })
    }

    fn text_embeddings(&self, text: &str) -> Result<Tensor> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let tokens = sampling::fit_tokens(tokens, self.max_tokens, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

impl ImageGenerator for StableDiffusionGenerator {
    fn generate(&self, params: &ImageParams) -> Result<RgbImage> {
        params.validate().map_err(Error::msg)?;
        let sd_config = self.family.config(params.height, params.width);
        let mut scheduler = sd_config.build_scheduler(params.steps)?;
        let use_guidance = params.guidance > 1.0;

        // --- Prompt embeddings, unconditional (negative prompt) first ---
        let cond = self.text_embeddings(&params.prompt)?;
        let text_embeddings = if use_guidance {
            let uncond = self.text_embeddings(&params.negative_prompt)?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        }
        .to_dtype(self.dtype)?;

        // --- Seeded noise ---
        let latents = sampling::seeded_noise(
            params.seed,
            (1, LATENT_CHANNELS, params.height / 8, params.width / 8),
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        // --- Denoising ---
        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            let model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                sampling::apply_guidance(&noise_pred, params.guidance)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!(step = index + 1, total = timesteps.len(), "denoising");
        }

        // --- Decode and postprocess to u8 RGB ---
        let decoded = self.vae.decode(&(latents / VAE_SCALE)?)?;
        let img = ((decoded.to_dtype(DType::F32)? / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let img = (img.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hf_hub::api::tokio::Api;
use tracing::info;

use crate::{
    select_best_device, BlipCaptioner, Captioner, DeviceMap, ImageGenerator,
    StableDiffusionGenerator, Summarizer, T5TextModel, TextExpander,
};

/// Builds the model handles the registry hands out. Each call constructs a
/// fresh model; memoization is the registry's job.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_captioner(&self) -> Result<Arc<dyn Captioner>>;
    async fn load_summarizer(&self) -> Result<Arc<dyn Summarizer>>;
    async fn load_text_expander(&self) -> Result<Arc<dyn TextExpander>>;
    async fn load_image_generator(&self) -> Result<Arc<dyn ImageGenerator>>;
}

/// Hugging Face hub identifiers for each capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelIds {
    pub captioner: String,
    pub captioner_revision: String,
    pub summarizer: String,
    pub text_expander: String,
    pub image_generator: String,
}

impl Default for ModelIds {
    fn default() -> Self {
        Self {
            captioner: "Salesforce/blip-image-captioning-large".to_string(),
            captioner_revision: "refs/pr/18".to_string(),
            summarizer: "google/flan-t5-large".to_string(),
            text_expander: "google/flan-t5-base".to_string(),
            image_generator: "stable-diffusion-v1-5/stable-diffusion-v1-5".to_string(),
        }
    }
}

/// Downloads weights from the hub (or its local cache) and builds candle models.
pub struct HubLoader {
    api: Api,
    ids: ModelIds,
    device_map: DeviceMap,
}

impl HubLoader {
    pub fn new(ids: ModelIds, device_map: DeviceMap) -> Result<Self> {
        let api = Api::new().context("failed to create hf hub API")?;
        Ok(Self {
            api,
            ids,
            device_map,
        })
    }

    pub fn ids(&self) -> &ModelIds {
        &self.ids
    }

    async fn load_t5(&self, model_id: &str) -> Result<T5TextModel> {
        info!(model_id, "loading T5 model");
        let device = select_best_device(self.device_map).context("failed to set up device")?;
        T5TextModel::load(&self.api, model_id, device).await
    }
}

#[async_trait]
impl ModelLoader for HubLoader {
    async fn load_captioner(&self) -> Result<Arc<dyn Captioner>> {
        info!(model_id = %self.ids.captioner, "loading BLIP captioner");
        let device = select_best_device(self.device_map).context("failed to set up device")?;
        let model = BlipCaptioner::load(
            &self.api,
            &self.ids.captioner,
            &self.ids.captioner_revision,
            device,
        )
        .await?;
        Ok(Arc::new(model))
    }

    async fn load_summarizer(&self) -> Result<Arc<dyn Summarizer>> {
        Ok(Arc::new(self.load_t5(&self.ids.summarizer).await?))
    }

    async fn load_text_expander(&self) -> Result<Arc<dyn TextExpander>> {
        Ok(Arc::new(self.load_t5(&self.ids.text_expander).await?))
    }

    async fn load_image_generator(&self) -> Result<Arc<dyn ImageGenerator>> {
        let model =
            StableDiffusionGenerator::load(&self.api, &self.ids.image_generator, self.device_map)
                .await?;
        Ok(Arc::new(model))
    }
}

//! Model registry: builds each model once and shares it for the life of the process.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::Serialize;
use strum::Display;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::{Captioner, ImageGenerator, ModelLoader, Summarizer, TextExpander};

/// A construction outcome. Failures are kept too: there is no reload path, so a
/// model that failed to build stays unavailable.
type Slot<T> = OnceCell<std::result::Result<Arc<T>, String>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Captioner,
    Summarizer,
    TextExpander,
    ImageGenerator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Idle,
    Loaded,
    Failed,
}

pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    captioner: Slot<dyn Captioner>,
    summarizer: Slot<dyn Summarizer>,
    text_expander: Slot<dyn TextExpander>,
    image_generator: Slot<dyn ImageGenerator>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            captioner: OnceCell::new(),
            summarizer: OnceCell::new(),
            text_expander: OnceCell::new(),
            image_generator: OnceCell::new(),
        }
    }

    pub async fn captioner(&self) -> Result<Arc<dyn Captioner>> {
        acquire(&self.captioner, ModelKind::Captioner, || {
            self.loader.load_captioner()
        })
        .await
    }

    pub async fn summarizer(&self) -> Result<Arc<dyn Summarizer>> {
        acquire(&self.summarizer, ModelKind::Summarizer, || {
            self.loader.load_summarizer()
        })
        .await
    }

    pub async fn text_expander(&self) -> Result<Arc<dyn TextExpander>> {
        acquire(&self.text_expander, ModelKind::TextExpander, || {
            self.loader.load_text_expander()
        })
        .await
    }

    pub async fn image_generator(&self) -> Result<Arc<dyn ImageGenerator>> {
        acquire(&self.image_generator, ModelKind::ImageGenerator, || {
            self.loader.load_image_generator()
        })
        .await
    }

    /// Builds every model up front instead of on first request.
    pub async fn preload(&self) -> Result<()> {
        self.captioner().await?;
        self.summarizer().await?;
        self.text_expander().await?;
        self.image_generator().await?;
        Ok(())
    }

    pub fn status(&self) -> BTreeMap<ModelKind, ModelStatus> {
        BTreeMap::from([
            (ModelKind::Captioner, status_of(&self.captioner)),
            (ModelKind::Summarizer, status_of(&self.summarizer)),
            (ModelKind::TextExpander, status_of(&self.text_expander)),
            (ModelKind::ImageGenerator, status_of(&self.image_generator)),
        ])
    }
}

async fn acquire<T, F, Fut>(slot: &Slot<T>, kind: ModelKind, load: F) -> Result<Arc<T>>
where
    T: ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<T>>>,
{
    let outcome = slot
        .get_or_init(|| async move {
            info!(model = %kind, "constructing model");
            let started = Instant::now();
            match load().await {
                Ok(model) => {
                    info!(model = %kind, elapsed_ms = started.elapsed().as_millis() as u64, "model ready");
                    Ok(model)
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(model = %kind, error = %message, "model construction failed");
                    Err(message)
                }
            }
        })
        .await;

    match outcome {
        Ok(model) => Ok(model.clone()),
        Err(message) => Err(anyhow!("{kind} is unavailable: {message}")),
    }
}

fn status_of<T: ?Sized>(slot: &Slot<T>) -> ModelStatus {
    match slot.get() {
        None => ModelStatus::Idle,
        Some(Ok(_)) => ModelStatus::Loaded,
        Some(Err(_)) => ModelStatus::Failed,
    }
}

#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod device_map;
pub mod loader;
mod loader_factory;
pub mod params;
pub mod pool;
pub mod registry;
pub mod style;
mod util;

mod blip;
mod stable_diffusion;
mod t5;

pub use blip::BlipCaptioner;
pub use device_map::*;
use image::RgbImage;
pub use loader::*;
pub use loader_factory::*;
pub use params::*;
pub use pool::{InferencePool, PoolError};
pub use registry::{ModelKind, ModelRegistry, ModelStatus};
pub use stable_diffusion::StableDiffusionGenerator;
pub use style::{apply_style, Style};
pub use t5::T5TextModel;
pub use util::{decode_rgb, image_to_base64_png};

/// Image-to-text.
pub trait Captioner: Send + Sync {
    fn caption(&self, image: &RgbImage, params: &CaptionParams) -> anyhow::Result<String>;
}

/// Condenses text with deterministic decoding.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str, params: &SummaryParams) -> anyhow::Result<String>;
}

/// Follows a free-form instruction with sampled decoding.
pub trait TextExpander: Send + Sync {
    fn expand(&self, instruction: &str, params: &ExpansionParams) -> anyhow::Result<String>;
}

/// Text-to-image. Identical params (seed included) must produce the same image.
pub trait ImageGenerator: Send + Sync {
    fn generate(&self, params: &ImageParams) -> anyhow::Result<RgbImage>;
}

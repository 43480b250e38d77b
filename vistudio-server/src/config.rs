use std::path::PathBuf;

use clap::Parser;
use vistudio_core::{DeviceMap, ModelIds};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Vision Studio model server")]
pub struct Args {
    /// Use CPU instead of GPU
    #[arg(long)]
    pub cpu: bool,

    /// Host address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Image captioning model (BLIP)
    #[arg(long)]
    pub caption_model: Option<String>,

    /// Hub revision of the captioning model
    #[arg(long)]
    pub caption_revision: Option<String>,

    /// Summarization model (T5 family)
    #[arg(long)]
    pub summarizer_model: Option<String>,

    /// Elaboration model (T5 family)
    #[arg(long)]
    pub expander_model: Option<String>,

    /// Text-to-image model (Stable Diffusion 1.5 or 2.1 layout)
    #[arg(long, env = "SD_MODEL")]
    pub image_model: Option<String>,

    /// Directory served under /static
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,

    /// HTML page served at /
    #[arg(long, default_value = "templates/index.html")]
    pub index: PathBuf,

    /// Inference jobs allowed to run at the same time
    #[arg(long, default_value_t = 1)]
    pub max_concurrent_jobs: usize,

    /// Inference jobs allowed to wait for a free slot before requests get 503
    #[arg(long, default_value_t = 16)]
    pub max_queued_jobs: usize,

    /// Largest accepted request body, in MiB
    #[arg(long, default_value_t = 20)]
    pub max_upload_mb: usize,

    /// Load every model at startup instead of on first use
    #[arg(long)]
    pub preload: bool,
}

/// Everything the router needs besides the application state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpConfig {
    pub static_dir: PathBuf,
    pub index: PathBuf,
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("static"),
            index: PathBuf::from("templates/index.html"),
            max_body_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Args {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn device_map(&self) -> DeviceMap {
        DeviceMap::from_cpu_flag(self.cpu)
    }

    pub fn model_ids(&self) -> ModelIds {
        let defaults = ModelIds::default();
        ModelIds {
            captioner: self.caption_model.clone().unwrap_or(defaults.captioner),
            captioner_revision: self
                .caption_revision
                .clone()
                .unwrap_or(defaults.captioner_revision),
            summarizer: self
                .summarizer_model
                .clone()
                .unwrap_or(defaults.summarizer),
            text_expander: self
                .expander_model
                .clone()
                .unwrap_or(defaults.text_expander),
            image_generator: self
                .image_model
                .clone()
                .unwrap_or(defaults.image_generator),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            static_dir: self.static_dir.clone(),
            index: self.index.clone(),
            max_body_bytes: self.max_upload_mb * 1024 * 1024,
        }
    }
}

//! Text-to-image endpoint.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use tracing::info;
use vistudio_core::{image_to_base64_png, TextToImageRequest};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TextToImageResponse {
    pub image_base64: String,
    /// The seed actually used, so the caller can reproduce the image.
    pub seed: u64,
}

pub async fn txt2img(
    State(state): State<AppState>,
    payload: Result<Json<TextToImageRequest>, JsonRejection>,
) -> Result<Json<TextToImageResponse>, ApiError> {
    let Json(request) = payload?;
    if request.prompt.trim().is_empty() {
        return Err(ApiError::validation("Prompt is required"));
    }

    let params = request.resolve(rand::random::<u32>);
    params.validate().map_err(ApiError::Validation)?;
    info!(
        seed = params.seed,
        steps = params.steps,
        width = params.width,
        height = params.height,
        "generating image"
    );

    let seed = params.seed;
    let generator = state.registry.image_generator().await?;
    let image_base64 = state
        .pool
        .run(move || {
            let image = generator.generate(&params)?;
            image_to_base64_png(&image)
        })
        .await?;

    Ok(Json(TextToImageResponse { image_base64, seed }))
}

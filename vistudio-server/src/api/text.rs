//! Summarization and elaboration endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use tracing::debug;
use vistudio_core::{ElaborateRequest, SummarizeRequest};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct ElaborateResponse {
    pub elaboration: String,
}

fn require_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::validation("Text is required"));
    }
    Ok(())
}

pub async fn summarize(
    State(state): State<AppState>,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<Json<SummarizeResponse>, ApiError> {
    let Json(request) = payload?;
    require_text(&request.text)?;

    let params = request.params();
    debug!(chars = request.text.len(), ?params, "summarizing");
    let summarizer = state.registry.summarizer().await?;
    let summary = state
        .pool
        .run(move || summarizer.summarize(&request.text, &params))
        .await?;

    Ok(Json(SummarizeResponse { summary }))
}

pub async fn elaborate(
    State(state): State<AppState>,
    payload: Result<Json<ElaborateRequest>, JsonRejection>,
) -> Result<Json<ElaborateResponse>, ApiError> {
    let Json(request) = payload?;
    require_text(&request.text)?;

    let instruction = request.instruction();
    let params = request.params(rand::random());
    debug!(chars = request.text.len(), ?params, "elaborating");
    let expander = state.registry.text_expander().await?;
    let elaboration = state
        .pool
        .run(move || expander.expand(&instruction, &params))
        .await?;

    Ok(Json(ElaborateResponse { elaboration }))
}

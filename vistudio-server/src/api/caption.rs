//! Image captioning endpoint.

use std::str::FromStr;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::debug;
use vistudio_core::{decode_rgb, CaptionParams};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CaptionResponse {
    pub caption: String,
}

/// An uploaded image plus the generation knobs that came with it.
#[derive(Debug)]
struct CaptionForm {
    image: Bytes,
    params: CaptionParams,
}

impl CaptionForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut image = None;
        let mut params = CaptionParams::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            match name.as_str() {
                "file" => image = Some(field.bytes().await?),
                "max_new_tokens" => {
                    set_number(&mut params.max_new_tokens, &name, &field.text().await?)?
                }
                "temperature" => set_number(&mut params.temperature, &name, &field.text().await?)?,
                "top_p" => set_number(&mut params.top_p, &name, &field.text().await?)?,
                "repetition_penalty" => {
                    set_number(&mut params.repetition_penalty, &name, &field.text().await?)?
                }
                "prefix" => params.prefix = field.text().await?,
                "suffix" => params.suffix = field.text().await?,
                other => debug!(field = other, "ignoring caption form field"),
            }
        }

        match image {
            Some(image) if !image.is_empty() => Ok(Self { image, params }),
            _ => Err(ApiError::validation("Image file is required")),
        }
    }
}

/// Overwrites `slot` unless the form value is blank.
fn set_number<T: FromStr>(slot: &mut T, name: &str, raw: &str) -> Result<(), ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    *slot = raw
        .parse()
        .map_err(|_| ApiError::validation(format!("Invalid {name}: {raw:?}")))?;
    Ok(())
}

pub async fn caption(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CaptionResponse>, ApiError> {
    let CaptionForm { image, params } = CaptionForm::read(multipart?).await?;
    debug!(
        bytes = image.len(),
        max_new_tokens = params.max_new_tokens,
        "captioning image"
    );

    let captioner = state.registry.captioner().await?;
    let caption = state
        .pool
        .run(move || {
            let image = decode_rgb(&image)?;
            let caption = captioner.caption(&image, &params)?;
            Ok(params.decorate(&caption))
        })
        .await?;

    Ok(Json(CaptionResponse { caption }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_keep_the_default() {
        let mut tokens = 32usize;
        set_number(&mut tokens, "max_new_tokens", "  ").unwrap();
        assert_eq!(tokens, 32);
        set_number(&mut tokens, "max_new_tokens", " 48 ").unwrap();
        assert_eq!(tokens, 48);
    }

    #[test]
    fn unparsable_values_are_client_errors() {
        let mut top_p = 0.9f64;
        let err = set_number(&mut top_p, "top_p", "high").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(err.to_string(), "Invalid top_p: \"high\"");
        assert_eq!(top_p, 0.9);
    }
}

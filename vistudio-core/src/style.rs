//! Named prompt styles for image generation.

use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString};

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Style {
    None,
    Photographic,
    Cinematic,
    Anime,
    Watercolor,
    #[strum(serialize = "3d")]
    ThreeD,
    Pixel,
}

impl Style {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Photographic => "photorealistic, natural skin texture, 50mm lens, shallow depth of field, bokeh, HDR, high detail, sharp focus, soft lighting",
            Self::Cinematic => "cinematic lighting, film still, dramatic shadows, volumetric light",
            Self::Anime => "anime style, clean lines, vibrant colors, studio ghibli, makoto shinkai",
            Self::Watercolor => "watercolor painting, soft brush strokes, pastel tones",
            Self::ThreeD => "3D render, octane render, highly detailed, global illumination",
            Self::Pixel => "pixel art, 16-bit, retro style, crisp pixels",
        }
    }
}

/// Appends the style's suffix to `prompt`. Unknown styles leave it untouched.
pub fn apply_style(prompt: &str, style: &str) -> String {
    match Style::from_str(style).map(Style::suffix) {
        Ok(suffix) if !suffix.is_empty() => format!("{prompt}, {suffix}"),
        _ => prompt.to_string(),
    }
}

//! Request parameters for each capability, with their defaults.
//!
//! The bundled web page posts every field as a string, so numeric fields
//! accept numbers, numeric strings, `null` or `""` (absent).

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::style::apply_style;

pub const DEFAULT_NEGATIVE_PROMPT: &str = "cartoon, anime, drawing, painting, illustration, cgi, 3d render, low quality, lowres, blurry, oversaturated, noisy, artifacts, deformed, bad anatomy, extra limbs, extra fingers, watermark, text";

/// Parameters forwarded to the captioning model.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptionParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f32,
    pub prefix: String,
    pub suffix: String,
}

impl Default for CaptionParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 32,
            temperature: 1.0,
            top_p: 0.9,
            repetition_penalty: 1.0,
            prefix: String::new(),
            suffix: String::new(),
        }
    }
}

impl CaptionParams {
    /// Trims the generated caption and joins the non-empty prefix and suffix
    /// around it with single spaces.
    pub fn decorate(&self, caption: &str) -> String {
        let mut text = caption.trim().to_string();
        if !self.prefix.is_empty() {
            text = format!("{} {text}", self.prefix);
        }
        if !self.suffix.is_empty() {
            text = format!("{text} {}", self.suffix);
        }
        text
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TextToImageRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Absent means the default style; an explicit `null` means no style.
    #[serde(deserialize_with = "present")]
    pub style: Option<Option<String>>,
    #[serde(deserialize_with = "lenient")]
    pub steps: Option<usize>,
    #[serde(deserialize_with = "lenient")]
    pub guidance: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub seed: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    pub width: Option<usize>,
    #[serde(deserialize_with = "lenient")]
    pub height: Option<usize>,
}

/// Fully resolved inputs of one diffusion run.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageParams {
    /// Prompt with the style suffix already applied.
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: usize,
    pub guidance: f64,
    pub seed: u64,
    pub width: usize,
    pub height: usize,
}

impl TextToImageRequest {
    /// Applies defaults and the style table. `random_seed` is only consulted
    /// when the request carries no seed.
    pub fn resolve(&self, random_seed: impl FnOnce() -> u32) -> ImageParams {
        let style = match &self.style {
            None => "photographic",
            Some(style) => style.as_deref().unwrap_or("none"),
        };
        let negative_prompt = match self.negative_prompt.as_deref() {
            Some(neg) if !neg.is_empty() => neg.to_string(),
            _ => DEFAULT_NEGATIVE_PROMPT.to_string(),
        };
        ImageParams {
            prompt: apply_style(&self.prompt, style),
            negative_prompt,
            steps: self.steps.unwrap_or(30),
            guidance: self.guidance.unwrap_or(8.0),
            seed: self.seed.unwrap_or_else(|| u64::from(random_seed())),
            width: self.width.unwrap_or(512),
            height: self.height.unwrap_or(512),
        }
    }
}

impl ImageParams {
    /// The diffusion schedulers are trained over this many timesteps; asking
    /// for more collapses every step onto the same timestep.
    pub const MAX_STEPS: usize = 1000;
    /// Largest accepted side, in pixels. Latents and activations grow with the
    /// square of this.
    pub const MAX_DIMENSION: usize = 2048;

    /// The UNet works on 8x downsampled latents, so both sides must divide by 8.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % 8 != 0 {
                return Err(format!("{name} must be a positive multiple of 8, got {value}"));
            }
            if value > Self::MAX_DIMENSION {
                return Err(format!(
                    "{name} must be at most {}, got {value}",
                    Self::MAX_DIMENSION
                ));
            }
        }
        if self.steps == 0 || self.steps > Self::MAX_STEPS {
            return Err(format!(
                "steps must be between 1 and {}, got {}",
                Self::MAX_STEPS,
                self.steps
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SummarizeRequest {
    pub text: String,
    #[serde(deserialize_with = "lenient")]
    pub max_length: Option<usize>,
    #[serde(deserialize_with = "lenient")]
    pub min_length: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SummaryParams {
    pub max_length: usize,
    pub min_length: usize,
}

impl SummarizeRequest {
    pub fn params(&self) -> SummaryParams {
        SummaryParams {
            max_length: self.max_length.unwrap_or(130),
            min_length: self.min_length.unwrap_or(30),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ElaborateRequest {
    pub text: String,
    pub tone: Option<String>,
    pub length: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub creativity: Option<f64>,
}

/// Sampling knobs for open-ended text expansion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExpansionParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_new_tokens: usize,
    pub seed: u64,
}

impl ElaborateRequest {
    pub const MIN_TEMPERATURE: f64 = 0.1;

    /// The natural-language instruction handed to the text-expansion model.
    pub fn instruction(&self) -> String {
        let tone = self.tone.as_deref().unwrap_or("neutral");
        let length = match self.length.as_deref().unwrap_or("medium") {
            "short" => " in about 3-4 sentences",
            "medium" => " in about 6-8 sentences",
            "long" => " in 10-12 sentences",
            _ => "",
        };
        format!(
            "Rewrite and expand the following text{length} with a {tone} tone, add examples if helpful:\n\n{}",
            self.text
        )
    }

    pub fn params(&self, seed: u64) -> ExpansionParams {
        let creativity = self.creativity.unwrap_or(0.7);
        ExpansionParams {
            temperature: creativity.max(Self::MIN_TEMPERATURE),
            top_p: 0.9,
            max_new_tokens: 256,
            seed,
        }
    }
}

/// Keeps an explicit `null` apart from a missing field (which `#[serde(default)]`
/// leaves as `None`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Deserializes an optional value that may arrive as a number, a string, `null`
/// or an empty string.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let raw = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(de::Error::custom(format!("expected a number, got {other}")));
        }
    };
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| de::Error::custom(format!("invalid number {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn caption_prefix_and_suffix_wrap_the_trimmed_caption() {
        let params = CaptionParams {
            prefix: "A:".into(),
            suffix: ".".into(),
            ..Default::default()
        };
        let text = params.decorate("  a dog on a beach \n");
        assert_eq!(text, "A: a dog on a beach .");
        assert!(text.starts_with("A: "));
        assert!(text.ends_with('.'));
        assert_eq!(CaptionParams::default().decorate(" plain "), "plain");
    }

    #[test]
    fn txt2img_defaults() {
        let req: TextToImageRequest = serde_json::from_value(json!({"prompt": "a cat"})).unwrap();
        let params = req.resolve(|| 7);
        assert_eq!(params.steps, 30);
        assert_eq!(params.guidance, 8.0);
        assert_eq!((params.width, params.height), (512, 512));
        assert_eq!(params.seed, 7);
        assert_eq!(params.negative_prompt, DEFAULT_NEGATIVE_PROMPT);
        assert!(params.prompt.starts_with("a cat, photorealistic"));
    }

    #[test]
    fn txt2img_accepts_string_fields_from_the_form() {
        let req: TextToImageRequest = serde_json::from_value(json!({
            "prompt": "a cat",
            "negative_prompt": "",
            "style": "none",
            "steps": "12",
            "guidance": "7.5",
            "width": "640",
            "height": 384,
            "seed": "",
        }))
        .unwrap();
        assert_eq!(req.seed, None);
        let params = req.resolve(|| u32::MAX);
        assert_eq!(params.prompt, "a cat");
        assert_eq!(params.steps, 12);
        assert_eq!(params.guidance, 7.5);
        assert_eq!((params.width, params.height), (640, 384));
        assert_eq!(params.seed, u64::from(u32::MAX));
        assert_eq!(params.negative_prompt, DEFAULT_NEGATIVE_PROMPT);
    }

    #[test]
    fn explicit_seed_is_kept() {
        let req: TextToImageRequest =
            serde_json::from_value(json!({"prompt": "x", "seed": 42})).unwrap();
        assert_eq!(req.resolve(|| panic!("seed was supplied")).seed, 42);
    }

    #[test]
    fn image_params_reject_unaligned_sizes_and_zero_steps() {
        let req = TextToImageRequest {
            prompt: "x".into(),
            ..Default::default()
        };
        let params = req.resolve(|| 0);
        assert_eq!(params.validate(), Ok(()));
        let bad_width = ImageParams {
            width: 500,
            ..params.clone()
        };
        assert!(bad_width.validate().unwrap_err().contains("width"));
        let zero_height = ImageParams {
            height: 0,
            ..params.clone()
        };
        assert!(zero_height.validate().unwrap_err().contains("height"));
        let no_steps = ImageParams { steps: 0, ..params };
        assert!(no_steps.validate().is_err());
    }

    #[test]
    fn image_params_have_upper_bounds() {
        let params = TextToImageRequest {
            prompt: "x".into(),
            ..Default::default()
        }
        .resolve(|| 0);

        let largest = ImageParams {
            width: ImageParams::MAX_DIMENSION,
            height: ImageParams::MAX_DIMENSION,
            steps: ImageParams::MAX_STEPS,
            ..params.clone()
        };
        assert_eq!(largest.validate(), Ok(()));

        let too_many_steps = ImageParams {
            steps: 2000,
            ..params.clone()
        };
        assert_eq!(
            too_many_steps.validate().unwrap_err(),
            "steps must be between 1 and 1000, got 2000"
        );

        let huge = ImageParams {
            width: 1 << 20,
            height: 1 << 20,
            ..params.clone()
        };
        assert_eq!(
            huge.validate().unwrap_err(),
            "width must be at most 2048, got 1048576"
        );

        let tall = ImageParams {
            height: 2056,
            ..params
        };
        assert!(tall.validate().unwrap_err().starts_with("height must be at most"));
    }

    #[test]
    fn style_null_means_no_style_and_missing_means_default() {
        let missing: TextToImageRequest = serde_json::from_value(json!({"prompt": "a cat"})).unwrap();
        assert_eq!(missing.style, None);
        assert!(missing.resolve(|| 0).prompt.starts_with("a cat, photorealistic"));

        let null: TextToImageRequest =
            serde_json::from_value(json!({"prompt": "a cat", "style": null})).unwrap();
        assert_eq!(null.style, Some(None));
        assert_eq!(null.resolve(|| 0).prompt, "a cat");

        let anime: TextToImageRequest =
            serde_json::from_value(json!({"prompt": "a cat", "style": "anime"})).unwrap();
        assert!(anime.resolve(|| 0).prompt.starts_with("a cat, anime style"));
    }

    #[test]
    fn non_numeric_strings_are_rejected() {
        let err = serde_json::from_value::<SummarizeRequest>(json!({
            "text": "t",
            "max_length": "lots",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid number"));
        assert!(serde_json::from_value::<SummarizeRequest>(json!({"max_length": [1]})).is_err());
    }

    #[test]
    fn summarize_defaults() {
        let req: SummarizeRequest = serde_json::from_value(json!({"text": "t"})).unwrap();
        assert_eq!(
            req.params(),
            SummaryParams {
                max_length: 130,
                min_length: 30
            }
        );
    }

    #[test]
    fn elaboration_instruction_embeds_tone_and_length() {
        let req = ElaborateRequest {
            text: "Rust is fast.".into(),
            tone: Some("playful".into()),
            length: Some("short".into()),
            creativity: None,
        };
        assert_eq!(
            req.instruction(),
            "Rewrite and expand the following text in about 3-4 sentences with a playful tone, add examples if helpful:\n\nRust is fast."
        );
    }

    #[test]
    fn elaboration_defaults_and_unknown_length() {
        let req = ElaborateRequest {
            text: "x".into(),
            ..Default::default()
        };
        assert!(req.instruction().contains("in about 6-8 sentences with a neutral tone"));

        let req = ElaborateRequest {
            length: Some("epic".into()),
            ..req
        };
        assert!(req
            .instruction()
            .starts_with("Rewrite and expand the following text with a neutral tone"));
    }

    #[test]
    fn creativity_is_floored() {
        let req = ElaborateRequest {
            creativity: Some(0.0),
            ..Default::default()
        };
        assert_eq!(req.params(1).temperature, ElaborateRequest::MIN_TEMPERATURE);
        assert_eq!(ElaborateRequest::default().params(1).temperature, 0.7);
        let req: ElaborateRequest =
            serde_json::from_value(json!({"text": "x", "creativity": "1.3"})).unwrap();
        assert_eq!(req.params(1).temperature, 1.3);
    }
}

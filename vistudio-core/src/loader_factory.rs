use candle_transformers::models::stable_diffusion::StableDiffusionConfig;

/// Stable Diffusion configurations the image generator knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageModelFamily {
    V1_5,
    V2_1,
}

impl ImageModelFamily {
    /// Detect the family from a hub model identifier, e.g. `stabilityai/stable-diffusion-2-1`.
    pub fn from_name(model_name: &str) -> Self {
        let name = model_name.to_lowercase();
        if name.contains("stable-diffusion-2") || name.contains("2-1") || name.contains("2.1") {
            Self::V2_1
        } else {
            // Most community checkpoints are 1.5 fine-tunes.
            Self::V1_5
        }
    }

    pub fn config(self, height: usize, width: usize) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(None, Some(height), Some(width)),
            Self::V2_1 => StableDiffusionConfig::v2_1(None, Some(height), Some(width)),
        }
    }

    /// Repo that hosts the CLIP tokenizer for this family.
    pub fn tokenizer_repo(self) -> &'static str {
        "openai/clip-vit-base-patch32"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_family_from_name() {
        assert_eq!(
            ImageModelFamily::from_name("stable-diffusion-v1-5/stable-diffusion-v1-5"),
            ImageModelFamily::V1_5
        );
        assert_eq!(
            ImageModelFamily::from_name("runwayml/stable-diffusion-v1-5"),
            ImageModelFamily::V1_5
        );
        assert_eq!(
            ImageModelFamily::from_name("stabilityai/stable-diffusion-2-1"),
            ImageModelFamily::V2_1
        );
        assert_eq!(
            ImageModelFamily::from_name("someone/dreamshaper-8"),
            ImageModelFamily::V1_5
        );
        assert_eq!(
            ImageModelFamily::from_name("stabilityai/stable-diffusion-2"),
            ImageModelFamily::V2_1
        );
    }

    #[test]
    fn version_suffixes_of_fine_tunes_are_not_sd2() {
        for name in ["prompthero/openjourney-v2", "someone/realistic-vision-v2.0"] {
            assert_eq!(ImageModelFamily::from_name(name), ImageModelFamily::V1_5, "{name}");
        }
    }

    #[test]
    fn config_carries_requested_size() {
        let config = ImageModelFamily::V1_5.config(384, 640);
        assert_eq!((config.height, config.width), (384, 640));
    }
}

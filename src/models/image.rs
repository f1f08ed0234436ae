use crate::config::DEFAULT_MODEL;
use crate::error::{ImageGenError, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_PATH: &str = "generated_image.png";
pub const FALLBACK_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model_id: String,
    pub input_image: Option<PathBuf>,
    pub output_path: PathBuf,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model_id: DEFAULT_MODEL.to_string(),
            input_image: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_input_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_image = Some(path.into());
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }
}

/// Input image bytes with the MIME type sniffed from their content.
#[derive(Debug, Clone)]
pub struct InputImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl InputImage {
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ImageGenError::InputValidationError(format!(
                "Image file not found: {}",
                path.display()
            )));
        }
        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(data))
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mime_type = sniff_image_mime(&data)
            .unwrap_or(FALLBACK_MIME_TYPE)
            .to_string();
        Self { data, mime_type }
    }
}

pub fn sniff_image_mime(data: &[u8]) -> Option<&'static str> {
    infer::get(data)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
}

use crate::error::{ImageGenError, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pricing {
    pub input_cost_per_1k_chars: f64,
    pub output_cost_per_image: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    #[serde(skip)]
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub features: &'static [&'static str],
    pub status: &'static str,
    pub pricing: Pricing,
}

/// Image generation models the endpoint accepts, in display order.
pub const AVAILABLE_MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: "gemini-2.5-flash-image-preview",
        name: "Gemini 2.5 Flash Image (Nano Banana)",
        description: "State-of-the-art image generation and editing model with superior capabilities",
        features: &[
            "Natural language editing",
            "Character consistency",
            "Image blending",
            "1024px resolution",
        ],
        status: "Latest (Recommended)",
        pricing: Pricing {
            input_cost_per_1k_chars: 0.00025,
            output_cost_per_image: 0.002734375,
        },
    },
    ModelDescriptor {
        id: "gemini-2.0-flash-preview-image-generation",
        name: "Gemini 2.0 Flash Image",
        description: "Previous generation image model",
        features: &["Basic image generation", "Text-to-image"],
        status: "Deprecated (Sept 26, 2025)",
        pricing: Pricing {
            input_cost_per_1k_chars: 0.00025,
            output_cost_per_image: 0.002734375,
        },
    },
];

pub fn find_model(model_id: &str) -> Result<&'static ModelDescriptor> {
    AVAILABLE_MODELS
        .iter()
        .find(|model| model.id == model_id)
        .ok_or_else(|| {
            let known: Vec<&str> = AVAILABLE_MODELS.iter().map(|model| model.id).collect();
            ImageGenError::ConfigError(format!(
                "Model '{}' not supported. Available models: {:?}",
                model_id, known
            ))
        })
}

/// Catalog as a JSON object keyed by model id.
pub fn catalog_json() -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for model in AVAILABLE_MODELS {
        map.insert(
            model.id.to_string(),
            serde_json::to_value(model).unwrap_or(serde_json::Value::Null),
        );
    }
    serde_json::Value::Object(map)
}

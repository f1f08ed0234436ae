use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Price of one generation attempt. Built once by the estimator, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_text_cost: f64,
    pub input_image_cost: f64,
    pub output_image_cost: f64,
    pub total_cost: f64,
    pub input_chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedImage {
    pub path: PathBuf,
    pub model: String,
    pub cost: CostBreakdown,
    pub session_total: f64,
}

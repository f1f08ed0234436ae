use crate::error::Result;
use crate::models::{find_model, CostBreakdown, ModelDescriptor};
use std::sync::Mutex;

/// Price one request. Input image processing is billed at the output image rate.
pub fn estimate(prompt: &str, model: &ModelDescriptor, has_input_image: bool) -> CostBreakdown {
    let pricing = model.pricing;
    let input_chars = prompt.chars().count();
    let input_text_cost = (input_chars as f64 / 1000.0) * pricing.input_cost_per_1k_chars;
    let output_image_cost = pricing.output_cost_per_image;
    let input_image_cost = if has_input_image {
        pricing.output_cost_per_image
    } else {
        0.0
    };

    CostBreakdown {
        input_text_cost,
        input_image_cost,
        output_image_cost,
        total_cost: input_text_cost + input_image_cost + output_image_cost,
        input_chars,
    }
}

pub fn estimate_for(prompt: &str, model_id: &str, has_input_image: bool) -> Result<CostBreakdown> {
    let model = find_model(model_id)?;
    Ok(estimate(prompt, model, has_input_image))
}

/// Running cost of one session. Grows with every charged attempt and only
/// goes back down through [`SessionCost::reset`].
#[derive(Debug, Default)]
pub struct SessionCost {
    total: Mutex<f64>,
}

impl SessionCost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a charge and returns the new session total.
    pub fn charge(&self, cost: &CostBreakdown) -> f64 {
        let mut total = self.total.lock().unwrap_or_else(|e| e.into_inner());
        *total += cost.total_cost.max(0.0);
        *total
    }

    pub fn total(&self) -> f64 {
        *self.total.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn reset(&self) {
        *self.total.lock().unwrap_or_else(|e| e.into_inner()) = 0.0;
    }
}

pub fn format_breakdown(cost: &CostBreakdown, session_total: f64) -> String {
    let mut lines = vec![
        "💰 Cost Breakdown:".to_string(),
        format!(
            "   Input text ({} chars): ${:.6}",
            cost.input_chars, cost.input_text_cost
        ),
    ];
    if cost.input_image_cost > 0.0 {
        lines.push(format!(
            "   Input image processing: ${:.6}",
            cost.input_image_cost
        ));
    }
    lines.push(format!("   Output image: ${:.6}", cost.output_image_cost));
    lines.push(format!("   Total: ${:.6}", cost.total_cost));
    lines.push(format!("   Session total: ${:.6}", session_total));
    lines.join("\n")
}

/// Catalog listing for `--list-models`, prices to six decimals.
pub fn format_catalog(models: &[ModelDescriptor]) -> String {
    let rule = "=".repeat(50);
    let mut lines = vec!["Available Gemini Image Generation Models:".to_string(), rule.clone()];
    for model in models {
        lines.push(String::new());
        lines.push(format!("Model ID: {}", model.id));
        lines.push(format!("Name: {}", model.name));
        lines.push(format!("Status: {}", model.status));
        lines.push(format!("Description: {}", model.description));
        lines.push(format!("Features: {}", model.features.join(", ")));
        lines.push(format!(
            "Input cost: ${:.6} per 1K characters",
            model.pricing.input_cost_per_1k_chars
        ));
        lines.push(format!(
            "Output cost: ${:.6} per image",
            model.pricing.output_cost_per_image
        ));
    }
    lines.push(String::new());
    lines.push(rule);
    lines.join("\n")
}

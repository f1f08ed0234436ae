use crate::{
    error::Result,
    models::{GenerateContentResponse, Part},
};
use async_trait::async_trait;
use std::sync::Arc;

/// The hosted generation endpoint: one blocking round-trip per call.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate_content(
        &self,
        model_id: &str,
        parts: Vec<Part>,
    ) -> Result<GenerateContentResponse>;
}

/// Builds a backend for a caller-supplied credential.
pub trait BackendFactory: Send + Sync {
    fn connect(&self, api_key: &str) -> Result<Arc<dyn ImageBackend>>;
}

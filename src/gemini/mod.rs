pub mod image_client;
pub mod traits;

use crate::{config::GeminiConfig, error::Result};
use std::sync::Arc;

pub use image_client::ImageClient;
pub use traits::{BackendFactory, ImageBackend};

/// Connects [`ImageClient`]s that share everything but the credential.
#[derive(Debug, Clone)]
pub struct GeminiBackendFactory {
    config: GeminiConfig,
}

impl GeminiBackendFactory {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for GeminiBackendFactory {
    fn connect(&self, api_key: &str) -> Result<Arc<dyn ImageBackend>> {
        let config = self.config.clone().with_api_key(api_key);
        Ok(Arc::new(ImageClient::new(&config)?))
    }
}

use crate::error::{ImageGenError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Shortest sweep period the server accepts; `tokio::time::interval` rejects zero.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl GeminiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let api_key = env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty());
        let base_url = env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        GeminiConfig {
            api_key,
            base_url,
            model,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The explicit credential wins, then `GEMINI_API_KEY`.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()))
            .ok_or_else(|| {
                ImageGenError::ConfigError(format!(
                    "API key is required. Set {} environment variable or pass api_key parameter",
                    API_KEY_ENV
                ))
            })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub sweep_interval: Duration,
    pub finished_ttl: Duration,
    pub max_task_age: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 5000,
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            max_upload_bytes: 16 * 1024 * 1024,
            sweep_interval: Duration::from_secs(300),
            finished_ttl: Duration::from_secs(600),
            max_task_age: Duration::from_secs(3600),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = env::var("PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(defaults.port);
        let upload_dir = env::var("UPLOAD_FOLDER")
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir);
        let output_dir = env::var("OUTPUT_FOLDER")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);
        let max_upload_bytes = env::var("MAX_UPLOAD_MB")
            .ok()
            .and_then(|mb| megabytes(&mb))
            .unwrap_or(defaults.max_upload_bytes);

        ServerConfig {
            host,
            port,
            upload_dir,
            output_dir,
            max_upload_bytes,
            ..defaults
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_folders(
        mut self,
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        self.upload_dir = upload_dir.into();
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_eviction(mut self, finished_ttl: Duration, max_task_age: Duration) -> Self {
        self.finished_ttl = finished_ttl;
        self.max_task_age = max_task_age;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }
}

/// Byte count for a megabyte setting; `None` when unparsable or too large.
fn megabytes(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()?.checked_mul(1024 * 1024)
}

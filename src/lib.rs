//! Gemini image generation with per-session cost tracking.
//!
//! [`generator::ImageGenerator`] runs one request against an
//! [`gemini::ImageBackend`] and writes the first usable image to disk,
//! charging [`cost::SessionCost`] for the attempt. The `server` feature adds
//! an actix-web surface that runs generations as background tasks tracked
//! by a [`tasks::TaskStore`].

pub mod config;
pub mod cost;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod logger;
pub mod models;
#[cfg(feature = "server")]
pub mod server;
pub mod tasks;

pub use config::{GeminiConfig, ServerConfig};
pub use cost::{estimate, SessionCost};
pub use error::{ImageGenError, Result};
pub use gemini::{BackendFactory, GeminiBackendFactory, ImageBackend, ImageClient};
pub use generator::{GeneratorConfig, ImageGenerator};
pub use models::*;

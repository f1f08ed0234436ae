use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageGenError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid input: {0}")]
    InputValidationError(String),
    #[error("Transport error: {0}")]
    TransportError(String),
    #[error("Response error: {0}")]
    ResponseError(String),
    #[error("Failed to generate image: {0}")]
    GenerationFailed(String),
    #[error("No image generated in response")]
    NoImageProduced,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} not ready")]
    NotReady(String),
    #[error("Invalid task transition: {0}")]
    InvalidTransition(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ImageGenError {
    /// HTTP status code the web surface answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ImageGenError::ConfigError(_)
            | ImageGenError::InputValidationError(_)
            | ImageGenError::NotReady(_) => 400,
            ImageGenError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImageGenError>;

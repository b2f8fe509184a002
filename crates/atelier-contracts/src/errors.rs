use thiserror::Error;

/// Failure classes for pipeline operations.
///
/// Every error is terminal to the single in-flight operation: nothing is
/// retried automatically, and session state from before the failed
/// operation is left unchanged.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("no image produced: {0}")]
    NoImageProduced(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StudioError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn no_image(message: impl Into<String>) -> Self {
        Self::NoImageProduced(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<image::ImageError> for StudioError {
    fn from(err: image::ImageError) -> Self {
        StudioError::Configuration(err.to_string())
    }
}

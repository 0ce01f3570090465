//! Error types shared across the workspace.

use thiserror::Error;

/// Errors raised while validating component configuration.
///
/// Configuration is checked once at construction; there is no runtime
/// recovery from an invalid value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// A failure raised by a data-source implementation.
///
/// Sources live outside the engine, so their failures arrive as opaque
/// boxed errors; the engine carries them into `LoadState::Error` without
/// interpreting them.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A plain-message failure.
    #[error("{0}")]
    Msg(String),

    /// A failure annotated with the operation that raised it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<SourceError>,
    },

    /// Any other error from a source implementation.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl SourceError {
    /// Create a plain-message source error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Msg(message.into())
    }

    /// Wrap an arbitrary error raised by a source implementation.
    pub fn from_err(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(error))
    }

    /// Annotate an error with the operation that raised it.
    pub fn with_context(context: impl Into<String>, source: SourceError) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

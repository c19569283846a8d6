//! Error types for mintai-voice.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a pipeline failure, carried in terminal `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Recognition,
    Generation,
    Synthesis,
    Merge,
    Validation,
    Config,
    Io,
    Other,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    // External collaborator failures
    #[error("Recognition failed: {message}")]
    Recognition { message: String, retryable: bool },

    #[error("Generation failed: {message}")]
    Generation { message: String, retryable: bool },

    #[error("Synthesis failed: {message}")]
    Synthesis { message: String, retryable: bool },

    // Audio artifact assembly
    #[error("Audio merge failed: {message}")]
    Merge { message: String, retryable: bool },

    // Oversized / empty / out-of-range input
    #[error("Invalid input: {message}")]
    Validation { message: String, retryable: bool },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Configuration error: {0}")]
    ConfigToml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    pub fn recognition(message: impl Into<String>, retryable: bool) -> Self {
        Self::Recognition {
            message: message.into(),
            retryable,
        }
    }

    pub fn generation(message: impl Into<String>, retryable: bool) -> Self {
        Self::Generation {
            message: message.into(),
            retryable,
        }
    }

    pub fn synthesis(message: impl Into<String>, retryable: bool) -> Self {
        Self::Synthesis {
            message: message.into(),
            retryable,
        }
    }

    /// Merge failures are never retried: the inputs will not change.
    pub fn merge(message: impl Into<String>) -> Self {
        Self::Merge {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Recognition { .. } => ErrorKind::Recognition,
            Self::Generation { .. } => ErrorKind::Generation,
            Self::Synthesis { .. } => ErrorKind::Synthesis,
            Self::Merge { .. } => ErrorKind::Merge,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Config { .. } | Self::ConfigToml(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether another attempt at the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Recognition { retryable, .. }
            | Self::Generation { retryable, .. }
            | Self::Synthesis { retryable, .. }
            | Self::Merge { retryable, .. }
            | Self::Validation { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// The human-readable message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Recognition { message, .. }
            | Self::Generation { message, .. }
            | Self::Synthesis { message, .. }
            | Self::Merge { message, .. }
            | Self::Validation { message, .. }
            | Self::Config { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

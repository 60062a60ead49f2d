//! Error types for the annealant core library.
//!
//! Uses `thiserror` for public API error types. The taxonomy mirrors how each
//! failure is treated by the controller: numerical failures end the run,
//! storage failures degrade it, configuration failures prevent it from starting.

use std::path::PathBuf;

/// Top-level error type for the annealant core library.
#[derive(Debug, thiserror::Error)]
pub enum AnnealError {
    #[error("Numerical error: {0}")]
    Numerical(#[from] NumericalError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures from the training step or evaluation executors.
///
/// Always fatal to the run: divergence is terminal, not transient.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NumericalError {
    #[error("non-finite loss {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f64 },

    #[error("non-finite validation metric {metric} at epoch {epoch}")]
    NonFiniteMetric { epoch: usize, metric: f64 },

    #[error("engine failure: {message}")]
    Engine { message: String },
}

impl NumericalError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}

/// Failures from checkpoint persistence or run reporting.
///
/// Isolated to the call site: the run continues on in-memory state.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("no checkpoint found for {label}")]
    NotFound { label: String },

    #[error("corrupt checkpoint {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl StorageError {
    pub(crate) fn write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Read {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: String, message: String },

    #[error("configuration load failed: {message}")]
    Load { message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

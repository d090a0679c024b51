//! # Error Types
//!
//! Typed failures at the component boundaries of the engine.
//!
//! Probe failures never surface here: the validator, build checker and
//! test executor fold every failure into their reports. Only the store
//! and the generator boundary produce errors the round loop must handle.

use std::path::PathBuf;
use thiserror::Error;

/// Why an artifact path was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path is absolute")]
    Absolute,
    #[error("path contains a '..' segment")]
    ParentTraversal,
    #[error("path contains a backslash")]
    Backslash,
    #[error("path contains a NUL byte")]
    NulByte,
    #[error("path resolves outside the project root")]
    EscapesRoot,
}

/// Failures of the on-disk project store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsafe artifact path '{path}': {reason}")]
    UnsafePath { path: String, reason: PathError },

    #[error("report '{name}' already exists")]
    ReportExists { name: String },

    #[error("report '{name}' not found")]
    ReportMissing { name: String },

    #[error("failed to serialize '{name}': {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse '{name}': {source}")]
    Deserialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid project name '{0}'")]
    InvalidName(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Typed failure returned by a generator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("generator failed: {0}")]
    Failed(String),

    #[error("generator timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("generator returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("generator call cancelled")]
    Cancelled,

    #[error("generator unavailable: {0}")]
    Unavailable(String),
}

/// Engine configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The specification document is unusable
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read specification {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse specification: {0}")]
    Parse(String),

    #[error("invalid specification: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::UnsafePath {
            path: "../etc/passwd".to_string(),
            reason: PathError::ParentTraversal,
        };
        let text = err.to_string();
        assert!(text.contains("../etc/passwd"));
        assert!(text.contains(".."));
    }

    #[test]
    fn test_generator_timeout_display() {
        let err = GeneratorError::Timeout { secs: 30 };
        assert_eq!(err.to_string(), "generator timed out after 30s");
    }
}

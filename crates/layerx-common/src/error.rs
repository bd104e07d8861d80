//! Unified error types for the layerx workspace.
//!
//! The CLI maps [`LayerxError::LayerSpec`] to its own exit status; every
//! other variant is reported as an execution failure.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum LayerxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An image reference matched more than one image.
    #[error("{spec} does not resolve to a single image")]
    Ambiguous {
        /// The reference as given by the user.
        spec: String,
    },

    /// A layer selection could not be resolved under the strict policy.
    #[error("layer specification \"{spec}\" {reason}")]
    LayerSpec {
        /// Raw text of the offending selection.
        spec: String,
        /// Why the selection was rejected.
        reason: String,
    },

    /// An archive entry would land outside the scratch root.
    #[error("unsafe path in image export: \"{path}\"")]
    UnsafeTarPath {
        /// Entry name as declared in the archive.
        path: String,
    },

    /// Parent links do not form a valid chain.
    #[error("invalid layer chain: {message}")]
    InvalidChain {
        /// Description of the broken link.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl LayerxError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from strict layer selection.
    #[must_use]
    pub const fn is_layer_spec(&self) -> bool {
        matches!(self, Self::LayerSpec { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LayerxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_spec_error_displays_raw_text() {
        let err = LayerxError::LayerSpec {
            spec: "abc:def".into(),
            reason: "resolves to an empty range".into(),
        };
        assert_eq!(
            err.to_string(),
            "layer specification \"abc:def\" resolves to an empty range"
        );
        assert!(err.is_layer_spec());
    }

    #[test]
    fn unsafe_path_is_not_a_layer_spec_error() {
        let err = LayerxError::UnsafeTarPath {
            path: "../etc/passwd".into(),
        };
        assert!(!err.is_layer_spec());
        assert!(err.to_string().contains("../etc/passwd"));
    }
}

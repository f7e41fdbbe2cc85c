//! Error types for recipe preparation

use depokit_core::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

/// DXF import error type
#[derive(Error, Debug)]
pub enum DxfImportError {
    /// The file could not be opened
    #[error("Failed to open {}: {source}", path.display())]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a readable DXF drawing
    #[error("Failed to parse DXF: {0}")]
    Parse(#[from] dxf::DxfError),

    /// Import option out of range
    #[error("Invalid import option '{name}': {reason}")]
    InvalidOption {
        /// The option name.
        name: &'static str,
        /// The reason the option is invalid.
        reason: String,
    },
}

/// Recipe preparation error type
#[derive(Error, Debug)]
pub enum RecipeError {
    /// Import failed
    #[error(transparent)]
    Import(#[from] DxfImportError),

    /// Geometry or parameters rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RecipeError {
    /// Check if this error came from geometry validation
    pub fn is_validation(&self) -> bool {
        matches!(self, RecipeError::Validation(_))
    }
}

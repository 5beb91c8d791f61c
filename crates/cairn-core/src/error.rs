//! Error types for Cairn Core

use thiserror::Error;

use crate::schema::SchemaConflict;

/// Result type alias using Cairn's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Cairn core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid feature id: {0}")]
    InvalidFeatureId(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Schema conflict: {0}")]
    SchemaConflict(#[from] SchemaConflict),

    #[error("Settings section '{section}' is not an object")]
    MalformedSection { section: String },

    #[error("Definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

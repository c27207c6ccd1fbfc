//! Error types for ARTK

use thiserror::Error;

/// Result type alias using ARTK Error
pub type Result<T> = std::result::Result<T, Error>;

/// ARTK error types.
///
/// Only hard errors live here: conditions with no safe default. Unresolved steps,
/// malformed managed blocks and corrupted state files are handled in-band and never
/// become an `Error`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("[ARTK-IO] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[ARTK-IO] Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("[ARTK-J001] journey {source_name} is missing required field '{field}'")]
    MissingJourneyField { source_name: String, field: String },

    #[error("[ARTK-J002] journey {source_name} has invalid frontmatter: {reason}")]
    InvalidFrontmatter { source_name: String, reason: String },

    #[error("[ARTK-J003] journey {source_name} has no frontmatter block")]
    MissingFrontmatter { source_name: String },

    #[error("[ARTK-J004] journey {id} failed validation: {reason}")]
    JourneyValidation { id: String, reason: String },

    #[error("[ARTK-C001] invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("[ARTK-C002] invalid forbidden locator pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("[ARTK-S001] invalid pipeline transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("[ARTK-G001] managed block content for '{block}' contains a block marker")]
    NestedMarker { block: String },

    #[error("[ARTK-G002] invalid managed block id '{0}' (allowed: alphanumeric, '-', '_')")]
    InvalidBlockId(String),

    #[error("[ARTK-G003] code generation failed: {0}")]
    Codegen(String),
}

impl Error {
    /// Stable code for this error, suitable for machine consumption
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Serialization(_) => "ARTK-IO",
            Error::MissingJourneyField { .. } => "ARTK-J001",
            Error::InvalidFrontmatter { .. } => "ARTK-J002",
            Error::MissingFrontmatter { .. } => "ARTK-J003",
            Error::JourneyValidation { .. } => "ARTK-J004",
            Error::InvalidConfig(_) => "ARTK-C001",
            Error::InvalidPattern { .. } => "ARTK-C002",
            Error::InvalidStateTransition { .. } => "ARTK-S001",
            Error::NestedMarker { .. } => "ARTK-G001",
            Error::InvalidBlockId(_) => "ARTK-G002",
            Error::Codegen(_) => "ARTK-G003",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = Error::MissingJourneyField {
            source_name: "login.md".to_string(),
            field: "id".to_string(),
        };
        assert_eq!(err.code(), "ARTK-J001");
        assert!(err.to_string().starts_with("[ARTK-J001]"));
        assert!(err.to_string().contains("'id'"));
    }
}

//! Core error types for fieldcue-core.
//!
//! `CoreError` is the umbrella type returned by configuration and storage
//! entry points. The playback path has its own small enums because its
//! failures are expected and handled locally (skip a clip, finish a state)
//! rather than propagated.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for fieldcue-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Journey recorder errors
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// No scene with this name
    #[error("Scene not found: {0}")]
    SceneNotFound(String),

    /// Could not determine a data directory
    #[error("Cannot determine data directory")]
    NoDataDir,
}

/// Validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Empty collection
    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    /// The same state name appears more than once
    #[error("Duplicate state name: {0}")]
    DuplicateState(String),

    /// A per-state setting names a state that is not in the sequence
    #[error("Setting '{setting}' refers to unknown state '{state}'")]
    UnknownState { setting: String, state: String },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors raised by the clip resolver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// The state has no clips assigned.
    #[error("No clips available")]
    NoClipsAvailable,
}

/// Errors raised while playing a single clip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// The clip has no backing resource in the clip store.
    #[error("Clip '{clip}' is missing for state '{state}'")]
    ClipMissing { state: String, clip: String },

    /// The output could not start playing the resource.
    #[error("Failed to start clip '{clip}': {message}")]
    StartFailed { clip: String, message: String },

    /// Playback was interrupted by cancellation.
    #[error("Playback cancelled")]
    Cancelled,
}

impl PlaybackError {
    /// True for failures the state loop skips over.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            PlaybackError::ClipMissing { .. } | PlaybackError::StartFailed { .. }
        )
    }
}

/// Errors raised by the journey recorder.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// A journey with this id has already been written.
    #[error("Journey {0} has already been recorded")]
    AlreadyRecorded(String),

    /// Storage failure
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Encoding failure
    #[error("Failed to encode journey: {0}")]
    Encoding(#[from] serde_json::Error),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for RecorderError {
    fn from(err: rusqlite::Error) -> Self {
        RecorderError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skippable_playback_errors() {
        let missing = PlaybackError::ClipMissing {
            state: "Active".into(),
            clip: "a.mp3".into(),
        };
        let failed = PlaybackError::StartFailed {
            clip: "a.mp3".into(),
            message: "corrupt".into(),
        };
        assert!(missing.is_skippable());
        assert!(failed.is_skippable());
        assert!(!PlaybackError::Cancelled.is_skippable());
    }

    #[test]
    fn validation_error_wraps_into_core_error() {
        let err: CoreError = ValidationError::EmptyCollection("states".into()).into();
        assert_eq!(err.to_string(), "Validation error: Empty collection: states");
    }
}

//! Error types for the coursegen content pipeline.

use crate::status::GenerationState;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Catalog loading and validation errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Malformed catalog: {0}")]
    Malformed(String),

    #[error("Unknown {dimension} code: {code}")]
    UnknownDimension { dimension: &'static str, code: String },

    #[error("Duplicate {dimension} code: {code}")]
    DuplicateCode { dimension: &'static str, code: String },

    #[error("Empty {dimension} code")]
    EmptyCode { dimension: &'static str },
}

/// Schema registry loading and validation errors
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schemas {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Malformed schema file: {0}")]
    Malformed(String),

    #[error("Invalid schema {schema}: {reason}")]
    Invalid { schema: String, reason: String },
}

/// Failures reported by a content producer for a single attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProducerError {
    #[error("Producer timed out after {0} ms")]
    Timeout(u64),

    #[error("Producer service error: {0}")]
    Service(String),

    #[error("Producer returned malformed output: {0}")]
    Malformed(String),
}

/// Failures reported by a content store write
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreWriteError {
    #[error("Content already stored for {0}")]
    Duplicate(String),

    #[error("Content store unavailable: {0}")]
    Unavailable(String),
}

/// Pipeline-level errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No schema registered for exercise type: {0}")]
    SchemaNotFound(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Quality violation: {0}")]
    QualityViolation(String),

    #[error("Duplicate content: {0}")]
    DuplicateContent(String),

    #[error("Producer failure: {0}")]
    Producer(#[from] ProducerError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreWriteError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Schema registry error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid transition for {key}: expected {expected:?}, found {found:?}")]
    InvalidTransition {
        key: String,
        expected: GenerationState,
        found: GenerationState,
    },

    #[error("Lease lost for {0}")]
    LeaseLost(String),

    #[error("Status record not found: {0}")]
    NotFound(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        to_storage_io(err)
    }
}

impl From<sled::Error> for PipelineError {
    fn from(err: sled::Error) -> Self {
        PipelineError::Storage(StorageError::from(err))
    }
}

pub(crate) fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}

pub(crate) fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    ))
}

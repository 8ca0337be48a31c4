// src/error.rs

use thiserror::Error;

/// Core error types for Airlift
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Package manifest is missing a field or carries a malformed value
    #[error("Malformed package manifest: {0}")]
    ManifestParse(String),

    /// Manifest signature could not be validated against the public key
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Package hash is on the failed-update blacklist
    #[error("Package {0} previously failed to boot and is blacklisted")]
    BlacklistedPackage(String),

    /// A persisted record failed to decode
    #[error("Corrupt store record: {0}")]
    CorruptStore(String),
}

/// Result type alias using Airlift's Error type
pub type Result<T> = std::result::Result<T, Error>;

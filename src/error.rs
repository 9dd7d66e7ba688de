//! Custom error types for the index host

use sqlx::error::DatabaseError as _;
use thiserror::Error;

/// Main error type for indexing and maintenance operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Vector store error (HTTP {status}): {body}")]
    VectorStore { status: u16, body: String },

    #[error("Vector backend unavailable: {0}")]
    VectorBackendUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("No resolved project root for session '{0}'")]
    Unresolved(String),

    #[error("Maintenance error: {0}")]
    Maintenance(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for the index host
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for SQLite busy/locked aborts, which the catalog retries once.
    pub fn is_catalog_conflict(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("locked") || msg.contains("busy")
            }
            _ => false,
        }
    }
}

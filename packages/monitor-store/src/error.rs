//! Error types for monitor-store

use std::fmt;
use thiserror::Error;

/// Store error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Backing directories missing or cannot be created
    StorageUnavailable,
    /// Record file could not be parsed by the codec
    MalformedRecord,
    /// Another operation holds the record file lock
    LockContention,
    /// Replay target host name does not resolve
    UnknownHost,
    /// Replay target resolves but does not accept connections
    ServerUnreachable,
    /// Record not present in the requested partition
    NotFound,
    /// Serialization errors (codec write side)
    Serialization,
    /// Configuration errors
    Config,
    /// Background worker gone or task panicked
    Worker,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::MalformedRecord => "malformed_record",
            ErrorKind::LockContention => "lock_contention",
            ErrorKind::UnknownHost => "unknown_host",
            ErrorKind::ServerUnreachable => "server_unreachable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Config => "config",
            ErrorKind::Worker => "worker",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Store error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StoreError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    pub fn malformed(id: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::MalformedRecord,
            format!("Malformed record {}: {}", id, message),
        )
    }

    pub fn lock_contention(id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::LockContention,
            format!("Record is locked by another operation: {}", id.into()),
        )
    }

    pub fn unknown_host(host: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnknownHost,
            format!("Unknown host: {}", host.into()),
        )
    }

    pub fn server_unreachable(host: &str, port: u16) -> Self {
        Self::new(
            ErrorKind::ServerUnreachable,
            format!("Server not reachable at {}:{}", host, port),
        )
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Record not found: {}", id.into()),
        )
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Worker, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IO, message)
    }

    /// True for the replay preflight failures the caller must show the user
    pub fn is_replay_preflight(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::UnknownHost | ErrorKind::ServerUnreachable
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::io(format!("I/O error: {}", err)).with_source(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        StoreError::config(format!("YAML error: {}", err)).with_source(err)
    }
}

impl From<roxmltree::Error> for StoreError {
    fn from(err: roxmltree::Error) -> Self {
        StoreError::new(ErrorKind::MalformedRecord, format!("XML error: {}", err))
            .with_source(err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::worker(format!("Blocking task failed: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;

//! Store Ports (Trait Interfaces)
//!
//! - `RecordCodec`: record file format (XML by default, JSON for tooling)
//! - `ProgressSink`: progress of bulk deletes
//! - `HostProbe`: replay preflight (TCP in production, stubs in tests)

use async_trait::async_trait;
use std::time::Duration;

use super::models::TransactionRecord;
use crate::Result;

/// Opaque serializer behind the record files
///
/// `parse` failures must be reported as `ErrorKind::MalformedRecord`.
pub trait RecordCodec: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<TransactionRecord>;

    fn write(&self, record: &TransactionRecord) -> Result<Vec<u8>>;

    /// File extension without the dot
    fn extension(&self) -> &'static str {
        "xml"
    }
}

/// Receives progress of one bulk batch
///
/// Called from the background worker, never from the caller's context.
pub trait ProgressSink: Send + Sync {
    fn started(&self, _total: usize) {}

    /// `percent` is 0..=100
    fn progress(&self, percent: u8);

    fn finished(&self) {}
}

/// Sink that drops all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn progress(&self, _percent: u8) {}
}

/// Replay target reachability check
///
/// Must return `UnknownHost` when `host` does not resolve and
/// `ServerUnreachable` when it resolves but `host:port` cannot be reached
/// within `timeout`.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Result<()>;
}

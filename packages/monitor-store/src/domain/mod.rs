//! Domain layer for the transaction store
//!
//! # Domain Models
//!
//! - `TransactionRecord`: one captured HTTP request/response cycle
//! - `Partition`: CURRENT or SAVED
//! - `RecordSummary`: index entry kept per id
//!
//! # Ports
//!
//! - `RecordCodec`: opaque serializer behind the record files
//! - `ProgressSink`: progress channel for bulk operations
//! - `HostProbe`: replay target reachability check

pub mod models;
pub mod ordering;
pub mod ports;
pub mod tree;

pub use models::{
    ClientData, Cookie, DispatchKind, DispatchRecord, NameValue, Partition, RecordId,
    RecordSummary, RequestData, ServerData, SessionData, TransactionRecord,
};
pub use ordering::SortOrder;
pub use ports::{HostProbe, NullProgress, ProgressSink, RecordCodec};
pub use tree::{build_tree, NodeRef, NodeVisitor, TransactionNode};

//! monitor-store: persistent store for captured HTTP transactions
//!
//! Records live one file per transaction under a root directory:
//!
//! - `current/`: captured in this session, pruned at startup when older than
//!   the grace window
//! - `save/`: kept by explicit user action
//! - `replay/`: staging copies for the replay receiver
//!
//! ## Core Contract
//!
//! 1. **One partition per id**: a record is in CURRENT or SAVED, never both
//! 2. **Confirmed moves**: the index follows the disk, one id at a time
//! 3. **Background bulk work**: deletes and prunes run on a single worker
//!    with progress and a completion handle
//!
//! ## Usage
//!
//! ```rust,ignore
//! use monitor_store::{codec::XmlRecordCodec, Partition, ReplayStatus, StoreConfig, TransactionStore};
//!
//! let store = TransactionStore::new(StoreConfig::new("/var/lib/httpmonitor"), XmlRecordCodec);
//! store.initialize().await?;
//!
//! let ids = store.load_all().await?;
//! if let Some(record) = store.get(&ids.current[0], Partition::Current, true).await? {
//!     let replay = store.build_replay_request(&record, ReplayStatus::Current).await?;
//!     println!("{}", replay.url);
//! }
//! ```

pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod replay;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use config::StoreConfig;
pub use error::{ErrorKind, Result, StoreError};
pub use telemetry::init_tracing;

pub use domain::{
    HostProbe, NullProgress, Partition, ProgressSink, RecordCodec, RecordSummary, SortOrder,
    TransactionRecord,
};
pub use replay::{ReplayDescriptor, ReplayStatus};
pub use store::{FetchOptions, LoadedIds, MoveReport, TransactionStore};
pub use worker::{BatchHandle, BatchReport};

//! Infrastructure layer - disk and network adapters

pub mod files;
pub mod probe;

pub use files::{validate_id, FileLock, Location, RecordFiles, StoredFile};
pub use probe::TcpHostProbe;

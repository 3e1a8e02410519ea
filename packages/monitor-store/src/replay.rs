//! Replay request synthesis
//!
//! A replay is a GET against the original server carrying query parameters
//! that tell the replay receiver which staged record to re-issue:
//!
//! ```text
//! http://localhost:8080/app/index.jsp?netbeans.replay=1700000000000&netbeans.replay.status=current
//! ```

use std::fmt;
use std::path::PathBuf;

use crate::domain::{Partition, TransactionRecord};

pub const PARAM_REPLAY: &str = "netbeans.replay";
pub const PARAM_PORT: &str = "netbeans.replay.port";
pub const PARAM_STATUS: &str = "netbeans.replay.status";
pub const PARAM_SESSION: &str = "netbeans.replay.session";

/// Where the replay receiver finds the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayStatus {
    Current,
    Saved,
    Replay,
}

impl ReplayStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ReplayStatus::Current => "current",
            ReplayStatus::Saved => "save",
            ReplayStatus::Replay => "replay",
        }
    }
}

impl From<Partition> for ReplayStatus {
    fn from(partition: Partition) -> Self {
        match partition {
            Partition::Current => ReplayStatus::Current,
            Partition::Saved => ReplayStatus::Saved,
        }
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a successful replay preflight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayDescriptor {
    pub url: String,
    pub record_id: String,
    pub status: ReplayStatus,
    /// Copy of the record in the replay staging directory
    pub staged_path: PathBuf,
}

/// Build the replay URL for `record`
///
/// `session` is only added when the record asks for a session replacement.
pub fn replay_url(
    record: &TransactionRecord,
    status: ReplayStatus,
    callback_port: Option<u16>,
) -> String {
    let uri = record.request.uri.trim_start_matches('/');
    let mut url = format!(
        "{}://{}:{}/{}",
        record.request.scheme, record.server.name, record.server.port, uri
    );

    let mut params: Vec<(&str, String)> = vec![
        (PARAM_REPLAY, record.id.clone()),
        (PARAM_STATUS, status.label().to_string()),
    ];
    if let Some(port) = callback_port {
        params.push((PARAM_PORT, port.to_string()));
    }
    if let Some(session) = &record.session_replacement {
        params.push((PARAM_SESSION, session.clone()));
    }

    for (i, (name, value)) in params.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(name);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_labels() {
        assert_eq!(ReplayStatus::Current.label(), "current");
        assert_eq!(ReplayStatus::Saved.label(), "save");
        assert_eq!(ReplayStatus::Replay.to_string(), "replay");
        assert_eq!(ReplayStatus::from(Partition::Saved), ReplayStatus::Saved);
    }

    #[test]
    fn test_minimal_url() {
        let record = TransactionRecord::new("1700000000000", "GET", "/app/index.jsp", "localhost", 8080);
        assert_eq!(
            replay_url(&record, ReplayStatus::Current, None),
            "http://localhost:8080/app/index.jsp?netbeans.replay=1700000000000&netbeans.replay.status=current"
        );
    }

    #[test]
    fn test_url_with_port_and_session() {
        let record = TransactionRecord::new("7", "POST", "/cart", "shop.test", 80)
            .with_session_replacement("AB12;x=1");
        assert_eq!(
            replay_url(&record, ReplayStatus::Saved, Some(8082)),
            "http://shop.test:80/cart?netbeans.replay=7&netbeans.replay.status=save\
             &netbeans.replay.port=8082&netbeans.replay.session=AB12%3Bx%3D1"
        );
    }

    #[test]
    fn test_root_uri_and_encoded_id() {
        let record = TransactionRecord::new("a b", "GET", "/", "localhost", 8080);
        let url = replay_url(&record, ReplayStatus::Replay, None);
        assert!(url.starts_with("http://localhost:8080/?netbeans.replay=a%20b&"));
    }

    #[test]
    fn test_session_without_replacement_is_omitted() {
        let record = TransactionRecord::new("1", "GET", "/x", "localhost", 8080).with_session("S1");
        let url = replay_url(&record, ReplayStatus::Current, None);
        assert!(!url.contains(PARAM_SESSION));
    }
}

//! Transaction Domain Models
//!
//! A record is created when a transaction is captured and registered into
//! CURRENT. It may then move to SAVED or be deleted; it never lives in both.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Record ID (historically the capture time in epoch millis)
pub type RecordId = String;

/// Status code reported when a record carries no response status
pub const DEFAULT_STATUS: u16 = 200;

/// Store partition a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Current,
    Saved,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Current, Partition::Saved];

    /// Directory name under the store root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Partition::Current => "current",
            Partition::Saved => "save",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Current => "current",
            Partition::Saved => "saved",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Header, request parameter, or session attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

impl NameValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Cookie sent with the request
pub type Cookie = NameValue;

/// Request line, headers and parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    /// HTTP method (GET, POST, ...)
    pub method: String,
    /// Request URI without query string
    pub uri: String,
    /// Raw query string, if any
    #[serde(default)]
    pub query: Option<String>,
    /// "http" or "https"
    pub scheme: String,
    /// e.g. "HTTP/1.1"
    pub protocol: String,
    #[serde(default)]
    pub headers: Vec<NameValue>,
    #[serde(default)]
    pub params: Vec<NameValue>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Server the request was addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerData {
    pub name: String,
    pub port: u16,
}

/// Client side of the captured connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientData {
    #[serde(default)]
    pub remote_address: Option<String>,
}

/// HTTP session state at capture time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub id: String,
    #[serde(default)]
    pub attributes: Vec<NameValue>,
}

/// Kind of a nested request dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Forward,
    Include,
}

impl DispatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchKind::Forward => "forward",
            DispatchKind::Include => "include",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "forward" => Some(DispatchKind::Forward),
            "include" => Some(DispatchKind::Include),
            _ => None,
        }
    }
}

/// Forward or include performed while serving the transaction
///
/// Dispatches nest: a forwarded resource may itself include others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub kind: DispatchKind,
    pub uri: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub dispatches: Vec<DispatchRecord>,
}

impl DispatchRecord {
    pub fn new(kind: DispatchKind, uri: impl Into<String>) -> Self {
        Self {
            kind,
            uri: uri.into(),
            status: None,
            dispatches: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: DispatchRecord) -> Self {
        self.dispatches.push(child);
        self
    }
}

/// One captured HTTP request/response cycle
///
/// Immutable once loaded; the store hands out `Arc<TransactionRecord>`.
///
/// # Examples
///
/// ```rust
/// use monitor_store::domain::TransactionRecord;
///
/// let record = TransactionRecord::new("1700000000000", "GET", "/index.jsp", "localhost", 8080);
/// assert_eq!(record.display_name(), "GET /index.jsp");
/// assert_eq!(record.status_code(), 200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub request: RequestData,
    pub server: ServerData,
    #[serde(default)]
    pub client: ClientData,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub session: Option<SessionData>,
    /// Session id the replay receiver must substitute for the captured one
    #[serde(default)]
    pub session_replacement: Option<String>,
    /// Response status code
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub dispatches: Vec<DispatchRecord>,
}

impl TransactionRecord {
    /// Create a plain HTTP/1.1 record
    ///
    /// The timestamp is derived from `id` when it is an epoch-millis value,
    /// otherwise the current time is used.
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        uri: impl Into<String>,
        server_name: impl Into<String>,
        server_port: u16,
    ) -> Self {
        let id = id.into();
        let timestamp = timestamp_from_id(&id).unwrap_or_else(Utc::now);
        Self {
            id,
            timestamp,
            request: RequestData {
                method: method.into(),
                uri: uri.into(),
                query: None,
                scheme: "http".to_string(),
                protocol: "HTTP/1.1".to_string(),
                headers: Vec::new(),
                params: Vec::new(),
                body: None,
            },
            server: ServerData {
                name: server_name.into(),
                port: server_port,
            },
            client: ClientData::default(),
            cookies: Vec::new(),
            session: None,
            session_replacement: None,
            status: None,
            dispatches: Vec::new(),
        }
    }

    /// Generate an id from the current time (epoch millis)
    pub fn next_id() -> RecordId {
        Utc::now().timestamp_millis().to_string()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.request.query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push(NameValue::new(name, value));
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push(Cookie::new(name, value));
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session = Some(SessionData {
            id: session_id.into(),
            attributes: Vec::new(),
        });
        self
    }

    pub fn with_session_replacement(mut self, session_id: impl Into<String>) -> Self {
        self.session_replacement = Some(session_id.into());
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchRecord) -> Self {
        self.dispatches.push(dispatch);
        self
    }

    /// Response status, defaulting to 200 when none was captured
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(DEFAULT_STATUS)
    }

    /// `"<METHOD> <uri>"`
    pub fn display_name(&self) -> String {
        format!("{} {}", self.request.method, self.request.uri)
    }

    pub fn summary(&self, partition: Partition) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            partition,
            display_name: self.display_name(),
            timestamp: self.timestamp,
            status_code: self.status_code(),
        }
    }
}

/// Index entry kept for every id, independent of the record cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub id: RecordId,
    pub partition: Partition,
    pub display_name: String,
    pub timestamp: DateTime<Utc>,
    pub status_code: u16,
}

fn timestamp_from_id(id: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = id.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

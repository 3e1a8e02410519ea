//! Store configuration
//!
//! Built in code with `StoreConfig::new(root)` or loaded from YAML:
//!
//! ```yaml
//! root: /var/lib/httpmonitor
//! grace_window_secs: 30
//! probe_timeout_ms: 2000
//! callback_port: 8082
//! default_order: newest_first
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::SortOrder;
use crate::infrastructure::Location;
use crate::{Result, StoreError};

pub const DEFAULT_GRACE_WINDOW_SECS: u64 = 30;
pub const MAX_GRACE_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;
pub const MAX_PROBE_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding `current/`, `save/` and `replay/`
    pub root: PathBuf,

    /// CURRENT records modified before `startup - grace_window` are pruned
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,

    /// Deadline of the replay reachability probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Port of the local replay callback listener, if one is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,

    #[serde(default)]
    pub default_order: SortOrder,
}

fn default_grace_window_secs() -> u64 {
    DEFAULT_GRACE_WINDOW_SECS
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            grace_window_secs: DEFAULT_GRACE_WINDOW_SECS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            callback_port: None,
            default_order: SortOrder::default(),
        }
    }

    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = Some(port);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_default_order(mut self, order: SortOrder) -> Self {
        self.default_order = order;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            StoreError::config(format!("Cannot read {}: {}", path.display(), e)).with_source(e)
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(StoreConfig::invalid("root", "must not be empty"));
        }
        if self.grace_window_secs > MAX_GRACE_WINDOW_SECS {
            return Err(StoreConfig::invalid(
                "grace_window_secs",
                format!(
                    "{} exceeds {}",
                    self.grace_window_secs, MAX_GRACE_WINDOW_SECS
                ),
            ));
        }
        if self.probe_timeout_ms == 0 || self.probe_timeout_ms > MAX_PROBE_TIMEOUT_MS {
            return Err(StoreConfig::invalid(
                "probe_timeout_ms",
                format!(
                    "{} not in 1..={}",
                    self.probe_timeout_ms, MAX_PROBE_TIMEOUT_MS
                ),
            ));
        }
        if self.callback_port == Some(0) {
            return Err(StoreConfig::invalid("callback_port", "must not be 0"));
        }
        Ok(())
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn current_dir(&self) -> PathBuf {
        self.root.join(Location::Current.dir_name())
    }

    pub fn saved_dir(&self) -> PathBuf {
        self.root.join(Location::Saved.dir_name())
    }

    pub fn replay_dir(&self) -> PathBuf {
        self.root.join(Location::Replay.dir_name())
    }

    fn invalid(field: &str, reason: impl std::fmt::Display) -> StoreError {
        StoreError::config(format!("Invalid value for '{}': {}", field, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new("/tmp/monitor");
        assert_eq!(config.grace_window(), Duration::from_secs(30));
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.callback_port, None);
        assert_eq!(config.default_order, SortOrder::NewestFirst);
        assert_eq!(config.saved_dir(), PathBuf::from("/tmp/monitor/save"));
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_minimal() {
        let config = StoreConfig::from_yaml_str("root: /srv/monitor\n").unwrap();
        assert_eq!(config, StoreConfig::new("/srv/monitor"));
    }

    #[test]
    fn test_yaml_full() {
        let yaml = r#"
root: /srv/monitor
grace_window_secs: 60
probe_timeout_ms: 500
callback_port: 8082
default_order: alphabetical
"#;
        let config = StoreConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.grace_window_secs, 60);
        assert_eq!(config.probe_timeout(), Duration::from_millis(500));
        assert_eq!(config.callback_port, Some(8082));
        assert_eq!(config.default_order, SortOrder::Alphabetical);
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let err = StoreConfig::from_yaml_str("root: /x\nretention: 5\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_probe_timeout_range() {
        let err = StoreConfig::from_yaml_str("root: /x\nprobe_timeout_ms: 0\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert!(err.message.contains("probe_timeout_ms"));

        let config = StoreConfig::new("/x").with_probe_timeout(Duration::from_secs(120));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grace_window_bound() {
        let err = StoreConfig::from_yaml_str("root: /x\ngrace_window_secs: 10000000000000\n")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert!(err.message.contains("grace_window_secs"));

        let yaml = format!("root: /x\ngrace_window_secs: {}\n", MAX_GRACE_WINDOW_SECS);
        StoreConfig::from_yaml_str(&yaml).unwrap();
    }

    #[test]
    fn test_oversized_probe_timeout_is_rejected() {
        let config = StoreConfig::new("/x").with_probe_timeout(Duration::MAX);
        assert_eq!(config.probe_timeout_ms, u64::MAX);
        assert_eq!(config.validate().unwrap_err().kind, ErrorKind::Config);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let config = StoreConfig::new("/srv/monitor").with_callback_port(9000);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(config.to_yaml().unwrap().as_bytes()).unwrap();

        let loaded = StoreConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}

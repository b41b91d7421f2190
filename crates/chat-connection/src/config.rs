//! Connection configuration: raw options, validation, and YAML loading.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::types::Error;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8001/chat";
pub(crate) const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub(crate) const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 30_000;
pub(crate) const DEFAULT_INACTIVITY_TIMEOUT_MS: i64 = 30_000;
pub(crate) const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Options as supplied by the embedding application. Every field is
/// optional; missing fields take the defaults. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: u64,
    pub max_reconnect_delay: u64,
    /// Zero or negative disables inactivity disconnects.
    pub inactivity_timeout: i64,
    pub auto_reconnect: bool,
    pub debug: bool,
    pub connect_timeout: u64,
    pub event_channel_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY_MS,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT_MS,
            auto_reconnect: true,
            debug: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_MS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Validated, immutable connection configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    url: Url,
    max_reconnect_attempts: u32,
    backoff: BackoffPolicy,
    inactivity_timeout: Option<Duration>,
    auto_reconnect: bool,
    debug: bool,
    connect_timeout: Duration,
    event_channel_capacity: usize,
}

impl ConnectionConfig {
    /// Defaults for everything except the target address.
    pub fn new(url: &str) -> Result<Self, Error> {
        Self::from_options(ConnectionOptions {
            url: url.to_string(),
            ..Default::default()
        })
    }

    pub fn from_options(options: ConnectionOptions) -> Result<Self, Error> {
        let url = Url::parse(&options.url)
            .map_err(|e| Error::config(format!("url {:?}: {e}", options.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "url {:?}: scheme must be ws or wss",
                options.url
            )));
        }
        if options.reconnect_delay > options.max_reconnect_delay {
            return Err(Error::config(format!(
                "reconnectDelay ({}ms) exceeds maxReconnectDelay ({}ms)",
                options.reconnect_delay, options.max_reconnect_delay
            )));
        }
        if options.event_channel_capacity == 0 {
            return Err(Error::config("eventChannelCapacity must be positive"));
        }
        if options.connect_timeout == 0 {
            return Err(Error::config("connectTimeout must be positive"));
        }

        let inactivity_timeout = u64::try_from(options.inactivity_timeout)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            url,
            max_reconnect_attempts: options.reconnect_attempts,
            backoff: BackoffPolicy::new(
                Duration::from_millis(options.reconnect_delay),
                Duration::from_millis(options.max_reconnect_delay),
            ),
            inactivity_timeout,
            auto_reconnect: options.auto_reconnect,
            debug: options.debug,
            connect_timeout: Duration::from_millis(options.connect_timeout),
            event_channel_capacity: options.event_channel_capacity,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// `None` when inactivity disconnects are disabled.
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        self.inactivity_timeout
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn event_channel_capacity(&self) -> usize {
        self.event_channel_capacity
    }
}

/// Read raw options from a YAML file without validating them.
pub async fn load_options(path: &Path) -> Result<ConnectionOptions, Error> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::config(format!("read {}: {e}", path.display())))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::config(format!("parse {}: {e}", path.display())))
}

/// Load options from a YAML file and validate them.
pub async fn load(path: &Path) -> Result<ConnectionConfig, Error> {
    ConnectionConfig::from_options(load_options(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::from_options(ConnectionOptions::default()).unwrap();
        assert_eq!(config.url().as_str(), DEFAULT_URL);
        assert_eq!(config.max_reconnect_attempts(), 5);
        assert_eq!(config.backoff().base(), Duration::from_millis(3000));
        assert_eq!(config.backoff().max(), Duration::from_millis(30_000));
        assert_eq!(config.inactivity_timeout(), Some(Duration::from_secs(30)));
        assert!(config.auto_reconnect());
        assert!(!config.debug());
    }

    #[test]
    fn non_positive_inactivity_disables_monitor() {
        for value in [0, -1, -30_000] {
            let config = ConnectionConfig::from_options(ConnectionOptions {
                inactivity_timeout: value,
                ..Default::default()
            })
            .unwrap();
            assert_eq!(config.inactivity_timeout(), None, "value {value}");
        }
    }

    #[test]
    fn rejects_base_above_max() {
        let err = ConnectionConfig::from_options(ConnectionOptions {
            reconnect_delay: 10_000,
            max_reconnect_delay: 5_000,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("exceeds maxReconnectDelay"));
    }

    #[test]
    fn rejects_non_websocket_url() {
        assert!(ConnectionConfig::new("http://example.com/chat").is_err());
        assert!(ConnectionConfig::new("not a url").is_err());
        assert!(ConnectionConfig::new("wss://example.com/chat").is_ok());
    }

    #[test]
    fn rejects_zero_channel_capacity() {
        let err = ConnectionConfig::from_options(ConnectionOptions {
            event_channel_capacity: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn rejects_zero_connect_timeout() {
        let err = ConnectionConfig::from_options(ConnectionOptions {
            connect_timeout: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("connectTimeout"));
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn yaml_uses_camel_case_and_defaults() {
        let yaml = r#"
url: ws://chat.example.com/socket
reconnectAttempts: 3
reconnectDelay: 1000
maxReconnectDelay: 8000
autoReconnect: false
"#;
        let options: ConnectionOptions = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(options.reconnect_attempts, 3);
        assert!(!options.auto_reconnect);
        assert_eq!(options.inactivity_timeout, DEFAULT_INACTIVITY_TIMEOUT_MS);
        assert!(!options.debug);
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.yaml");
        tokio::fs::write(
            &path,
            "url: wss://chat.example.com/ws\ninactivityTimeout: 0\ndebug: true\n",
        )
        .await
        .unwrap();

        let config = load(&path).await.unwrap();
        assert_eq!(config.url().as_str(), "wss://chat.example.com/ws");
        assert_eq!(config.inactivity_timeout(), None);
        assert!(config.debug());
    }

    #[tokio::test]
    async fn load_rejects_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.yaml");
        tokio::fs::write(&path, "reconnectAttempts: [not, a, number]\n")
            .await
            .unwrap();
        let err = load_options(&path).await.unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[tokio::test]
    async fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.yaml")).await.unwrap_err();
        assert!(err.to_string().contains("read"));
    }
}

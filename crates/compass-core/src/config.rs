//! compass.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompassConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Consumer-subject mapping for the status callback endpoint.
    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/compass")
}

/// Webhook delivery and async-callback timing, as duration strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_backoff")]
    pub retry_base_backoff: String,
    #[serde(default = "default_retry_max_backoff")]
    pub retry_max_backoff: String,
    /// How long an async assignment may stay CONFIG_PENDING.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout: String,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_base_backoff: default_retry_base_backoff(),
            retry_max_backoff: default_retry_max_backoff(),
            callback_timeout: default_callback_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_request_timeout() -> String {
    "10s".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_backoff() -> String {
    "500ms".to_string()
}

fn default_retry_max_backoff() -> String {
    "30s".to_string()
}

fn default_callback_timeout() -> String {
    "15m".to_string()
}

fn default_sweep_interval() -> String {
    "30s".to_string()
}

/// [`NotificationsConfig`] with every duration parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationSettings {
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_base_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub callback_timeout: Duration,
    pub sweep_interval: Duration,
}

impl NotificationsConfig {
    pub fn resolve(&self) -> anyhow::Result<NotificationSettings> {
        let settings = NotificationSettings {
            request_timeout: duration_field("request_timeout", &self.request_timeout)?,
            retry_attempts: self.retry_attempts,
            retry_base_backoff: duration_field("retry_base_backoff", &self.retry_base_backoff)?,
            retry_max_backoff: duration_field("retry_max_backoff", &self.retry_max_backoff)?,
            callback_timeout: duration_field("callback_timeout", &self.callback_timeout)?,
            sweep_interval: duration_field("sweep_interval", &self.sweep_interval)?,
        };
        if settings.retry_attempts == 0 {
            bail!("notifications.retry_attempts must be at least 1");
        }
        if settings.request_timeout.is_zero() || settings.sweep_interval.is_zero() {
            bail!("notifications.request_timeout and sweep_interval must be non-zero");
        }
        Ok(settings)
    }
}

fn duration_field(name: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value)
        .with_context(|| format!("notifications.{name}: invalid duration {value:?}"))
}

/// A certificate subject allowed to report assignment status.
///
/// The caller may report for targets whose ID, parent ID or application
/// template ID is in `object_ids`, or whose owner tenant is in `tenant_ids`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub id: String,
    #[serde(default)]
    pub object_ids: Vec<String>,
    #[serde(default)]
    pub tenant_ids: Vec<String>,
}

impl CompassConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: CompassConfig = toml::from_str(content)?;
        config.notifications.resolve()?;
        for consumer in &config.consumers {
            if consumer.id.trim().is_empty() {
                bail!("consumers: id cannot be blank");
            }
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "5s", "500ms", "2m" or "1h". A plain
/// number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = CompassConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.consumers.is_empty());

        let settings = config.notifications.resolve().unwrap();
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.retry_base_backoff, Duration::from_millis(500));
        assert_eq!(settings.callback_timeout, Duration::from_secs(900));
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[server]
port = 9443
data_dir = "/tmp/compass"

[notifications]
request_timeout = "2s"
retry_attempts = 5
callback_timeout = "1h"

[[consumers]]
id = "CN=runtime-agent"
object_ids = ["rt-1"]

[[consumers]]
id = "CN=tenant-mapper"
tenant_ids = ["tenant-a"]
"#;
        let config = CompassConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.data_dir, PathBuf::from("/tmp/compass"));
        assert_eq!(config.consumers.len(), 2);
        assert_eq!(config.consumers[1].tenant_ids, vec!["tenant-a"]);

        let settings = config.notifications.resolve().unwrap();
        assert_eq!(settings.retry_attempts, 5);
        assert_eq!(settings.callback_timeout, Duration::from_secs(3600));
        assert_eq!(settings.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let err = CompassConfig::from_toml_str("[notifications]\nrequest_timeout = \"soon\"\n")
            .unwrap_err();
        assert!(format!("{err:#}").contains("request_timeout"));
    }

    #[test]
    fn test_zero_retry_attempts_is_rejected() {
        assert!(CompassConfig::from_toml_str("[notifications]\nretry_attempts = 0\n").is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compass.toml");
        let mut config = CompassConfig::default();
        config.consumers.push(ConsumerConfig {
            id: "CN=agent".into(),
            object_ids: vec!["app-1".into()],
            tenant_ids: vec![],
        });
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = CompassConfig::from_file(&path).unwrap();
        assert_eq!(loaded.consumers, config.consumers);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("fast"), None);
    }
}

//! Configuration types and loading.
//!
//! The forwarder reads a single JSON document. When the file is missing a
//! sample is copied into place; when it is invalid the sample is used
//! instead so the modem receive path keeps running.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ConfigError;
use crate::forward::Channel;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Sample config shipped next to the binary.
pub const DEFAULT_SAMPLE_FILE: &str = "config.json.sample";

/// Full forwarder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    pub modem: ModemConfig,
    #[serde(default)]
    pub sms_recipients: Vec<String>,
    pub email: EmailSettings,
    #[serde(default)]
    pub api_providers: Vec<ApiProvider>,
    pub database: DatabaseConfig,
    /// HTTP timeout in seconds for providers that don't set their own.
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    /// Retry budget shared by every channel without its own override.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub sms_max_retries: Option<u32>,
    #[serde(default)]
    pub api_max_retries: Option<u32>,
    #[serde(default)]
    pub debug: bool,
    /// Capacity of each channel queue and of the inbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Backoff unit; a retry sleeps `backoff_secs * retry_count`.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    /// Incomplete fragment groups older than this are dropped.
    #[serde(default = "default_fragment_ttl_secs")]
    pub fragment_ttl_secs: u64,
}

/// Serial modem connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemConfig {
    pub port: String,
    pub baudrate: u32,
    #[serde(default)]
    pub pin: Option<String>,
}

/// SMTP settings for the email channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl EmailSettings {
    /// The From address: explicit sender, else the SMTP login.
    pub fn from_address(&self) -> &str {
        self.sender.as_deref().unwrap_or(&self.smtp_user)
    }
}

/// One HTTP API destination.
///
/// `endpoint`, header values and string payload values may contain the
/// `{sender}`, `{timestamp}` and `{message}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiProvider {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub file: PathBuf,
}

fn default_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_fragment_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_method() -> String {
    "POST".to_string()
}

impl ForwarderConfig {
    /// Parse a config document from a JSON string.
    pub fn from_json(json: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Retry budget for a channel, falling back to the shared default.
    pub fn max_retries_for(&self, channel: Channel) -> u32 {
        match channel {
            Channel::Sms => self.sms_max_retries,
            Channel::Email => self.email.max_retries,
            Channel::Api => self.api_max_retries,
        }
        .unwrap_or(self.max_retries)
    }

    /// Whether a channel has at least one destination.
    pub fn is_configured(&self, channel: Channel) -> bool {
        match channel {
            Channel::Sms => !self.sms_recipients.is_empty(),
            Channel::Email => !self.email.recipients.is_empty(),
            Channel::Api => !self.api_providers.is_empty(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn fragment_ttl(&self) -> Duration {
        Duration::from_secs(self.fragment_ttl_secs)
    }
}

/// Resolve the config path from `SMS_FORWARDER_CONFIG`, else the default.
pub fn config_path_from_env() -> PathBuf {
    std::env::var("SMS_FORWARDER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the config file, seeding it from the sample when absent.
///
/// An unreadable or invalid config file falls back to the sample.
pub fn load_config(config_file: &Path, sample_file: &Path) -> Result<ForwarderConfig, ConfigError> {
    if !config_file.exists() {
        if !sample_file.exists() {
            return Err(ConfigError::NotFound {
                config: config_file.to_path_buf(),
                sample: sample_file.to_path_buf(),
            });
        }
        let sample = std::fs::read_to_string(sample_file)?;
        let config = ForwarderConfig::from_json(&sample, sample_file)?;
        std::fs::write(config_file, &sample)?;
        info!(path = %config_file.display(), "Created default config file");
        return Ok(config);
    }

    let loaded = std::fs::read_to_string(config_file)
        .map_err(ConfigError::from)
        .and_then(|raw| ForwarderConfig::from_json(&raw, config_file));

    match loaded {
        Ok(config) => {
            info!(path = %config_file.display(), "Config loaded successfully");
            Ok(config)
        }
        Err(e) => {
            error!(error = %e, "Error loading config, using sample config");
            let sample = std::fs::read_to_string(sample_file)?;
            ForwarderConfig::from_json(&sample, sample_file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "modem": {"port": "/dev/ttyUSB0", "baudrate": 115200},
        "email": {
            "smtp_server": "smtp.example.com",
            "smtp_port": 587,
            "smtp_user": "relay@example.com",
            "smtp_password": "secret"
        },
        "database": {"file": "sms.db"}
    }"#;

    fn parse(json: &str) -> ForwarderConfig {
        ForwarderConfig::from_json(json, Path::new("test.json")).unwrap()
    }

    #[test]
    fn defaults_applied() {
        let config = parse(MINIMAL);
        assert_eq!(config.default_timeout, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.backoff_secs, 5);
        assert!(!config.debug);
        assert!(config.sms_recipients.is_empty());
        assert!(config.api_providers.is_empty());
        assert_eq!(config.email.from_address(), "relay@example.com");
    }

    #[test]
    fn per_channel_retries_fall_back_to_shared_default() {
        let mut config = parse(MINIMAL);
        config.max_retries = 4;
        config.sms_max_retries = Some(1);
        config.email.max_retries = Some(2);

        assert_eq!(config.max_retries_for(Channel::Sms), 1);
        assert_eq!(config.max_retries_for(Channel::Email), 2);
        assert_eq!(config.max_retries_for(Channel::Api), 4);
    }

    #[test]
    fn configured_means_at_least_one_destination() {
        let mut config = parse(MINIMAL);
        for channel in Channel::ALL {
            assert!(!config.is_configured(channel));
        }
        config.sms_recipients.push("+15550001".into());
        assert!(config.is_configured(Channel::Sms));
        assert!(!config.is_configured(Channel::Email));
    }

    #[test]
    fn provider_defaults() {
        let json = MINIMAL.replace(
            r#""database""#,
            r#""api_providers": [{"name": "hook", "endpoint": "https://h/{message}"}], "database""#,
        );
        let config = parse(&json);
        let provider = &config.api_providers[0];
        assert_eq!(provider.method, "POST");
        assert!(!provider.default);
        assert!(provider.timeout.is_none());
        assert!(provider.headers.is_empty());
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let json = MINIMAL.replace(r#""database""#, r#""queue_capacity": 0, "database""#);
        let err = ForwarderConfig::from_json(&json, Path::new("x.json")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn missing_config_seeded_from_sample() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.json");
        let sample_path = tmp.path().join("config.json.sample");
        std::fs::write(&sample_path, MINIMAL).unwrap();

        let config = load_config(&config_path, &sample_path).unwrap();
        assert_eq!(config.modem.baudrate, 115200);
        assert!(config_path.exists());
    }

    #[test]
    fn invalid_config_falls_back_to_sample() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.json");
        let sample_path = tmp.path().join("config.json.sample");
        std::fs::write(&config_path, "{ not json").unwrap();
        std::fs::write(&sample_path, MINIMAL).unwrap();

        let config = load_config(&config_path, &sample_path).unwrap();
        assert_eq!(config.email.smtp_server, "smtp.example.com");
    }

    #[test]
    fn neither_file_present_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_config(&tmp.path().join("a.json"), &tmp.path().join("b.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }
}

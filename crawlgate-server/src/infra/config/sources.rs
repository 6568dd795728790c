use std::path::PathBuf;

use crawlgate_core::config::{BreakerConfig, JanitorConfig, QueueConfig, SemaphoreConfig};
use serde::{Deserialize, Serialize};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub store: FileStoreConfig,
    #[serde(default)]
    pub semaphore: SemaphoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

/// Overrides read from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub self_hosted: Option<bool>,
    pub lease_ttl_ms: Option<u64>,
    pub janitor_interval_ms: Option<u64>,
    /// Variables that were set but could not be parsed.
    pub rejected: Vec<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut env_config = Self {
            config_path: lookup("CRAWLGATE_CONFIG_PATH").map(PathBuf::from),
            server_host: lookup("CRAWLGATE_HOST"),
            redis_url: lookup("REDIS_URL").filter(|url| !url.is_empty()),
            key_prefix: lookup("CRAWLGATE_KEY_PREFIX"),
            ..Self::default()
        };

        env_config.server_port = env_config.parsed(&lookup, "CRAWLGATE_PORT", |s| s.parse().ok());
        env_config.self_hosted =
            env_config.parsed(&lookup, "CRAWLGATE_SELF_HOSTED", parse_bool);
        env_config.lease_ttl_ms =
            env_config.parsed(&lookup, "CRAWLGATE_LEASE_TTL_MS", |s| s.parse().ok());
        env_config.janitor_interval_ms =
            env_config.parsed(&lookup, "CRAWLGATE_JANITOR_INTERVAL_MS", |s| s.parse().ok());

        env_config
    }

    fn parsed<T>(
        &mut self,
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        let raw = lookup(name)?;
        let value = parse(raw.trim());
        if value.is_none() {
            self.rejected.push(name.to_string());
        }
        value
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

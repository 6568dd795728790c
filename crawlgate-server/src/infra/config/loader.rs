use std::{
    fs,
    path::{Path, PathBuf},
};

use crawlgate_core::config::GateConfig;
use once_cell::sync::Lazy;
use thiserror::Error;

use super::{
    models::{Config, ConfigMetadata, ServerConfig, StoreConfig},
    sources::{EnvConfig, FileConfig},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("crawlgate.toml"),
        PathBuf::from("config/crawlgate.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Resolves configuration from `.env`, a TOML file and the environment, in
/// increasing order of precedence. CLI flags are applied by the caller.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default)]
pub struct ConfigWarnings {
    pub items: Vec<String>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        }
        .or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            _ => Err(err),
        })?;

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Same as [`load`](Self::load) with an explicit environment snapshot.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        let path = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());
        let (file, config_path) = match path {
            Some(path) => (read_file_config(&path)?, Some(path)),
            None => match DEFAULT_CONFIG_LOCATIONS.iter().find(|p| p.exists()) {
                Some(path) => (read_file_config(path)?, Some(path.clone())),
                None => {
                    warnings.push(
                        "No crawlgate.toml detected; using defaults and environment variables",
                    );
                    (FileConfig::default(), None)
                }
            },
        };

        for name in &env.rejected {
            warnings.push(format!("Ignoring unparseable environment variable {name}"));
        }

        let config = compose(file, env, config_path, env_file_loaded)?;

        if config.store.redis_url.is_none() {
            warnings.push(
                "No REDIS_URL configured; state lives in process memory and is not shared",
            );
        }

        Ok(ConfigLoad { config, warnings })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::MissingConfig {
            path: path.to_path_buf(),
        });
    }

    let contents = fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

fn compose(
    file: FileConfig,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        store: file_store,
        mut semaphore,
        queue,
        mut janitor,
        breaker,
    } = file;

    let defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env.server_host.or(file_server.host).unwrap_or(defaults.host),
        port: env.server_port.or(file_server.port).unwrap_or(defaults.port),
    };

    let store = StoreConfig {
        redis_url: env.redis_url.or(file_store.redis_url),
        key_prefix: env
            .key_prefix
            .or(file_store.key_prefix)
            .unwrap_or_else(|| StoreConfig::default().key_prefix),
    };

    if let Some(self_hosted) = env.self_hosted {
        semaphore.self_hosted = self_hosted;
    }
    if let Some(ttl) = env.lease_ttl_ms {
        semaphore.lease_ttl_ms = ttl;
    }
    if let Some(interval) = env.janitor_interval_ms {
        janitor.interval_ms = interval;
    }

    let gate = GateConfig {
        semaphore,
        queue,
        janitor,
        breaker,
    };
    validate(&gate)?;

    Ok(Config {
        server,
        store,
        gate,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    })
}

fn validate(gate: &GateConfig) -> Result<(), ConfigLoadError> {
    if gate.semaphore.lease_ttl_ms < 2 {
        return Err(ConfigLoadError::Invalid(
            "semaphore.lease_ttl_ms must be at least 2".into(),
        ));
    }
    if gate.semaphore.base_delay_ms == 0 || gate.semaphore.max_delay_ms < gate.semaphore.base_delay_ms
    {
        return Err(ConfigLoadError::Invalid(
            "semaphore delays must satisfy 0 < base_delay_ms <= max_delay_ms".into(),
        ));
    }
    if gate.janitor.interval_ms == 0 || gate.janitor.page_size == 0 || gate.janitor.max_pages == 0 {
        return Err(ConfigLoadError::Invalid(
            "janitor interval_ms, page_size and max_pages must be positive".into(),
        ));
    }
    if gate.queue.pop_scan_limit == 0 {
        return Err(ConfigLoadError::Invalid(
            "queue.pop_scan_limit must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlgate_core::config::BypassPolicy;
    use std::io::Write;

    #[test]
    fn environment_overrides_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 4000
host = "127.0.0.1"

[store]
redis_url = "redis://file:6379"

[semaphore]
self_hosted = false
bypass = {{ mode = "bypass", threshold = 1 }}

[janitor]
sample_batch = 7
"#
        )
        .unwrap();

        let env = EnvConfig {
            server_port: Some(5000),
            self_hosted: Some(true),
            ..EnvConfig::default()
        };
        let ConfigLoad { config, warnings } = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(env, false)
            .unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.store.redis_url.as_deref(), Some("redis://file:6379"));
        assert!(config.gate.semaphore.self_hosted);
        assert_eq!(
            config.gate.semaphore.bypass,
            BypassPolicy::Bypass { threshold: 1 }
        );
        assert_eq!(config.gate.janitor.sample_batch, 7);
        assert_eq!(config.gate.semaphore.lease_ttl_ms, 30_000);
        assert!(warnings.is_empty(), "{:?}", warnings.items);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConfigLoader::new()
            .with_config_path("/definitely/not/here/crawlgate.toml")
            .load_with_env(EnvConfig::default(), false)
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let env = EnvConfig {
            lease_ttl_ms: Some(0),
            config_path: None,
            ..EnvConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawlgate.toml");
        std::fs::write(&path, "").unwrap();

        let err = ConfigLoader::new()
            .with_config_path(&path)
            .load_with_env(env, false)
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(_)));
    }
}

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::http::{
    check_timeout, ClientFactory, PoolSettings, DEFAULT_TIMEOUT, IDLE_TIMEOUT, MAX_IDLE_PER_HOST,
};
use crate::proxy::{ProxyError, ProxySettings};

const CONFIG_ENV: &str = "POOLED_HTTP_CONFIG_DIR";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory")]
    MissingDirectory,
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("{0}")]
    TomlDe(#[from] toml::de::Error),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("timeout_ms must be greater than zero")]
    ZeroTimeout,
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_idle_per_host: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
    /// PEM file with an extra root certificate to trust.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_idle_per_host: self.max_idle_per_host.unwrap_or(MAX_IDLE_PER_HOST),
            idle_timeout: self
                .idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(IDLE_TIMEOUT),
        }
    }

    /// The proxy from the file, only when both host and port are set.
    pub fn proxy(&self) -> Option<ProxySettings> {
        match (&self.proxy_host, self.proxy_port) {
            (Some(host), Some(port)) if !host.trim().is_empty() => {
                Some(ProxySettings::new(host.trim(), port))
            }
            _ => None,
        }
    }

    /// A factory for this configuration. A proxy in the environment takes
    /// precedence over the one in the file.
    pub fn factory(&self) -> Result<ClientFactory, ConfigError> {
        self.factory_with_env_proxy(ProxySettings::from_env()?)
    }

    pub fn factory_with_env_proxy(
        &self,
        env_proxy: Option<ProxySettings>,
    ) -> Result<ClientFactory, ConfigError> {
        let timeout = check_timeout(self.timeout()).map_err(|_| ConfigError::ZeroTimeout)?;
        let mut factory = ClientFactory::new()
            .with_timeout(timeout)
            .with_pool_settings(self.pool_settings())
            .with_proxy(env_proxy.or_else(|| self.proxy()));
        if let Some(path) = &self.ca_file {
            factory = factory.with_root_certificate_pem(fs::read(path)?);
        }
        Ok(factory)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigManager {
    base_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let dir = determine_base_dir()?;
        Ok(Self { base_dir: dir })
    }

    pub fn with_base_dir<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn save(&self, config: &HttpConfig) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.base_dir)?;
        let contents = toml::to_string(config)?;
        fs::write(self.config_file(), contents)?;
        tracing::debug!(path = %self.config_file().display(), "saved configuration");
        Ok(())
    }

    /// Load `config.toml`, falling back to defaults when it does not exist.
    pub fn load(&self) -> Result<HttpConfig, ConfigError> {
        let contents = match fs::read_to_string(self.config_file()) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %self.config_file().display(),
                    "no configuration file, using defaults"
                );
                return Ok(HttpConfig::default());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(toml::from_str(&contents)?)
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

fn determine_base_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    let dirs = ProjectDirs::from("dev", "pooled-http", "pooled-http")
        .ok_or(ConfigError::MissingDirectory)?;
    Ok(dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn saves_and_loads_config() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path());
        let config = HttpConfig {
            timeout_ms: Some(2500),
            proxy_host: Some("proxy.local".to_string()),
            proxy_port: Some(8080),
            ..HttpConfig::default()
        };

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(loaded, config);
        assert!(manager.config_file().exists());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path());

        let config = manager.load().unwrap();

        assert_eq!(config, HttpConfig::default());
        assert_eq!(config.timeout(), Duration::from_millis(7000));
        assert_eq!(config.pool_settings(), PoolSettings::default());
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path());
        fs::write(manager.config_file(), "timeout_ms = \"soon\"").unwrap();

        let err = manager.load().unwrap_err();

        match err {
            ConfigError::TomlDe(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn file_proxy_needs_host_and_port() {
        let host_only = HttpConfig {
            proxy_host: Some("proxy.local".to_string()),
            ..HttpConfig::default()
        };
        assert!(host_only.proxy().is_none());

        let both = HttpConfig {
            proxy_port: Some(3128),
            ..host_only
        };
        assert_eq!(both.proxy(), Some(ProxySettings::new("proxy.local", 3128)));
    }

    #[test]
    fn environment_proxy_wins_over_file() {
        let config = HttpConfig {
            timeout_ms: Some(1200),
            proxy_host: Some("file.proxy".to_string()),
            proxy_port: Some(1),
            ..HttpConfig::default()
        };

        let factory = config
            .factory_with_env_proxy(Some(ProxySettings::new("env.proxy", 2)))
            .unwrap();
        assert_eq!(factory.proxy(), Some(&ProxySettings::new("env.proxy", 2)));
        assert_eq!(factory.timeout(), Duration::from_millis(1200));

        let factory = config.factory_with_env_proxy(None).unwrap();
        assert_eq!(factory.proxy(), Some(&ProxySettings::new("file.proxy", 1)));
    }

    #[test]
    fn zero_timeout_in_file_is_rejected() {
        let config = HttpConfig {
            timeout_ms: Some(0),
            ..HttpConfig::default()
        };

        match config.factory_with_env_proxy(None).unwrap_err() {
            ConfigError::ZeroTimeout => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let dir = tempdir().unwrap();
        let config = HttpConfig {
            ca_file: Some(dir.path().join("absent.pem")),
            ..HttpConfig::default()
        };

        match config.factory_with_env_proxy(None).unwrap_err() {
            ConfigError::Io(err) => assert_eq!(err.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

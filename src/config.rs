/*!
 * Configuration
 *
 * Server, client and key cache settings, layered with figment: compiled
 * defaults, then an optional TOML file, then environment variables.
 * Server and client read `KM_*` variables (`KM_PORT`, `KM_BASE_URL`, ...),
 * the local key cache reads `KEY_CACHE_*`.
 */

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{QkdError, QkdResult};

pub const ENV_PREFIX: &str = "KM_";
pub const CACHE_ENV_PREFIX: &str = "KEY_CACHE_";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_INTEGRITY_SECRET: &str = "change_this_demo_secret";
pub const DEFAULT_STORE_PATH: &str = ".km_store.json";
/// Largest key the KM hands out in one creation request (1 MiB)
pub const DEFAULT_MAX_KEY_LENGTH: usize = 1 << 20;
pub const DEFAULT_CACHE_PATH: &str = ".qumail_cache.json";

fn layered<T: Serialize>(defaults: T, file: Option<&Path>, env_prefix: &str) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(defaults));
    if let Some(path) = file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(env_prefix))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub integrity_secret: String,
    /// Snapshot file; `None` keeps keys in memory only
    pub store_path: Option<PathBuf>,
    pub intrusion_on: bool,
    /// Upper bound on `length` accepted by the creation routes
    pub max_key_length: usize,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            integrity_secret: DEFAULT_INTEGRITY_SECRET.to_string(),
            store_path: None,
            intrusion_on: false,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults, then `file` if given, then `KM_*` variables.
    pub fn load(file: Option<&Path>) -> QkdResult<Self> {
        Self::from_figment(layered(Self::default(), file, ENV_PREFIX))
    }

    pub fn from_figment(figment: Figment) -> QkdResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QkdResult<()> {
        if self.integrity_secret.is_empty() {
            return Err(QkdError::ConfigError(
                "integrity_secret must not be empty".to_string(),
            ));
        }
        if self.max_key_length == 0 {
            return Err(QkdError::ConfigError(
                "max_key_length must be at least 1".to_string(),
            ));
        }
        self.bind_addr().map(|_| ())
    }

    pub fn bind_addr(&self) -> QkdResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                QkdError::ConfigError(format!(
                    "invalid bind address {}:{}: {}",
                    self.host, self.port, e
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub peer_id: String,
    pub default_key_length: usize,
    pub integrity_secret: String,
    pub timeout_ms: u64,
    /// Timeout of the GET creation attempt made before the POST
    pub fast_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub use_cached_when_offline: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            client_id: "Alice".to_string(),
            peer_id: "Bob".to_string(),
            default_key_length: 4096,
            integrity_secret: DEFAULT_INTEGRITY_SECRET.to_string(),
            timeout_ms: 10_000,
            fast_timeout_ms: 1500,
            max_attempts: 3,
            retry_backoff_ms: 200,
            use_cached_when_offline: true,
        }
    }
}

impl ClientConfig {
    pub fn load(file: Option<&Path>) -> QkdResult<Self> {
        Self::from_figment(layered(Self::default(), file, ENV_PREFIX))
    }

    pub fn from_figment(figment: Figment) -> QkdResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QkdResult<()> {
        if self.integrity_secret.is_empty() {
            return Err(QkdError::ConfigError(
                "integrity_secret must not be empty".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(QkdError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.default_key_length == 0 {
            return Err(QkdError::ConfigError(
                "default_key_length must be positive".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(QkdError::ConfigError(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn fast_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
    /// Falls back to the integrity secret when unset
    pub password: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CACHE_PATH),
            password: None,
        }
    }
}

impl CacheConfig {
    /// Defaults, then `file` if given, then `KEY_CACHE_PATH` / `KEY_CACHE_PASSWORD`.
    pub fn load(file: Option<&Path>) -> QkdResult<Self> {
        let config: Self = layered(Self::default(), file, CACHE_ENV_PREFIX).extract()?;
        Ok(config)
    }

    pub fn password_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.password.as_deref().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_toml<T: Serialize + Default>(toml: &str) -> Figment {
        Figment::from(Serialized::defaults(T::default())).merge(Toml::string(toml))
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5001);
        assert_eq!(config.integrity_secret, "change_this_demo_secret");
        assert!(config.store_path.is_none());
        assert!(!config.intrusion_on);
        assert_eq!(config.max_key_length, 1 << 20);
        assert_eq!(
            config.bind_addr().unwrap(),
            "127.0.0.1:5001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_server_toml_overrides() {
        let figment = with_toml::<ServerConfig>(
            r#"
            port = 6000
            store_path = "/tmp/km.json"
            intrusion_on = true
            "#,
        );
        let config = ServerConfig::from_figment(figment).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/km.json")));
        assert!(config.intrusion_on);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_server_rejects_empty_secret_and_bad_host() {
        let figment = with_toml::<ServerConfig>(r#"integrity_secret = """#);
        assert!(matches!(
            ServerConfig::from_figment(figment),
            Err(QkdError::ConfigError(_))
        ));

        let figment = with_toml::<ServerConfig>(r#"host = "not a host""#);
        assert!(ServerConfig::from_figment(figment).is_err());

        let figment = with_toml::<ServerConfig>("max_key_length = 0");
        assert!(matches!(
            ServerConfig::from_figment(figment),
            Err(QkdError::ConfigError(_))
        ));
    }

    #[test]
    fn test_client_defaults_and_validation() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_id, "Alice");
        assert_eq!(config.peer_id, "Bob");
        assert_eq!(config.max_attempts, 3);

        let figment = with_toml::<ClientConfig>("max_attempts = 0");
        assert!(ClientConfig::from_figment(figment).is_err());

        let figment = with_toml::<ClientConfig>("default_key_length = 0");
        assert!(ClientConfig::from_figment(figment).is_err());

        let figment = with_toml::<ClientConfig>(r#"base_url = "ftp://km""#);
        assert!(ClientConfig::from_figment(figment).is_err());
    }

    #[test]
    fn test_cache_password_fallback() {
        let config = CacheConfig::default();
        assert_eq!(config.password_or("secret"), "secret");

        let figment = with_toml::<CacheConfig>(r#"password = "hunter2""#);
        let config: CacheConfig = figment.extract().unwrap();
        assert_eq!(config.password_or("secret"), "hunter2");
        assert_eq!(config.path, PathBuf::from(".qumail_cache.json"));
    }
}

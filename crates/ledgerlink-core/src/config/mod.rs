//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::session::ProviderKey;

/// Ledgerlink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub retry: RetryConfig,
}

/// Token Service API endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity period after which a connected session ends
    pub idle_timeout_ms: u64,
    pub providers: ProvidersConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 30 * 60 * 1000,
            providers: ProvidersConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn endpoint(&self, key: ProviderKey) -> &ProviderEndpoint {
        match key {
            ProviderKey::InternetIdentity => &self.providers.internet_identity,
            ProviderKey::Nfid => &self.providers.nfid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub internet_identity: ProviderEndpoint,
    pub nfid: ProviderEndpoint,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            internet_identity: ProviderEndpoint::new("https://identity.ic0.app"),
            nfid: ProviderEndpoint::new("https://nfid.one/authenticate"),
        }
    }
}

/// Where and how to log in with one identity provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub endpoint_url: String,
    pub max_credential_lifetime_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_origin: Option<String>,
}

impl ProviderEndpoint {
    const DEFAULT_LIFETIME_SECS: u64 = 8 * 60 * 60;

    pub fn new(endpoint_url: &str) -> Self {
        Self {
            endpoint_url: endpoint_url.to_string(),
            max_credential_lifetime_secs: Self::DEFAULT_LIFETIME_SECS,
            derivation_origin: None,
        }
    }

    pub fn max_credential_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_credential_lifetime_secs)
    }
}

/// Retry budgets, one per call family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub mutation: RetryPolicy,
    pub balance: RetryPolicy,
    pub read: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            mutation: RetryPolicy::mutation(),
            balance: RetryPolicy::balance_read(),
            read: RetryPolicy::new(1, Duration::ZERO),
        }
    }
}

const KEYS: &[&str] = &[
    "api.base_url",
    "api.timeout_secs",
    "session.idle_timeout_ms",
    "session.providers.internet_identity.endpoint_url",
    "session.providers.internet_identity.max_credential_lifetime_secs",
    "session.providers.internet_identity.derivation_origin",
    "session.providers.nfid.endpoint_url",
    "session.providers.nfid.max_credential_lifetime_secs",
    "session.providers.nfid.derivation_origin",
    "retry.mutation.max_attempts",
    "retry.mutation.base_delay_ms",
    "retry.balance.max_attempts",
    "retry.balance.base_delay_ms",
    "retry.read.max_attempts",
    "retry.read.base_delay_ms",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LEDGERLINK_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("ledgerlink")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default path, or defaults if there is no file
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_url("api.base_url", &self.api.base_url)?;
        if self.api.timeout_secs == 0 {
            return Err(anyhow!("api.timeout_secs must be greater than 0"));
        }
        if self.session.idle_timeout_ms == 0 {
            return Err(anyhow!("session.idle_timeout_ms must be greater than 0"));
        }

        for key in ProviderKey::all() {
            let endpoint = self.session.endpoint(key);
            validate_url(
                &format!("session.providers.{}.endpoint_url", key),
                &endpoint.endpoint_url,
            )?;
            if endpoint.max_credential_lifetime_secs == 0 {
                return Err(anyhow!(
                    "session.providers.{}.max_credential_lifetime_secs must be greater than 0",
                    key
                ));
            }
        }

        for (name, policy) in [
            ("mutation", &self.retry.mutation),
            ("balance", &self.retry.balance),
            ("read", &self.retry.read),
        ] {
            if policy.max_attempts == 0 {
                return Err(anyhow!("retry.{}.max_attempts must be at least 1", name));
            }
        }

        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        if let Some((provider, field)) = provider_key(key) {
            let endpoint = self.session.endpoint(provider);
            return match field {
                "endpoint_url" => Ok(endpoint.endpoint_url.clone()),
                "max_credential_lifetime_secs" => {
                    Ok(endpoint.max_credential_lifetime_secs.to_string())
                }
                "derivation_origin" => Ok(endpoint
                    .derivation_origin
                    .clone()
                    .unwrap_or_else(|| "(not set)".to_string())),
                _ => Err(unknown_key(key)),
            };
        }

        match key {
            "api.base_url" => Ok(self.api.base_url.clone()),
            "api.timeout_secs" => Ok(self.api.timeout_secs.to_string()),
            "session.idle_timeout_ms" => Ok(self.session.idle_timeout_ms.to_string()),
            "retry.mutation.max_attempts" => Ok(self.retry.mutation.max_attempts.to_string()),
            "retry.mutation.base_delay_ms" => Ok(self.retry.mutation.base_delay_ms.to_string()),
            "retry.balance.max_attempts" => Ok(self.retry.balance.max_attempts.to_string()),
            "retry.balance.base_delay_ms" => Ok(self.retry.balance.base_delay_ms.to_string()),
            "retry.read.max_attempts" => Ok(self.retry.read.max_attempts.to_string()),
            "retry.read.base_delay_ms" => Ok(self.retry.read.base_delay_ms.to_string()),
            _ => Err(unknown_key(key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if let Some((provider, field)) = provider_key(key) {
            let endpoint = match provider {
                ProviderKey::InternetIdentity => &mut self.session.providers.internet_identity,
                ProviderKey::Nfid => &mut self.session.providers.nfid,
            };
            match field {
                "endpoint_url" => {
                    validate_url(key, value)?;
                    endpoint.endpoint_url = value.to_string();
                }
                "max_credential_lifetime_secs" => {
                    endpoint.max_credential_lifetime_secs = parse_positive(key, value)?;
                }
                "derivation_origin" => {
                    endpoint.derivation_origin = if value.is_empty() {
                        None
                    } else {
                        Some(value.to_string())
                    };
                }
                _ => return Err(unknown_key(key)),
            }
            return Ok(());
        }

        match key {
            "api.base_url" => {
                validate_url(key, value)?;
                self.api.base_url = value.trim_end_matches('/').to_string();
            }
            "api.timeout_secs" => self.api.timeout_secs = parse_positive(key, value)?,
            "session.idle_timeout_ms" => self.session.idle_timeout_ms = parse_positive(key, value)?,
            "retry.mutation.max_attempts" => {
                self.retry.mutation.max_attempts = parse_positive(key, value)?
            }
            "retry.mutation.base_delay_ms" => {
                self.retry.mutation.base_delay_ms = parse_number(key, value)?
            }
            "retry.balance.max_attempts" => {
                self.retry.balance.max_attempts = parse_positive(key, value)?
            }
            "retry.balance.base_delay_ms" => {
                self.retry.balance.base_delay_ms = parse_number(key, value)?
            }
            "retry.read.max_attempts" => self.retry.read.max_attempts = parse_positive(key, value)?,
            "retry.read.base_delay_ms" => {
                self.retry.read.base_delay_ms = parse_number(key, value)?
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults by removing the file
    pub fn reset() -> anyhow::Result<()> {
        Self::reset_at(&Self::config_path()?)
    }

    pub fn reset_at(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn provider_key(key: &str) -> Option<(ProviderKey, &str)> {
    let rest = key.strip_prefix("session.providers.")?;
    let (provider, field) = rest.split_once('.')?;
    let provider = provider.parse().ok()?;
    Some((provider, field))
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `ledgerlink config list` to see available keys.",
        key
    )
}

fn validate_url(key: &str, value: &str) -> anyhow::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow!("{} must be an http(s) URL, got '{}'", key, value))
    }
}

fn parse_number<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

fn parse_positive<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parsed: T = parse_number(key, value)?;
    if parsed == T::default() {
        return Err(anyhow!("{} must be greater than 0", key));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.idle_timeout_ms, 1_800_000);
        assert_eq!(config.retry.mutation.max_attempts, 3);
        assert_eq!(config.retry.mutation.base_delay_ms, 1000);
        assert_eq!(config.retry.balance.max_attempts, 2);
        assert_eq!(
            config.session.endpoint(ProviderKey::InternetIdentity).endpoint_url,
            "https://identity.ic0.app"
        );
        assert_eq!(
            config
                .session
                .endpoint(ProviderKey::Nfid)
                .max_credential_lifetime(),
            Duration::from_secs(8 * 60 * 60)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("api.base_url", "https://tokens.example.com/api/").unwrap();
        config.set("retry.balance.max_attempts", "4").unwrap();
        config
            .set("session.providers.nfid.derivation_origin", "https://app.example.com")
            .unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api.base_url, "https://tokens.example.com/api");
        assert_eq!(loaded.retry.balance.max_attempts, 4);
        assert_eq!(
            loaded.session.providers.nfid.derivation_origin.as_deref(),
            Some("https://app.example.com")
        );

        Config::reset_at(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[session]\nidle_timeout_ms = 60000\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.session.idle_timeout_ms, 60_000);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("api.base_url", "ftp://example.com").is_err());
        assert!(config.set("retry.mutation.max_attempts", "0").is_err());
        assert!(config.set("session.idle_timeout_ms", "soon").is_err());
        assert!(config.set("session.providers.google.endpoint_url", "https://a").is_err());
        assert!(config.set("nope", "1").is_err());
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[api]\nbase_url = \"localhost\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let entries = config.list().unwrap();
        assert_eq!(entries.len(), KEYS.len());
        assert!(
            entries
                .iter()
                .any(|(k, v)| k == "session.providers.internet_identity.derivation_origin"
                    && v == "(not set)")
        );
    }
}

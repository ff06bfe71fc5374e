use crate::claim::keystore::{EnvKeyProvider, KeyProvider, KeystoreKeyProvider, Passphrase};
use crate::store::StoreBackend;
use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure that can be loaded from CLI or a config file
///
/// Example configuration file content
/// # Claim signer configuration
///
/// # Server configuration
/// listen_on_port = 8888
/// bind_address = "0.0.0.0"
/// behind_proxy = false
///
/// # Rate limiting (0 = disabled)
/// min_click_interval_ms = 500
/// rate_limit_idle_secs = 300
///
/// # Counter storage
/// store_backend = "redis"  # Options: "memory" or "redis"
/// redis_url = "redis://127.0.0.1:6379"
///
/// # Signing key
/// key_provider = "keystore"  # Options: "keystore" or "env"
/// keystore = "keystore.json"
/// generate_key = false
///
/// The keystore passphrase is read from ENCRYPTION_PASSPHRASE or prompted
/// for; the `env` provider reads SIGNER_PRIVATE_KEY. Neither belongs here.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8888)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Minimum spacing between accepted clicks per token and per client (0 = disabled)
    #[arg(short, long, default_value_t = 500)]
    #[serde(default = "default_min_click_interval_ms")]
    pub min_click_interval_ms: u64,

    /// Seconds after which idle rate limit entries are dropped
    #[arg(long, default_value_t = 300)]
    #[serde(default = "default_rate_limit_idle_secs")]
    pub rate_limit_idle_secs: u64,

    /// Take the client address from the first X-Forwarded-For hop
    #[arg(long, default_value_t = false)]
    #[serde(default)]
    pub behind_proxy: bool,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Counter store backend: memory or redis
    #[arg(short, long, default_value = "memory")]
    #[serde(default = "default_store_backend")]
    pub store_backend: String,

    /// Redis URL (required when store-backend is redis)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    /// Where the signing key comes from: keystore or env
    #[arg(short, long, default_value = "keystore")]
    #[serde(default = "default_key_provider")]
    pub key_provider: String,

    /// Encrypted keystore file
    #[arg(long, default_value = "keystore.json")]
    #[serde(default = "default_keystore")]
    pub keystore: String,

    /// Create the keystore with a fresh key if it does not exist
    #[arg(long, default_value_t = false)]
    #[serde(default)]
    pub generate_key: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            bind_address: default_bind_address(),
            min_click_interval_ms: default_min_click_interval_ms(),
            rate_limit_idle_secs: default_rate_limit_idle_secs(),
            behind_proxy: false,
            config: None,
            store_backend: default_store_backend(),
            redis_url: None,
            key_provider: default_key_provider(),
            keystore: default_keystore(),
            generate_key: false,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.bind_address == default_bind_address() {
            self.bind_address = file_config.bind_address;
        }
        if self.min_click_interval_ms == default_min_click_interval_ms() {
            self.min_click_interval_ms = file_config.min_click_interval_ms;
        }
        if self.rate_limit_idle_secs == default_rate_limit_idle_secs() {
            self.rate_limit_idle_secs = file_config.rate_limit_idle_secs;
        }
        if !self.behind_proxy {
            self.behind_proxy = file_config.behind_proxy;
        }
        if self.store_backend == default_store_backend() {
            self.store_backend = file_config.store_backend;
        }
        if self.key_provider == default_key_provider() {
            self.key_provider = file_config.key_provider;
        }
        if self.keystore == default_keystore() {
            self.keystore = file_config.keystore;
        }
        if !self.generate_key {
            self.generate_key = file_config.generate_key;
        }

        // For Option fields, CLI takes precedence if Some
        if self.redis_url.is_none() {
            self.redis_url = file_config.redis_url;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.store_backend.as_str() {
            "memory" => {}
            "redis" => {
                let Some(url) = self.redis_url.as_ref().filter(|s| !s.is_empty()) else {
                    return Err(anyhow::anyhow!(
                        "Redis URL is required when backend is 'redis'"
                    ));
                };
                if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                    return Err(anyhow::anyhow!(
                        "Redis URL must start with redis:// or rediss://"
                    ));
                }
            }
            backend => {
                return Err(anyhow::anyhow!(
                    "Unsupported store backend: {}. Use 'memory' or 'redis'",
                    backend
                ));
            }
        }

        match self.key_provider.as_str() {
            "env" => {}
            "keystore" => {
                if self.keystore.is_empty() {
                    return Err(anyhow::anyhow!(
                        "Keystore path is required when key provider is 'keystore'"
                    ));
                }
            }
            provider => {
                return Err(anyhow::anyhow!(
                    "Unsupported key provider: {}. Use 'keystore' or 'env'",
                    provider
                ));
            }
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.listen_on_port)
    }

    pub fn min_click_interval(&self) -> Duration {
        Duration::from_millis(self.min_click_interval_ms)
    }

    pub fn rate_limit_idle(&self) -> Duration {
        Duration::from_secs(self.rate_limit_idle_secs)
    }

    /// Counter store selected by `store_backend`
    pub fn counter_backend(&self) -> Result<StoreBackend> {
        match self.store_backend.as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => self
                .redis_url
                .clone()
                .map(StoreBackend::Redis)
                .ok_or_else(|| anyhow::anyhow!("Redis URL is required when backend is 'redis'")),
            backend => Err(anyhow::anyhow!("Unsupported store backend: {backend}")),
        }
    }

    /// Key provider selected by `key_provider`
    pub fn signing_key_provider(&self) -> Result<Box<dyn KeyProvider>> {
        match self.key_provider.as_str() {
            "env" => Ok(Box::new(EnvKeyProvider::default())),
            "keystore" => Ok(Box::new(
                KeystoreKeyProvider::new(&self.keystore, Passphrase::default())
                    .generate_if_missing(self.generate_key),
            )),
            provider => Err(anyhow::anyhow!("Unsupported key provider: {provider}")),
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    8888
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_min_click_interval_ms() -> u64 {
    500
}

fn default_rate_limit_idle_secs() -> u64 {
    300
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_key_provider() -> String {
    "keystore".to_string()
}

fn default_keystore() -> String {
    "keystore.json".to_string()
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::codec::Codec;

/// Default config directory: ~/.ticketload/
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ticketload")
}

/// Default config file path: ~/.ticketload/settings.json
pub fn default_config_path() -> PathBuf {
    config_dir().join("settings.json")
}

const ENV_HOST: &str = "TICKETLOAD_HOST";
const ENV_PORT: &str = "TICKETLOAD_PORT";
const ENV_IO_TIMEOUT: &str = "TICKETLOAD_IO_TIMEOUT_SECS";
const ENV_CONNECT_TIMEOUT: &str = "TICKETLOAD_CONNECT_TIMEOUT_SECS";
const ENV_KEY: &str = "TICKETLOAD_OBFUSCATION_KEY";

/// Connection parameters shared by every worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Hex-encoded XOR key shared with the server.
    #[serde(default = "default_key")]
    pub obfuscation_key: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_key() -> String {
    "5a".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            io_timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_timeout_secs(),
            obfuscation_key: default_key(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        let config: ClientConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(host) = get(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = get(ENV_PORT) {
            self.port = port
                .parse()
                .with_context(|| format!("{ENV_PORT}={port} is not a valid port"))?;
        }
        if let Some(secs) = get(ENV_IO_TIMEOUT) {
            self.io_timeout_secs = secs
                .parse()
                .with_context(|| format!("{ENV_IO_TIMEOUT}={secs} is not a number"))?;
        }
        if let Some(secs) = get(ENV_CONNECT_TIMEOUT) {
            self.connect_timeout_secs = secs
                .parse()
                .with_context(|| format!("{ENV_CONNECT_TIMEOUT}={secs} is not a number"))?;
        }
        if let Some(key) = get(ENV_KEY) {
            self.obfuscation_key = key;
        }
        Ok(self)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.obfuscation_key.trim())
            .with_context(|| format!("obfuscation_key {:?} is not hex", self.obfuscation_key))
    }

    /// Build the frame codec for this configuration.
    pub fn codec(&self) -> Result<Codec> {
        Ok(Codec::new(self.key_bytes()?)?)
    }

    /// Reject values no worker could run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.io_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            bail!("timeouts must be at least one second");
        }
        self.codec()?;
        Ok(())
    }
}

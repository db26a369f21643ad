//! Configuration management for the ingest service.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Every field has a default, so an empty file (or no file) is valid.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::catalog::FieldCatalog;
use crate::session::{self, SessionConfig};
use crate::sink;

/// Smallest registration packet that can carry an identity and a tag.
const MIN_REGISTRATION_SIZE: usize = 8;

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// TCP server and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub idle_timeout_secs: u64,
    pub registration_bytes: usize,
    pub read_buffer_bytes: usize,
    pub acknowledge: bool,
    pub ack_payload: String,
    pub ack_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:18120".to_string(),
            idle_timeout_secs: session::DEFAULT_IDLE_TIMEOUT.as_secs(),
            registration_bytes: session::DEFAULT_REGISTRATION_SIZE,
            read_buffer_bytes: session::DEFAULT_READ_BUFFER_SIZE,
            acknowledge: true,
            ack_payload: String::from_utf8_lossy(session::DEFAULT_ACK_PAYLOAD).into_owned(),
            ack_timeout_secs: session::DEFAULT_ACK_TIMEOUT.as_secs(),
        }
    }
}

/// Storage hand-off settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub channel_capacity: usize,
    /// Append batches as JSON lines here; log only when unset.
    pub jsonl_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            channel_capacity: sink::DEFAULT_CHANNEL_CAPACITY,
            jsonl_path: None,
        }
    }
}

/// Field catalog source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog TOML file; the built-in catalog is used when unset.
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file
    ///
    /// Environment variables override config file values:
    /// - UMB_BIND_ADDR: listen address
    /// - UMB_IDLE_TIMEOUT_SECS: idle timeout in seconds
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_toml_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from TOML text (no overrides, no validation).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("UMB_BIND_ADDR") {
            tracing::info!(addr = %addr, "Using UMB_BIND_ADDR from environment");
            self.server.bind_addr = addr;
        }

        if let Ok(secs) = std::env::var("UMB_IDLE_TIMEOUT_SECS") {
            self.server.idle_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid UMB_IDLE_TIMEOUT_SECS: {}", secs))?;
            tracing::info!(
                idle_timeout_secs = self.server.idle_timeout_secs,
                "Using UMB_IDLE_TIMEOUT_SECS from environment"
            );
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_addr))?;

        if self.server.idle_timeout_secs == 0 {
            anyhow::bail!("server.idle_timeout_secs must be greater than 0");
        }

        if self.server.registration_bytes < MIN_REGISTRATION_SIZE {
            anyhow::bail!(
                "server.registration_bytes must be at least {} (got {})",
                MIN_REGISTRATION_SIZE,
                self.server.registration_bytes
            );
        }

        if self.server.read_buffer_bytes == 0 {
            anyhow::bail!("server.read_buffer_bytes must be greater than 0");
        }

        if self.server.acknowledge && self.server.ack_timeout_secs == 0 {
            anyhow::bail!("server.ack_timeout_secs must be greater than 0");
        }

        if self.storage.channel_capacity == 0 {
            anyhow::bail!("storage.channel_capacity must be greater than 0");
        }

        Ok(())
    }

    /// Session settings derived from the server section.
    pub fn session_config(&self) -> SessionConfig {
        let ack_payload = self
            .server
            .acknowledge
            .then(|| Bytes::from(self.server.ack_payload.clone().into_bytes()));

        SessionConfig {
            idle_timeout: Duration::from_secs(self.server.idle_timeout_secs),
            registration_size: self.server.registration_bytes,
            read_buffer_size: self.server.read_buffer_bytes,
            ack_payload,
            ack_timeout: Duration::from_secs(self.server.ack_timeout_secs),
        }
    }

    /// Load the configured field catalog, or the built-in one.
    pub fn load_catalog(&self) -> Result<FieldCatalog> {
        match &self.catalog.path {
            Some(path) => FieldCatalog::load(path)
                .with_context(|| format!("Failed to load catalog: {}", path.display())),
            None => FieldCatalog::builtin().context("Failed to parse built-in catalog"),
        }
    }
}

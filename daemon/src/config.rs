//! Daemon configuration

use anyhow::{Result, bail};
use keysmith_panel::PanelConfig;
use keysmith_provision::{LockRetry, ProvisionerOptions, ServerConfig, ServerRegistry};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Upper bound for `limits.key_lifetime_days` (1000 years)
pub const MAX_KEY_LIFETIME_DAYS: i64 = 365_000;

/// Daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    /// HTTP API listener
    #[serde(default)]
    pub server: ApiServerConfig,

    /// Key store
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 3x-ui panel connection
    #[serde(default)]
    pub panel: PanelConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// Managed VPN servers
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl DaemonConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        let missing = self.panel.missing_fields();
        if !missing.is_empty() {
            bail!("panel configuration is missing: {}", missing.join(", "));
        }
        if self.servers.is_empty() {
            bail!("no servers configured");
        }
        if self.limits.max_keys_per_user == 0 {
            bail!("limits.max_keys_per_user must be at least 1");
        }
        let lifetime = self.limits.key_lifetime_days;
        if !(1..=MAX_KEY_LIFETIME_DAYS).contains(&lifetime) {
            bail!(
                "limits.key_lifetime_days must be between 1 and {}, got {}",
                MAX_KEY_LIFETIME_DAYS,
                lifetime
            );
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<ServerRegistry> {
        Ok(ServerRegistry::new(self.servers.clone())?)
    }

    pub fn provisioner_options(&self) -> ProvisionerOptions {
        let p = &self.provisioning;
        ProvisionerOptions {
            lock_retry: LockRetry {
                attempts: p.lock_retry_attempts,
                delay: Duration::from_millis(p.lock_retry_delay_ms),
            },
            compensate_orphans: p.compensate_orphans,
            outline_accept_invalid_certs: p.outline_accept_invalid_certs,
            outline_timeout: Duration::from_secs(p.outline_timeout_secs),
        }
    }
}

/// HTTP API listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite://keysmith.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// Per-user limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Active keys a single user may hold
    #[serde(default = "default_max_keys")]
    pub max_keys_per_user: u32,

    /// Lifetime recorded for new keys
    #[serde(default = "default_key_lifetime_days")]
    pub key_lifetime_days: i64,
}

fn default_max_keys() -> u32 {
    4
}

fn default_key_lifetime_days() -> i64 {
    36500 // effectively unlimited
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_keys_per_user: default_max_keys(),
            key_lifetime_days: default_key_lifetime_days(),
        }
    }
}

/// Provisioning behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    /// Remove a panel client again when its link could not be built
    #[serde(default)]
    pub compensate_orphans: bool,

    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,

    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,

    /// Outline servers ship self-signed certificates
    #[serde(default = "default_true")]
    pub outline_accept_invalid_certs: bool,

    #[serde(default = "default_outline_timeout")]
    pub outline_timeout_secs: u64,
}

fn default_lock_retry_attempts() -> u32 {
    5
}

fn default_lock_retry_delay_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_outline_timeout() -> u64 {
    15
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            compensate_orphans: false,
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            outline_accept_invalid_certs: default_true(),
            outline_timeout_secs: default_outline_timeout(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

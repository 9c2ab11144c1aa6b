//! Panel connection settings

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Connection settings for the 3x-ui panel
#[derive(Clone, Deserialize)]
pub struct PanelConfig {
    /// Base URL including the panel's secret path, e.g. `https://127.0.0.1:2053/abc`
    #[serde(default)]
    pub url: String,

    /// Panel login
    #[serde(default)]
    pub username: String,

    /// Panel password
    #[serde(default)]
    pub password: String,

    /// Skip TLS certificate verification.
    ///
    /// The panel normally runs on the same host behind a self-signed
    /// certificate, which is the only situation this should be enabled for.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Timeout for the login call in seconds
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,

    /// Timeout for every other panel call in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_login_timeout() -> u64 {
    15
}

fn default_request_timeout() -> u64 {
    20
}

impl PanelConfig {
    /// Create a config with default timeouts and TLS verification enabled
    pub fn new(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            accept_invalid_certs: false,
            login_timeout_secs: default_login_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("url");
        }
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        missing
    }

    /// Full URL for a panel path
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self::new("", "", "")
    }
}

impl fmt::Debug for PanelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("login_timeout_secs", &self.login_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

//! Static server registry

use crate::{Protocol, ProvisionError};
use serde::Deserialize;
use std::collections::HashSet;

/// Static configuration of one VPN server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Unique server id
    pub id: u32,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Region label shown to users
    #[serde(default)]
    pub region: String,

    /// Public address put into connection links
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub vless: Option<VlessParams>,

    #[serde(default)]
    pub shadowsocks: Option<ShadowsocksParams>,

    #[serde(default)]
    pub outline: Option<OutlineParams>,

    #[serde(default)]
    pub ssh: Option<SshParams>,
}

/// VLESS Reality inbound parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VlessParams {
    #[serde(default)]
    pub inbound_id: Option<u32>,

    #[serde(default)]
    pub public_key: Option<String>,

    #[serde(default)]
    pub sni: Option<String>,

    #[serde(default)]
    pub short_id: Option<String>,

    #[serde(default)]
    pub flow: Option<String>,
}

/// Shadowsocks inbound parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShadowsocksParams {
    #[serde(default)]
    pub inbound_id: Option<u32>,

    /// Cipher, e.g. `2022-blake3-aes-256-gcm`
    #[serde(default)]
    pub method: Option<String>,
}

/// Outline management API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutlineParams {
    #[serde(default)]
    pub api_url: Option<String>,
}

/// SSH access to the server host
#[derive(Debug, Clone, Deserialize)]
pub struct SshParams {
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub key_path: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl ServerConfig {
    /// Non-empty public address
    pub fn public_address(&self) -> Option<&str> {
        non_empty(self.address.as_deref())
    }

    /// Whether a parameter block exists for `protocol`
    pub fn supports(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Vless => self.vless.is_some(),
            Protocol::Shadowsocks => self.shadowsocks.is_some(),
            Protocol::Outline => self.outline.is_some(),
        }
    }

    /// Protocols this server has parameters for
    pub fn protocols(&self) -> Vec<Protocol> {
        Protocol::ALL
            .into_iter()
            .filter(|p| self.supports(*p))
            .collect()
    }

    /// Panel inbound holding clients of `protocol`
    pub fn inbound_id(&self, protocol: Protocol) -> Option<u32> {
        match protocol {
            Protocol::Vless => self.vless.as_ref().and_then(|v| v.inbound_id),
            Protocol::Shadowsocks => self.shadowsocks.as_ref().and_then(|s| s.inbound_id),
            Protocol::Outline => None,
        }
    }

    /// Outline API URL, if configured
    pub fn outline_api_url(&self) -> Option<&str> {
        non_empty(self.outline.as_ref().and_then(|o| o.api_url.as_deref()))
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Immutable list of configured servers
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: Vec<ServerConfig>,
}

impl ServerRegistry {
    /// Build a registry, rejecting duplicate ids
    pub fn new(servers: Vec<ServerConfig>) -> Result<Self, ProvisionError> {
        let mut seen = HashSet::new();
        for server in &servers {
            if !seen.insert(server.id) {
                return Err(ProvisionError::Config(format!(
                    "duplicate server id {}",
                    server.id
                )));
            }
        }
        Ok(Self { servers })
    }

    /// Look up a server by id
    pub fn find(&self, id: u32) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// First server offering `protocol`
    pub fn first_supporting(&self, protocol: Protocol) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.supports(protocol))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

//! Typed panel payloads

use crate::PanelError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Standard `{success, msg, obj}` envelope returned by every panel endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub msg: Option<String>,

    pub obj: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Panel message, empty when absent
    pub fn message(&self) -> &str {
        self.msg.as_deref().unwrap_or("")
    }

    /// Payload of a successful response
    pub fn into_obj(self) -> Option<T> {
        if self.success { self.obj } else { None }
    }
}

/// Inbound (listener) as returned by `/panel/api/inbounds/get/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub id: Option<u32>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default, alias = "listen")]
    pub host: Option<String>,

    #[serde(default)]
    pub protocol: Option<String>,

    /// JSON document encoded as a string; holds the client list
    #[serde(default)]
    pub settings: String,
}

impl Inbound {
    /// Listen port, if the panel reported a usable one
    pub fn listen_port(&self) -> Option<u16> {
        self.port.filter(|p| *p != 0)
    }

    /// Listen host, if set to something other than an empty string
    pub fn listen_host(&self) -> Option<&str> {
        self.host.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }

    /// Decode the clients embedded in `settings`
    pub fn clients(&self) -> Result<Vec<InboundClient>, PanelError> {
        if self.settings.trim().is_empty() {
            return Ok(Vec::new());
        }
        let settings: InboundSettings = serde_json::from_str(&self.settings)
            .map_err(|e| PanelError::Protocol(format!("inbound settings: {}", e)))?;
        Ok(settings.clients)
    }
}

/// Decoded `settings` document of an inbound
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(default)]
    pub clients: Vec<InboundClient>,
}

/// A client record held by an inbound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundClient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub email: String,

    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Traffic quota in bytes (the panel keeps the historical field name), 0 = unlimited
    #[serde(rename = "totalGB", default)]
    pub total_gb: u64,

    #[serde(default)]
    pub expiry_time: i64,

    #[serde(default)]
    pub limit_ip: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, deserialize_with = "string_or_number")]
    pub tg_id: String,

    #[serde(default)]
    pub sub_id: String,

    #[serde(default)]
    pub comment: String,

    #[serde(default)]
    pub reset: i64,
}

fn default_enable() -> bool {
    true
}

// Panels disagree on whether tgId is a string or an integer.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Body of `/panel/inbound/addClient`
#[derive(Debug, Clone, Serialize)]
pub struct AddClientRequest {
    pub id: u32,
    pub settings: String,
}

impl AddClientRequest {
    pub fn new(inbound_id: u32, client: InboundClient) -> Result<Self, PanelError> {
        let settings = InboundSettings {
            clients: vec![client],
        };
        let settings = serde_json::to_string(&settings)
            .map_err(|e| PanelError::Protocol(format!("encode client settings: {}", e)))?;
        Ok(Self {
            id: inbound_id,
            settings,
        })
    }
}

/// Per-client traffic counters in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTraffic {
    #[serde(default)]
    pub up: u64,

    #[serde(default)]
    pub down: u64,

    #[serde(default)]
    pub total: u64,
}

/// Traffic record carrying its own email, as some panel versions return it
#[derive(Debug, Clone, Deserialize)]
pub struct ClientTrafficRecord {
    pub email: String,

    #[serde(flatten)]
    pub traffic: ClientTraffic,
}

/// Body of `getClientTraffics/{email}`: either a map keyed by email or a
/// single record
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TrafficReport {
    Single(ClientTrafficRecord),
    ByEmail(HashMap<String, ClientTraffic>),
}

impl TrafficReport {
    /// Counters for `email`, if the report mentions it
    pub fn lookup(&self, email: &str) -> Option<ClientTraffic> {
        match self {
            TrafficReport::Single(record) => (record.email == email).then_some(record.traffic),
            TrafficReport::ByEmail(map) => map.get(email).copied(),
        }
    }
}

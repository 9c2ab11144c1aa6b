//! Credential provisioning against the panel

use crate::registry::non_empty;
use crate::{
    OutlineClient, Protocol, ProvisionError, RealityLink, Requester, ServerConfig, ServerRegistry,
    client_identifier, generate_client_id, generate_password, quota_bytes, shadowsocks_uri,
    vless_uri,
};
use keysmith_panel::{ClientTraffic, InboundClient, PanelClient};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Panel message that marks a busy backing store worth retrying
pub const LOCKED_STORE_PHRASE: &str = "database is locked";

/// Panel messages meaning the client no longer exists
const ALREADY_GONE_MARKERS: [&str; 3] = ["not found", "no such", "failed to get client"];

/// Retry policy for inbound reads that hit a locked panel database
#[derive(Debug, Clone, Copy)]
pub struct LockRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Provisioner tuning
#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    pub lock_retry: LockRetry,

    /// Delete a freshly added client again when no link can be built for it
    pub compensate_orphans: bool,

    /// Skip TLS verification for Outline management APIs (self-signed)
    pub outline_accept_invalid_certs: bool,

    pub outline_timeout: Duration,
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            lock_retry: LockRetry::default(),
            compensate_orphans: false,
            outline_accept_invalid_certs: false,
            outline_timeout: Duration::from_secs(15),
        }
    }
}

/// A credential ready to hand to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedCredential {
    /// Connection link
    pub uri: String,
    /// Key used for later delete/traffic calls
    pub client_identifier: String,
}

/// Outcome of a successful delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Deletion {
    Deleted,
    AlreadyGone,
}

/// Validated static parameters plus freshly generated secrets for one client
enum Blueprint<'a> {
    Vless {
        inbound_id: u32,
        client_id: String,
        reality: RealityLink<'a>,
    },
    Shadowsocks {
        inbound_id: u32,
        client_id: String,
        method: &'a str,
        password: String,
    },
}

impl<'a> Blueprint<'a> {
    fn vless(server: &'a ServerConfig) -> Result<Self, ProvisionError> {
        let params = server.vless.as_ref().ok_or_else(|| {
            ProvisionError::Config(format!("server {} has no VLESS parameters", server.id))
        })?;
        let inbound_id = params.inbound_id.ok_or_else(|| {
            ProvisionError::Config(format!("VLESS inbound id missing for server {}", server.id))
        })?;

        let public_key = non_empty(params.public_key.as_deref());
        let sni = non_empty(params.sni.as_deref());
        let short_id = non_empty(params.short_id.as_deref());
        let (Some(public_key), Some(sni), Some(short_id)) = (public_key, sni, short_id) else {
            return Err(ProvisionError::Config(format!(
                "Reality public_key, sni and short_id are required for server {}",
                server.id
            )));
        };

        Ok(Blueprint::Vless {
            inbound_id,
            client_id: generate_client_id(),
            reality: RealityLink {
                public_key,
                sni,
                short_id,
                flow: params.flow.as_deref().map(str::trim).unwrap_or(""),
            },
        })
    }

    fn shadowsocks(server: &'a ServerConfig) -> Result<Self, ProvisionError> {
        let params = server.shadowsocks.as_ref().ok_or_else(|| {
            ProvisionError::Config(format!("server {} has no Shadowsocks parameters", server.id))
        })?;
        let inbound_id = params.inbound_id.ok_or_else(|| {
            ProvisionError::Config(format!(
                "Shadowsocks inbound id missing for server {}",
                server.id
            ))
        })?;
        let method = non_empty(params.method.as_deref()).ok_or_else(|| {
            ProvisionError::Config(format!("Shadowsocks method missing for server {}", server.id))
        })?;

        Ok(Blueprint::Shadowsocks {
            inbound_id,
            client_id: generate_client_id(),
            method,
            password: generate_password(),
        })
    }

    fn inbound_id(&self) -> u32 {
        match self {
            Blueprint::Vless { inbound_id, .. } | Blueprint::Shadowsocks { inbound_id, .. } => {
                *inbound_id
            }
        }
    }

    fn client_record(&self, email: &str, requester: &Requester, total_bytes: u64) -> InboundClient {
        let mut client = InboundClient {
            id: None,
            email: email.to_string(),
            enable: true,
            total_gb: total_bytes,
            expiry_time: 0,
            limit_ip: 0,
            flow: None,
            method: None,
            password: None,
            tg_id: requester.id.to_string(),
            sub_id: String::new(),
            comment: String::new(),
            reset: 0,
        };
        match self {
            Blueprint::Vless {
                client_id, reality, ..
            } => {
                client.id = Some(client_id.clone());
                client.flow = Some(reality.flow.to_string());
            }
            Blueprint::Shadowsocks {
                client_id,
                method,
                password,
                ..
            } => {
                client.id = Some(client_id.clone());
                client.method = Some(method.to_string());
                client.password = Some(password.clone());
            }
        }
        client
    }

    fn link(&self, address: &str, port: u16, tag: &str) -> String {
        match self {
            Blueprint::Vless {
                client_id, reality, ..
            } => vless_uri(client_id, address, port, reality, tag),
            Blueprint::Shadowsocks {
                method, password, ..
            } => shadowsocks_uri(method, password, address, port, tag),
        }
    }
}

/// Issues, revokes and inspects credentials on configured servers
pub struct Provisioner {
    registry: Arc<ServerRegistry>,
    panel: Arc<PanelClient>,
    outline: OutlineClient,
    options: ProvisionerOptions,
}

impl Provisioner {
    pub fn new(
        registry: Arc<ServerRegistry>,
        panel: Arc<PanelClient>,
        options: ProvisionerOptions,
    ) -> Result<Self, ProvisionError> {
        let outline = OutlineClient::new(options.outline_accept_invalid_certs, options.outline_timeout)?;
        Ok(Self {
            registry,
            panel,
            outline,
            options,
        })
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn panel(&self) -> &PanelClient {
        &self.panel
    }

    fn server(&self, server_id: u32) -> Result<&ServerConfig, ProvisionError> {
        self.registry.find(server_id).ok_or_else(|| {
            error!(server_id, "Server config not found");
            ProvisionError::ServerNotFound(server_id)
        })
    }

    /// Create a credential for `requester` on `server_id`.
    ///
    /// When the panel accepted the client but the link cannot be built, the
    /// result is `ProvisionError::Orphaned` carrying the identifier.
    pub async fn create_credential(
        &self,
        server_id: u32,
        protocol: Protocol,
        requester: &Requester,
        quota_gb: Option<i64>,
    ) -> Result<IssuedCredential, ProvisionError> {
        let server = self.server(server_id)?;

        let blueprint = match protocol {
            Protocol::Vless => Blueprint::vless(server)?,
            Protocol::Shadowsocks => Blueprint::shadowsocks(server)?,
            Protocol::Outline => return self.create_outline(server, requester).await,
        };

        let email = client_identifier(requester);
        let inbound_id = blueprint.inbound_id();
        let client = blueprint.client_record(&email, requester, quota_bytes(quota_gb));

        info!(
            server_id,
            inbound_id,
            protocol = %protocol,
            email = %email,
            "Adding panel client"
        );
        let added = self.panel.add_client(inbound_id, client).await.map_err(|e| {
            error!(server_id, protocol = %protocol, "addClient failed: {}", e);
            e
        })?;
        if !added.success {
            error!(server_id, protocol = %protocol, msg = %added.message(), "Panel refused addClient");
            return Err(ProvisionError::Rejected(added.message().to_string()));
        }

        let inbound = match self.panel.get_inbound(inbound_id).await {
            Ok(resp) if resp.success => resp.obj,
            Ok(resp) => {
                let reason = format!("inbound {} fetch refused: {}", inbound_id, resp.message());
                return Err(self.orphaned(inbound_id, email, reason).await);
            }
            Err(e) => {
                let reason = format!("inbound {} fetch failed: {}", inbound_id, e);
                return Err(self.orphaned(inbound_id, email, reason).await);
            }
        };
        let Some(inbound) = inbound else {
            let reason = format!("inbound {} response has no object", inbound_id);
            return Err(self.orphaned(inbound_id, email, reason).await);
        };

        let address = match server.public_address().or_else(|| inbound.listen_host()) {
            Some(address) => address.to_string(),
            None => {
                let reason = format!("no address configured for server {}", server_id);
                return Err(self.orphaned(inbound_id, email, reason).await);
            }
        };
        let Some(port) = inbound.listen_port() else {
            let reason = format!("inbound {} has no port", inbound_id);
            return Err(self.orphaned(inbound_id, email, reason).await);
        };

        let uri = blueprint.link(&address, port, &email);
        info!(server_id, protocol = %protocol, email = %email, "Credential issued");
        Ok(IssuedCredential {
            uri,
            client_identifier: email,
        })
    }

    async fn create_outline(
        &self,
        server: &ServerConfig,
        requester: &Requester,
    ) -> Result<IssuedCredential, ProvisionError> {
        let api_url = server.outline_api_url().ok_or_else(|| {
            ProvisionError::Config(format!("Outline API URL missing for server {}", server.id))
        })?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let name = format!("{}_{}", requester.base_name(), stamp);
        self.outline.create_key(api_url, &name).await
    }

    async fn orphaned(&self, inbound_id: u32, email: String, reason: String) -> ProvisionError {
        error!(
            inbound_id,
            email = %email,
            "Client added to the panel but no link could be built: {}",
            reason
        );

        if self.options.compensate_orphans {
            match self.panel.delete_client(inbound_id, &email).await {
                Ok(resp) if resp.success => info!(email = %email, "Removed orphaned panel client"),
                Ok(resp) => warn!(email = %email, msg = %resp.message(), "Could not remove orphaned client"),
                Err(e) => warn!(email = %email, "Could not remove orphaned client: {}", e),
            }
        }

        ProvisionError::Orphaned {
            client_identifier: email,
            reason,
        }
    }

    /// Delete a credential by its identifier; an already-missing client
    /// yields `Deletion::AlreadyGone`
    pub async fn delete_credential(
        &self,
        server_id: u32,
        protocol: Protocol,
        client_identifier: &str,
    ) -> Result<Deletion, ProvisionError> {
        if client_identifier.trim().is_empty() {
            return Err(ProvisionError::InvalidIdentifier(client_identifier.to_string()));
        }
        let server = self.server(server_id)?;

        if protocol == Protocol::Outline {
            let api_url = server.outline_api_url().ok_or_else(|| {
                ProvisionError::Config(format!("Outline API URL missing for server {}", server_id))
            })?;
            return self.outline.delete_key(api_url, client_identifier).await;
        }

        let inbound_id = server.inbound_id(protocol).ok_or_else(|| {
            ProvisionError::Config(format!(
                "{} inbound id missing for server {}",
                protocol, server_id
            ))
        })?;

        info!(inbound_id, email = %client_identifier, "Deleting panel client");
        let resp = self.panel.delete_client(inbound_id, client_identifier).await?;
        if resp.success {
            return Ok(Deletion::Deleted);
        }

        if is_already_gone(resp.message()) {
            warn!(
                email = %client_identifier,
                msg = %resp.message(),
                "Panel reports client missing, treating as deleted"
            );
            return Ok(Deletion::AlreadyGone);
        }

        error!(email = %client_identifier, msg = %resp.message(), "Panel refused delClient");
        Err(ProvisionError::Rejected(resp.message().to_string()))
    }

    /// Current traffic counters, `None` when the panel does not know the client
    pub async fn query_traffic(
        &self,
        server_id: u32,
        protocol: Protocol,
        client_identifier: &str,
    ) -> Result<Option<ClientTraffic>, ProvisionError> {
        if client_identifier.trim().is_empty() {
            return Err(ProvisionError::InvalidIdentifier(client_identifier.to_string()));
        }
        self.server(server_id)?;
        if !protocol.uses_panel() {
            return Err(ProvisionError::Unsupported("traffic query"));
        }

        let resp = self.panel.client_traffics(client_identifier).await?;
        if !resp.success {
            error!(email = %client_identifier, msg = %resp.message(), "Traffic query refused");
            return Err(ProvisionError::Rejected(resp.message().to_string()));
        }

        let traffic = resp.obj.and_then(|report| report.lookup(client_identifier));
        match &traffic {
            Some(t) => debug!(email = %client_identifier, up = t.up, down = t.down, total = t.total, "Traffic received"),
            None => warn!(email = %client_identifier, "No traffic data for client"),
        }
        Ok(traffic)
    }

    /// Raw client records of an inbound.
    ///
    /// Never fails: a missing server, unreachable panel or malformed
    /// response all yield an empty list. Only a locked panel database is
    /// retried.
    pub async fn lookup_inbound_clients(&self, server_id: u32, inbound_id: u32) -> Vec<InboundClient> {
        if self.registry.find(server_id).is_none() {
            warn!(server_id, "Server config not found, no clients to list");
            return Vec::new();
        }

        let attempts = self.options.lock_retry.attempts.max(1);
        for attempt in 1..=attempts {
            let resp = match self.panel.get_inbound(inbound_id).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(inbound_id, attempt, "Failed to fetch inbound: {}", e);
                    return Vec::new();
                }
            };

            let msg = resp.message().to_string();
            if let Some(inbound) = resp.into_obj() {
                return inbound.clients().unwrap_or_else(|e| {
                    error!(inbound_id, "Could not parse inbound settings: {}", e);
                    Vec::new()
                });
            }

            warn!(inbound_id, attempt, attempts, msg = %msg, "Inbound fetch refused");
            if is_locked(&msg) && attempt < attempts {
                info!(
                    "Panel database locked, retrying in {:?}",
                    self.options.lock_retry.delay
                );
                tokio::time::sleep(self.options.lock_retry.delay).await;
                continue;
            }
            return Vec::new();
        }

        Vec::new()
    }
}

fn is_locked(msg: &str) -> bool {
    msg.to_lowercase().contains(LOCKED_STORE_PHRASE)
}

fn is_already_gone(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    ALREADY_GONE_MARKERS.iter().any(|m| msg.contains(m))
}

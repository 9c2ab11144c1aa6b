//! HTTP API
//!
//! Endpoints:
//! - `GET /health`
//! - `GET /servers`
//! - `POST /keys`, `DELETE /keys/:id`, `GET /keys/:id/traffic`
//! - `GET /users/:id/keys`
//! - `GET /servers/:id/clients/:protocol`

use crate::config::LimitsConfig;
use anyhow::Result;
use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, TimeDelta, Utc};
use keysmith_panel::InboundClient;
use keysmith_provision::{
    Deletion, Protocol, ProvisionError, Provisioner, Requester, format_bytes,
};
use keysmith_storage::{KeyStore, NewSubscription, StoreError, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<Provisioner>,
    pub store: KeyStore,
    pub limits: LimitsConfig,
    /// Remove a freshly issued credential again when it cannot be stored
    pub compensate_orphans: bool,
    issue_guards: IssueGuards,
}

impl AppState {
    pub fn new(
        provisioner: Arc<Provisioner>,
        store: KeyStore,
        limits: LimitsConfig,
        compensate_orphans: bool,
    ) -> Self {
        Self {
            provisioner,
            store,
            limits,
            compensate_orphans,
            issue_guards: IssueGuards::default(),
        }
    }
}

/// One async lock per user, held from the key-limit check until the new
/// key is stored
#[derive(Clone, Default)]
struct IssueGuards {
    slots: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl IssueGuards {
    async fn slot(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.slots.lock().await.entry(user_id).or_default().clone()
    }

    async fn release(&self, user_id: i64, slot: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock().await;
        // Nobody else is waiting on this user.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&user_id);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Key limit of {0} reached")]
    LimitReached(u32),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Provision(e) => match e {
                ProvisionError::UnknownProtocol(_)
                | ProvisionError::InvalidIdentifier(_)
                | ProvisionError::Unsupported(_) => StatusCode::BAD_REQUEST,
                ProvisionError::ServerNotFound(_) => StatusCode::NOT_FOUND,
                ProvisionError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ProvisionError::Panel(_)
                | ProvisionError::Rejected(_)
                | ProvisionError::Orphaned { .. }
                | ProvisionError::Outline(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::LimitReached(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            "Key service is temporarily unavailable, the operator has been notified".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/servers", get(list_servers))
        .route("/servers/:id/clients/:protocol", get(inbound_clients))
        .route("/keys", post(issue_key))
        .route("/keys/:id", delete(revoke_key))
        .route("/keys/:id/traffic", get(key_traffic))
        .route("/users/:id/keys", get(user_keys))
        .with_state(state)
}

/// Start the API server; returns when `shutdown` resolves
pub async fn serve(
    bind: SocketAddr,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(state);

    info!("API listening on {}", bind);
    let listener = TcpListener::bind(bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// Failures worth an operator's attention go to a dedicated target.
fn notify_operator(action: &str, user_id: i64, err: &ApiError) {
    if err.status().is_server_error() {
        error!(target: "operator", user_id, "{} failed: {}", action, err);
        if let ApiError::Provision(e) = err {
            if let Some(orphan) = e.orphaned_identifier() {
                error!(target: "operator", client = %orphan, "Panel client left without a stored key");
            }
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct ServerView {
    pub id: u32,
    pub name: String,
    pub region: String,
    pub protocols: Vec<Protocol>,
}

async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerView>> {
    let servers = state
        .provisioner
        .registry()
        .iter()
        .map(|s| ServerView {
            id: s.id,
            name: s.name.clone(),
            region: s.region.clone(),
            protocols: s.protocols(),
        })
        .collect();
    Json(servers)
}

/// Body of `POST /keys`
#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    pub protocol: String,
    #[serde(default)]
    pub server_id: Option<u32>,
    #[serde(default)]
    pub quota_gb: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct IssuedKey {
    pub subscription_id: i64,
    pub key: String,
    pub identifier: String,
    pub keys_left: u32,
}

async fn issue_key(
    State(state): State<AppState>,
    Json(payload): Json<IssueKeyRequest>,
) -> ApiResult<(StatusCode, Json<IssuedKey>)> {
    let user_id = payload.user_id;
    issue(&state, payload)
        .await
        .map(|key| (StatusCode::CREATED, Json(key)))
        .map_err(|e| {
            notify_operator("Key issue", user_id, &e);
            e
        })
}

async fn issue(state: &AppState, payload: IssueKeyRequest) -> ApiResult<IssuedKey> {
    let user_id = payload.user_id;
    let slot = state.issue_guards.slot(user_id).await;
    let issued = {
        let _guard = slot.lock().await;
        issue_exclusive(state, payload).await
    };
    state.issue_guards.release(user_id, slot).await;
    issued
}

fn key_expiry(lifetime_days: i64) -> ApiResult<DateTime<Utc>> {
    Some(lifetime_days)
        .filter(|days| *days > 0)
        .and_then(TimeDelta::try_days)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            ApiError::Config(format!("key lifetime of {} days is out of range", lifetime_days))
        })
}

async fn issue_exclusive(state: &AppState, payload: IssueKeyRequest) -> ApiResult<IssuedKey> {
    let protocol: Protocol = payload.protocol.parse()?;
    let expires_at = key_expiry(state.limits.key_lifetime_days)?;

    state
        .store
        .upsert_user(
            payload.user_id,
            payload.username.as_deref(),
            payload.first_name.as_deref(),
            payload.last_name.as_deref(),
        )
        .await?;

    let limit = state.limits.max_keys_per_user;
    let held = state.store.count_user_keys(payload.user_id).await?;
    if held >= i64::from(limit) {
        warn!(user_id = payload.user_id, held, limit, "Key limit reached");
        return Err(ApiError::LimitReached(limit));
    }

    let registry = state.provisioner.registry();
    let server_id = match payload.server_id {
        Some(id) => id,
        None => registry
            .first_supporting(protocol)
            .map(|s| s.id)
            .ok_or_else(|| ApiError::NotFound(format!("No server offers {}", protocol)))?,
    };

    let requester = Requester::new(payload.user_id, payload.username.clone());
    let credential = state
        .provisioner
        .create_credential(server_id, protocol, &requester, payload.quota_gb)
        .await?;

    let stored = state
        .store
        .add_subscription(NewSubscription {
            user_id: payload.user_id,
            server_id: i64::from(server_id),
            protocol: protocol.as_str(),
            key_data: &credential.uri,
            key_identifier: &credential.client_identifier,
            expires_at,
        })
        .await;
    let subscription = match stored {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(
                target: "operator",
                user_id = payload.user_id,
                server_id,
                protocol = %protocol,
                client = %credential.client_identifier,
                "Issued key could not be stored: {}",
                e
            );
            if state.compensate_orphans {
                discard_credential(state, server_id, protocol, &credential.client_identifier).await;
            }
            return Err(e.into());
        }
    };

    let keys_left = u32::try_from(held + 1)
        .map(|used| limit.saturating_sub(used))
        .unwrap_or(0);

    Ok(IssuedKey {
        subscription_id: subscription.id,
        key: credential.uri,
        identifier: credential.client_identifier,
        keys_left,
    })
}

async fn discard_credential(state: &AppState, server_id: u32, protocol: Protocol, identifier: &str) {
    match state
        .provisioner
        .delete_credential(server_id, protocol, identifier)
        .await
    {
        Ok(outcome) => {
            warn!(target: "operator", client = %identifier, ?outcome, "Unstored key removed from the server");
        }
        Err(e) => {
            error!(target: "operator", client = %identifier, "Unstored key is still on the server: {}", e);
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeyView {
    pub id: i64,
    pub server_id: i64,
    pub server_name: String,
    pub region: String,
    pub protocol: String,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

async fn user_keys(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<KeyView>>> {
    let registry = state.provisioner.registry();
    let keys = state
        .store
        .user_keys(user_id)
        .await?
        .into_iter()
        .map(|sub| {
            let server = u32::try_from(sub.server_id)
                .ok()
                .and_then(|id| registry.find(id));
            KeyView {
                id: sub.id,
                server_id: sub.server_id,
                server_name: server.map(|s| s.name.clone()).unwrap_or_default(),
                region: server.map(|s| s.region.clone()).unwrap_or_default(),
                protocol: sub.protocol,
                key: sub.key_data,
                created_at: sub.created_at,
                expires_at: sub.expires_at,
            }
        })
        .collect();
    Ok(Json(keys))
}

async fn active_subscription(state: &AppState, id: i64) -> ApiResult<(Subscription, u32, Protocol)> {
    let sub = state
        .store
        .subscription(id)
        .await?
        .filter(|s| s.is_active)
        .ok_or_else(|| ApiError::NotFound(format!("Key {} not found", id)))?;
    let server_id = u32::try_from(sub.server_id)
        .map_err(|_| ApiError::NotFound(format!("Server {} not found", sub.server_id)))?;
    let protocol: Protocol = sub.protocol.parse()?;
    Ok((sub, server_id, protocol))
}

async fn revoke_key(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let (sub, server_id, protocol) = active_subscription(&state, id).await?;

    let outcome = state
        .provisioner
        .delete_credential(server_id, protocol, &sub.key_identifier)
        .await
        .map_err(|e| {
            let e = ApiError::from(e);
            notify_operator("Key revoke", sub.user_id, &e);
            e
        })?;

    state.store.deactivate_subscription(id).await?;
    if outcome == Deletion::AlreadyGone {
        warn!(subscription_id = id, "Key was already gone from the server");
    }
    info!(subscription_id = id, user_id = sub.user_id, "Key revoked");

    Ok(Json(json!({ "subscription_id": id, "outcome": outcome })))
}

#[derive(Debug, Serialize)]
pub struct TrafficView {
    pub up: u64,
    pub down: u64,
    pub total: u64,
    pub up_human: String,
    pub down_human: String,
    pub total_human: String,
}

async fn key_traffic(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TrafficView>> {
    let (sub, server_id, protocol) = active_subscription(&state, id).await?;

    let traffic = state
        .provisioner
        .query_traffic(server_id, protocol, &sub.key_identifier)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No traffic data for key {}", id)))?;

    Ok(Json(TrafficView {
        up: traffic.up,
        down: traffic.down,
        total: traffic.total,
        up_human: format_bytes(Some(traffic.up)),
        down_human: format_bytes(Some(traffic.down)),
        total_human: format_bytes(Some(traffic.total)),
    }))
}

async fn inbound_clients(
    State(state): State<AppState>,
    Path((server_id, protocol)): Path<(u32, String)>,
) -> ApiResult<Json<Vec<InboundClient>>> {
    let protocol: Protocol = protocol.parse()?;
    let server = state
        .provisioner
        .registry()
        .find(server_id)
        .ok_or(ProvisionError::ServerNotFound(server_id))?;
    let inbound_id = server.inbound_id(protocol).ok_or_else(|| {
        ApiError::BadRequest(format!("Server {} has no {} inbound", server_id, protocol))
    })?;

    let clients = state
        .provisioner
        .lookup_inbound_clients(server_id, inbound_id)
        .await;
    Ok(Json(clients))
}

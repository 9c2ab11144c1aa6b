//! Authenticated panel API client

use crate::error::excerpt;
use crate::{
    AddClientRequest, ApiResponse, Inbound, InboundClient, PanelConfig, PanelError, SessionManager,
    TrafficReport,
};
use reqwest::{Client, Method, StatusCode, header};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Client for the 3x-ui management API
pub struct PanelClient {
    http: Client,
    config: PanelConfig,
    session: SessionManager,
}

impl PanelClient {
    /// Create a new panel client
    pub fn new(config: PanelConfig) -> Result<Self, PanelError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| PanelError::Config(format!("HTTP client: {}", e)))?;

        if config.accept_invalid_certs {
            warn!(url = %config.url, "TLS certificate verification is disabled for the panel");
        }

        let session = SessionManager::new(http.clone(), config.clone());
        Ok(Self {
            http,
            config,
            session,
        })
    }

    /// Session cache backing this client
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.config.url
    }

    /// Issue an authenticated request and return the JSON body.
    ///
    /// A 401 clears the cached session so the next call logs in again; the
    /// current call is not retried.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, PanelError> {
        let cookie = self.session.acquire().await.map_err(|e| {
            error!("No panel session for {} {}: {}", method, path, e);
            PanelError::Session(Box::new(e))
        })?;

        let url = self.config.endpoint(path);
        debug!(method = %method, url = %url, "Panel request");

        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header(header::COOKIE, &cookie);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            error!("Panel request {} {} failed: {}", method, path, e);
            PanelError::from(e)
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.session.invalidate(&cookie).await;
            return Err(PanelError::Unauthorized);
        }

        let text = response.text().await?;
        if !status.is_success() {
            error!(
                status = status.as_u16(),
                "Panel request {} {} failed: {}",
                method,
                path,
                excerpt(&text)
            );
            return Err(PanelError::Status {
                status: status.as_u16(),
                body: excerpt(&text),
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            error!("Panel response for {} {} is not JSON: {}", method, path, excerpt(&text));
            PanelError::Protocol(format!("{} {}: {}", method, path, e))
        })
    }

    /// Issue a request and decode the body into `T`
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, PanelError> {
        let value = self.request(method, path, body).await?;
        serde_json::from_value(value).map_err(|e| PanelError::Protocol(format!("{}: {}", path, e)))
    }

    /// Fetch an inbound's current configuration
    pub async fn get_inbound(&self, inbound_id: u32) -> Result<ApiResponse<Inbound>, PanelError> {
        let path = format!("/panel/api/inbounds/get/{}", inbound_id);
        self.request_json(Method::GET, &path, None).await
    }

    /// Add one client to an inbound
    pub async fn add_client(
        &self,
        inbound_id: u32,
        client: InboundClient,
    ) -> Result<ApiResponse<Value>, PanelError> {
        let payload = AddClientRequest::new(inbound_id, client)?;
        let body = serde_json::to_value(&payload)
            .map_err(|e| PanelError::Protocol(format!("encode addClient: {}", e)))?;
        self.request_json(Method::POST, "/panel/inbound/addClient", Some(&body))
            .await
    }

    /// Remove a client from an inbound by its email identifier
    pub async fn delete_client(
        &self,
        inbound_id: u32,
        email: &str,
    ) -> Result<ApiResponse<Value>, PanelError> {
        let path = format!("/panel/api/inbounds/{}/delClient/{}", inbound_id, email);
        self.request_json(Method::POST, &path, None).await
    }

    /// Traffic counters for a client email
    pub async fn client_traffics(
        &self,
        email: &str,
    ) -> Result<ApiResponse<TrafficReport>, PanelError> {
        let path = format!("/panel/api/inbounds/getClientTraffics/{}", email);
        self.request_json(Method::GET, &path, None).await
    }
}

/// Shared panel client
pub type SharedPanelClient = Arc<PanelClient>;

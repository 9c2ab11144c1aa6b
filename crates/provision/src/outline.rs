//! Outline server management API client

use crate::{Deletion, IssuedCredential, ProvisionError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct AccessKey {
    id: Option<Value>,
    #[serde(rename = "accessUrl")]
    access_url: Option<String>,
}

/// Client for `POST/DELETE {api}/access-keys`
pub struct OutlineClient {
    http: Client,
}

impl OutlineClient {
    pub fn new(accept_invalid_certs: bool, timeout: Duration) -> Result<Self, ProvisionError> {
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| ProvisionError::Config(format!("Outline HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Create an access key named `name`; returns its access URL and id
    pub async fn create_key(&self, api_url: &str, name: &str) -> Result<IssuedCredential, ProvisionError> {
        let url = format!("{}/access-keys", api_url.trim_end_matches('/'));
        info!(url = %url, name = %name, "Creating Outline access key");

        let response = self
            .http
            .post(&url)
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(|e| {
                error!("Outline API request to {} failed: {}", url, e);
                ProvisionError::Outline(e.to_string())
            })?;

        let status = response.status();
        if status != StatusCode::CREATED {
            warn!(status = status.as_u16(), "Outline API did not create the key");
            return Err(ProvisionError::Outline(format!("HTTP {}", status.as_u16())));
        }

        let key: AccessKey = response
            .json()
            .await
            .map_err(|e| ProvisionError::Outline(format!("unexpected response: {}", e)))?;

        let id = match key.id {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(ProvisionError::Outline("response has no key id".to_string())),
        };
        let access_url = key
            .access_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ProvisionError::Outline("response has no accessUrl".to_string()))?;

        info!(key_id = %id, "Outline access key created");
        Ok(IssuedCredential {
            uri: access_url,
            client_identifier: id,
        })
    }

    /// Delete an access key by numeric id; a missing key counts as deleted
    pub async fn delete_key(&self, api_url: &str, key_id: &str) -> Result<Deletion, ProvisionError> {
        let id: u64 = key_id
            .trim()
            .parse()
            .map_err(|_| ProvisionError::InvalidIdentifier(key_id.to_string()))?;
        let url = format!("{}/access-keys/{}", api_url.trim_end_matches('/'), id);
        info!(key_id = id, "Deleting Outline access key");

        let response = self.http.delete(&url).send().await.map_err(|e| {
            error!("Outline API request to {} failed: {}", url, e);
            ProvisionError::Outline(e.to_string())
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                warn!(key_id = id, "Outline key not found, treating as already deleted");
                Ok(Deletion::AlreadyGone)
            }
            status if status.is_success() => Ok(Deletion::Deleted),
            status => Err(ProvisionError::Outline(format!("HTTP {}", status.as_u16()))),
        }
    }
}

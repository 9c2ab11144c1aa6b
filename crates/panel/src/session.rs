//! Panel login session cache

use crate::error::excerpt;
use crate::{PanelConfig, PanelError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Cookie names the panel may use for its session, in order of preference
pub const SESSION_COOKIE_NAMES: [&str; 2] = ["3x-ui", "session"];

/// A session is reused only while it stays valid for longer than this
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the cookie carries no expiry of its own
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Authenticated panel session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Ready-to-send `Cookie` header value (`name=value`)
    cookie: String,
    expires_at: SystemTime,
}

impl Session {
    pub fn new(cookie: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            cookie: cookie.into(),
            expires_at,
        }
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Valid for more than `REFRESH_MARGIN` after `now`
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        self.expires_at > now + REFRESH_MARGIN
    }
}

/// A `Set-Cookie` entry from the login response
#[derive(Debug, Clone)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<SystemTime>,
    pub max_age: Option<Duration>,
}

/// Pick the session cookie out of a login response.
///
/// Expiry comes from `Expires`, then `Max-Age`, then `DEFAULT_SESSION_TTL`.
pub fn select_session(cookies: &[SetCookie], now: SystemTime) -> Option<Session> {
    let cookie = SESSION_COOKIE_NAMES
        .iter()
        .find_map(|name| cookies.iter().find(|c| c.name == *name))?;

    let expires_at = cookie
        .expires
        .or_else(|| cookie.max_age.map(|age| now + age))
        .unwrap_or(now + DEFAULT_SESSION_TTL);

    Some(Session::new(
        format!("{}={}", cookie.name, cookie.value),
        expires_at,
    ))
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    success: Option<bool>,
    #[serde(default)]
    msg: Option<String>,
}

/// Holds the single process-wide panel session.
///
/// The slot lock is held across the login call so that concurrent callers
/// wait for one login instead of racing several.
pub struct SessionManager {
    http: Client,
    config: PanelConfig,
    slot: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(http: Client, config: PanelConfig) -> Self {
        Self {
            http,
            config,
            slot: Mutex::new(None),
        }
    }

    /// Return a valid session cookie, logging in if needed
    pub async fn acquire(&self) -> Result<String, PanelError> {
        let mut slot = self.slot.lock().await;

        if let Some(session) = slot.as_ref() {
            if session.is_fresh(SystemTime::now()) {
                debug!("Reusing cached panel session");
                return Ok(session.cookie.clone());
            }
            debug!("Cached panel session is about to expire, logging in again");
        }

        *slot = None;
        let session = self.login().await?;
        let cookie = session.cookie.clone();
        *slot = Some(session);
        Ok(cookie)
    }

    /// Drop the cached session if it is still the one identified by `cookie`
    pub async fn invalidate(&self, cookie: &str) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|s| s.cookie == cookie) {
            warn!("Panel rejected the session cookie, clearing it");
            *slot = None;
        }
    }

    /// Drop whatever session is cached
    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }

    /// Snapshot of the cached session
    pub async fn current(&self) -> Option<Session> {
        self.slot.lock().await.clone()
    }

    async fn login(&self) -> Result<Session, PanelError> {
        let missing = self.config.missing_fields();
        if !missing.is_empty() {
            error!(missing = ?missing, "Panel credentials are not fully configured");
            return Err(PanelError::Config(format!("missing {}", missing.join(", "))));
        }

        let url = self.config.endpoint("/login");
        info!(url = %url, username = %self.config.username, "Logging in to panel");

        let response = self
            .http
            .post(&url)
            .timeout(self.config.login_timeout())
            .json(&LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            })
            .send()
            .await
            .map_err(|e| {
                error!("Panel login request to {} failed: {}", url, e);
                PanelError::from(e)
            })?;

        let status = response.status();
        let cookies: Vec<SetCookie> = response
            .cookies()
            .map(|c| SetCookie {
                name: c.name().to_string(),
                value: c.value().to_string(),
                expires: c.expires(),
                max_age: c.max_age(),
            })
            .collect();
        let body = response.text().await?;

        if !status.is_success() {
            error!(status = status.as_u16(), "Panel login failed: {}", excerpt(&body));
            return Err(PanelError::Authentication(format!(
                "HTTP {}: {}",
                status.as_u16(),
                excerpt(&body)
            )));
        }

        let parsed: LoginResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Panel login response is not JSON: {}", excerpt(&body));
            PanelError::Protocol(format!("login response: {}", e))
        })?;

        match parsed.success {
            None => {
                return Err(PanelError::Protocol(
                    "login response has no success flag".to_string(),
                ));
            }
            Some(false) => {
                let msg = parsed.msg.unwrap_or_default();
                error!("Panel login rejected: {}", msg);
                return Err(PanelError::Authentication(msg));
            }
            Some(true) => {}
        }

        let now = SystemTime::now();
        let session = select_session(&cookies, now).ok_or_else(|| {
            error!("Panel login succeeded but no session cookie was set");
            PanelError::Protocol("login succeeded without a session cookie".to_string())
        })?;

        let ttl = session
            .expires_at
            .duration_since(now)
            .unwrap_or(Duration::ZERO);
        info!(expires_in_secs = ttl.as_secs(), "Panel session established");

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, expires: Option<SystemTime>, max_age: Option<Duration>) -> SetCookie {
        SetCookie {
            name: name.to_string(),
            value: "abc".to_string(),
            expires,
            max_age,
        }
    }

    #[test]
    fn test_select_prefers_3x_ui_cookie() {
        let now = SystemTime::now();
        let cookies = vec![cookie("session", None, None), cookie("3x-ui", None, None)];
        let session = select_session(&cookies, now).unwrap();
        assert_eq!(session.cookie(), "3x-ui=abc");
    }

    #[test]
    fn test_select_ignores_unknown_cookies() {
        let now = SystemTime::now();
        assert!(select_session(&[cookie("lang", None, None)], now).is_none());
        let session = select_session(&[cookie("lang", None, None), cookie("session", None, None)], now);
        assert_eq!(session.unwrap().cookie(), "session=abc");
    }

    #[test]
    fn test_expiry_sources() {
        let now = SystemTime::now();
        let explicit = now + Duration::from_secs(7200);

        let s = select_session(&[cookie("session", Some(explicit), None)], now).unwrap();
        assert_eq!(s.expires_at(), explicit);

        let s = select_session(&[cookie("session", None, Some(Duration::from_secs(90)))], now).unwrap();
        assert_eq!(s.expires_at(), now + Duration::from_secs(90));

        let s = select_session(&[cookie("session", None, None)], now).unwrap();
        assert_eq!(s.expires_at(), now + DEFAULT_SESSION_TTL);
    }

    #[test]
    fn test_freshness_margin() {
        let now = SystemTime::now();
        assert!(Session::new("a=b", now + Duration::from_secs(61)).is_fresh(now));
        assert!(!Session::new("a=b", now + Duration::from_secs(60)).is_fresh(now));
        assert!(!Session::new("a=b", now - Duration::from_secs(1)).is_fresh(now));
    }

    #[tokio::test]
    async fn test_incomplete_config_fails_without_network() {
        let manager = SessionManager::new(Client::new(), PanelConfig::new("", "admin", ""));
        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, PanelError::Config(ref m) if m.contains("url") && m.contains("password")));
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_only_matching_session() {
        let manager = SessionManager::new(Client::new(), PanelConfig::default());
        let fresh = Session::new("3x-ui=new", SystemTime::now() + DEFAULT_SESSION_TTL);
        *manager.slot.lock().await = Some(fresh.clone());

        manager.invalidate("3x-ui=old").await;
        assert_eq!(manager.current().await, Some(fresh));

        manager.invalidate("3x-ui=new").await;
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_session_is_reused() {
        let manager = SessionManager::new(Client::new(), PanelConfig::default());
        *manager.slot.lock().await =
            Some(Session::new("session=cached", SystemTime::now() + DEFAULT_SESSION_TTL));

        // Config is empty, so any login attempt would fail.
        assert_eq!(manager.acquire().await.unwrap(), "session=cached");
    }
}

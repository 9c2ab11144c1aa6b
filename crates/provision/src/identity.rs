//! Client identifiers and generated secrets

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Domain part of every client identifier
pub const IDENTIFIER_DOMAIN: &str = "bot.local";

/// Random bytes in the identifier suffix
pub const IDENTIFIER_SUFFIX_BYTES: usize = 10;

/// Random bytes in a generated Shadowsocks password
pub const PASSWORD_BYTES: usize = 16;

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// The user a credential is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: i64,
    pub username: Option<String>,
}

impl Requester {
    pub fn new(id: i64, username: Option<String>) -> Self {
        Self { id, username }
    }

    /// `tg_<id>` followed by `_<sanitized username>` when one is known
    pub fn base_name(&self) -> String {
        match self.username.as_deref().filter(|u| !u.is_empty()) {
            Some(username) => format!("tg_{}_{}", self.id, sanitize_username(username)),
            None => format!("tg_{}", self.id),
        }
    }
}

/// Replace every non-alphanumeric character with `_` and lowercase
pub fn sanitize_username(username: &str) -> String {
    username
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
}

/// `len` random bytes, base64url without padding
pub fn random_token(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Globally unique, email-shaped identifier for a new panel client
pub fn client_identifier(requester: &Requester) -> String {
    format!(
        "{}_{}@{}",
        requester.base_name(),
        random_token(IDENTIFIER_SUFFIX_BYTES),
        IDENTIFIER_DOMAIN
    )
}

/// Fresh Shadowsocks password
pub fn generate_password() -> String {
    random_token(PASSWORD_BYTES)
}

/// Random v4 UUID used as the panel client id
pub fn generate_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Quota in bytes; anything but a positive value means unlimited (0)
pub fn quota_bytes(quota_gb: Option<i64>) -> u64 {
    match quota_gb {
        Some(gb) if gb > 0 => (gb as u64).saturating_mul(BYTES_PER_GB),
        _ => 0,
    }
}

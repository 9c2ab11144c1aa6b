use thiserror::Error;

/// Panel integration errors
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Panel configuration incomplete: {0}")]
    Config(String),

    #[error("Panel login rejected: {0}")]
    Authentication(String),

    #[error("No panel session available: {0}")]
    Session(Box<PanelError>),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Panel session rejected (HTTP 401)")]
    Unauthorized,

    #[error("Panel returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed panel response: {0}")]
    Protocol(String),
}

impl PanelError {
    /// Whether a later attempt may succeed without operator action
    pub fn is_transient(&self) -> bool {
        match self {
            PanelError::Transport(_) | PanelError::Unauthorized => true,
            PanelError::Session(inner) => inner.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PanelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PanelError::Transport(format!("request timed out: {}", e))
        } else {
            PanelError::Transport(e.to_string())
        }
    }
}

/// Shorten a response body for logs and error messages
pub(crate) fn excerpt(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

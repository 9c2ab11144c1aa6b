use keysmith_panel::PanelError;
use thiserror::Error;

/// Provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Server {0} not found")]
    ServerNotFound(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown protocol '{0}'")]
    UnknownProtocol(String),

    #[error(transparent)]
    Panel(#[from] PanelError),

    #[error("Panel rejected the request: {0}")]
    Rejected(String),

    #[error("Client {client_identifier} was created but no link could be built: {reason}")]
    Orphaned {
        client_identifier: String,
        reason: String,
    },

    #[error("Invalid client identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Outline API error: {0}")]
    Outline(String),

    #[error("{0} is not supported for this protocol")]
    Unsupported(&'static str),
}

impl ProvisionError {
    /// Client identifier the panel still holds after a partial failure
    pub fn orphaned_identifier(&self) -> Option<&str> {
        match self {
            ProvisionError::Orphaned {
                client_identifier, ..
            } => Some(client_identifier),
            _ => None,
        }
    }
}

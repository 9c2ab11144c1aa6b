//! SSH command execution
//!
//! Opens a session with `russh`, runs a single command and collects its
//! output. Host keys are trusted on first use.

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Connect and authentication deadline
pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SshError {
    #[error("SSH configuration error: {0}")]
    Config(String),

    #[error("SSH connection to {0} timed out")]
    Timeout(String),

    #[error("SSH authentication failed for {user}@{host}")]
    AuthFailed { user: String, host: String },

    #[error("Cannot load private key {path}: {reason}")]
    Key { path: String, reason: String },

    #[error("SSH error: {0}")]
    Protocol(#[from] russh::Error),
}

/// Where and how to log in
#[derive(Clone, Default)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_path", &self.key_path)
            .finish()
    }
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: None,
            key_path: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    fn validate(&self) -> Result<(), SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::Config("host is empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(SshError::Config("user is empty".to_string()));
        }
        if self.key_path.is_none() && self.password.as_deref().unwrap_or("").is_empty() {
            return Err(SshError::Config(format!(
                "no key or password configured for {}",
                self.host
            )));
        }
        Ok(())
    }
}

/// Result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the server closed the channel without reporting a status
    pub exit_code: Option<u32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(key = %server_public_key.fingerprint(), "Accepting SSH host key");
        Ok(true)
    }
}

/// Runs commands on remote hosts
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: Duration,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            connect_timeout: SSH_CONNECT_TIMEOUT,
        }
    }
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Run `command` on `target` and wait for it to finish
    pub async fn execute(&self, target: &SshTarget, command: &str) -> Result<CommandOutput, SshError> {
        target.validate()?;
        let addr = format!("{}:{}", target.host, target.port);

        let mut session = tokio::time::timeout(self.connect_timeout, self.login(target))
            .await
            .map_err(|_| {
                error!("SSH connection to {} timed out", addr);
                SshError::Timeout(addr.clone())
            })??;
        info!(host = %target.host, user = %target.user, "SSH connected");

        let output = Self::run(&mut session, command).await;

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!("SSH disconnect from {} failed: {}", addr, e);
        }
        output
    }

    async fn login(&self, target: &SshTarget) -> Result<client::Handle<ClientHandler>, SshError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let mut session =
            client::connect(config, (target.host.as_str(), target.port), ClientHandler).await?;

        let authenticated = match &target.key_path {
            Some(path) => {
                let key = russh_keys::load_secret_key(path, None).map_err(|e| SshError::Key {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                session
                    .authenticate_publickey(&target.user, Arc::new(key))
                    .await?
            }
            None => {
                let password = target.password.as_deref().unwrap_or_default();
                session.authenticate_password(&target.user, password).await?
            }
        };

        if !authenticated {
            return Err(SshError::AuthFailed {
                user: target.user.clone(),
                host: target.host.clone(),
            });
        }
        Ok(session)
    }

    async fn run(
        session: &mut client::Handle<ClientHandler>,
        command: &str,
    ) -> Result<CommandOutput, SshError> {
        let mut channel = session.channel_open_session().await?;
        debug!(command = %command, "SSH exec");
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                // ext 1 is SSH_EXTENDED_DATA_STDERR
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                _ => {}
            }
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

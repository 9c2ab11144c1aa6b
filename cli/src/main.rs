//! Keysmith Control CLI
//!
//! Command-line interface for operating the Keysmith daemon.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keysmith_daemon::DaemonConfig;
use keysmith_provision::format_bytes;
use keysmith_transport::{SshExecutor, SshTarget};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::{Table, Tabled};
use tracing::{Level, debug};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "keysmith")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Daemon API base URL
    #[arg(long, default_value = "http://127.0.0.1:8088")]
    api: String,

    /// Daemon configuration file (used by `ssh`)
    #[arg(short, long, default_value = "keysmith.toml")]
    config: String,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured servers
    Servers,
    /// Manage user keys
    Key {
        #[command(subcommand)]
        cmd: KeyCommands,
    },
    /// List raw clients of a server's inbound
    Clients {
        /// Server ID
        server_id: u32,
        /// vless, shadowsocks
        protocol: String,
    },
    /// Run a shell command on a server over SSH
    Ssh {
        /// Server ID
        server_id: u32,
        /// Command line
        command: String,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCommands {
    /// Issue a new key
    Issue {
        /// Chat user ID
        user_id: i64,
        /// vless, shadowsocks or outline
        protocol: String,
        /// Target server (default: first one offering the protocol)
        #[arg(long)]
        server: Option<u32>,
        /// Username used in the client identifier
        #[arg(long)]
        username: Option<String>,
        /// Traffic quota in GB
        #[arg(long)]
        quota_gb: Option<i64>,
    },
    /// List a user's keys
    List {
        /// Chat user ID
        user_id: i64,
    },
    /// Revoke a key
    Revoke {
        /// Key (subscription) ID
        id: i64,
    },
    /// Show traffic for a key
    Traffic {
        /// Key (subscription) ID
        id: i64,
    },
}

#[derive(Debug, Serialize)]
struct IssueKeyRequest {
    user_id: i64,
    username: Option<String>,
    protocol: String,
    server_id: Option<u32>,
    quota_gb: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    id: u32,
    name: String,
    region: String,
    protocols: Vec<String>,
}

#[derive(Tabled)]
struct ServerRow {
    id: u32,
    name: String,
    region: String,
    protocols: String,
}

#[derive(Debug, Deserialize)]
struct KeyInfo {
    id: i64,
    server_name: String,
    region: String,
    protocol: String,
    key: String,
    created_at: String,
}

#[derive(Tabled)]
struct KeyRow {
    id: i64,
    server: String,
    region: String,
    protocol: String,
    created: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct IssuedKey {
    subscription_id: i64,
    key: String,
    identifier: String,
    keys_left: u32,
}

#[derive(Debug, Deserialize, Tabled)]
struct TrafficInfo {
    #[tabled(rename = "upload")]
    up_human: String,
    #[tabled(rename = "download")]
    down_human: String,
    #[tabled(rename = "total")]
    total_human: String,
}

#[derive(Debug, Deserialize)]
struct ClientInfo {
    email: String,
    #[serde(default)]
    enable: bool,
    #[serde(rename = "totalGB", default)]
    total_gb: u64,
    #[serde(rename = "tgId", default)]
    tg_id: Value,
}

#[derive(Tabled)]
struct ClientRow {
    email: String,
    enabled: bool,
    tg_id: String,
    quota: String,
}

/// Turn a non-2xx response into an error carrying the daemon's message
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    let message = body["error"].as_str().unwrap_or("no details");
    bail!("{}: {}", status, message)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = Client::new();
    let api = args.api.trim_end_matches('/');

    match args.command {
        Commands::Servers => {
            let resp = check(client.get(format!("{}/servers", api)).send().await?).await?;
            let servers: Vec<ServerInfo> = resp.json().await?;
            let rows = servers.into_iter().map(|s| ServerRow {
                id: s.id,
                name: s.name,
                region: s.region,
                protocols: s.protocols.join(", "),
            });
            println!("{}", Table::new(rows));
        }
        Commands::Key { cmd } => match cmd {
            KeyCommands::Issue {
                user_id,
                protocol,
                server,
                username,
                quota_gb,
            } => {
                let req = IssueKeyRequest {
                    user_id,
                    username,
                    protocol,
                    server_id: server,
                    quota_gb,
                };
                let resp = client.post(format!("{}/keys", api)).json(&req).send().await?;
                let issued: IssuedKey = check(resp).await?.json().await?;
                println!("Key {} issued ({})", issued.subscription_id, issued.identifier);
                println!("{}", issued.key);
                println!("Keys left: {}", issued.keys_left);
            }
            KeyCommands::List { user_id } => {
                let resp = client
                    .get(format!("{}/users/{}/keys", api, user_id))
                    .send()
                    .await?;
                let keys: Vec<KeyInfo> = check(resp).await?.json().await?;
                if keys.is_empty() {
                    println!("User {} has no active keys", user_id);
                    return Ok(());
                }
                let rows = keys.into_iter().map(|k| KeyRow {
                    id: k.id,
                    server: k.server_name,
                    region: k.region,
                    protocol: k.protocol,
                    created: k.created_at.chars().take(10).collect(),
                    key: k.key,
                });
                println!("{}", Table::new(rows));
            }
            KeyCommands::Revoke { id } => {
                let resp = client.delete(format!("{}/keys/{}", api, id)).send().await?;
                let body: Value = check(resp).await?.json().await?;
                match body["outcome"].as_str() {
                    Some("already_gone") => println!("Key {} revoked (it was already gone from the server)", id),
                    _ => println!("Key {} revoked", id),
                }
            }
            KeyCommands::Traffic { id } => {
                let resp = client
                    .get(format!("{}/keys/{}/traffic", api, id))
                    .send()
                    .await?;
                let traffic: TrafficInfo = check(resp).await?.json().await?;
                println!("{}", Table::new(vec![traffic]));
            }
        },
        Commands::Clients {
            server_id,
            protocol,
        } => {
            let resp = client
                .get(format!("{}/servers/{}/clients/{}", api, server_id, protocol))
                .send()
                .await?;
            let clients: Vec<ClientInfo> = check(resp).await?.json().await?;
            let rows = clients.into_iter().map(|c| ClientRow {
                email: c.email,
                enabled: c.enable,
                tg_id: match c.tg_id {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
                quota: if c.total_gb == 0 {
                    "unlimited".to_string()
                } else {
                    format_bytes(Some(c.total_gb))
                },
            });
            println!("{}", Table::new(rows));
        }
        Commands::Ssh { server_id, command } => {
            let config = DaemonConfig::load(&args.config)
                .await
                .with_context(|| format!("loading {}", args.config))?;
            let registry = config.registry()?;
            let server = registry
                .find(server_id)
                .with_context(|| format!("server {} is not configured", server_id))?;
            let ssh = server
                .ssh
                .as_ref()
                .with_context(|| format!("server {} has no [servers.ssh] section", server_id))?;
            let host = server
                .public_address()
                .with_context(|| format!("server {} has no address", server_id))?;

            let mut target = SshTarget::new(host, ssh.port, ssh.user.as_str());
            if let Some(key_path) = &ssh.key_path {
                target = target.with_key(key_path);
            }
            if let Some(password) = &ssh.password {
                target = target.with_password(password.as_str());
            }
            debug!(?target, "Running remote command");

            let output = SshExecutor::default().execute(&target, &command).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if !output.success() {
                bail!("remote command exited with {:?}", output.exit_code);
            }
        }
    }

    Ok(())
}

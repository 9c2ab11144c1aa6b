//! Keysmith Provision - VPN credential issuance
//!
//! This crate provides:
//! - `ServerRegistry`: static per-server configuration loaded at startup
//! - `Provisioner`: create/delete/traffic/listing operations for the
//!   VLESS Reality, Shadowsocks and Outline variants
//! - Client identifier generation and connection URI assembly
//! - `format_bytes` for human-readable traffic figures

mod error;
mod format;
mod identity;
mod outline;
mod protocol;
mod provisioner;
mod registry;
mod uri;

pub use error::*;
pub use format::*;
pub use identity::*;
pub use outline::*;
pub use protocol::*;
pub use provisioner::*;
pub use registry::*;
pub use uri::*;

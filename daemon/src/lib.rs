//! Keysmith Daemon
//!
//! HTTP front-end that issues, lists and revokes VPN keys on behalf of a
//! chat bot, keeping a record of every key in the key store.

pub mod api;
pub mod config;

pub use api::{AppState, router, serve};
pub use config::DaemonConfig;

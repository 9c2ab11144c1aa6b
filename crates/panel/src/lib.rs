//! Keysmith Panel - 3x-ui management API integration
//!
//! This crate provides:
//! - `SessionManager`: a single cached login cookie with expiry and
//!   401-driven invalidation
//! - `PanelClient`: authenticated JSON requests plus typed helpers for the
//!   inbound/client endpoints
//! - Typed models for the panel's response envelopes

mod client;
mod config;
mod error;
mod models;
mod session;

pub use client::*;
pub use config::*;
pub use error::*;
pub use models::*;
pub use session::*;

//! Keysmith Storage - key bookkeeping
//!
//! This crate provides:
//! - `KeyStore`: SQLite pool over the users, servers and subscriptions tables
//! - Row types returned by its queries

mod keystore;

pub use keystore::*;

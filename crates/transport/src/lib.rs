//! Keysmith Transport - remote host access
//!
//! Runs one-off shell commands on VPN hosts over SSH (`russh`).

mod ssh;

pub use ssh::*;

//! Connection management for the single persistent collector connection
//!
//! This module handles:
//! - The TCP endpoint lifecycle and its reconnect state machine
//! - Non-blocking sends with back-pressure reporting
//! - The one-slot pending-message retry buffer

mod manager;
mod pending;

pub use manager::{ConnectionConfig, ConnectionManager, SendOutcome};
pub use pending::PendingBuffer;

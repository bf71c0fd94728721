//! Shared types and utilities for kernel-ping
//!
//! This crate contains the connection descriptor written by a running kernel,
//! the Jupyter message envelope, and the wire codec used by the probe client.

pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use protocol::wire::{Signer, WireError, DELIMITER};
pub use types::{connection::*, message::*};

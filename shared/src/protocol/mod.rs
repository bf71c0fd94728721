//! Wire protocol definitions
//!
//! This module defines how messages are framed and signed on the kernel's
//! ZeroMQ sockets.

pub mod wire;

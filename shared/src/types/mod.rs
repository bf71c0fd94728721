//! Data types exchanged with a kernel

pub mod connection;
pub mod message;

//! Probe failure categories

use kernel_ping_shared::{ChannelKind, DescriptorError, WireError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("failed to start {channel} channel at {endpoint}: {reason}")]
    ChannelStart {
        channel: ChannelKind,
        endpoint: String,
        reason: String,
    },

    #[error("could not connect {channel} channel at {endpoint} within {timeout:?} after {attempts} attempts: {reason}")]
    ConnectTimeout {
        channel: ChannelKind,
        endpoint: String,
        timeout: Duration,
        attempts: u32,
        reason: String,
    },

    #[error("{0} channel is not started")]
    NotStarted(ChannelKind),

    #[error("failed to send {msg_type} on {channel} channel: {reason}")]
    Send {
        channel: ChannelKind,
        msg_type: String,
        reason: String,
    },

    #[error("failed to receive on {channel} channel: {reason}")]
    Recv { channel: ChannelKind, reason: String },

    #[error("malformed message: {0}")]
    Wire(#[from] WireError),

    #[error("no {expected} received within {timeout:?}")]
    ReplyTimeout {
        expected: &'static str,
        timeout: Duration,
    },

    #[error("unexpected reply type: {actual} (expected {expected})")]
    UnexpectedReply {
        expected: &'static str,
        actual: String,
    },

    #[error("error stopping channels: {}", .errors.join("; "))]
    Teardown { errors: Vec<String> },
}

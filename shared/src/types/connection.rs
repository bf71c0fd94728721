//! Connection descriptor written by a running kernel
//!
//! A kernel publishes how to reach it as a small JSON file (the "connection
//! file"): the transport, the address, one port per channel, and the key used
//! to sign every message.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The only signature scheme kernels are expected to advertise
pub const DEFAULT_SIGNATURE_SCHEME: &str = "hmac-sha256";

const REDACTED_KEY: &str = "<redacted>";

/// Errors raised while loading a connection descriptor
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read connection file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse connection file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid connection descriptor: {0}")]
    Invalid(String),
}

/// Socket transport named in the descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Ipc,
}

/// One logical stream to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Shell,
    IoPub,
    Stdin,
    Control,
    Heartbeat,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Shell => "shell",
            ChannelKind::IoPub => "iopub",
            ChannelKind::Stdin => "stdin",
            ChannelKind::Control => "control",
            ChannelKind::Heartbeat => "hb",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_signature_scheme() -> String {
    DEFAULT_SIGNATURE_SCHEME.to_string()
}

/// Parsed connection file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub transport: Transport,

    #[serde(default = "default_ip")]
    pub ip: String,

    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,

    /// HMAC key; empty disables signing
    #[serde(default)]
    pub key: String,

    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

impl ConnectionInfo {
    /// Read, parse and validate a connection file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let info: ConnectionInfo =
            serde_json::from_str(&raw).map_err(|source| DescriptorError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info.validate()?;
        Ok(info)
    }

    /// Check the fields the probe depends on.
    ///
    /// The stdin port is not checked because the probe never opens that channel.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.ip.trim().is_empty() {
            return Err(DescriptorError::Invalid("ip must not be empty".to_string()));
        }

        for channel in [
            ChannelKind::Shell,
            ChannelKind::IoPub,
            ChannelKind::Control,
            ChannelKind::Heartbeat,
        ] {
            if self.port(channel) == 0 {
                return Err(DescriptorError::Invalid(format!(
                    "{} port must be greater than 0",
                    channel
                )));
            }
        }

        if self.signature_scheme != DEFAULT_SIGNATURE_SCHEME {
            return Err(DescriptorError::Invalid(format!(
                "unsupported signature scheme: {}",
                self.signature_scheme
            )));
        }

        Ok(())
    }

    pub fn port(&self, channel: ChannelKind) -> u16 {
        match channel {
            ChannelKind::Shell => self.shell_port,
            ChannelKind::IoPub => self.iopub_port,
            ChannelKind::Stdin => self.stdin_port,
            ChannelKind::Control => self.control_port,
            ChannelKind::Heartbeat => self.hb_port,
        }
    }

    /// ZeroMQ endpoint for `channel`, optionally connecting through another host
    pub fn endpoint(&self, channel: ChannelKind, host_override: Option<&str>) -> String {
        let host = host_override.unwrap_or(&self.ip);
        let port = self.port(channel);

        match self.transport {
            Transport::Tcp => {
                // A wildcard bind address is not connectable
                let host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
                format!("tcp://{}:{}", host, port)
            }
            Transport::Ipc => format!("ipc://{}-{}", host, port),
        }
    }

    /// Copy safe to print: the signing key is masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.key.is_empty() {
            copy.key = REDACTED_KEY.to_string();
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "shell_port": 53794,
        "iopub_port": 53795,
        "stdin_port": 53796,
        "control_port": 53797,
        "hb_port": 53798,
        "ip": "127.0.0.1",
        "key": "a0436f6c-1916-498b-8eb9-e81ab9368e84",
        "transport": "tcp",
        "signature_scheme": "hmac-sha256",
        "kernel_name": "micronaut"
    }"#;

    fn sample() -> ConnectionInfo {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_full_descriptor() {
        let info = sample();
        assert_eq!(info.transport, Transport::Tcp);
        assert_eq!(info.shell_port, 53794);
        assert_eq!(info.hb_port, 53798);
        assert_eq!(info.kernel_name.as_deref(), Some("micronaut"));
        assert!(info.validate().is_ok());
    }

    #[test]
    fn test_defaults_for_optional_fields() {
        let info: ConnectionInfo = serde_json::from_str(
            r#"{"shell_port": 1, "iopub_port": 2, "stdin_port": 3, "control_port": 4, "hb_port": 5}"#,
        )
        .unwrap();
        assert_eq!(info.ip, "127.0.0.1");
        assert_eq!(info.transport, Transport::Tcp);
        assert!(info.key.is_empty());
        assert_eq!(info.signature_scheme, DEFAULT_SIGNATURE_SCHEME);
        assert!(info.validate().is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let info = ConnectionInfo {
            control_port: 0,
            ..sample()
        };
        let err = info.validate().unwrap_err();
        assert!(err.to_string().contains("control port"));
    }

    #[test]
    fn test_unused_stdin_port_may_be_zero() {
        let info = ConnectionInfo {
            stdin_port: 0,
            ..sample()
        };
        assert!(info.validate().is_ok());
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let info = ConnectionInfo {
            signature_scheme: "hmac-md5".to_string(),
            ..sample()
        };
        assert!(matches!(info.validate(), Err(DescriptorError::Invalid(_))));
    }

    #[test]
    fn test_endpoints() {
        let info = sample();
        assert_eq!(
            info.endpoint(ChannelKind::Shell, None),
            "tcp://127.0.0.1:53794"
        );
        assert_eq!(
            info.endpoint(ChannelKind::Heartbeat, Some("10.0.0.7")),
            "tcp://10.0.0.7:53798"
        );

        let wildcard = ConnectionInfo {
            ip: "0.0.0.0".to_string(),
            ..sample()
        };
        assert_eq!(
            wildcard.endpoint(ChannelKind::Control, None),
            "tcp://127.0.0.1:53797"
        );

        let ipc = ConnectionInfo {
            transport: Transport::Ipc,
            ip: "/tmp/kernel".to_string(),
            ..sample()
        };
        assert_eq!(ipc.endpoint(ChannelKind::IoPub, None), "ipc:///tmp/kernel-53795");
    }

    #[test]
    fn test_redacted_masks_key() {
        let redacted = sample().redacted();
        assert_eq!(redacted.key, REDACTED_KEY);
        assert_eq!(redacted.shell_port, 53794);

        let unsigned = ConnectionInfo {
            key: String::new(),
            ..sample()
        };
        assert!(unsigned.redacted().key.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let info = ConnectionInfo::load(file.path()).unwrap();
        assert_eq!(info, sample());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConnectionInfo::load("/nonexistent/kernel-1234.json").unwrap_err();
        assert!(matches!(err, DescriptorError::Read { .. }));
        assert!(err.to_string().contains("failed to read connection file"));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = ConnectionInfo::load(file.path()).unwrap_err();
        assert!(matches!(err, DescriptorError::Parse { .. }));
    }
}

//! Configuration types for the liveness probe

use anyhow::Context;
use kernel_ping_shared::utils::parse_duration;
use std::path::PathBuf;
use std::time::Duration;

/// How long to wait for the `kernel_info_reply`
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between opening the channels and sending the request
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// How long the heartbeat channel gets to echo a ping
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for every configured wait
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

pub const ENV_TIMEOUT: &str = "KERNEL_PING_TIMEOUT";
pub const ENV_CONNECT_TIMEOUT: &str = "KERNEL_PING_CONNECT_TIMEOUT";
pub const ENV_SETTLE: &str = "KERNEL_PING_SETTLE";
pub const ENV_HEARTBEAT_TIMEOUT: &str = "KERNEL_PING_HEARTBEAT_TIMEOUT";
pub const ENV_HOST: &str = "KERNEL_PING_HOST";

/// Probe configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Connection file written by the kernel
    pub connection_file: PathBuf,

    /// Reply wait budget once the request is sent
    pub reply_timeout: Duration,

    /// Deadline for getting every channel connected
    pub connect_timeout: Duration,

    /// Pause before sending the request
    pub settle_delay: Duration,

    /// Heartbeat echo wait (diagnostic only)
    pub heartbeat_timeout: Duration,

    /// Connect to this host instead of the descriptor's `ip`
    pub host_override: Option<String>,
}

impl ProbeConfig {
    pub fn new(connection_file: impl Into<PathBuf>) -> Self {
        Self {
            connection_file: connection_file.into(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            connect_timeout: DEFAULT_REPLY_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            host_override: None,
        }
    }

    /// Defaults overridden by `KERNEL_PING_*` environment variables
    pub fn from_env(connection_file: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Self::from_lookup(connection_file, |name| std::env::var(name).ok())
    }

    /// Same as [`ProbeConfig::from_env`] with an explicit variable source
    pub fn from_lookup<F>(connection_file: impl Into<PathBuf>, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(connection_file);

        if let Some(timeout) = lookup_duration(&lookup, ENV_TIMEOUT)? {
            config.reply_timeout = timeout;
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = lookup_duration(&lookup, ENV_CONNECT_TIMEOUT)? {
            config.connect_timeout = timeout;
        }
        if let Some(delay) = lookup_duration(&lookup, ENV_SETTLE)? {
            config.settle_delay = delay;
        }
        if let Some(timeout) = lookup_duration(&lookup, ENV_HEARTBEAT_TIMEOUT)? {
            config.heartbeat_timeout = timeout;
        }
        config.host_override = lookup(ENV_HOST)
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty());

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reply_timeout.is_zero() {
            anyhow::bail!("Reply timeout must be greater than 0");
        }

        if self.connect_timeout.is_zero() {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        for (name, value) in [
            ("Reply timeout", self.reply_timeout),
            ("Connect timeout", self.connect_timeout),
            ("Settle delay", self.settle_delay),
            ("Heartbeat timeout", self.heartbeat_timeout),
        ] {
            if value > MAX_DURATION {
                anyhow::bail!("{} must be at most {:?}", name, MAX_DURATION);
            }
        }

        Ok(())
    }
}

fn lookup_duration<F>(lookup: &F, name: &str) -> anyhow::Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => parse_duration(&value)
            .with_context(|| format!("Invalid {}: {:?}", name, value))
            .map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProbeConfig::new("kernel.json");
        assert_eq!(config.reply_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, config.reply_timeout);
        assert_eq!(config.settle_delay, Duration::from_secs(2));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(1));
        assert!(config.host_override.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_applies_to_connect_unless_overridden() {
        let config =
            ProbeConfig::from_lookup("kernel.json", lookup_from(&[(ENV_TIMEOUT, "3s")])).unwrap();
        assert_eq!(config.reply_timeout, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));

        let config = ProbeConfig::from_lookup(
            "kernel.json",
            lookup_from(&[(ENV_TIMEOUT, "3s"), (ENV_CONNECT_TIMEOUT, "750ms")]),
        )
        .unwrap();
        assert_eq!(config.reply_timeout, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_settle_heartbeat_and_host() {
        let config = ProbeConfig::from_lookup(
            "kernel.json",
            lookup_from(&[
                (ENV_SETTLE, "0"),
                (ENV_HEARTBEAT_TIMEOUT, "200ms"),
                (ENV_HOST, " 10.1.2.3 "),
            ]),
        )
        .unwrap();
        assert!(config.settle_delay.is_zero());
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(200));
        assert_eq!(config.host_override.as_deref(), Some("10.1.2.3"));
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = ProbeConfig::from_lookup(
            "kernel.json",
            lookup_from(&[(ENV_TIMEOUT, "  "), (ENV_HOST, "")]),
        )
        .unwrap();
        assert_eq!(config.reply_timeout, DEFAULT_REPLY_TIMEOUT);
        assert!(config.host_override.is_none());
    }

    #[test]
    fn test_unparseable_value_is_an_error() {
        let err = ProbeConfig::from_lookup("kernel.json", lookup_from(&[(ENV_TIMEOUT, "soon")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains(ENV_TIMEOUT));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(
            ProbeConfig::from_lookup("kernel.json", lookup_from(&[(ENV_TIMEOUT, "0s")])).is_err()
        );

        let config = ProbeConfig {
            connect_timeout: Duration::ZERO,
            ..ProbeConfig::new("kernel.json")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let err = ProbeConfig::from_lookup(
            "kernel.json",
            lookup_from(&[(ENV_TIMEOUT, "18446744073709551615s")]),
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Reply timeout must be at most"));

        let config = ProbeConfig {
            settle_delay: MAX_DURATION + Duration::from_secs(1),
            ..ProbeConfig::new("kernel.json")
        };
        assert!(config.validate().is_err());

        let config = ProbeConfig {
            heartbeat_timeout: MAX_DURATION,
            ..ProbeConfig::new("kernel.json")
        };
        assert!(config.validate().is_ok());
    }
}

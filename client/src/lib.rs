//! Kernel liveness probe library
//!
//! Loads a kernel's connection file, opens its channels over ZeroMQ, sends a
//! single `kernel_info_request` and waits for the correlated reply.

pub mod channels;
pub mod config;
pub mod error;
pub mod probe;
pub mod retry;

pub use channels::{KernelClient, ZmqKernelClient};
pub use config::ProbeConfig;
pub use error::ProbeError;
pub use probe::LivenessProbe;

use kernel_ping_shared::{ConnectionInfo, KernelInfo};
use tracing::{debug, error, info};

/// Probe the kernel described by `config.connection_file`.
///
/// Every failure is logged here with its context before being returned.
pub async fn run_probe(config: &ProbeConfig) -> Result<KernelInfo, ProbeError> {
    info!(
        "Starting kernel test with connection file: {}",
        config.connection_file.display()
    );

    let result = probe_connection_file(config).await;
    if let Err(e) = &result {
        error!("Kernel probe failed: {}", e);
    }
    result
}

async fn probe_connection_file(config: &ProbeConfig) -> Result<KernelInfo, ProbeError> {
    let connection = ConnectionInfo::load(&config.connection_file)?;
    debug!(
        "Connection file contents: {}",
        serde_json::to_string_pretty(&connection.redacted()).unwrap_or_default()
    );
    if let Some(name) = &connection.kernel_name {
        debug!("Kernel name: {}", name);
    }

    let client = ZmqKernelClient::new(connection, config.host_override.clone())?;
    let mut probe = LivenessProbe::new(client, config.clone());
    probe.run().await
}

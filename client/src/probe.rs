//! Liveness probe
//!
//! One run: start channels, settle, send `kernel_info_request`, wait for the
//! correlated reply, classify it. Channels are stopped exactly once on every
//! path, and a teardown failure never changes the outcome already decided.

use crate::channels::KernelClient;
use crate::config::{ProbeConfig, MAX_DURATION};
use crate::error::ProbeError;
use kernel_ping_shared::{KernelInfo, Message, Session, KERNEL_INFO_REPLY};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-message wait while draining the shell channel after a timeout
const DRAIN_POLL: Duration = Duration::from_millis(100);
const MAX_DRAINED: usize = 32;

pub struct LivenessProbe<C> {
    client: C,
    session: Session,
    config: ProbeConfig,
}

impl<C: KernelClient> LivenessProbe<C> {
    pub fn new(client: C, config: ProbeConfig) -> Self {
        Self {
            client,
            session: Session::default(),
            config,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    /// Run the probe and always stop the channels afterwards
    pub async fn run(&mut self) -> Result<KernelInfo, ProbeError> {
        let result = self.exchange().await;

        debug!("Cleaning up client...");
        match self.client.stop_channels().await {
            Ok(()) => debug!("Channels stopped successfully"),
            Err(e) => warn!("Error stopping channels: {}", e),
        }

        result
    }

    async fn exchange(&mut self) -> Result<KernelInfo, ProbeError> {
        debug!("Starting channels...");
        let deadline = Instant::now() + self.config.connect_timeout.min(MAX_DURATION);
        self.client.start_channels(deadline).await?;

        for (channel, alive) in self.client.channel_status() {
            debug!("{} channel alive: {}", channel, alive);
        }

        let heartbeat_timeout = self.config.heartbeat_timeout;
        if self.client.ping_heartbeat(heartbeat_timeout).await {
            debug!("Heartbeat answered");
        } else {
            warn!("Heartbeat not answered within {:?}", heartbeat_timeout);
        }

        if !self.config.settle_delay.is_zero() {
            debug!(
                "Waiting {:?} for connection to stabilize...",
                self.config.settle_delay
            );
            tokio::time::sleep(self.config.settle_delay).await;
        }

        debug!("Sending kernel_info request...");
        let request = self.session.kernel_info_request();
        self.client.send_shell(&request).await?;
        debug!("Sent kernel_info request with msg_id: {}", request.msg_id());

        debug!("Waiting for kernel_info_reply...");
        let reply_timeout = self.config.reply_timeout;
        let reply = match tokio::time::timeout(reply_timeout, self.await_reply(request.msg_id()))
            .await
        {
            Ok(reply) => reply?,
            Err(_) => {
                self.drain_pending().await;
                return Err(ProbeError::ReplyTimeout {
                    expected: KERNEL_INFO_REPLY,
                    timeout: reply_timeout,
                });
            }
        };

        debug!(
            "Received message: {}",
            serde_json::to_string_pretty(&reply.to_json()).unwrap_or_default()
        );

        if reply.msg_type() != KERNEL_INFO_REPLY {
            error!("Unexpected reply type: {}", reply.msg_type());
            return Err(ProbeError::UnexpectedReply {
                expected: KERNEL_INFO_REPLY,
                actual: reply.msg_type().to_string(),
            });
        }

        info!("Kernel is available - received kernel_info_reply");
        let kernel = KernelInfo::from_content(&reply.content).unwrap_or_else(|e| {
            warn!("kernel_info_reply content is not well formed: {}", e);
            KernelInfo::default()
        });
        info!("Kernel implementation: {}", kernel.implementation_or_unknown());
        info!("Kernel version: {}", kernel.version_or_unknown());
        if let Some(language) = &kernel.language_info.name {
            debug!("Kernel language: {}", language);
        }
        if let Some(protocol) = &kernel.protocol_version {
            debug!("Kernel protocol version: {}", protocol);
        }

        Ok(kernel)
    }

    /// Receive until a message answering `msg_id` arrives
    async fn await_reply(&mut self, msg_id: &str) -> Result<Message, ProbeError> {
        loop {
            match self.client.recv_shell().await {
                Ok(message) if message.is_reply_to(msg_id) => return Ok(message),
                Ok(message) => debug!(
                    "Discarding {} (parent {:?}), waiting for a reply to {}",
                    message.msg_type(),
                    message.parent_msg_id(),
                    msg_id
                ),
                Err(ProbeError::Wire(e)) => warn!("Discarding shell message: {}", e),
                Err(e) => return Err(e),
            }
        }
    }

    /// Log whatever is already queued on the shell channel
    async fn drain_pending(&mut self) {
        debug!("Checking for any pending messages...");
        for _ in 0..MAX_DRAINED {
            match tokio::time::timeout(DRAIN_POLL, self.client.recv_shell()).await {
                Ok(Ok(message)) => debug!("Found pending message: {}", message.msg_type()),
                Ok(Err(ProbeError::Wire(e))) => debug!("Found malformed pending message: {}", e),
                _ => break,
            }
        }
    }
}

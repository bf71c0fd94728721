//! Kernel channels over ZeroMQ
//!
//! The probe talks to the kernel through the [`KernelClient`] trait so the
//! sequencing in [`crate::probe`] does not depend on sockets. The production
//! implementation, [`ZmqKernelClient`], connects:
//!
//! - shell (DEALER): requests and replies
//! - control (DEALER): priority requests, connected but unused by the probe
//! - iopub (SUB): kernel broadcasts, subscribed to everything
//! - hb (REQ): heartbeat echo
//!
//! Socket I/O runs on the `zeromq` crate's background tasks; the client only
//! awaits individual sends and receives.

use crate::error::ProbeError;
use crate::retry::{retry_until, DeadlineExceeded};
use async_trait::async_trait;
use bytes::Bytes;
use kernel_ping_shared::{ChannelKind, ConnectionInfo, Message, Signer};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use zeromq::{
    DealerSocket, ReqSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqError, ZmqMessage,
};

const CONNECT_BACKOFF: Duration = Duration::from_millis(50);
const HEARTBEAT_PING: &[u8] = b"ping";

/// Channel operations the probe needs from a kernel connection
#[async_trait]
pub trait KernelClient: Send {
    /// Connect every channel, giving up at `deadline`
    async fn start_channels(&mut self, deadline: Instant) -> Result<(), ProbeError>;

    /// Whether each channel is currently open
    fn channel_status(&self) -> Vec<(ChannelKind, bool)>;

    async fn send_shell(&mut self, message: &Message) -> Result<(), ProbeError>;

    /// Next message on the shell channel, whatever it answers
    async fn recv_shell(&mut self) -> Result<Message, ProbeError>;

    /// Send one heartbeat and report whether it was echoed within `timeout`
    async fn ping_heartbeat(&mut self, timeout: Duration) -> bool;

    /// Close every open channel. Called once per probe run.
    async fn stop_channels(&mut self) -> Result<(), ProbeError>;
}

/// [`KernelClient`] backed by `zeromq` sockets
pub struct ZmqKernelClient {
    info: ConnectionInfo,
    signer: Signer,
    host_override: Option<String>,
    shell: Option<DealerSocket>,
    control: Option<DealerSocket>,
    iopub: Option<SubSocket>,
    heartbeat: Option<ReqSocket>,
}

impl ZmqKernelClient {
    pub fn new(info: ConnectionInfo, host_override: Option<String>) -> Result<Self, ProbeError> {
        let signer = Signer::from_connection(&info)?;
        if !signer.is_enabled() {
            warn!("Connection file has an empty key; messages will not be signed");
        }

        Ok(Self {
            info,
            signer,
            host_override,
            shell: None,
            control: None,
            iopub: None,
            heartbeat: None,
        })
    }

    pub fn endpoint(&self, channel: ChannelKind) -> String {
        self.info.endpoint(channel, self.host_override.as_deref())
    }
}

/// Connect a fresh socket of type `S` to `endpoint`, retrying until `deadline`
async fn connect_channel<S>(
    channel: ChannelKind,
    endpoint: String,
    deadline: Instant,
) -> Result<S, ProbeError>
where
    S: Socket + Send,
{
    let timeout = deadline.saturating_duration_since(Instant::now());
    debug!("Connecting {} channel to {}", channel, endpoint);

    let operation = format!("connect {} channel", channel);
    let target = endpoint.as_str();
    retry_until(&operation, deadline, CONNECT_BACKOFF, move || async move {
        let mut socket = S::new();
        socket.connect(target).await?;
        Ok::<S, ZmqError>(socket)
    })
    .await
    .map_err(|DeadlineExceeded { attempts, last_error }| ProbeError::ConnectTimeout {
        channel,
        endpoint,
        timeout,
        attempts,
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "connect did not complete".to_string()),
    })
}

async fn close_socket<S>(socket: Option<S>, channel: ChannelKind, errors: &mut Vec<String>)
where
    S: Socket + Send,
{
    if let Some(socket) = socket {
        for e in socket.close().await {
            errors.push(format!("{}: {}", channel, e));
        }
    }
}

#[async_trait]
impl KernelClient for ZmqKernelClient {
    async fn start_channels(&mut self, deadline: Instant) -> Result<(), ProbeError> {
        let endpoint = self.endpoint(ChannelKind::Shell);
        self.shell = Some(connect_channel(ChannelKind::Shell, endpoint, deadline).await?);

        let endpoint = self.endpoint(ChannelKind::Control);
        self.control = Some(connect_channel(ChannelKind::Control, endpoint, deadline).await?);

        let endpoint = self.endpoint(ChannelKind::IoPub);
        let mut iopub: SubSocket =
            connect_channel(ChannelKind::IoPub, endpoint.clone(), deadline).await?;
        iopub
            .subscribe("")
            .await
            .map_err(|e| ProbeError::ChannelStart {
                channel: ChannelKind::IoPub,
                endpoint,
                reason: e.to_string(),
            })?;
        self.iopub = Some(iopub);

        let endpoint = self.endpoint(ChannelKind::Heartbeat);
        self.heartbeat = Some(connect_channel(ChannelKind::Heartbeat, endpoint, deadline).await?);
        Ok(())
    }

    fn channel_status(&self) -> Vec<(ChannelKind, bool)> {
        vec![
            (ChannelKind::Shell, self.shell.is_some()),
            (ChannelKind::IoPub, self.iopub.is_some()),
            (ChannelKind::Control, self.control.is_some()),
            (ChannelKind::Heartbeat, self.heartbeat.is_some()),
        ]
    }

    async fn send_shell(&mut self, message: &Message) -> Result<(), ProbeError> {
        let send_error = |reason: String| ProbeError::Send {
            channel: ChannelKind::Shell,
            msg_type: message.msg_type().to_string(),
            reason,
        };

        let frames = message.to_frames(&self.signer)?;
        let outgoing = ZmqMessage::try_from(frames).map_err(|e| send_error(e.to_string()))?;
        let shell = self
            .shell
            .as_mut()
            .ok_or(ProbeError::NotStarted(ChannelKind::Shell))?;
        shell
            .send(outgoing)
            .await
            .map_err(|e| send_error(e.to_string()))
    }

    async fn recv_shell(&mut self) -> Result<Message, ProbeError> {
        let shell = self
            .shell
            .as_mut()
            .ok_or(ProbeError::NotStarted(ChannelKind::Shell))?;
        let incoming = shell.recv().await.map_err(|e| ProbeError::Recv {
            channel: ChannelKind::Shell,
            reason: e.to_string(),
        })?;
        Ok(Message::from_frames(incoming.into_vec(), &self.signer)?)
    }

    async fn ping_heartbeat(&mut self, timeout: Duration) -> bool {
        let Some(heartbeat) = self.heartbeat.as_mut() else {
            return false;
        };

        let exchange = async {
            heartbeat
                .send(ZmqMessage::from(Bytes::from_static(HEARTBEAT_PING)))
                .await?;
            heartbeat.recv().await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(echo)) => echo.get(0).map(|frame| &frame[..] == HEARTBEAT_PING).unwrap_or(false),
            Ok(Err(e)) => {
                debug!("Heartbeat failed: {}", e);
                false
            }
            Err(_) => false,
        }
    }

    async fn stop_channels(&mut self) -> Result<(), ProbeError> {
        let mut errors = Vec::new();
        close_socket(self.shell.take(), ChannelKind::Shell, &mut errors).await;
        close_socket(self.control.take(), ChannelKind::Control, &mut errors).await;
        close_socket(self.iopub.take(), ChannelKind::IoPub, &mut errors).await;
        close_socket(self.heartbeat.take(), ChannelKind::Heartbeat, &mut errors).await;

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::Teardown { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_ping_shared::Transport;

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            transport: Transport::Tcp,
            ip: "127.0.0.1".to_string(),
            shell_port: 50001,
            iopub_port: 50002,
            stdin_port: 50003,
            control_port: 50004,
            hb_port: 50005,
            key: "secret".to_string(),
            signature_scheme: "hmac-sha256".to_string(),
            kernel_name: None,
        }
    }

    #[test]
    fn test_host_override_applies_to_every_channel() {
        let client = ZmqKernelClient::new(info(), Some("kernel.internal".to_string())).unwrap();
        assert_eq!(
            client.endpoint(ChannelKind::Shell),
            "tcp://kernel.internal:50001"
        );
        assert_eq!(
            client.endpoint(ChannelKind::Heartbeat),
            "tcp://kernel.internal:50005"
        );
    }

    #[test]
    fn test_channels_closed_before_start() {
        let client = ZmqKernelClient::new(info(), None).unwrap();
        assert!(client.channel_status().iter().all(|(_, alive)| !alive));
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let bad = ConnectionInfo {
            signature_scheme: "hmac-sha512".to_string(),
            ..info()
        };
        assert!(matches!(
            ZmqKernelClient::new(bad, None),
            Err(ProbeError::Wire(_))
        ));
    }

    #[tokio::test]
    async fn test_send_before_start() {
        let mut client = ZmqKernelClient::new(info(), None).unwrap();
        let request = kernel_ping_shared::Session::new("tester").kernel_info_request();
        assert!(matches!(
            client.send_shell(&request).await,
            Err(ProbeError::NotStarted(ChannelKind::Shell))
        ));
        assert!(client.stop_channels().await.is_ok());
    }
}

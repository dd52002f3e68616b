/// Transport seam for the push channel and the TCP implementation
use super::protocol::{read_frame, write_frame, ClientFrame, ServerFrame, PROTOCOL_VERSION};
use crate::error::{Result, SyncError};
use crate::session::SessionCredential;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

/// An established, authenticated push connection.
///
/// `recv` must be cancel safe: the connection loop races it against outbound
/// traffic and keepalive ticks.
#[async_trait]
pub trait PushLink: Send {
    async fn send(&mut self, frame: ClientFrame) -> Result<()>;

    /// Next server frame. `Ok(None)` once the server closed the channel.
    /// A payload that fails to decode is reported as `SyncError::Serialization`
    /// and does not end the link.
    async fn recv(&mut self) -> Result<Option<ServerFrame>>;
}

/// Opens push links bound to a credential
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Connect and complete the handshake. Dropping the returned link closes it.
    async fn connect(&self, credential: &SessionCredential) -> Result<Box<dyn PushLink>>;
}

/// Push transport over a plain TCP stream
#[derive(Debug, Clone)]
pub struct TcpPushTransport {
    addr: String,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl TcpPushTransport {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            handshake_timeout,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.push_addr.clone(),
            config.connection_timeout,
            config.handshake_timeout,
        )
    }

    async fn handshake(&self, stream: &mut TcpStream, credential: &SessionCredential) -> Result<String> {
        let hello = ClientFrame::Handshake {
            token: credential.token().to_string(),
            protocol_version: PROTOCOL_VERSION,
        };
        write_frame(stream, &hello).await?;

        let frame = timeout(self.handshake_timeout, read_frame(stream))
            .await
            .map_err(|_| SyncError::Timeout("Handshake ack timeout".to_string()))??
            .ok_or_else(|| SyncError::Connection("Closed during handshake".to_string()))?;

        let reply: ServerFrame = frame
            .decode()
            .map_err(|e| SyncError::Protocol(format!("Invalid handshake reply: {}", e)))?;

        match reply {
            ServerFrame::HandshakeAck {
                user_id,
                protocol_version,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(SyncError::Protocol(format!(
                        "Protocol version mismatch: expected {}, got {}",
                        PROTOCOL_VERSION, protocol_version
                    )));
                }
                Ok(user_id)
            }
            ServerFrame::HandshakeRejected { reason } => Err(SyncError::Handshake(reason)),
            other => Err(SyncError::Protocol(format!(
                "Expected handshake ack, got {}",
                other.event_name()
            ))),
        }
    }
}

#[async_trait]
impl PushTransport for TcpPushTransport {
    async fn connect(&self, credential: &SessionCredential) -> Result<Box<dyn PushLink>> {
        debug!("Connecting push channel to {}", self.addr);
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SyncError::Timeout(format!("Connect to {} timed out", self.addr)))?
            .map_err(|e| SyncError::Connection(format!("{}: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;

        let user_id = self.handshake(&mut stream, credential).await?;
        info!("Push channel authenticated as {} ({})", user_id, credential);

        let (mut reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(64);
        let reader_task = tokio::spawn(async move {
            loop {
                let item = match read_frame(&mut reader).await {
                    Ok(Some(frame)) => frame.decode::<ServerFrame>(),
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(TcpPushLink {
            writer,
            inbound: rx,
            reader_task,
        }))
    }
}

/// Live TCP link. Frames are read by a background task so `recv` only
/// waits on a channel.
struct TcpPushLink {
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Result<ServerFrame>>,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl PushLink for TcpPushLink {
    async fn send(&mut self, frame: ClientFrame) -> Result<()> {
        write_frame(&mut self.writer, &frame).await
    }

    async fn recv(&mut self) -> Result<Option<ServerFrame>> {
        match self.inbound.recv().await {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for TcpPushLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Push channel protocol: tagged JSON frames behind a length prefix
use crate::error::{Result, SyncError};
use crate::model::{Message, Notification};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Upper bound for a single frame body
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Frames the client sends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ClientFrame {
    /// First frame on a fresh connection, carries the session credential
    #[serde(rename = "handshake")]
    Handshake { token: String, protocol_version: u8 },

    #[serde(rename = "send_message")]
    SendMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
    },

    #[serde(rename = "typing_start")]
    TypingStart {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    #[serde(rename = "typing_stop")]
    TypingStop {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// Keepalive
    #[serde(rename = "ping")]
    Ping,
}

impl ClientFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientFrame::Handshake { .. } => "handshake",
            ClientFrame::SendMessage { .. } => "send_message",
            ClientFrame::TypingStart { .. } => "typing_start",
            ClientFrame::TypingStop { .. } => "typing_stop",
            ClientFrame::Ping => "ping",
        }
    }
}

// Never print the handshake token
impl fmt::Display for ClientFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientFrame({})", self.event_name())
    }
}

/// Typing indicator change for one user in one conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

/// Frames the server sends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ServerFrame {
    #[serde(rename = "handshake_ack")]
    HandshakeAck { user_id: String, protocol_version: u8 },

    #[serde(rename = "handshake_rejected")]
    HandshakeRejected { reason: String },

    #[serde(rename = "new_message")]
    NewMessage(Message),

    #[serde(rename = "new_notification")]
    NewNotification(Notification),

    #[serde(rename = "user_typing")]
    UserTyping(TypingUpdate),

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "error")]
    Error { message: String },

    /// Server is closing the channel
    #[serde(rename = "close")]
    Close { reason: String },
}

impl ServerFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerFrame::HandshakeAck { .. } => "handshake_ack",
            ServerFrame::HandshakeRejected { .. } => "handshake_rejected",
            ServerFrame::NewMessage(_) => "new_message",
            ServerFrame::NewNotification(_) => "new_notification",
            ServerFrame::UserTyping(_) => "user_typing",
            ServerFrame::Pong => "pong",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Close { .. } => "close",
        }
    }

    /// Cache-relevant payload of this frame, if any
    pub fn into_event(self) -> Option<InboundEvent> {
        match self {
            ServerFrame::NewMessage(message) => Some(InboundEvent::MessageCreated(message)),
            ServerFrame::NewNotification(notification) => {
                Some(InboundEvent::NotificationCreated(notification))
            }
            ServerFrame::UserTyping(update) => Some(InboundEvent::TypingChanged(update)),
            _ => None,
        }
    }
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerFrame({})", self.event_name())
    }
}

/// A classified push payload, handed to the dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    MessageCreated(Message),
    NotificationCreated(Notification),
    TypingChanged(TypingUpdate),
}

/// Length-prefixed frame: 4-byte big-endian length followed by a JSON body
#[derive(Debug)]
pub struct Frame {
    pub length: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn encode<T: Serialize>(message: &T) -> Result<Self> {
        let payload = serde_json::to_vec(message)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(SyncError::Protocol(format!(
                "Frame of {} bytes exceeds limit",
                payload.len()
            )));
        }
        Ok(Self {
            length: payload.len() as u32,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.payload.len());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Write one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = Frame::encode(message)?;
    writer.write_all(&frame.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body. `Ok(None)` when the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes(len_buf) as usize;
    if length > MAX_FRAME_LEN {
        return Err(SyncError::Protocol(format!(
            "Incoming frame of {} bytes exceeds limit",
            length
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Frame {
        length: length as u32,
        payload,
    }))
}

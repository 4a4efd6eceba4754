//! Networking primitives.
//!
//! Goals:
//! - Provide the entity replication messages exchanged by clients and the relay.
//! - Provide a reliable, ordered, length-prefixed JSON channel over TCP.
//! - Keep wire arrays loose (`Vec<f32>`) so malformed payloads can be
//!   detected and dropped instead of failing deserialization of the frame.

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::math::{Quat, Vec3};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 2;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client (the owner / network id of an entity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Entity id, unique per world.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Fresh id for a locally spawned entity. Clients spawn without asking the
    /// server, so ids are drawn at random from the full 64-bit space.
    pub fn random() -> Self {
        EntityId(rand::random())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Who controls an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDescriptor {
    pub id: String,
    pub name: String,
    /// Avatar asset url. `None` selects the default avatar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    Welcome {
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },

    // ─── Entity replication ───
    EntityAdded(EntityAdded),
    EntityModified(EntityModified),
    EntityRemoved {
        id: EntityId,
    },

    // ─── Chat ───
    ChatAdded(ChatMessage),

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Full entity state, sent once when an entity appears.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityAdded {
    pub id: EntityId,
    pub owner: ClientId,
    pub position: Vec<f32>,
    pub quaternion: Vec<f32>,
    pub user: UserDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emote: Option<i32>,
}

impl EntityAdded {
    pub fn new(
        id: EntityId,
        owner: ClientId,
        position: Vec3,
        quaternion: Quat,
        user: UserDescriptor,
    ) -> Self {
        Self {
            id,
            owner,
            position: position.to_array().to_vec(),
            quaternion: quaternion.to_array().to_vec(),
            user,
            emote: None,
        }
    }

    /// Checks array arity and finiteness.
    pub fn validate(&self) -> Result<Spawn, WireError> {
        Ok(Spawn {
            position: Vec3::from_slice(&self.position).ok_or(WireError::InvalidVector {
                field: "position",
                len: self.position.len(),
            })?,
            quaternion: Quat::from_slice(&self.quaternion).ok_or(
                WireError::InvalidQuaternion {
                    field: "quaternion",
                    len: self.quaternion.len(),
                },
            )?,
        })
    }
}

/// Validated transform of an [`EntityAdded`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spawn {
    pub position: Vec3,
    pub quaternion: Quat,
}

/// Partial entity patch. Only present keys are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityModified {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserDescriptor>,
}

impl EntityModified {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_position(mut self, p: Vec3) -> Self {
        self.p = Some(p.to_array().to_vec());
        self
    }

    pub fn with_quaternion(mut self, q: Quat) -> Self {
        self.q = Some(q.to_array().to_vec());
        self
    }

    pub fn with_emote(mut self, e: i32) -> Self {
        self.e = Some(e);
        self
    }

    pub fn with_user(mut self, user: UserDescriptor) -> Self {
        self.user = Some(user);
        self
    }

    /// True if the patch carries no fields.
    pub fn is_empty(&self) -> bool {
        self.p.is_none() && self.q.is_none() && self.e.is_none() && self.user.is_none()
    }

    /// Validates every present field before anything is applied, so a bad
    /// field drops the whole patch.
    pub fn validate(&self) -> Result<Patch, WireError> {
        let position = match &self.p {
            Some(p) => Some(Vec3::from_slice(p).ok_or(WireError::InvalidVector {
                field: "p",
                len: p.len(),
            })?),
            None => None,
        };
        let quaternion = match &self.q {
            Some(q) => Some(Quat::from_slice(q).ok_or(WireError::InvalidQuaternion {
                field: "q",
                len: q.len(),
            })?),
            None => None,
        };
        Ok(Patch {
            position,
            quaternion,
            emote: self.e,
            user: self.user.clone(),
        })
    }
}

/// Validated contents of an [`EntityModified`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub position: Option<Vec3>,
    pub quaternion: Option<Quat>,
    pub emote: Option<i32>,
    pub user: Option<UserDescriptor>,
}

/// Chat line broadcast to every client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityId>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(from: impl Into<String>, entity: Option<EntityId>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            entity,
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Malformed or misaddressed message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    #[error("field `{field}` must be 3 finite floats, got {len} values")]
    InvalidVector { field: &'static str, len: usize },
    #[error("field `{field}` must be 4 finite floats forming a rotation, got {len} values")]
    InvalidQuaternion { field: &'static str, len: usize },
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),
}

/// Outbound half of a message channel.
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()>;
}

/// Inbound half of a message channel. `Ok(None)` means the peer closed.
#[async_trait]
pub trait MessageSource: Send {
    async fn recv(&mut self) -> anyhow::Result<Option<NetMsg>>;
}

fn frame(msg: &NetMsg) -> anyhow::Result<BytesMut> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    if payload.len() > MAX_FRAME_LEN {
        anyhow::bail!(
            "outbound frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
            payload.len()
        );
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> anyhow::Result<Option<NetMsg>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("tcp read len"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}");
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(Some(msg))
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let buf = frame(msg)?;
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    /// Receives one message; errors if the peer closed.
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream)
            .await?
            .context("connection closed")
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits the connection so reading and writing can live in separate tasks.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (FrameReader { read }, FrameWriter { write })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    read: OwnedReadHalf,
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    write: OwnedWriteHalf,
}

#[async_trait]
impl MessageSource for FrameReader {
    async fn recv(&mut self) -> anyhow::Result<Option<NetMsg>> {
        read_frame(&mut self.read).await
    }
}

#[async_trait]
impl MessageSink for FrameWriter {
    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let buf = frame(msg)?;
        self.write.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_outbound_frame_is_refused() {
        let small = NetMsg::ChatAdded(ChatMessage::new("Ada", None, "hi"));
        let buf = frame(&small).unwrap();
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len + 4, buf.len());

        let huge = NetMsg::ChatAdded(ChatMessage::new("Ada", None, "x".repeat(MAX_FRAME_LEN)));
        let err = frame(&huge).unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn modified_omits_absent_keys() {
        let msg = NetMsg::EntityModified(EntityModified::new(EntityId(7)).with_emote(3));
        let json = String::from_utf8(encode_to_bytes(&msg).unwrap().to_vec()).unwrap();
        assert!(json.contains("\"entityModified\""));
        assert!(json.contains("\"e\":3"));
        assert!(!json.contains("\"p\""));
        assert!(!json.contains("\"q\""));
    }

    #[test]
    fn modified_parses_partial_json() {
        let raw = br#"{"type":"entityModified","data":{"id":5,"q":[0,0,0,1]}}"#;
        let NetMsg::EntityModified(m) = decode_from_bytes(raw).unwrap() else {
            panic!("expected entityModified");
        };
        assert_eq!(m.id, EntityId(5));
        assert!(m.p.is_none());
        let patch = m.validate().unwrap();
        assert_eq!(patch.quaternion, Some(Quat::IDENTITY));
    }

    #[test]
    fn bad_arity_rejects_whole_patch() {
        let mut m = EntityModified::new(EntityId(1)).with_emote(2);
        m.p = Some(vec![1.0, 2.0]);
        assert_eq!(
            m.validate(),
            Err(WireError::InvalidVector { field: "p", len: 2 })
        );
    }

    #[test]
    fn added_validates_quaternion() {
        let user = UserDescriptor {
            id: "u1".into(),
            name: "Ada".into(),
            avatar: None,
        };
        let mut added = EntityAdded::new(
            EntityId(1),
            ClientId(1),
            Vec3::new(1.0, 2.0, 3.0),
            Quat::IDENTITY,
            user,
        );
        assert!(added.validate().is_ok());
        added.quaternion.push(0.0);
        assert!(matches!(
            added.validate(),
            Err(WireError::InvalidQuaternion { len: 5, .. })
        ));
    }
}

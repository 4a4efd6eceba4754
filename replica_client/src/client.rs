//! Network client.
//!
//! Connects a [`ClientWorld`] to the relay. A reader task forwards frames from
//! the socket into a channel that is drained only at the start of a world
//! frame; outbound messages produced by the frame are written afterwards.
//! The simulation itself never awaits the socket.

use std::net::SocketAddr;

use anyhow::Context;
use replica_shared::{
    config::WorldConfig,
    net::{ClientId, FrameWriter, MessageSink, MessageSource, NetMsg, ReliableConn, PROTOCOL_VERSION},
    render::SceneGraph,
    resources::AssetLoader,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::world::ClientWorld;

/// Inbound messages buffered between frames.
const INBOUND_CAPACITY: usize = 1024;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Handshake done, relay reachable.
    Connected,
    /// The relay closed the connection or it failed.
    Disconnected,
}

/// A world wired to a relay connection.
pub struct ReplicaClient<A: AssetLoader, S: SceneGraph> {
    pub client_id: ClientId,
    state: ClientState,
    world: ClientWorld<A, S>,
    inbound: mpsc::Receiver<NetMsg>,
    writer: FrameWriter,
    reader: JoinHandle<()>,
}

impl<A: AssetLoader, S: SceneGraph> ReplicaClient<A, S> {
    /// Connects to the relay and performs the handshake.
    pub async fn connect(cfg: WorldConfig, assets: A, scene: S) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %addr, "Connecting to relay");

        let mut conn = ReliableConn::connect(addr).await.context("tcp connect")?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
        })
        .await?;

        let client_id = match conn.recv().await? {
            NetMsg::Welcome { client_id } => client_id,
            other => anyhow::bail!("expected welcome, got {other:?}"),
        };
        info!(client_id = client_id.0, "Connected to relay");

        let (mut source, writer) = conn.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(Some(msg)) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Relay connection error");
                        break;
                    }
                }
            }
        });

        let mut world = ClientWorld::new(cfg, assets, scene);
        world.set_client_id(client_id);

        Ok(Self {
            client_id,
            state: ClientState::Connected,
            world,
            inbound,
            writer,
            reader,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn world(&self) -> &ClientWorld<A, S> {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut ClientWorld<A, S> {
        &mut self.world
    }

    /// Queues received messages, runs one frame and sends what it produced.
    pub async fn tick(&mut self, dt: f32) -> anyhow::Result<()> {
        loop {
            match self.inbound.try_recv() {
                Ok(msg) => self.world.enqueue(msg),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if self.state == ClientState::Connected {
                        info!("Disconnected from relay");
                        self.state = ClientState::Disconnected;
                        self.world.enqueue(NetMsg::Disconnect {
                            reason: "connection closed".to_string(),
                        });
                    }
                    break;
                }
            }
        }

        self.world.frame(dt);
        self.flush().await
    }

    /// Writes pending outbound messages.
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        let outbound = self.world.take_outbound();
        if self.state == ClientState::Disconnected {
            if !outbound.is_empty() {
                debug!(dropped = outbound.len(), "Not connected, dropping outbound");
            }
            return Ok(());
        }
        for msg in &outbound {
            self.writer.send(msg).await?;
        }
        Ok(())
    }

    /// Despawns the local player, tells the relay and closes the connection.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.world.despawn_local();
        self.flush().await?;
        if self.state == ClientState::Connected {
            self.writer
                .send(&NetMsg::Disconnect {
                    reason: "client quit".to_string(),
                })
                .await?;
        }
        self.reader.abort();
        Ok(())
    }
}

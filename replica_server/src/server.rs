//! Relay server.
//!
//! Clients own the entities they spawn; the relay only validates, records and
//! forwards. Every connection gets a reader task and a writer task. Readers
//! feed a single hub task that owns the [`EntityRegistry`] and the peer list,
//! so all routing decisions happen in one place and in arrival order.
//!
//! Routing rules:
//! - a new client is sent an `entityAdded` for every live entity,
//! - `entityAdded`, `entityModified`, `entityRemoved` and chat go to every
//!   client except the sender,
//! - when a client leaves, its entities are removed for everyone else.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use anyhow::Context;
use replica_shared::{
    config::WorldConfig,
    net::{
        ClientId, MessageSink, MessageSource, NetMsg, ReliableConn, ReliableListener,
        PROTOCOL_VERSION,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::EntityRegistry;

/// What connection tasks report to the hub.
#[derive(Debug)]
pub enum HubEvent {
    Joined {
        id: ClientId,
        tx: mpsc::UnboundedSender<NetMsg>,
    },
    Message {
        from: ClientId,
        msg: NetMsg,
    },
    Left {
        id: ClientId,
    },
}

/// Routing state. Owned by one task; every method runs to completion without
/// awaiting.
#[derive(Debug, Default)]
pub struct Hub {
    registry: EntityRegistry,
    peers: HashMap<ClientId, mpsc::UnboundedSender<NetMsg>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Joined { id, tx } => {
                let snapshot = self.registry.snapshot();
                debug!(client_id = id.0, entities = snapshot.len(), "Sending world state");
                for added in snapshot {
                    if tx.send(NetMsg::EntityAdded(added)).is_err() {
                        debug!(client_id = id.0, "Peer writer gone before world state was sent");
                        break;
                    }
                }
                self.peers.insert(id, tx);
                info!(client_id = id.0, peers = self.peers.len(), "Client joined");
            }
            HubEvent::Message { from, msg } => self.route(from, msg),
            HubEvent::Left { id } => self.leave(id),
        }
    }

    fn route(&mut self, from: ClientId, msg: NetMsg) {
        let forward = match msg {
            NetMsg::EntityAdded(added) => match self.registry.add(from, added) {
                Ok(added) => {
                    info!(client_id = from.0, id = %added.id, name = %added.user.name, "Entity added");
                    NetMsg::EntityAdded(added)
                }
                Err(e) => {
                    warn!(client_id = from.0, error = %e, "Dropping entityAdded");
                    return;
                }
            },
            NetMsg::EntityModified(modified) => {
                if let Err(e) = self.registry.modify(from, &modified) {
                    warn!(client_id = from.0, id = %modified.id, error = %e, "Dropping entityModified");
                    return;
                }
                NetMsg::EntityModified(modified)
            }
            NetMsg::EntityRemoved { id } => {
                if let Err(e) = self.registry.remove(from, id) {
                    warn!(client_id = from.0, %id, error = %e, "Dropping entityRemoved");
                    return;
                }
                info!(client_id = from.0, %id, "Entity removed");
                NetMsg::EntityRemoved { id }
            }
            NetMsg::ChatAdded(chat) => {
                debug!(client_id = from.0, from = %chat.from, "Chat");
                NetMsg::ChatAdded(chat)
            }
            NetMsg::Disconnect { .. } => {
                self.leave(from);
                return;
            }
            other @ (NetMsg::Hello { .. } | NetMsg::Welcome { .. }) => {
                warn!(client_id = from.0, msg = ?other, "Unexpected handshake message");
                return;
            }
        };
        self.broadcast(Some(from), &forward);
    }

    fn leave(&mut self, id: ClientId) {
        if self.peers.remove(&id).is_none() {
            return;
        }
        let removed = self.registry.remove_owned_by(id);
        info!(client_id = id.0, entities = removed.len(), "Client left");
        for entity in removed {
            self.broadcast(None, &NetMsg::EntityRemoved { id: entity });
        }
    }

    fn broadcast(&self, except: Option<ClientId>, msg: &NetMsg) {
        for (id, tx) in &self.peers {
            if Some(*id) == except {
                continue;
            }
            if tx.send(msg.clone()).is_err() {
                debug!(client_id = id.0, "Peer writer gone");
            }
        }
    }
}

/// Relay server.
pub struct RelayServer {
    pub cfg: WorldConfig,
    tcp: ReliableListener,
}

impl RelayServer {
    /// Binds the listener at `cfg.server_addr`.
    pub async fn bind(cfg: WorldConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        Ok(Self { cfg, tcp })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accepts connections and relays until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let (hub_tx, mut hub_rx) = mpsc::unbounded_channel::<HubEvent>();
        tokio::spawn(async move {
            let mut hub = Hub::new();
            while let Some(event) = hub_rx.recv().await {
                hub.handle(event);
            }
        });

        info!(addr = %self.local_addr()?, "Relay listening");
        loop {
            let (conn, peer) = self.tcp.accept().await?;
            let hub_tx = hub_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = serve(conn, peer, hub_tx).await {
                    warn!(%peer, error = %e, "Connection ended with error");
                }
            });
        }
    }
}

async fn serve(
    mut conn: ReliableConn,
    peer: SocketAddr,
    hub: mpsc::UnboundedSender<HubEvent>,
) -> anyhow::Result<()> {
    match conn.recv().await? {
        NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {}
        NetMsg::Hello { protocol } => {
            conn.send(&NetMsg::Disconnect {
                reason: format!("protocol {protocol} unsupported, expected {PROTOCOL_VERSION}"),
            })
            .await?;
            anyhow::bail!("client protocol {protocol} rejected");
        }
        other => anyhow::bail!("unexpected handshake msg: {other:?}"),
    }

    let id = ClientId::new_unique();
    conn.send(&NetMsg::Welcome { client_id: id }).await?;
    info!(client_id = id.0, %peer, "Client connected");

    let (mut reader, mut writer) = conn.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.send(HubEvent::Joined { id, tx })
        .context("hub stopped")?;

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.send(&msg).await {
                debug!(client_id = id.0, error = %e, "Write failed");
                break;
            }
        }
    });

    let result = loop {
        match reader.recv().await {
            Ok(Some(NetMsg::Disconnect { reason })) => {
                info!(client_id = id.0, %reason, "Client disconnected");
                break Ok(());
            }
            Ok(Some(msg)) => {
                if hub.send(HubEvent::Message { from: id, msg }).is_err() {
                    break Err(anyhow::anyhow!("hub stopped"));
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let _ = hub.send(HubEvent::Left { id });
    result
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral() -> anyhow::Result<(RelayServer, WorldConfig)> {
    let cfg = WorldConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..Default::default()
    };
    let mut server = RelayServer::bind(cfg).await?;
    server.cfg.server_addr = server.local_addr()?.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use replica_shared::{
        math::{Quat, Vec3},
        net::{ChatMessage, EntityAdded, EntityId, EntityModified, UserDescriptor},
    };

    use super::*;

    fn join(hub: &mut Hub, id: u32) -> mpsc::UnboundedReceiver<NetMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.handle(HubEvent::Joined {
            id: ClientId(id),
            tx,
        });
        rx
    }

    fn send(hub: &mut Hub, from: u32, msg: NetMsg) {
        hub.handle(HubEvent::Message {
            from: ClientId(from),
            msg,
        });
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<NetMsg>) -> Vec<NetMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn added(id: u64) -> EntityAdded {
        EntityAdded::new(
            EntityId(id),
            ClientId(0),
            Vec3::ZERO,
            Quat::IDENTITY,
            UserDescriptor {
                id: "u".into(),
                name: "Ada".into(),
                avatar: None,
            },
        )
    }

    #[test]
    fn forwards_to_everyone_but_sender() {
        let mut hub = Hub::new();
        let mut a = join(&mut hub, 1);
        let mut b = join(&mut hub, 2);

        send(&mut hub, 1, NetMsg::EntityAdded(added(10)));
        send(
            &mut hub,
            1,
            NetMsg::EntityModified(EntityModified::new(EntityId(10)).with_emote(4)),
        );
        send(
            &mut hub,
            1,
            NetMsg::ChatAdded(ChatMessage::new("Ada", Some(EntityId(10)), "hi")),
        );

        assert!(drain(&mut a).is_empty());
        let got = drain(&mut b);
        assert_eq!(got.len(), 3);
        assert!(matches!(&got[0], NetMsg::EntityAdded(e) if e.owner == ClientId(1)));
        assert!(matches!(&got[1], NetMsg::EntityModified(m) if m.e == Some(4)));
    }

    #[test]
    fn late_joiner_gets_current_state() {
        let mut hub = Hub::new();
        let _a = join(&mut hub, 1);
        send(&mut hub, 1, NetMsg::EntityAdded(added(10)));
        send(
            &mut hub,
            1,
            NetMsg::EntityModified(
                EntityModified::new(EntityId(10)).with_position(Vec3::new(3.0, 0.0, 0.0)),
            ),
        );

        let mut c = join(&mut hub, 3);
        let got = drain(&mut c);
        assert_eq!(got.len(), 1);
        let NetMsg::EntityAdded(e) = &got[0] else {
            panic!("expected entityAdded");
        };
        assert_eq!(e.position, vec![3.0, 0.0, 0.0]);
    }

    #[test]
    fn malformed_and_foreign_patches_are_not_forwarded() {
        let mut hub = Hub::new();
        let _a = join(&mut hub, 1);
        let mut b = join(&mut hub, 2);
        send(&mut hub, 1, NetMsg::EntityAdded(added(10)));
        drain(&mut b);

        let mut bad = EntityModified::new(EntityId(10));
        bad.p = Some(vec![0.0; 2]);
        send(&mut hub, 1, NetMsg::EntityModified(bad));
        send(&mut hub, 1, NetMsg::EntityRemoved { id: EntityId(77) });

        let mut c = join(&mut hub, 3);
        send(
            &mut hub,
            3,
            NetMsg::EntityModified(EntityModified::new(EntityId(10)).with_emote(1)),
        );
        assert!(drain(&mut b).is_empty());
        assert_eq!(drain(&mut c).len(), 1);
    }

    #[test]
    fn joiner_whose_writer_is_gone_does_not_stall_routing() {
        let mut hub = Hub::new();
        let _a = join(&mut hub, 1);
        let mut b = join(&mut hub, 2);
        send(&mut hub, 1, NetMsg::EntityAdded(added(10)));
        send(&mut hub, 1, NetMsg::EntityAdded(added(11)));
        drain(&mut b);

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        hub.handle(HubEvent::Joined {
            id: ClientId(3),
            tx,
        });
        assert_eq!(hub.peer_count(), 3);
        send(
            &mut hub,
            1,
            NetMsg::EntityModified(EntityModified::new(EntityId(10)).with_emote(2)),
        );
        assert_eq!(drain(&mut b).len(), 1);

        hub.handle(HubEvent::Left { id: ClientId(3) });
        assert_eq!(hub.peer_count(), 2);
        assert_eq!(hub.registry().len(), 2);
    }

    #[test]
    fn leaving_removes_owned_entities() {
        let mut hub = Hub::new();
        let _a = join(&mut hub, 1);
        let mut b = join(&mut hub, 2);
        send(&mut hub, 1, NetMsg::EntityAdded(added(10)));
        drain(&mut b);

        hub.handle(HubEvent::Left { id: ClientId(1) });
        hub.handle(HubEvent::Left { id: ClientId(1) });
        assert_eq!(
            drain(&mut b),
            vec![NetMsg::EntityRemoved { id: EntityId(10) }]
        );
        assert!(hub.registry().is_empty());
        assert_eq!(hub.peer_count(), 1);
    }
}

//! Client world.
//!
//! Owns every replica, the local player, the input stack and the action
//! systems, and runs one outer loop iteration per [`ClientWorld::frame`]:
//!
//! 1. drain queued network messages,
//! 2. fixed ticks to catch up with wall-clock time,
//! 3. per-frame update (asset completions, interpolation, emotes, patches),
//! 4. late update (camera follows the local player).
//!
//! Messages never apply mid-update, so one frame sees one consistent set of
//! targets. Nothing in here blocks; a bad message or a missing asset is logged
//! and the loop carries on with the previous state.

use std::collections::{HashMap, VecDeque};

use replica_shared::{
    config::WorldConfig,
    event::{EventBus, PlayerView, WorldEvent},
    math::Vec3,
    net::{ChatMessage, ClientId, EntityAdded, EntityId, EntityModified, NetMsg, WireError},
    render::SceneGraph,
    resources::AssetLoader,
};
use tracing::{debug, info, trace, warn};

use crate::{
    controls::{ControlStack, InputEvent},
    double_jump::DoubleJump,
    player::LocalPlayer,
    replica::EntityReplica,
    services::Services,
};

/// Eye height the default camera sits at above the player's feet.
const CAMERA_HEIGHT: f32 = 1.6;

/// One client's view of the shared world.
pub struct ClientWorld<A: AssetLoader, S: SceneGraph> {
    cfg: WorldConfig,
    client_id: Option<ClientId>,
    replicas: HashMap<EntityId, EntityReplica>,
    local: Option<LocalPlayer>,
    controls: ControlStack,
    double_jump: DoubleJump,
    events: EventBus,
    assets: A,
    scene: S,
    inbound: VecDeque<NetMsg>,
    outbound: Vec<NetMsg>,
    accumulator: f32,
    frame: u64,
}

impl<A: AssetLoader, S: SceneGraph> ClientWorld<A, S> {
    pub fn new(cfg: WorldConfig, assets: A, scene: S) -> Self {
        let double_jump = DoubleJump::new(&cfg);
        Self {
            cfg,
            client_id: None,
            replicas: HashMap::new(),
            local: None,
            controls: ControlStack::new(),
            double_jump,
            events: EventBus::default(),
            assets,
            scene,
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            accumulator: 0.0,
            frame: 0,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.cfg
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Records the id the relay assigned to this connection.
    pub fn set_client_id(&mut self, client_id: ClientId) {
        if self.client_id.is_some_and(|id| id != client_id) {
            warn!(old = ?self.client_id, new = client_id.0, "Client id changed");
        }
        self.client_id = Some(client_id);
    }

    pub fn assets(&self) -> &A {
        &self.assets
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn controls(&self) -> &ControlStack {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut ControlStack {
        &mut self.controls
    }

    pub fn double_jump(&self) -> &DoubleJump {
        &self.double_jump
    }

    pub fn replica(&self, id: EntityId) -> Option<&EntityReplica> {
        self.replicas.get(&id)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn local(&self) -> Option<&LocalPlayer> {
        self.local.as_ref()
    }

    pub fn local_mut(&mut self) -> Option<&mut LocalPlayer> {
        self.local.as_mut()
    }

    /// Views of every player, local first.
    pub fn players(&self) -> Vec<PlayerView> {
        let mut views: Vec<PlayerView> = self.local.iter().map(LocalPlayer::view).collect();
        let mut remote: Vec<&EntityReplica> = self.replicas.values().collect();
        remote.sort_by_key(|r| r.id());
        views.extend(remote.into_iter().map(EntityReplica::view));
        views
    }

    /// Queues a message for the start of the next frame.
    pub fn enqueue(&mut self, msg: NetMsg) {
        self.inbound.push_back(msg);
    }

    /// Messages produced since the last call.
    pub fn take_outbound(&mut self) -> Vec<NetMsg> {
        std::mem::take(&mut self.outbound)
    }

    /// Drains application events.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        self.events.drain::<WorldEvent>()
    }

    /// Routes a raw input event through the binding stack.
    pub fn input(&mut self, event: &InputEvent) {
        if let Some(binding) = self.controls.dispatch(event) {
            trace!(?event, binding = binding.0, "Input consumed");
        }
    }

    /// Spawns the local player at `position` and queues its announcement.
    /// Fails until the relay has assigned a client id.
    pub fn spawn_local(&mut self, position: Vec3) -> anyhow::Result<EntityId> {
        if let Some(local) = &self.local {
            anyhow::bail!("local player {} already spawned", local.id());
        }
        let Some(owner) = self.client_id else {
            anyhow::bail!("cannot spawn the local player before the relay assigns a client id");
        };
        let mut services = Services::new(&mut self.assets, &mut self.scene);
        let (player, added) =
            LocalPlayer::spawn(&self.cfg, owner, position, &mut self.controls, &mut services);
        self.double_jump.start(&mut self.controls, &mut services);
        self.double_jump.set_physics_ready(true);

        let id = player.id();
        self.events.emit(WorldEvent::Enter {
            player: player.view(),
        });
        self.local = Some(player);
        self.outbound.push(added);
        Ok(id)
    }

    /// Removes the local player and queues its removal notice.
    pub fn despawn_local(&mut self) {
        let Some(player) = self.local.take() else {
            return;
        };
        self.double_jump.stop(&mut self.controls);
        self.double_jump.set_physics_ready(false);
        self.events.emit(WorldEvent::Leave {
            player: player.view(),
        });
        let mut services = Services::new(&mut self.assets, &mut self.scene);
        if let Some(msg) = player.despawn(&mut self.controls, &mut services) {
            self.outbound.push(msg);
        }
    }

    /// Teleports the local player.
    pub fn teleport_local(&mut self, position: Vec3) {
        if let Some(player) = self.local.as_mut() {
            let mut services = Services::new(&mut self.assets, &mut self.scene);
            player.teleport(position, &mut self.double_jump, &mut services);
        }
    }

    /// Says something as the local player.
    pub fn say(&mut self, text: &str) {
        let Some(player) = self.local.as_mut() else {
            warn!("Cannot chat without a local player");
            return;
        };
        let mut services = Services::new(&mut self.assets, &mut self.scene);
        player.chat(text, &mut services);
        let msg = ChatMessage::new(player.replica().user().name.clone(), Some(player.id()), text);
        self.events.emit(WorldEvent::Chat {
            message: msg.clone(),
        });
        self.outbound.push(NetMsg::ChatAdded(msg));
    }

    /// Full-state announcement of the local player, for late joiners.
    pub fn local_announcement(&self) -> Option<EntityAdded> {
        self.local.as_ref().map(LocalPlayer::to_added)
    }

    /// Runs one outer loop iteration of `dt` seconds.
    pub fn frame(&mut self, dt: f32) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.frame += 1;

        while let Some(msg) = self.inbound.pop_front() {
            self.handle(msg);
        }

        self.fixed(dt);
        self.update(dt);
        self.late_update();
    }

    fn fixed(&mut self, dt: f32) {
        let step = self.cfg.fixed_dt();
        self.accumulator += dt;
        let mut steps = 0;
        while self.accumulator >= step && steps < self.cfg.max_fixed_steps {
            if let Some(player) = self.local.as_mut() {
                player.fixed_update(step, &self.controls, &mut self.double_jump);
            }
            self.accumulator -= step;
            steps += 1;
        }
        if self.accumulator >= step {
            debug!(
                frame = self.frame,
                behind = self.accumulator,
                "Fixed tick fell behind, dropping backlog"
            );
            self.accumulator = 0.0;
        }
    }

    fn update(&mut self, dt: f32) {
        let mut services = Services::new(&mut self.assets, &mut self.scene);

        for event in services.assets.poll() {
            self.double_jump.on_asset(&event);
            if let Some(player) = self.local.as_mut() {
                player.on_asset(&event, &mut services);
            }
            for replica in self.replicas.values_mut() {
                replica.on_asset(&event, &mut services);
            }
        }

        for replica in self.replicas.values_mut() {
            replica.update(dt, &mut services);
        }

        self.double_jump.update(dt);
        if let Some(player) = self.local.as_mut() {
            if let Some(msg) = player.update(dt, &self.double_jump, &mut services) {
                self.outbound.push(msg);
            }
        }
    }

    fn late_update(&mut self) {
        if let Some(player) = &self.local {
            let eye = player.position() + Vec3::UP * CAMERA_HEIGHT;
            self.controls.follow(eye, player.quaternion());
        }
    }

    fn handle(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::Welcome { client_id } => {
                info!(client_id = client_id.0, "Welcomed by relay");
                self.set_client_id(client_id);
            }
            NetMsg::EntityAdded(added) => {
                let id = added.id;
                if let Err(e) = self.add(added) {
                    warn!(id = %id, error = %e, "Dropping entityAdded");
                }
            }
            NetMsg::EntityModified(modified) => {
                let id = modified.id;
                if let Err(e) = self.modify(modified) {
                    warn!(id = %id, error = %e, "Dropping entityModified");
                }
            }
            NetMsg::EntityRemoved { id } => {
                if let Err(e) = self.remove(id) {
                    warn!(id = %id, error = %e, "Dropping entityRemoved");
                }
            }
            NetMsg::ChatAdded(message) => self.chat(message),
            NetMsg::Disconnect { reason } => {
                info!(%reason, "Relay closed the session");
                self.clear_remote();
            }
            NetMsg::Hello { .. } => debug!("Ignoring hello on client"),
        }
    }

    fn is_local(&self, id: EntityId) -> bool {
        self.local.as_ref().is_some_and(|p| p.id() == id)
    }

    fn add(&mut self, added: EntityAdded) -> Result<(), WireError> {
        if self.replicas.contains_key(&added.id) || self.is_local(added.id) {
            return Err(WireError::DuplicateEntity(added.id));
        }
        let spawn = added.validate()?;
        let mut services = Services::new(&mut self.assets, &mut self.scene);
        let replica = EntityReplica::from_added(&added, spawn, &self.cfg, &mut services);
        self.events.emit(WorldEvent::Enter {
            player: replica.view(),
        });
        info!(id = %added.id, name = %added.user.name, "Player entered");
        self.replicas.insert(added.id, replica);
        Ok(())
    }

    fn modify(&mut self, modified: EntityModified) -> Result<(), WireError> {
        let Some(replica) = self.replicas.get_mut(&modified.id) else {
            return Err(WireError::UnknownEntity(modified.id));
        };
        let patch = modified.validate()?;
        let mut services = Services::new(&mut self.assets, &mut self.scene);
        replica.apply(patch, &mut services);
        Ok(())
    }

    fn remove(&mut self, id: EntityId) -> Result<(), WireError> {
        let Some(replica) = self.replicas.remove(&id) else {
            return Err(WireError::UnknownEntity(id));
        };
        self.events.emit(WorldEvent::Leave {
            player: replica.view(),
        });
        let mut services = Services::new(&mut self.assets, &mut self.scene);
        replica.destroy(false, &mut services);
        Ok(())
    }

    fn chat(&mut self, message: ChatMessage) {
        if let Some(id) = message.entity {
            if let Some(replica) = self.replicas.get_mut(&id) {
                let mut services = Services::new(&mut self.assets, &mut self.scene);
                replica.chat(&message.body, &mut services);
            }
        }
        self.events.emit(WorldEvent::Chat { message });
    }

    /// Destroys every remote replica, e.g. after losing the relay.
    pub fn clear_remote(&mut self) {
        let mut services = Services::new(&mut self.assets, &mut self.scene);
        for (_, replica) in self.replicas.drain() {
            self.events.emit(WorldEvent::Leave {
                player: replica.view(),
            });
            replica.destroy(false, &mut services);
        }
    }
}

impl<A: AssetLoader, S: SceneGraph> Drop for ClientWorld<A, S> {
    fn drop(&mut self) {
        self.despawn_local();
    }
}

//! Entity replica.
//!
//! Client-side copy of one player entity. Transforms are smoothed through
//! interpolation buffers, the emote drives an [`EmoteMachine`] and the user
//! descriptor selects the avatar. A replica owns its render node, its timers
//! and its in-flight asset requests; [`EntityReplica::destroy`] consumes it
//! and releases all of them.

use replica_shared::{
    config::WorldConfig,
    event::PlayerView,
    math::{Quat, Vec3},
    net::{ClientId, EntityAdded, EntityId, NetMsg, Patch, Spawn, UserDescriptor},
    render::{NodeId, Overlay},
    resources::{AssetEvent, AssetKind, RequestId, DEFAULT_AVATAR_URL},
};
use tracing::{debug, info, warn};

use crate::{
    emote::{Emote, EmoteMachine},
    interp::{LerpQuat, LerpVec3},
    services::Services,
};

/// Height assumed until the avatar reports its own.
const DEFAULT_AVATAR_HEIGHT: f32 = 1.8;
/// Gap between the top of the avatar and its overlay.
const OVERLAY_OFFSET: f32 = 0.2;

#[derive(Debug)]
struct AvatarSlot {
    /// Resolved url of the avatar shown or being loaded.
    url: String,
    pending: Option<RequestId>,
    height: f32,
}

#[derive(Debug)]
struct Bubble {
    text: String,
    left: f32,
}

/// One replicated player.
#[derive(Debug)]
pub struct EntityReplica {
    id: EntityId,
    owner: ClientId,
    user: UserDescriptor,
    position: LerpVec3,
    quaternion: LerpQuat,
    emote: EmoteMachine,
    node: NodeId,
    avatar: AvatarSlot,
    bubble: Option<Bubble>,
    bubble_secs: f32,
}

fn resolve_avatar(user: &UserDescriptor) -> &str {
    match user.avatar.as_deref() {
        Some(url) if !url.is_empty() => url,
        _ => DEFAULT_AVATAR_URL,
    }
}

impl EntityReplica {
    /// Materializes a replica from a validated `entityAdded`. The transform is
    /// snapped so the first rendered frame shows the sent values exactly.
    pub fn from_added(
        msg: &EntityAdded,
        spawn: Spawn,
        cfg: &WorldConfig,
        services: &mut Services<'_>,
    ) -> Self {
        let node = services.scene.create_node(&msg.user.name);
        services
            .scene
            .set_transform(node, spawn.position, spawn.quaternion);
        let emote = EmoteMachine::new(node, services);
        let mut replica = Self {
            id: msg.id,
            owner: msg.owner,
            user: msg.user.clone(),
            position: LerpVec3::new(spawn.position, cfg.network_rate),
            quaternion: LerpQuat::new(spawn.quaternion, cfg.network_rate),
            emote,
            node,
            avatar: AvatarSlot {
                url: String::new(),
                pending: None,
                height: DEFAULT_AVATAR_HEIGHT,
            },
            bubble: None,
            bubble_secs: cfg.chat_bubble_secs,
        };
        if let Some(e) = msg.emote {
            replica.emote.set(e, services);
        }
        replica.load_avatar(services);
        replica.show_overlay(services);
        debug!(id = %replica.id, owner = replica.owner.0, name = %replica.user.name, "Replica created");
        replica
    }

    /// The message that recreates this replica elsewhere.
    pub fn to_added(&self) -> EntityAdded {
        let mut msg = EntityAdded::new(
            self.id,
            self.owner,
            self.position.target(),
            self.quaternion.target(),
            self.user.clone(),
        );
        msg.emote = Some(self.emote.current().id());
        msg
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn owner(&self) -> ClientId {
        self.owner
    }

    pub fn user(&self) -> &UserDescriptor {
        &self.user
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Interpolated position as last rendered.
    pub fn position(&self) -> Vec3 {
        self.position.current()
    }

    /// Interpolated orientation as last rendered.
    pub fn quaternion(&self) -> Quat {
        self.quaternion.current()
    }

    pub fn target_position(&self) -> Vec3 {
        self.position.target()
    }

    pub fn target_quaternion(&self) -> Quat {
        self.quaternion.target()
    }

    pub fn emote(&self) -> Emote {
        self.emote.current()
    }

    /// Resolved avatar url.
    pub fn avatar_url(&self) -> &str {
        &self.avatar.url
    }

    /// Text of the chat bubble, while one is shown.
    pub fn bubble(&self) -> Option<&str> {
        self.bubble.as_ref().map(|b| b.text.as_str())
    }

    /// Applies a validated patch. Only present fields change.
    pub fn apply(&mut self, patch: Patch, services: &mut Services<'_>) {
        if let Some(p) = patch.position {
            self.position.push(p);
        }
        if let Some(q) = patch.quaternion {
            self.quaternion.push(q);
        }
        if let Some(e) = patch.emote {
            self.emote.set(e, services);
        }
        if let Some(user) = patch.user {
            self.set_user(user, services);
        }
    }

    /// Places the replica immediately, with no smoothing.
    pub fn snap(&mut self, position: Vec3, quaternion: Quat, services: &mut Services<'_>) {
        self.position.snap(position);
        self.quaternion.snap(quaternion);
        services.scene.set_transform(self.node, position, quaternion);
    }

    pub fn set_emote(&mut self, emote: Emote, services: &mut Services<'_>) {
        self.emote.set_emote(emote, services);
    }

    /// Plays `emote` for `secs` before reverting to idle. A later emote from
    /// the network replaces it.
    pub fn play_emote_for(&mut self, emote: Emote, secs: f32, services: &mut Services<'_>) {
        self.emote.play_for(emote, secs, services);
    }

    /// True while an emote revert or a chat bubble is counting down.
    pub fn has_timers(&self) -> bool {
        self.emote.has_timer() || self.bubble.is_some()
    }

    /// Replaces the user descriptor. The avatar is only refetched when its
    /// url actually changed.
    pub fn set_user(&mut self, user: UserDescriptor, services: &mut Services<'_>) {
        if user == self.user {
            return;
        }
        let renamed = user.name != self.user.name;
        self.user = user;
        if resolve_avatar(&self.user) != self.avatar.url {
            self.load_avatar(services);
        }
        if renamed {
            self.show_overlay(services);
        }
    }

    /// Shows a chat bubble, replacing any current one.
    pub fn chat(&mut self, text: &str, services: &mut Services<'_>) {
        self.bubble = Some(Bubble {
            text: text.to_string(),
            left: self.bubble_secs,
        });
        self.show_overlay(services);
    }

    /// Per-frame update: smoothing, emote timers and the chat bubble.
    pub fn update(&mut self, dt: f32, services: &mut Services<'_>) {
        let position = self.position.advance(dt);
        let quaternion = self.quaternion.advance(dt);
        services.scene.set_transform(self.node, position, quaternion);
        self.emote.update(dt, services);

        if let Some(bubble) = self.bubble.as_mut() {
            bubble.left -= dt.max(0.0);
            if bubble.left <= 0.0 {
                self.bubble = None;
                self.show_overlay(services);
            }
        }
    }

    /// Routes a finished load to the avatar slot or the emote machine.
    pub fn on_asset(&mut self, event: &AssetEvent, services: &mut Services<'_>) {
        if self.avatar.pending != Some(event.request) {
            self.emote.on_asset(event, services);
            return;
        }
        self.avatar.pending = None;
        match &event.result {
            Ok(asset) => {
                services.scene.attach_avatar(self.node, asset.handle);
                if let Some(height) = asset.height {
                    self.avatar.height = height;
                }
                self.show_overlay(services);
                self.emote.replay(services);
                debug!(id = %self.id, url = %event.url, "Avatar attached");
            }
            Err(e) if self.avatar.url != DEFAULT_AVATAR_URL => {
                warn!(id = %self.id, error = %e, "Avatar unavailable, using default");
                self.avatar.url = DEFAULT_AVATAR_URL.to_string();
                self.avatar.pending = Some(
                    services
                        .assets
                        .request(AssetKind::Avatar, DEFAULT_AVATAR_URL),
                );
            }
            Err(e) => {
                warn!(id = %self.id, error = %e, "Default avatar unavailable");
            }
        }
    }

    /// Read-only view for the application layer.
    pub fn view(&self) -> PlayerView {
        PlayerView {
            network_id: self.owner,
            entity_id: self.id,
            user_id: self.user.id.clone(),
            name: self.user.name.clone(),
            position: self.position.current(),
            quaternion: self.quaternion.current(),
        }
    }

    /// Releases the render node and cancels timers. Returns the removal
    /// notice to broadcast when the destruction originated locally.
    pub fn destroy(mut self, local: bool, services: &mut Services<'_>) -> Option<NetMsg> {
        self.emote.cancel_timer();
        self.bubble = None;
        self.avatar.pending = None;
        services.scene.release(self.node);
        info!(id = %self.id, name = %self.user.name, local, "Replica destroyed");
        local.then_some(NetMsg::EntityRemoved { id: self.id })
    }

    fn load_avatar(&mut self, services: &mut Services<'_>) {
        let url = resolve_avatar(&self.user).to_string();
        self.avatar.pending = Some(services.assets.request(AssetKind::Avatar, &url));
        self.avatar.url = url;
    }

    fn show_overlay(&self, services: &mut Services<'_>) {
        let overlay = match &self.bubble {
            Some(b) => Overlay::Bubble(b.text.clone()),
            None => Overlay::NameTag(self.user.name.clone()),
        };
        services
            .scene
            .set_overlay(self.node, overlay, self.avatar.height + OVERLAY_OFFSET);
    }
}

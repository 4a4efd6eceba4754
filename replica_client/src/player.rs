//! Local player.
//!
//! The locally controlled character. Input comes from a binding at player
//! priority, movement runs on the fixed tick against a [`CharacterBody`],
//! and the resulting transform and emote are shown through the player's own
//! [`EntityReplica`]. Changes are collected as dirty fields and flushed as a
//! single `entityModified` at most once per network interval.

use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use replica_shared::{
    config::WorldConfig,
    event::PlayerView,
    math::{Quat, Vec3},
    net::{ClientId, EntityAdded, EntityId, EntityModified, NetMsg, Spawn, UserDescriptor},
    physics::{CharacterBody, KinematicCapsule, PhysicsConfig},
    resources::AssetEvent,
};
use tracing::{debug, info};

use crate::{
    controls::{priority, ControlCallbacks, ControlHandle, ControlStack},
    double_jump::{DoubleJump, JUMP_CODE},
    emote::Emote,
    replica::EntityReplica,
    services::Services,
};

const FORWARD: &str = "KeyW";
const BACK: &str = "KeyS";
const LEFT: &str = "KeyA";
const RIGHT: &str = "KeyD";
const RUN: &str = "ShiftLeft";
const MOVE_CODES: [&str; 5] = [FORWARD, BACK, LEFT, RIGHT, RUN];

/// Radians of yaw per pointer unit.
const LOOK_SENSITIVITY: f32 = 0.004;
/// Horizontal speed under which the character counts as standing.
const MOVING_EPSILON: f32 = 0.1;

bitflags! {
    /// Fields changed since the last flush.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyFields: u8 {
        const POSITION = 1 << 0;
        const QUATERNION = 1 << 1;
        const EMOTE = 1 << 2;
        const USER = 1 << 3;
    }
}

/// State shared with the input binding.
#[derive(Debug, Default)]
struct Pad {
    jump: bool,
    yaw_delta: f32,
    grounded: bool,
}

/// The character this client drives.
pub struct LocalPlayer {
    replica: EntityReplica,
    body: KinematicCapsule,
    control: Option<ControlHandle>,
    pad: Arc<Mutex<Pad>>,
    yaw: f32,
    moving: bool,
    running: bool,
    walk_speed: f32,
    run_speed: f32,
    jump_speed: f32,
    /// Emote forced by the application, overriding locomotion.
    emote_override: Option<Emote>,
    dirty: DirtyFields,
    since_flush: f32,
    network_rate: f32,
    last: (Vec3, Quat, Emote),
}

impl LocalPlayer {
    /// Spawns the local character and returns it with the `entityAdded`
    /// announcing it.
    pub fn spawn(
        cfg: &WorldConfig,
        owner: ClientId,
        position: Vec3,
        controls: &mut ControlStack,
        services: &mut Services<'_>,
    ) -> (Self, NetMsg) {
        let user = UserDescriptor {
            id: format!("client-{}", owner.0),
            name: cfg.player_name.clone(),
            avatar: cfg.avatar_url(),
        };
        let added = EntityAdded::new(EntityId::random(), owner, position, Quat::IDENTITY, user);
        let spawn = Spawn {
            position,
            quaternion: Quat::IDENTITY,
        };
        let replica = EntityReplica::from_added(&added, spawn, cfg, services);

        let physics = PhysicsConfig {
            gravity: Vec3::new(0.0, cfg.gravity, 0.0),
            ..PhysicsConfig::default()
        };
        let body = KinematicCapsule::new(physics, position);
        let pad = Arc::new(Mutex::new(Pad {
            grounded: body.is_grounded(),
            ..Pad::default()
        }));

        let press_pad = pad.clone();
        let look_pad = pad.clone();
        let control = controls.bind(
            priority::PLAYER,
            ControlCallbacks::new()
                .on_press(move |code| {
                    if code == JUMP_CODE {
                        let Ok(mut pad) = press_pad.lock() else {
                            return false;
                        };
                        if pad.grounded {
                            pad.jump = true;
                            return true;
                        }
                        return false;
                    }
                    MOVE_CODES.contains(&code)
                })
                .on_pointer_move(move |delta| {
                    if let Ok(mut pad) = look_pad.lock() {
                        pad.yaw_delta += delta.x;
                    }
                    true
                }),
        );

        info!(id = %added.id, name = %cfg.player_name, "Local player spawned");
        let player = Self {
            replica,
            body,
            control: Some(control),
            pad,
            yaw: 0.0,
            moving: false,
            running: false,
            walk_speed: cfg.walk_speed,
            run_speed: cfg.run_speed,
            jump_speed: cfg.jump_speed,
            emote_override: None,
            dirty: DirtyFields::empty(),
            since_flush: 0.0,
            network_rate: cfg.network_rate,
            last: (position, Quat::IDENTITY, Emote::Idle),
        };
        (player, NetMsg::EntityAdded(added))
    }

    pub fn id(&self) -> EntityId {
        self.replica.id()
    }

    pub fn replica(&self) -> &EntityReplica {
        &self.replica
    }

    pub fn body(&self) -> &dyn CharacterBody {
        &self.body
    }

    pub fn view(&self) -> PlayerView {
        self.replica.view()
    }

    pub fn position(&self) -> Vec3 {
        self.body.position()
    }

    pub fn quaternion(&self) -> Quat {
        Quat::from_yaw(self.yaw)
    }

    pub fn dirty(&self) -> DirtyFields {
        self.dirty
    }

    /// Announcement of the current state, for late joiners.
    pub fn to_added(&self) -> EntityAdded {
        self.replica.to_added()
    }

    /// Forces an emote until cleared with `None`.
    pub fn set_emote_override(&mut self, emote: Option<Emote>) {
        self.emote_override = emote;
    }

    /// Changes the user descriptor and schedules it for broadcast.
    pub fn set_user(&mut self, user: UserDescriptor, services: &mut Services<'_>) {
        if &user == self.replica.user() {
            return;
        }
        self.replica.set_user(user, services);
        self.dirty |= DirtyFields::USER;
    }

    /// Moves the body instantly and restarts the flight state.
    pub fn teleport(&mut self, position: Vec3, jump: &mut DoubleJump, services: &mut Services<'_>) {
        self.body.teleport(position);
        jump.teleported();
        let quaternion = self.quaternion();
        self.replica.snap(position, quaternion, services);
        debug!(id = %self.id(), ?position, "Teleported");
    }

    /// One fixed step of movement and physics.
    pub fn fixed_update(
        &mut self,
        dt: f32,
        controls: &ControlStack,
        jump: &mut DoubleJump,
    ) {
        let (wants_jump, yaw_delta) = match self.pad.lock() {
            Ok(mut pad) => {
                let taken = (pad.jump, pad.yaw_delta);
                pad.jump = false;
                pad.yaw_delta = 0.0;
                taken
            }
            Err(_) => (false, 0.0),
        };
        self.yaw -= yaw_delta * LOOK_SENSITIVITY;

        let wish = self.wish_dir(controls);
        self.running = self.is_down(controls, RUN);
        let speed = if self.running {
            self.run_speed
        } else {
            self.walk_speed
        };
        self.body.drive(wish * speed);

        if wants_jump && self.body.is_grounded() {
            let mut v = self.body.linear_velocity();
            v.y = self.jump_speed;
            self.body.set_linear_velocity(v);
        }
        self.body.step(dt);
        jump.fixed_update(dt, &mut self.body);
        let landing_press = jump.take_landing_press();

        self.moving = self.body.linear_velocity().horizontal().length() > MOVING_EPSILON;
        if let Ok(mut pad) = self.pad.lock() {
            pad.grounded = self.body.is_grounded();
            // Jumps off the ground on the next tick.
            pad.jump |= landing_press && pad.grounded;
        }
    }

    /// Per-frame update: shows the simulated state and collects changes.
    /// Returns a patch when one is due.
    pub fn update(
        &mut self,
        dt: f32,
        jump: &DoubleJump,
        services: &mut Services<'_>,
    ) -> Option<NetMsg> {
        let position = self.body.position();
        let quaternion = self.quaternion();
        let emote = self.emote(jump);

        self.replica.snap(position, quaternion, services);
        self.replica.set_emote(emote, services);
        self.replica.update(dt, services);

        let (p, q, e) = self.last;
        if p != position {
            self.dirty |= DirtyFields::POSITION;
        }
        if q != quaternion {
            self.dirty |= DirtyFields::QUATERNION;
        }
        if e != emote {
            self.dirty |= DirtyFields::EMOTE;
        }
        self.last = (position, quaternion, emote);

        self.since_flush += dt.max(0.0);
        if self.since_flush < self.network_rate || self.dirty.is_empty() {
            return None;
        }
        self.since_flush = 0.0;
        Some(NetMsg::EntityModified(self.flush()))
    }

    /// Builds a patch holding exactly the dirty fields and clears them.
    pub fn flush(&mut self) -> EntityModified {
        let mut msg = EntityModified::new(self.id());
        let (p, q, e) = self.last;
        if self.dirty.contains(DirtyFields::POSITION) {
            msg = msg.with_position(p);
        }
        if self.dirty.contains(DirtyFields::QUATERNION) {
            msg = msg.with_quaternion(q);
        }
        if self.dirty.contains(DirtyFields::EMOTE) {
            msg = msg.with_emote(e.id());
        }
        if self.dirty.contains(DirtyFields::USER) {
            msg = msg.with_user(self.replica.user().clone());
        }
        self.dirty = DirtyFields::empty();
        msg
    }

    pub fn chat(&mut self, text: &str, services: &mut Services<'_>) {
        self.replica.chat(text, services);
    }

    pub fn on_asset(&mut self, event: &AssetEvent, services: &mut Services<'_>) {
        self.replica.on_asset(event, services);
    }

    /// Releases input and the render node. Returns the removal notice.
    pub fn despawn(mut self, controls: &mut ControlStack, services: &mut Services<'_>) -> Option<NetMsg> {
        if let Some(mut control) = self.control.take() {
            controls.release(&mut control);
        }
        self.replica.destroy(true, services)
    }

    fn emote(&self, jump: &DoubleJump) -> Emote {
        if let Some(emote) = jump.emote_override().or(self.emote_override) {
            return emote;
        }
        if !self.body.is_grounded() {
            Emote::Float
        } else if self.moving && self.running {
            Emote::Run
        } else if self.moving {
            Emote::Walk
        } else {
            Emote::Idle
        }
    }

    fn is_down(&self, controls: &ControlStack, code: &str) -> bool {
        self.control
            .as_ref()
            .is_some_and(|c| controls.is_down(c, code))
    }

    fn wish_dir(&self, controls: &ControlStack) -> Vec3 {
        let axis = |pos: &str, neg: &str| {
            f32::from(u8::from(self.is_down(controls, pos))) - f32::from(u8::from(self.is_down(controls, neg)))
        };
        let local = Vec3::new(axis(RIGHT, LEFT), 0.0, axis(BACK, FORWARD));
        let len = local.length();
        if len <= f32::EPSILON {
            return Vec3::ZERO;
        }
        self.quaternion().rotate(local * (1.0 / len))
    }
}

#[cfg(test)]
mod tests {
    use replica_shared::{
        render::HeadlessScene,
        resources::MemoryAssetLoader,
    };

    use super::*;
    use crate::controls::InputEvent;

    const DT: f32 = 1.0 / 50.0;

    struct Rig {
        cfg: WorldConfig,
        assets: MemoryAssetLoader,
        scene: HeadlessScene,
        controls: ControlStack,
        jump: DoubleJump,
        player: Option<LocalPlayer>,
    }

    impl Rig {
        fn new() -> (Self, NetMsg) {
            let cfg = WorldConfig::default();
            let mut assets = MemoryAssetLoader::with_defaults(Emote::urls());
            let mut scene = HeadlessScene::new();
            let mut controls = ControlStack::new();
            let mut jump = DoubleJump::new(&cfg);
            let mut services = Services::new(&mut assets, &mut scene);
            let (player, added) =
                LocalPlayer::spawn(&cfg, ClientId(1), Vec3::ZERO, &mut controls, &mut services);
            jump.start(&mut controls, &mut services);
            jump.set_physics_ready(true);
            let rig = Self {
                cfg,
                assets,
                scene,
                controls,
                jump,
                player: Some(player),
            };
            (rig, added)
        }

        fn player(&mut self) -> &mut LocalPlayer {
            self.player.as_mut().unwrap()
        }

        fn key(&mut self, code: &str, down: bool) {
            let event = if down {
                InputEvent::Press(code.into())
            } else {
                InputEvent::Release(code.into())
            };
            self.controls.dispatch(&event);
        }

        fn tap(&mut self, code: &str) {
            self.key(code, true);
            self.key(code, false);
        }

        /// One fixed step plus one frame. Returns any patch produced.
        fn step(&mut self) -> Option<NetMsg> {
            let player = self.player.as_mut().unwrap();
            player.fixed_update(DT, &self.controls, &mut self.jump);
            self.jump.update(DT);
            player.update(DT, &self.jump, &mut Services::new(&mut self.assets, &mut self.scene))
        }

        fn patches(&mut self, steps: usize) -> Vec<EntityModified> {
            (0..steps)
                .filter_map(|_| match self.step() {
                    Some(NetMsg::EntityModified(m)) => Some(m),
                    _ => None,
                })
                .collect()
        }
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            if let Some(player) = self.player.take() {
                player.despawn(&mut self.controls, &mut Services::new(&mut self.assets, &mut self.scene));
            }
            self.jump.stop(&mut self.controls);
        }
    }

    #[test]
    fn spawn_announces_entity() {
        let (mut rig, added) = Rig::new();
        let NetMsg::EntityAdded(added) = added else {
            panic!("expected entityAdded");
        };
        assert_eq!(added.id, rig.player().id());
        assert_eq!(added.owner, ClientId(1));
        assert_eq!(added.user.name, rig.cfg.player_name);
        assert_eq!(added.position, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn standing_still_sends_nothing() {
        let (mut rig, _) = Rig::new();
        assert!(rig.patches(50).is_empty());
    }

    #[test]
    fn walking_is_rate_limited_and_carries_only_changes() {
        let (mut rig, _) = Rig::new();
        rig.key(FORWARD, true);
        // One second at 50 Hz with an eighth-second interval.
        let patches = rig.patches(50);
        assert!((7..=8).contains(&patches.len()), "{}", patches.len());
        for patch in &patches {
            assert!(patch.p.is_some());
            assert!(patch.q.is_none());
        }
        assert_eq!(patches[0].e, Some(Emote::Walk.id()));
        assert!(rig.player().position().z < -2.0);
    }

    #[test]
    fn double_jump_emits_one_flip_patch() {
        let (mut rig, _) = Rig::new();
        rig.tap(JUMP_CODE);
        rig.step();
        assert!(!rig.player().body().is_grounded());

        rig.tap(JUMP_CODE);
        let before = rig.player().body().linear_velocity().y;
        rig.step();
        let after = rig.player().body().linear_velocity().y;
        assert!(after > before);
        assert_eq!(after, rig.cfg.double_jump_force);

        rig.tap(JUMP_CODE);
        let patches = rig.patches(400);
        let flips = patches
            .iter()
            .filter(|p| p.e == Some(Emote::DoubleJump.id()))
            .count();
        assert_eq!(flips, 1);
        assert!(rig.player().body().is_grounded());
        assert_eq!(patches.last().and_then(|p| p.e), Some(Emote::Idle.id()));
    }

    #[test]
    fn airborne_space_without_secondary_does_not_jump() {
        let (mut rig, _) = Rig::new();
        rig.tap(JUMP_CODE);
        rig.step();
        rig.tap(JUMP_CODE);
        rig.step();
        let vy = rig.player().body().linear_velocity().y;
        rig.tap(JUMP_CODE);
        rig.step();
        assert!(rig.player().body().linear_velocity().y < vy);
    }

    #[test]
    fn user_change_is_flushed_once() {
        let (mut rig, _) = Rig::new();
        let mut user = rig.player().replica().user().clone();
        user.name = "Grace".into();
        let player = rig.player.as_mut().unwrap();
        player.set_user(user.clone(), &mut Services::new(&mut rig.assets, &mut rig.scene));
        player.set_user(user, &mut Services::new(&mut rig.assets, &mut rig.scene));
        assert_eq!(rig.player().dirty(), DirtyFields::USER);
        let patches = rig.patches(10);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].user.as_ref().map(|u| u.name.as_str()), Some("Grace"));
        assert!(patches[0].p.is_none());
    }

    #[test]
    fn despawn_releases_binding() {
        let (mut rig, _) = Rig::new();
        assert_eq!(rig.controls.len(), 2);
        let player = rig.player.take().unwrap();
        let id = player.id();
        let msg = player.despawn(&mut rig.controls, &mut Services::new(&mut rig.assets, &mut rig.scene));
        assert_eq!(msg, Some(NetMsg::EntityRemoved { id }));
        assert_eq!(rig.controls.len(), 1);
    }
}

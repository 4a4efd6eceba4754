//! Emote state machine.
//!
//! Maps a discrete emote id to a playing clip on an avatar node. Switching is
//! immediate; clip assets are requested on first use and cached per machine.
//! A missing clip never fails: the idle clip plays instead.

use std::collections::HashMap;

use replica_shared::{
    render::NodeId,
    resources::{AssetEvent, AssetHandle, AssetKind, RequestId},
};
use tracing::{debug, warn};

use crate::services::Services;

/// Known emotes and their wire ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Emote {
    #[default]
    Idle,
    Walk,
    Run,
    Float,
    DoubleJump,
    Sit,
}

impl Emote {
    pub const ALL: [Emote; 6] = [
        Emote::Idle,
        Emote::Walk,
        Emote::Run,
        Emote::Float,
        Emote::DoubleJump,
        Emote::Sit,
    ];

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(id).ok()?).copied()
    }

    pub fn id(self) -> i32 {
        match self {
            Emote::Idle => 0,
            Emote::Walk => 1,
            Emote::Run => 2,
            Emote::Float => 3,
            Emote::DoubleJump => 4,
            Emote::Sit => 5,
        }
    }

    /// Clip asset for this emote.
    pub fn url(self) -> &'static str {
        match self {
            Emote::Idle => "asset://emote-idle.glb",
            Emote::Walk => "asset://emote-walk.glb",
            Emote::Run => "asset://emote-run.glb",
            Emote::Float => "asset://emote-float.glb",
            Emote::DoubleJump => "asset://emote-flip.glb",
            Emote::Sit => "asset://emote-sit.glb",
        }
    }

    /// Every clip url, for preloading and test catalogs.
    pub fn urls() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(Emote::url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Clip {
    Loading(RequestId),
    Ready(AssetHandle),
    Missing,
}

/// Drives which clip an avatar node plays.
#[derive(Debug)]
pub struct EmoteMachine {
    node: NodeId,
    requested: Emote,
    clips: HashMap<Emote, Clip>,
    playing: Option<AssetHandle>,
    /// Seconds left before a timed emote reverts to idle.
    revert_in: Option<f32>,
}

impl EmoteMachine {
    /// Creates a machine for `node` and starts the idle clip.
    pub fn new(node: NodeId, services: &mut Services<'_>) -> Self {
        let mut machine = Self {
            node,
            requested: Emote::Idle,
            clips: HashMap::new(),
            playing: None,
            revert_in: None,
        };
        machine.start(Emote::Idle, services);
        machine
    }

    /// Currently requested emote.
    pub fn current(&self) -> Emote {
        self.requested
    }

    /// Clip currently playing, if any has loaded.
    pub fn playing(&self) -> Option<AssetHandle> {
        self.playing
    }

    /// True while a timed emote is waiting to revert.
    pub fn has_timer(&self) -> bool {
        self.revert_in.is_some()
    }

    /// Switches to the emote with wire id `id`. Unknown ids fall back to idle.
    /// Cancels any pending timed revert.
    pub fn set(&mut self, id: i32, services: &mut Services<'_>) {
        let emote = Emote::from_id(id).unwrap_or_else(|| {
            warn!(emote = id, "Unknown emote id, falling back to idle");
            Emote::Idle
        });
        self.set_emote(emote, services);
    }

    pub fn set_emote(&mut self, emote: Emote, services: &mut Services<'_>) {
        self.revert_in = None;
        if emote == self.requested {
            return;
        }
        self.requested = emote;
        self.start(emote, services);
    }

    /// Plays `emote` for `secs`, then reverts to idle.
    pub fn play_for(&mut self, emote: Emote, secs: f32, services: &mut Services<'_>) {
        self.set_emote(emote, services);
        self.revert_in = Some(secs.max(0.0));
    }

    /// Drops any pending timed revert.
    pub fn cancel_timer(&mut self) {
        self.revert_in = None;
    }

    /// Per-frame bookkeeping for timed emotes.
    pub fn update(&mut self, dt: f32, services: &mut Services<'_>) {
        let Some(left) = self.revert_in.as_mut() else {
            return;
        };
        *left -= dt.max(0.0);
        if *left <= 0.0 {
            self.revert_in = None;
            self.requested = Emote::Idle;
            self.start(Emote::Idle, services);
        }
    }

    /// Replays the current clip, e.g. after the avatar was swapped.
    pub fn replay(&mut self, services: &mut Services<'_>) {
        if let Some(clip) = self.playing {
            services.scene.play_clip(self.node, clip);
        }
    }

    /// Handles a finished asset load. Events for other requests are ignored.
    pub fn on_asset(&mut self, event: &AssetEvent, services: &mut Services<'_>) {
        let Some(emote) = self.clips.iter().find_map(|(emote, clip)| {
            (*clip == Clip::Loading(event.request)).then_some(*emote)
        }) else {
            return;
        };

        match &event.result {
            Ok(asset) => {
                debug!(?emote, url = %event.url, "Emote clip loaded");
                self.clips.insert(emote, Clip::Ready(asset.handle));
            }
            Err(e) => {
                warn!(?emote, error = %e, "Emote clip unavailable, using idle");
                self.clips.insert(emote, Clip::Missing);
            }
        }

        if emote == self.requested {
            self.start(emote, services);
        }
    }

    fn start(&mut self, emote: Emote, services: &mut Services<'_>) {
        match self.clips.get(&emote).copied() {
            Some(Clip::Ready(handle)) => self.play(handle, services),
            Some(Clip::Loading(_)) => {}
            Some(Clip::Missing) if emote != Emote::Idle => self.start(Emote::Idle, services),
            Some(Clip::Missing) => {
                warn!(node = ?self.node, "Idle clip unavailable, nothing to play");
            }
            None => {
                let request = services.assets.request(AssetKind::Emote, emote.url());
                self.clips.insert(emote, Clip::Loading(request));
            }
        }
    }

    fn play(&mut self, handle: AssetHandle, services: &mut Services<'_>) {
        if self.playing == Some(handle) {
            return;
        }
        self.playing = Some(handle);
        services.scene.play_clip(self.node, handle);
    }
}

#[cfg(test)]
mod tests {
    use replica_shared::{
        render::{HeadlessScene, SceneGraph},
        resources::{AssetLoader, MemoryAssetLoader},
    };

    use super::*;

    fn pump(machine: &mut EmoteMachine, assets: &mut MemoryAssetLoader, scene: &mut HeadlessScene) {
        for event in assets.poll() {
            machine.on_asset(&event, &mut Services::new(&mut *assets, &mut *scene));
        }
    }

    fn clip_of(assets: &mut MemoryAssetLoader, emote: Emote) -> AssetHandle {
        assets.request(AssetKind::Emote, emote.url());
        assets.poll().remove(0).result.unwrap().handle
    }

    #[test]
    fn ids_round_trip() {
        for emote in Emote::ALL {
            assert_eq!(Emote::from_id(emote.id()), Some(emote));
        }
        assert_eq!(Emote::from_id(-1), None);
        assert_eq!(Emote::from_id(6), None);
    }

    #[test]
    fn switch_plays_clip_once_loaded() {
        let mut assets = MemoryAssetLoader::with_defaults(Emote::urls());
        let mut scene = HeadlessScene::new();
        let node = scene.create_node("player");
        let mut machine = EmoteMachine::new(node, &mut Services::new(&mut assets, &mut scene));
        pump(&mut machine, &mut assets, &mut scene);
        let idle = clip_of(&mut assets, Emote::Idle);
        assert_eq!(scene.node(node).unwrap().clip, Some(idle));

        machine.set(Emote::Run.id(), &mut Services::new(&mut assets, &mut scene));
        assert_eq!(machine.current(), Emote::Run);
        pump(&mut machine, &mut assets, &mut scene);
        let run = clip_of(&mut assets, Emote::Run);
        assert_eq!(scene.node(node).unwrap().clip, Some(run));
    }

    #[test]
    fn missing_clip_falls_back_to_idle() {
        let mut assets = MemoryAssetLoader::with_defaults([Emote::Idle.url()]);
        let mut scene = HeadlessScene::new();
        let node = scene.create_node("player");
        let mut machine = EmoteMachine::new(node, &mut Services::new(&mut assets, &mut scene));
        pump(&mut machine, &mut assets, &mut scene);
        let idle = machine.playing();
        assert!(idle.is_some());

        machine.set(Emote::Sit.id(), &mut Services::new(&mut assets, &mut scene));
        pump(&mut machine, &mut assets, &mut scene);
        assert_eq!(machine.current(), Emote::Sit);
        assert_eq!(machine.playing(), idle);
        assert_eq!(scene.node(node).unwrap().clip, idle);
    }

    #[test]
    fn unknown_id_selects_idle() {
        let mut assets = MemoryAssetLoader::with_defaults(Emote::urls());
        let mut scene = HeadlessScene::new();
        let node = scene.create_node("player");
        let mut machine = EmoteMachine::new(node, &mut Services::new(&mut assets, &mut scene));
        machine.set(Emote::Walk.id(), &mut Services::new(&mut assets, &mut scene));
        machine.set(42, &mut Services::new(&mut assets, &mut scene));
        assert_eq!(machine.current(), Emote::Idle);
    }

    #[test]
    fn timed_emote_reverts_and_can_be_cancelled() {
        let mut assets = MemoryAssetLoader::with_defaults(Emote::urls());
        let mut scene = HeadlessScene::new();
        let node = scene.create_node("player");
        let mut machine = EmoteMachine::new(node, &mut Services::new(&mut assets, &mut scene));

        machine.play_for(Emote::Sit, 1.0, &mut Services::new(&mut assets, &mut scene));
        machine.update(0.6, &mut Services::new(&mut assets, &mut scene));
        assert_eq!(machine.current(), Emote::Sit);
        machine.update(0.6, &mut Services::new(&mut assets, &mut scene));
        assert_eq!(machine.current(), Emote::Idle);
        assert!(!machine.has_timer());

        machine.play_for(Emote::Sit, 1.0, &mut Services::new(&mut assets, &mut scene));
        machine.cancel_timer();
        machine.update(5.0, &mut Services::new(&mut assets, &mut scene));
        assert_eq!(machine.current(), Emote::Sit);
    }

    #[test]
    fn clips_are_requested_once_per_machine() {
        let mut assets = MemoryAssetLoader::with_defaults(Emote::urls());
        let mut scene = HeadlessScene::new();
        let node = scene.create_node("player");
        let mut machine = EmoteMachine::new(node, &mut Services::new(&mut assets, &mut scene));
        for _ in 0..3 {
            machine.set(Emote::Walk.id(), &mut Services::new(&mut assets, &mut scene));
            pump(&mut machine, &mut assets, &mut scene);
            machine.set(Emote::Idle.id(), &mut Services::new(&mut assets, &mut scene));
            pump(&mut machine, &mut assets, &mut scene);
        }
        assert_eq!(assets.request_count(Emote::Walk.url()), 1);
    }
}

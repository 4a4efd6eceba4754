//! Scene graph collaborator.
//!
//! This crate intentionally does not depend on a graphics backend.
//! The replication core only places nodes, attaches avatars, plays clips and
//! toggles the overlay (name tag or chat bubble) above a player.

use std::collections::HashMap;

use crate::{
    math::{Quat, Vec3},
    resources::AssetHandle,
};

/// Render node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// What floats above a player's head.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Overlay {
    #[default]
    Hidden,
    NameTag(String),
    Bubble(String),
}

/// Minimal scene API.
pub trait SceneGraph: Send {
    fn create_node(&mut self, name: &str) -> NodeId;
    /// Applies a world-space transform.
    fn set_transform(&mut self, node: NodeId, position: Vec3, quaternion: Quat);
    /// Replaces the node's avatar.
    fn attach_avatar(&mut self, node: NodeId, avatar: AssetHandle);
    fn play_clip(&mut self, node: NodeId, clip: AssetHandle);
    /// Shows an overlay at `height` above the node origin.
    fn set_overlay(&mut self, node: NodeId, overlay: Overlay, height: f32);
    /// Destroys the node and everything attached to it.
    fn release(&mut self, node: NodeId);
}

/// State of one node in a [`HeadlessScene`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeState {
    pub name: String,
    pub position: Vec3,
    pub quaternion: Quat,
    pub avatar: Option<AssetHandle>,
    pub clip: Option<AssetHandle>,
    pub clips_played: usize,
    pub overlay: Overlay,
    pub overlay_height: f32,
}

/// Scene that keeps node state in memory so it can be inspected.
#[derive(Debug, Default)]
pub struct HeadlessScene {
    next_id: u64,
    nodes: HashMap<NodeId, NodeState>,
    /// Calls that named a node which does not exist (never created or released).
    stray_calls: usize,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeState> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of calls made against nodes that were gone.
    pub fn stray_calls(&self) -> usize {
        self.stray_calls
    }

    fn live(&mut self, node: NodeId) -> Option<&mut NodeState> {
        let state = self.nodes.get_mut(&node);
        if state.is_none() {
            self.stray_calls += 1;
        }
        state
    }
}

impl SceneGraph for HeadlessScene {
    fn create_node(&mut self, name: &str) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(
            id,
            NodeState {
                name: name.to_string(),
                ..Default::default()
            },
        );
        id
    }

    fn set_transform(&mut self, node: NodeId, position: Vec3, quaternion: Quat) {
        if let Some(n) = self.live(node) {
            n.position = position;
            n.quaternion = quaternion;
        }
    }

    fn attach_avatar(&mut self, node: NodeId, avatar: AssetHandle) {
        if let Some(n) = self.live(node) {
            n.avatar = Some(avatar);
        }
    }

    fn play_clip(&mut self, node: NodeId, clip: AssetHandle) {
        if let Some(n) = self.live(node) {
            n.clip = Some(clip);
            n.clips_played += 1;
        }
    }

    fn set_overlay(&mut self, node: NodeId, overlay: Overlay, height: f32) {
        if let Some(n) = self.live(node) {
            n.overlay = overlay;
            n.overlay_height = height;
        }
    }

    fn release(&mut self, node: NodeId) {
        if self.nodes.remove(&node).is_none() {
            self.stray_calls += 1;
        }
    }
}

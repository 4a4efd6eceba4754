//! Borrowed access to the external collaborators for the duration of a call.

use replica_shared::{render::SceneGraph, resources::AssetLoader};

/// Asset loader and scene graph, lent to systems by the world each frame.
pub struct Services<'a> {
    pub assets: &'a mut dyn AssetLoader,
    pub scene: &'a mut dyn SceneGraph,
}

impl<'a> Services<'a> {
    pub fn new(assets: &'a mut dyn AssetLoader, scene: &'a mut dyn SceneGraph) -> Self {
        Self { assets, scene }
    }
}

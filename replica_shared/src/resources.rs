//! Asset loading collaborator.
//!
//! Loads are fire-and-forget: [`AssetLoader::request`] returns a request id
//! immediately and the outcome arrives later through [`AssetLoader::poll`],
//! which the main loop calls once per frame. Completions therefore only ever
//! touch state from the loop thread.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;
use tracing::debug;

/// Default avatar used when a user has none.
pub const DEFAULT_AVATAR_URL: &str = "asset://avatar.vrm";

/// Category of asset, selecting the loader pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Avatar,
    Emote,
}

/// Identifies one outstanding load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// Handle to a loaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetHandle {
    pub id: u64,
    pub kind: AssetKind,
}

/// A loaded asset and the metadata callers need from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedAsset {
    pub handle: AssetHandle,
    /// Avatar height in meters (avatars only).
    pub height: Option<f32>,
}

/// Why a load failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("asset {url} is not a {expected:?}")]
    WrongKind { url: String, expected: AssetKind },
}

/// Completion of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetEvent {
    pub request: RequestId,
    pub kind: AssetKind,
    pub url: String,
    pub result: Result<LoadedAsset, AssetError>,
}

/// Asset loader as consumed by the replication core.
pub trait AssetLoader: Send {
    /// Starts loading `url`. Never blocks.
    fn request(&mut self, kind: AssetKind, url: &str) -> RequestId;
    /// Returns every load completed since the last poll.
    fn poll(&mut self) -> Vec<AssetEvent>;
}

/// In-memory loader with a fixed catalog. Requests complete on the next poll.
#[derive(Debug, Default)]
pub struct MemoryAssetLoader {
    next_id: u64,
    catalog: HashMap<String, (AssetKind, Option<f32>)>,
    handles: HashMap<String, AssetHandle>,
    pending: VecDeque<(RequestId, AssetKind, String)>,
    requested: HashMap<String, usize>,
    held: HashSet<String>,
}

impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the default avatar and the given emote urls.
    pub fn with_defaults<'a>(emote_urls: impl IntoIterator<Item = &'a str>) -> Self {
        let mut loader = Self::new().with_avatar(DEFAULT_AVATAR_URL, 1.7);
        for url in emote_urls {
            loader = loader.with_emote(url);
        }
        loader
    }

    pub fn with_avatar(mut self, url: &str, height: f32) -> Self {
        self.catalog
            .insert(url.to_string(), (AssetKind::Avatar, Some(height)));
        self
    }

    pub fn with_emote(mut self, url: &str) -> Self {
        self.catalog.insert(url.to_string(), (AssetKind::Emote, None));
        self
    }

    /// Keeps requests for `url` pending until [`release_held`](Self::release_held).
    pub fn hold(&mut self, url: &str) {
        self.held.insert(url.to_string());
    }

    pub fn release_held(&mut self, url: &str) {
        self.held.remove(url);
    }

    /// How many times `url` was requested.
    pub fn request_count(&self, url: &str) -> usize {
        self.requested.get(url).copied().unwrap_or(0)
    }

    fn resolve(&mut self, kind: AssetKind, url: &str) -> Result<LoadedAsset, AssetError> {
        let Some(&(found, height)) = self.catalog.get(url) else {
            return Err(AssetError::NotFound(url.to_string()));
        };
        if found != kind {
            return Err(AssetError::WrongKind {
                url: url.to_string(),
                expected: kind,
            });
        }
        let next_id = &mut self.next_id;
        let handle = *self.handles.entry(url.to_string()).or_insert_with(|| {
            *next_id += 1;
            AssetHandle { id: *next_id, kind }
        });
        Ok(LoadedAsset { handle, height })
    }
}

impl AssetLoader for MemoryAssetLoader {
    fn request(&mut self, kind: AssetKind, url: &str) -> RequestId {
        self.next_id += 1;
        let id = RequestId(self.next_id);
        debug!(?kind, %url, request = id.0, "Asset requested");
        *self.requested.entry(url.to_string()).or_default() += 1;
        self.pending.push_back((id, kind, url.to_string()));
        id
    }

    fn poll(&mut self) -> Vec<AssetEvent> {
        let mut done = Vec::new();
        let mut still_held = VecDeque::new();
        while let Some((request, kind, url)) = self.pending.pop_front() {
            if self.held.contains(&url) {
                still_held.push_back((request, kind, url));
                continue;
            }
            let result = self.resolve(kind, &url);
            done.push(AssetEvent {
                request,
                kind,
                url,
                result,
            });
        }
        self.pending = still_held;
        done
    }
}

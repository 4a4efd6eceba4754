//! Configuration system.
//!
//! Loads world configuration from JSON strings or files. Every field has a
//! default so partial files are accepted.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration shared by client and relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Relay listen/connect address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub fixed_hz: u32,
    /// Upper bound on fixed ticks run in one frame while catching up.
    pub max_fixed_steps: u32,
    /// Seconds between locally driven entity updates. Receivers use the same
    /// value as the interpolation time constant.
    pub network_rate: f32,
    /// Vertical speed set by the secondary (double) jump.
    pub double_jump_force: f32,
    /// How long the double-jump clip plays before reverting to float.
    pub double_jump_emote_secs: f32,
    /// Vertical speed of the primary jump.
    pub jump_speed: f32,
    /// Gravity along the up axis.
    pub gravity: f32,
    /// Walking speed of the local character.
    pub walk_speed: f32,
    /// Running speed of the local character.
    pub run_speed: f32,
    /// How long a chat bubble stays above a player.
    pub chat_bubble_secs: f32,
    /// Player name (client only).
    pub player_name: String,
    /// Avatar url (client only). Empty selects the default avatar.
    pub avatar: String,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            fixed_hz: 50,
            max_fixed_steps: 8,
            network_rate: 1.0 / 8.0,
            double_jump_force: 9.75,
            double_jump_emote_secs: 0.4,
            jump_speed: 7.0,
            gravity: -9.81,
            walk_speed: 3.0,
            run_speed: 6.0,
            chat_bubble_secs: 5.0,
            player_name: "Player".to_string(),
            avatar: String::new(),
        }
    }
}

impl WorldConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Length of one fixed tick in seconds.
    pub fn fixed_dt(&self) -> f32 {
        1.0 / self.fixed_hz.max(1) as f32
    }

    /// Avatar url, or `None` for the default avatar.
    pub fn avatar_url(&self) -> Option<String> {
        (!self.avatar.is_empty()).then(|| self.avatar.clone())
    }
}

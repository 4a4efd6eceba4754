//! `replica_client`
//!
//! Client-side systems:
//! - Interpolation of replicated transforms
//! - Emote state machine
//! - Priority input binding stack with exclusive pointer and camera claims
//! - Double jump on the fixed tick
//! - Entity replicas, the local player and the world loop tying them together
//! - Relay connection

pub mod client;
pub mod controls;
pub mod double_jump;
pub mod emote;
pub mod interp;
pub mod player;
pub mod replica;
pub mod services;
pub mod world;

pub use client::ReplicaClient;
pub use world::ClientWorld;

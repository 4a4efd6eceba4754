//! `replica_shared`
//!
//! Shared libraries used by both client and relay.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (net, math, events, collaborators).
//! - Traits for the external collaborators (assets, scene, physics).
//! - No `unsafe`.

pub mod config;
pub mod event;
pub mod math;
pub mod net;
pub mod physics;
pub mod render;
pub mod resources;

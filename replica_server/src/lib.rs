//! `replica_server`
//!
//! Relay for entity replication:
//! - Handshake and client ids
//! - Entity registry with owner checks, for late joiners
//! - Forwarding of entity patches and chat to the other clients
//! - Cleanup of a departed client's entities
//!
//! Networking model:
//! - TCP, length-prefixed JSON frames

pub mod registry;
pub mod server;

pub use server::RelayServer;

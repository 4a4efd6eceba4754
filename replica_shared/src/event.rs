//! Application events.
//!
//! A small typed event bus. Systems push events during a frame; the host
//! application drains them afterwards. Nothing here blocks or calls back
//! into the emitter.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::{
    math::{Quat, Vec3},
    net::{ChatMessage, ClientId, EntityId},
};

/// Read-only view of a player, computed on demand from replica state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerView {
    pub network_id: ClientId,
    pub entity_id: EntityId,
    pub user_id: String,
    pub name: String,
    pub position: Vec3,
    pub quaternion: Quat,
}

/// Named world events surfaced to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// A player materialized in the world.
    Enter { player: PlayerView },
    /// A player left the world.
    Leave { player: PlayerView },
    /// A chat line arrived.
    Chat { message: ChatMessage },
}

impl WorldEvent {
    /// Event name as exposed to content.
    pub fn name(&self) -> &'static str {
        match self {
            WorldEvent::Enter { .. } => "enter",
            WorldEvent::Leave { .. } => "leave",
            WorldEvent::Chat { .. } => "chat",
        }
    }
}

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    /// Pushes an event into the queue.
    pub fn emit<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        if let Some(q) = q.downcast_mut::<Vec<E>>() {
            q.push(e);
        }
    }

    /// Number of queued events of a type.
    pub fn pending<E: 'static + Send + Sync>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<Vec<E>>())
            .map_or(0, Vec::len)
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_is_per_type() {
        let mut bus = EventBus::default();
        bus.emit(1u32);
        bus.emit(2u32);
        bus.emit("x");
        assert_eq!(bus.pending::<u32>(), 2);
        assert_eq!(bus.drain::<u32>(), vec![1, 2]);
        assert_eq!(bus.pending::<u32>(), 0);
        assert_eq!(bus.drain::<&str>(), vec!["x"]);
    }
}

//! Entity registry.
//!
//! The relay's record of every live entity: who owns it and its latest full
//! state, so late joiners can be sent an `entityAdded` per entity. Patches are
//! validated and folded in before they are forwarded; only the owner may
//! change or remove an entity.

use std::collections::BTreeMap;

use replica_shared::net::{ClientId, EntityAdded, EntityId, EntityModified, WireError};
use thiserror::Error;

/// Why the relay refused a message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelayError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("client {from:?} does not own entity {id} (owner {owner:?})")]
    NotOwner {
        id: EntityId,
        owner: ClientId,
        from: ClientId,
    },
}

/// Live entities keyed by id, in stable order.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<EntityId, EntityAdded>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityAdded> {
        self.entities.get(&id)
    }

    /// Records a new entity owned by `from`. The owner field is taken from
    /// the connection, not from the message.
    pub fn add(&mut self, from: ClientId, mut added: EntityAdded) -> Result<EntityAdded, RelayError> {
        if self.entities.contains_key(&added.id) {
            return Err(WireError::DuplicateEntity(added.id).into());
        }
        added.validate()?;
        added.owner = from;
        self.entities.insert(added.id, added.clone());
        Ok(added)
    }

    /// Folds a patch into the stored state.
    pub fn modify(&mut self, from: ClientId, patch: &EntityModified) -> Result<(), RelayError> {
        let entity = self.owned_mut(from, patch.id)?;
        let valid = patch.validate()?;
        if let Some(p) = valid.position {
            entity.position = p.to_array().to_vec();
        }
        if let Some(q) = valid.quaternion {
            entity.quaternion = q.to_array().to_vec();
        }
        if let Some(e) = valid.emote {
            entity.emote = Some(e);
        }
        if let Some(user) = valid.user {
            entity.user = user;
        }
        Ok(())
    }

    pub fn remove(&mut self, from: ClientId, id: EntityId) -> Result<EntityAdded, RelayError> {
        self.owned_mut(from, id)?;
        self.entities
            .remove(&id)
            .ok_or(RelayError::Wire(WireError::UnknownEntity(id)))
    }

    /// Removes everything `owner` spawned and returns the ids.
    pub fn remove_owned_by(&mut self, owner: ClientId) -> Vec<EntityId> {
        let ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.owner == owner)
            .map(|e| e.id)
            .collect();
        for id in &ids {
            self.entities.remove(id);
        }
        ids
    }

    /// Current state of every entity, for a client that just joined.
    pub fn snapshot(&self) -> Vec<EntityAdded> {
        self.entities.values().cloned().collect()
    }

    fn owned_mut(&mut self, from: ClientId, id: EntityId) -> Result<&mut EntityAdded, RelayError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(WireError::UnknownEntity(id))?;
        if entity.owner != from {
            return Err(RelayError::NotOwner {
                id,
                owner: entity.owner,
                from,
            });
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use replica_shared::{
        math::{Quat, Vec3},
        net::UserDescriptor,
    };

    use super::*;

    fn added(id: u64) -> EntityAdded {
        EntityAdded::new(
            EntityId(id),
            ClientId(99),
            Vec3::ZERO,
            Quat::IDENTITY,
            UserDescriptor {
                id: "u".into(),
                name: "Ada".into(),
                avatar: None,
            },
        )
    }

    #[test]
    fn owner_comes_from_connection() {
        let mut reg = EntityRegistry::new();
        let stored = reg.add(ClientId(1), added(5)).unwrap();
        assert_eq!(stored.owner, ClientId(1));
        assert_eq!(
            reg.add(ClientId(2), added(5)),
            Err(RelayError::Wire(WireError::DuplicateEntity(EntityId(5))))
        );
    }

    #[test]
    fn patches_fold_into_snapshot() {
        let mut reg = EntityRegistry::new();
        reg.add(ClientId(1), added(5)).unwrap();
        let patch = EntityModified::new(EntityId(5))
            .with_position(Vec3::new(1.0, 2.0, 3.0))
            .with_emote(4);
        reg.modify(ClientId(1), &patch).unwrap();
        let snap = reg.snapshot();
        assert_eq!(snap[0].position, vec![1.0, 2.0, 3.0]);
        assert_eq!(snap[0].emote, Some(4));
        assert_eq!(snap[0].quaternion, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn bad_patch_changes_nothing() {
        let mut reg = EntityRegistry::new();
        reg.add(ClientId(1), added(5)).unwrap();
        let mut patch = EntityModified::new(EntityId(5)).with_emote(2);
        patch.q = Some(vec![1.0]);
        assert!(reg.modify(ClientId(1), &patch).is_err());
        assert_eq!(reg.get(EntityId(5)).unwrap().emote, None);
    }

    #[test]
    fn only_owner_may_change() {
        let mut reg = EntityRegistry::new();
        reg.add(ClientId(1), added(5)).unwrap();
        let patch = EntityModified::new(EntityId(5)).with_emote(2);
        assert!(matches!(
            reg.modify(ClientId(2), &patch),
            Err(RelayError::NotOwner { .. })
        ));
        assert!(reg.remove(ClientId(2), EntityId(5)).is_err());
        assert!(reg.remove(ClientId(1), EntityId(5)).is_ok());
        assert!(reg.is_empty());
    }

    #[test]
    fn disconnect_sweeps_owned_entities() {
        let mut reg = EntityRegistry::new();
        reg.add(ClientId(1), added(5)).unwrap();
        reg.add(ClientId(1), added(6)).unwrap();
        reg.add(ClientId(2), added(7)).unwrap();
        assert_eq!(reg.remove_owned_by(ClientId(1)), vec![EntityId(5), EntityId(6)]);
        assert_eq!(reg.len(), 1);
    }
}

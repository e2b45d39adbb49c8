//! SceneWorld - hecs world with stable IDs and named entities

use bimap::BiMap;
use ember_core::{EmberError, EntityId, Result};
use std::collections::HashMap;

/// The main ECS world for Ember
///
/// Wraps hecs::World with:
/// - Stable EntityId mapping
/// - Named entity lookup
/// - Typed component access keyed by EntityId
pub struct SceneWorld {
    world: hecs::World,
    /// Bidirectional mapping: EntityId <-> hecs::Entity
    id_map: BiMap<EntityId, hecs::Entity>,
    /// Entity name -> EntityId mapping
    name_map: HashMap<String, EntityId>,
}

impl Default for SceneWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneWorld {
    pub fn new() -> Self {
        Self {
            world: hecs::World::new(),
            id_map: BiMap::new(),
            name_map: HashMap::new(),
        }
    }

    /// Spawn a new, component-less entity with a unique name
    pub fn spawn(&mut self, name: impl Into<String>) -> Result<EntityId> {
        let name = name.into();
        if self.name_map.contains_key(&name) {
            return Err(EmberError::DuplicateEntityName(name));
        }

        let id = EntityId::new();
        let entity = self.world.spawn(());
        self.id_map.insert(id, entity);
        self.name_map.insert(name, id);
        Ok(id)
    }

    /// Spawn an entity with a specific ID (for loading scenes)
    pub fn spawn_with_id(&mut self, id: EntityId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.name_map.contains_key(&name) {
            return Err(EmberError::DuplicateEntityName(name));
        }

        EntityId::reserve_through(id.raw());
        let entity = self.world.spawn(());
        self.id_map.insert(id, entity);
        self.name_map.insert(name, id);
        Ok(())
    }

    /// Despawn an entity and drop all of its components.
    ///
    /// Components that own GPU resources must be finalized by their system
    /// before this is called; dropping them here does not touch the device.
    pub fn despawn(&mut self, id: EntityId) -> Result<()> {
        let (_, entity) = self
            .id_map
            .remove_by_left(&id)
            .ok_or_else(|| EmberError::EntityNotFound(id.to_string()))?;
        self.name_map.retain(|_, v| *v != id);
        self.world
            .despawn(entity)
            .map_err(|_| EmberError::EntityNotFound(id.to_string()))
    }

    /// Attach (or replace) a component on an entity
    pub fn insert<C: hecs::Component>(&mut self, id: EntityId, component: C) -> Result<()> {
        let entity = self.entity(id)?;
        self.world
            .insert_one(entity, component)
            .map_err(|_| EmberError::EntityNotFound(id.to_string()))
    }

    /// Detach a component, returning it
    pub fn remove<C: hecs::Component>(&mut self, id: EntityId) -> Result<C> {
        let entity = self.entity(id)?;
        self.world
            .remove_one::<C>(entity)
            .map_err(|_| EmberError::ComponentNotFound(std::any::type_name::<C>().to_string()))
    }

    pub fn get<C: hecs::Component>(&self, id: EntityId) -> Option<hecs::Ref<'_, C>> {
        let entity = *self.id_map.get_by_left(&id)?;
        self.world.get::<&C>(entity).ok()
    }

    pub fn get_mut<C: hecs::Component>(&mut self, id: EntityId) -> Option<hecs::RefMut<'_, C>> {
        let entity = *self.id_map.get_by_left(&id)?;
        self.world.get::<&mut C>(entity).ok()
    }

    /// Collect `(EntityId, &mut C)` for every entity carrying `C`.
    ///
    /// Order follows ascending EntityId so per-frame dispatch order is stable.
    pub fn components_mut<C: hecs::Component>(&mut self) -> Vec<(EntityId, &mut C)> {
        let id_map = &self.id_map;
        let mut out: Vec<(EntityId, &mut C)> = self
            .world
            .query_mut::<&mut C>()
            .into_iter()
            .filter_map(|(entity, component)| {
                id_map.get_by_right(&entity).map(|id| (*id, component))
            })
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Ids of every entity carrying `C`, ascending
    pub fn ids_with<C: hecs::Component>(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .world
            .query::<&C>()
            .iter()
            .filter_map(|(entity, _)| self.id_map.get_by_right(&entity).copied())
            .collect();
        ids.sort();
        ids
    }

    pub fn get_id(&self, name: &str) -> Option<EntityId> {
        self.name_map.get(name).copied()
    }

    pub fn get_name(&self, id: EntityId) -> Option<&str> {
        self.name_map
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.id_map.contains_left(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.name_map.len()
    }

    pub fn clear(&mut self) {
        self.world.clear();
        self.id_map.clear();
        self.name_map.clear();
    }

    fn entity(&self, id: EntityId) -> Result<hecs::Entity> {
        self.id_map
            .get_by_left(&id)
            .copied()
            .ok_or_else(|| EmberError::EntityNotFound(id.to_string()))
    }
}

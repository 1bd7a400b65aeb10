//! The entity store the command engine runs against: a named `bevy_ecs` world plus the
//! component registry that says which types pickers and references may name.

pub mod buffer;
pub mod lookup;
pub mod registry;

pub use buffer::{BufferScope, DeferredBuffer, MutationBuffer, ParallelWriter};
pub use lookup::{BufferLookup, ComponentLookup, DynamicBuffer};
pub use registry::{ComponentInfo, ComponentKind, ComponentRegistry};

use std::sync::Arc;

use bevy_ecs::bundle::Bundle;
use bevy_ecs::prelude::{Component, Entity, World};
use bevy_reflect::PartialReflect;

use crate::error::StoreError;
use crate::events::EventBusHandle;
use crate::value::TypeKey;

/// Optional human-readable name used when listing entities.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct EntityName(pub String);

pub fn entity_id_label(entity: Entity) -> String {
    format!("{}:{}", entity.index(), entity.generation())
}

pub struct Store {
    name: String,
    pub world: World,
    components: Arc<ComponentRegistry>,
    events: EventBusHandle,
}

impl Store {
    pub fn new(name: impl Into<String>, components: Arc<ComponentRegistry>) -> Self {
        Self { name: name.into(), world: World::new(), components, events: EventBusHandle::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn shared_components(&self) -> Arc<ComponentRegistry> {
        Arc::clone(&self.components)
    }

    pub fn events(&self) -> &EventBusHandle {
        &self.events
    }

    pub fn contains(&self, entity: Entity) -> bool {
        entity != Entity::PLACEHOLDER && self.world.get_entity(entity).is_ok()
    }

    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        self.world.spawn(bundle).id()
    }

    pub fn spawn_named<B: Bundle>(&mut self, name: &str, bundle: B) -> Entity {
        self.world.spawn((EntityName(name.to_string()), bundle)).id()
    }

    pub fn entity_name(&self, entity: Entity) -> Option<&str> {
        self.world.get::<EntityName>(entity).map(|name| name.0.as_str())
    }

    /// `"{name} (index:generation)"`, or `"Entity (index:generation)"` for unnamed entities.
    pub fn entity_label(&self, entity: Entity) -> String {
        let name = self.entity_name(entity).unwrap_or("Entity");
        format!("{name} ({})", entity_id_label(entity))
    }

    /// Every live entity, sorted.
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.world.iter_entities().map(|entity| entity.id()).collect();
        entities.sort();
        entities
    }

    pub fn find_by_name(&self, name: &str) -> Option<Entity> {
        self.entities().into_iter().find(|entity| self.entity_name(*entity) == Some(name))
    }

    fn require_alive(&self, entity: Entity) -> Result<(), StoreError> {
        if self.contains(entity) {
            Ok(())
        } else {
            Err(StoreError::MissingEntity { store: self.name.clone(), entity: entity_id_label(entity) })
        }
    }

    pub fn has_component(&self, entity: Entity, key: TypeKey) -> Result<bool, StoreError> {
        let info = self.components.require(key)?;
        Ok(self.contains(entity) && info.contains(&self.world, entity))
    }

    pub fn read_component(&self, entity: Entity, key: TypeKey) -> Result<Box<dyn PartialReflect>, StoreError> {
        let info = self.components.require(key)?;
        self.require_alive(entity)?;
        info.read(&self.world, entity)
            .ok_or(StoreError::MissingComponent { entity: self.entity_label(entity), type_name: key.name() })
    }

    pub fn write_component(
        &mut self,
        entity: Entity,
        key: TypeKey,
        value: &dyn PartialReflect,
    ) -> Result<(), StoreError> {
        let info = *self.components.require(key)?;
        self.require_alive(entity)?;
        info.write(&mut self.world, entity, value)
    }

    pub fn insert_component(
        &mut self,
        entity: Entity,
        key: TypeKey,
        value: &dyn PartialReflect,
    ) -> Result<(), StoreError> {
        let info = *self.components.require(key)?;
        self.require_alive(entity)?;
        info.insert(&mut self.world, entity, value)
    }

    /// Short names of the registered components present on `entity`, in registry order.
    pub fn component_names(&self, entity: Entity) -> Vec<&'static str> {
        if !self.contains(entity) {
            return Vec::new();
        }
        self.components.iter().filter(|info| info.contains(&self.world, entity)).map(ComponentInfo::short_name).collect()
    }
}

/// Live stores, one of which may be selected as current.
#[derive(Default)]
pub struct StoreRegistry {
    stores: Vec<Store>,
    selected: Option<usize>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a store; the first store added becomes the selection.
    pub fn add(&mut self, store: Store) -> &mut Store {
        let index = self.insert(store);
        if self.selected.is_none() {
            self.selected = Some(index);
        }
        &mut self.stores[index]
    }

    /// Adds a store and selects it.
    pub fn add_selected(&mut self, store: Store) -> &mut Store {
        let index = self.insert(store);
        self.selected = Some(index);
        &mut self.stores[index]
    }

    fn insert(&mut self, store: Store) -> usize {
        if let Some(existing) = self.stores.iter().position(|s| s.name == store.name) {
            log::warn!("[store] replacing store '{}'", store.name);
            self.stores[existing] = store;
            return existing;
        }
        self.stores.push(store);
        self.stores.len() - 1
    }

    pub fn names(&self) -> Vec<&str> {
        self.stores.iter().map(Store::name).collect()
    }

    pub fn select(&mut self, name: &str) -> Result<(), StoreError> {
        let index =
            self.stores.iter().position(|s| s.name == name).ok_or_else(|| StoreError::UnknownStore(name.to_string()))?;
        self.selected = Some(index);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&Store> {
        self.selected.and_then(|index| self.stores.get(index))
    }

    pub fn selected_mut(&mut self) -> Option<&mut Store> {
        self.selected.and_then(|index| self.stores.get_mut(index))
    }

    pub fn get(&self, name: &str) -> Option<&Store> {
        self.stores.iter().find(|s| s.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Store> {
        self.stores.iter_mut().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Component, Debug, Clone, Copy, PartialEq)]
    struct Flag;

    #[test]
    fn labels_fall_back_to_entity() {
        let mut store = Store::new("Default", Arc::new(ComponentRegistry::new()));
        let named = store.spawn_named("Player", Flag);
        let unnamed = store.spawn(Flag);
        assert_eq!(store.entity_label(named), format!("Player ({}:{})", named.index(), named.generation()));
        assert!(store.entity_label(unnamed).starts_with("Entity ("));
        assert_eq!(store.find_by_name("Player"), Some(named));
    }

    #[test]
    fn stale_entities_are_not_contained() {
        let mut store = Store::new("Default", Arc::new(ComponentRegistry::new()));
        let entity = store.spawn(Flag);
        assert!(store.contains(entity));
        store.world.despawn(entity);
        assert!(!store.contains(entity));
        assert!(!store.contains(Entity::PLACEHOLDER));
    }

    #[test]
    fn first_store_is_selected() {
        let components = Arc::new(ComponentRegistry::new());
        let mut stores = StoreRegistry::new();
        stores.add(Store::new("Editor", components.clone()));
        stores.add(Store::new("Game", components));
        assert_eq!(stores.selected().map(Store::name), Some("Editor"));
        stores.select("Game").expect("game exists");
        assert_eq!(stores.selected().map(Store::name), Some("Game"));
        assert_eq!(stores.select("Missing"), Err(StoreError::UnknownStore("Missing".into())));
        assert_eq!(stores.names(), vec!["Editor", "Game"]);
    }
}

use std::collections::BTreeMap;

use bevy_ecs::component::{Component, ComponentId};
use bevy_ecs::prelude::{Entity, World};
use bevy_reflect::{FromReflect, PartialReflect};

use super::lookup::DynamicBuffer;
use crate::error::{QueryError, StoreError};
use crate::value::{ParamValue, TypeKey, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Component,
    Buffer,
}

/// Type-erased access to one registered component (or buffer element) type.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    key: TypeKey,
    kind: ComponentKind,
    value_type: Option<ValueType>,
    component_id: fn(&mut World) -> ComponentId,
    contains: fn(&World, Entity) -> bool,
    read: fn(&World, Entity) -> Option<Box<dyn PartialReflect>>,
    write: fn(&mut World, Entity, &dyn PartialReflect) -> Result<(), StoreError>,
    insert: fn(&mut World, Entity, &dyn PartialReflect) -> Result<(), StoreError>,
}

impl ComponentInfo {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn short_name(&self) -> &'static str {
        self.key.short_name()
    }

    /// Present for components only; buffers are never edited as a single value.
    pub fn value_type(&self) -> Option<&ValueType> {
        self.value_type.as_ref()
    }

    pub fn component_id(&self, world: &mut World) -> ComponentId {
        (self.component_id)(world)
    }

    pub fn contains(&self, world: &World, entity: Entity) -> bool {
        (self.contains)(world, entity)
    }

    pub fn read(&self, world: &World, entity: Entity) -> Option<Box<dyn PartialReflect>> {
        (self.read)(world, entity)
    }

    pub fn write(&self, world: &mut World, entity: Entity, value: &dyn PartialReflect) -> Result<(), StoreError> {
        (self.write)(world, entity, value)
    }

    /// Adds the component to `entity`, replacing any existing one.
    pub fn insert(&self, world: &mut World, entity: Entity, value: &dyn PartialReflect) -> Result<(), StoreError> {
        (self.insert)(world, entity, value)
    }
}

fn read_component<T: Component + ParamValue>(world: &World, entity: Entity) -> Option<Box<dyn PartialReflect>> {
    world.get::<T>(entity).map(|value| Box::new(value.clone()) as Box<dyn PartialReflect>)
}

// `try_apply` leaves fields hidden from reflection untouched on the stored component.
fn write_component<T: Component + ParamValue>(
    world: &mut World,
    entity: Entity,
    value: &dyn PartialReflect,
) -> Result<(), StoreError> {
    let type_name = std::any::type_name::<T>();
    let mut component = world
        .get_mut::<T>(entity)
        .ok_or_else(|| StoreError::MissingComponent { entity: format!("{entity}"), type_name })?;
    component.try_apply(value).map_err(|err| StoreError::Rejected { type_name, reason: err.to_string() })
}

fn insert_component<T: Component + ParamValue>(
    world: &mut World,
    entity: Entity,
    value: &dyn PartialReflect,
) -> Result<(), StoreError> {
    let type_name = std::any::type_name::<T>();
    let typed = value
        .try_downcast_ref::<T>()
        .cloned()
        .or_else(|| T::from_reflect(value))
        .ok_or_else(|| StoreError::Rejected { type_name, reason: format!("expected {type_name}") })?;
    let mut target = world
        .get_entity_mut(entity)
        .map_err(|_| StoreError::MissingComponent { entity: format!("{entity}"), type_name })?;
    target.insert(typed);
    Ok(())
}

fn read_unsupported(_: &World, _: Entity) -> Option<Box<dyn PartialReflect>> {
    None
}

fn write_unsupported(_: &mut World, _: Entity, _: &dyn PartialReflect) -> Result<(), StoreError> {
    Err(StoreError::Rejected { type_name: "buffer", reason: "buffers are written through their accessor".into() })
}

/// The component and buffer types a store recognises. Picker and requirement types are
/// validated against this table before any query reaches the world.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    entries: BTreeMap<TypeKey, ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Component + ParamValue>(&mut self) -> &mut Self {
        let key = TypeKey::of::<T>();
        self.entries.insert(
            key,
            ComponentInfo {
                key,
                kind: ComponentKind::Component,
                value_type: Some(ValueType::of::<T>()),
                component_id: |world| world.register_component::<T>(),
                contains: |world, entity| world.get::<T>(entity).is_some(),
                read: read_component::<T>,
                write: write_component::<T>,
                insert: insert_component::<T>,
            },
        );
        self
    }

    /// Registers `DynamicBuffer<E>` under its element type `E`.
    pub fn register_buffer<E: Send + Sync + 'static>(&mut self) -> &mut Self {
        let key = TypeKey::of::<E>();
        self.entries.insert(
            key,
            ComponentInfo {
                key,
                kind: ComponentKind::Buffer,
                value_type: None,
                component_id: |world| world.register_component::<DynamicBuffer<E>>(),
                contains: |world, entity| world.get::<DynamicBuffer<E>>(entity).is_some(),
                read: read_unsupported,
                write: write_unsupported,
                insert: write_unsupported,
            },
        );
        self
    }

    pub fn get(&self, key: TypeKey) -> Option<&ComponentInfo> {
        self.entries.get(&key)
    }

    pub fn require(&self, key: TypeKey) -> Result<&ComponentInfo, QueryError> {
        self.entries.get(&key).ok_or(QueryError::InvalidComponentType { type_name: key.name() })
    }

    /// Lookup by unqualified type name, as written in fixtures.
    pub fn find(&self, short_name: &str) -> Option<&ComponentInfo> {
        self.entries.values().find(|info| info.short_name() == short_name)
    }

    pub fn is_registered(&self, key: TypeKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_reflect::Reflect;
    use serde::{Deserialize, Serialize};

    #[derive(Component, Reflect, Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Health {
        current: i32,
        #[reflect(ignore)]
        cached: i32,
    }

    #[derive(Clone, Debug)]
    struct Waypoint;

    #[test]
    fn unregistered_types_are_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Health>().register_buffer::<Waypoint>();
        assert!(registry.require(TypeKey::of::<Health>()).is_ok());
        assert_eq!(registry.require(TypeKey::of::<Waypoint>()).map(|info| info.kind()), Ok(ComponentKind::Buffer));
        let err = registry.require(TypeKey::of::<String>()).err();
        assert!(matches!(err, Some(QueryError::InvalidComponentType { .. })));
    }

    #[test]
    fn writes_apply_reflected_fields_only() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Health>();
        let mut world = World::new();
        let entity = world.spawn(Health { current: 3, cached: 42 }).id();
        let info = *registry.require(TypeKey::of::<Health>()).expect("registered");

        let written = Health { current: 10, cached: 0 };
        info.write(&mut world, entity, &written).expect("write succeeds");
        let stored = world.get::<Health>(entity).expect("component present");
        assert_eq!(stored.current, 10);
        assert_eq!(stored.cached, 42, "hidden field must not be overwritten");

        let read = info.read(&world, entity).expect("readable");
        assert_eq!(Health::from_reflect(&*read).map(|h| h.current), Some(10));

        let bare = world.spawn_empty().id();
        assert!(!info.contains(&world, bare));
        assert!(matches!(info.write(&mut world, bare, &written), Err(StoreError::MissingComponent { .. })));
    }
}

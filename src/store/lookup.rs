use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use bevy_ecs::component::Component;
use bevy_ecs::prelude::{Entity, Mut, World};

use crate::error::AccessError;

/// Variable-length per-entity storage, registered under its element type.
#[derive(Component, Debug, Clone)]
pub struct DynamicBuffer<E: Send + Sync + 'static> {
    elements: Vec<E>,
}

impl<E: Send + Sync + 'static> Default for DynamicBuffer<E> {
    fn default() -> Self {
        Self { elements: Vec::new() }
    }
}

impl<E: Send + Sync + 'static> DynamicBuffer<E> {
    pub fn new(elements: Vec<E>) -> Self {
        Self { elements }
    }

    pub fn push(&mut self, element: E) {
        self.elements.push(element);
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    pub fn as_slice(&self) -> &[E] {
        &self.elements
    }
}

impl<E: Send + Sync + 'static> Deref for DynamicBuffer<E> {
    type Target = Vec<E>;

    fn deref(&self) -> &Self::Target {
        &self.elements
    }
}

impl<E: Send + Sync + 'static> DerefMut for DynamicBuffer<E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.elements
    }
}

impl<E: Send + Sync + 'static> FromIterator<E> for DynamicBuffer<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self { elements: iter.into_iter().collect() }
    }
}

enum WorldAccess<'w> {
    Read(&'w World),
    Write(&'w mut World),
}

impl WorldAccess<'_> {
    fn world(&self) -> &World {
        match self {
            WorldAccess::Read(world) => *world,
            WorldAccess::Write(world) => &**world,
        }
    }

    fn world_mut(&mut self) -> Option<&mut World> {
        match self {
            WorldAccess::Read(_) => None,
            WorldAccess::Write(world) => Some(&mut **world),
        }
    }
}

/// Random access to one component type across all entities of a store for the
/// duration of one command call.
pub struct ComponentLookup<'w, T: Component> {
    param: &'w str,
    access: WorldAccess<'w>,
    _marker: PhantomData<fn() -> T>,
}

impl<'w, T: Component> ComponentLookup<'w, T> {
    pub(crate) fn read_only(param: &'w str, world: &'w World) -> Self {
        Self { param, access: WorldAccess::Read(world), _marker: PhantomData }
    }

    pub(crate) fn read_write(param: &'w str, world: &'w mut World) -> Self {
        Self { param, access: WorldAccess::Write(world), _marker: PhantomData }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.access, WorldAccess::Read(_))
    }

    pub fn has_component(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.access.world().get::<T>(entity)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Result<Option<Mut<'_, T>>, AccessError> {
        let param = self.param;
        let world = self.access.world_mut().ok_or_else(|| AccessError::ReadOnly { param: param.to_string() })?;
        Ok(world.get_mut::<T>(entity))
    }
}

/// Like [`ComponentLookup`], over the [`DynamicBuffer`] of element type `E`.
pub struct BufferLookup<'w, E: Send + Sync + 'static> {
    param: &'w str,
    access: WorldAccess<'w>,
    _marker: PhantomData<fn() -> E>,
}

impl<'w, E: Send + Sync + 'static> BufferLookup<'w, E> {
    pub(crate) fn read_only(param: &'w str, world: &'w World) -> Self {
        Self { param, access: WorldAccess::Read(world), _marker: PhantomData }
    }

    pub(crate) fn read_write(param: &'w str, world: &'w mut World) -> Self {
        Self { param, access: WorldAccess::Write(world), _marker: PhantomData }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.access, WorldAccess::Read(_))
    }

    pub fn has_buffer(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    pub fn get(&self, entity: Entity) -> Option<&[E]> {
        self.access.world().get::<DynamicBuffer<E>>(entity).map(DynamicBuffer::as_slice)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Result<Option<Mut<'_, DynamicBuffer<E>>>, AccessError> {
        let param = self.param;
        let world = self.access.world_mut().ok_or_else(|| AccessError::ReadOnly { param: param.to_string() })?;
        Ok(world.get_mut::<DynamicBuffer<E>>(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Component, Debug, Clone, Copy, PartialEq)]
    struct Speed(f32);

    #[test]
    fn read_only_lookup_refuses_writes() {
        let mut world = World::new();
        let entity = world.spawn(Speed(2.0)).id();
        {
            let mut lookup = ComponentLookup::<Speed>::read_only("speeds", &world);
            assert!(lookup.has_component(entity));
            assert_eq!(lookup.get(entity), Some(&Speed(2.0)));
            assert!(matches!(lookup.get_mut(entity), Err(AccessError::ReadOnly { .. })));
        }
        {
            let mut lookup = ComponentLookup::<Speed>::read_write("speeds", &mut world);
            let mut speed = lookup.get_mut(entity).expect("writable").expect("present");
            speed.0 = 5.0;
        }
        assert_eq!(world.get::<Speed>(entity), Some(&Speed(5.0)));
    }

    #[test]
    fn buffer_lookup_reads_elements() {
        let mut world = World::new();
        let entity = world.spawn(DynamicBuffer::new(vec![1_u32, 2, 3])).id();
        let empty = world.spawn_empty().id();
        let mut lookup = BufferLookup::<u32>::read_write("items", &mut world);
        assert_eq!(lookup.get(entity), Some(&[1, 2, 3][..]));
        assert!(!lookup.has_buffer(empty));
        lookup.get_mut(entity).expect("writable").expect("present").push(4);
        assert_eq!(lookup.get(entity).map(<[u32]>::len), Some(4));
    }
}

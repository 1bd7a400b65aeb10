//! Logical entity references shared by several parameters of one command.

use std::collections::{BTreeMap, BTreeSet};

use bevy_ecs::prelude::Entity;
use bevy_reflect::PartialReflect;

use crate::command::{Binding, ClassifiedSignature};
use crate::error::{QueryError, StoreError, ValueError};
use crate::picker::{build_from_desc, EntityQueryDesc};
use crate::store::{entity_id_label, Store};
use crate::value::TypeKey;

/// Reference name to the component and buffer types an entity needs to be offered for it.
pub type Requirements = BTreeMap<String, BTreeSet<TypeKey>>;

/// Union, per reference name, of each participating parameter's own type and the extra
/// types its declaration adds.
pub fn requirements_for(signature: &ClassifiedSignature) -> Requirements {
    let mut requirements = Requirements::new();
    for param in signature.iter() {
        let Binding::Reference { reference, component, .. } = &param.binding else {
            continue;
        };
        let set = requirements.entry(reference.clone()).or_default();
        set.insert(*component);
        if let Some(decl) = param.decl.reference() {
            set.extend(decl.extra.iter().copied());
        }
    }
    requirements
}

/// Entities carrying every type required for `reference`, sorted.
pub fn resolve(store: &mut Store, reference: &str, requirements: &Requirements) -> Result<Vec<Entity>, QueryError> {
    let empty = BTreeSet::new();
    let required = requirements.get(reference).unwrap_or(&empty);
    let mut query = build_from_desc(store, EntityQueryDesc::requiring(required))?;
    query.evaluate(store)
}

#[derive(Debug)]
struct CachedComponent {
    entity: Entity,
    value: Box<dyn PartialReflect>,
}

#[derive(Debug, Default)]
struct ReferenceSlot {
    entity: Option<Entity>,
    cache: BTreeMap<TypeKey, CachedComponent>,
}

/// Selections and edited component values for every reference of one command.
#[derive(Debug, Default)]
pub struct ReferenceState {
    requirements: Requirements,
    slots: BTreeMap<String, ReferenceSlot>,
}

impl ReferenceState {
    pub fn new(requirements: Requirements) -> Self {
        Self { requirements, slots: BTreeMap::new() }
    }

    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.requirements.keys().map(String::as_str)
    }

    pub fn selected(&self, reference: &str) -> Option<Entity> {
        self.slots.get(reference).and_then(|slot| slot.entity)
    }

    /// Records the entity chosen for `reference`. Choosing a different entity drops
    /// every cached edit made for the previous one.
    pub fn select(&mut self, reference: &str, entity: Option<Entity>) {
        let entity = entity.filter(|entity| *entity != Entity::PLACEHOLDER);
        let slot = self.slots.entry(reference.to_string()).or_default();
        if slot.entity != entity {
            if !slot.cache.is_empty() {
                log::debug!("[reference] {reference}: selection changed, dropping {} cached edits", slot.cache.len());
            }
            slot.cache.clear();
            slot.entity = entity;
        }
    }

    pub fn edit_component(
        &mut self,
        reference: &str,
        component: TypeKey,
        value: Box<dyn PartialReflect>,
    ) -> Result<(), ValueError> {
        let unselected = || ValueError::NoReferenceSelected { reference: reference.to_string() };
        let slot = self.slots.get_mut(reference).ok_or_else(unselected)?;
        let entity = slot.entity.ok_or_else(unselected)?;
        slot.cache.insert(component, CachedComponent { entity, value });
        Ok(())
    }

    /// Cached edit for (`reference`, `component`), if it was made for the current selection.
    pub fn cached(&self, reference: &str, component: TypeKey) -> Option<&dyn PartialReflect> {
        let slot = self.slots.get(reference)?;
        let cached = slot.cache.get(&component)?;
        (Some(cached.entity) == slot.entity).then_some(&*cached.value)
    }

    /// The selected entity when it is still alive in `store`. A dead selection counts as
    /// no selection so the parameter falls back to manual values.
    pub fn resolved_entity(&self, reference: &str, store: &Store) -> Option<Entity> {
        let entity = self.selected(reference)?;
        if store.contains(entity) {
            Some(entity)
        } else {
            log::warn!(
                "[reference] {reference}: entity {} no longer exists in '{}'; using manual values",
                entity_id_label(entity),
                store.name()
            );
            None
        }
    }

    /// Value of `component` for the resolved entity: the cached edit when it belongs to
    /// that entity, else a fresh read. `Ok(None)` means the reference is unresolved.
    pub fn resolve_component(
        &self,
        reference: &str,
        component: TypeKey,
        store: &Store,
    ) -> Result<Option<Box<dyn PartialReflect>>, StoreError> {
        let Some(entity) = self.resolved_entity(reference, store) else {
            return Ok(None);
        };
        if let Some(cached) = self.cached(reference, component) {
            return Ok(Some(cached.clone_value()));
        }
        store.read_component(entity, component).map(Some)
    }

    /// Drops the edit for (`reference`, `component`) so the next bind reads the entity.
    pub fn forget(&mut self, reference: &str, component: TypeKey) {
        if let Some(slot) = self.slots.get_mut(reference) {
            slot.cache.remove(&component);
        }
    }

    pub fn clear_cache(&mut self, reference: &str) {
        if let Some(slot) = self.slots.get_mut(reference) {
            slot.cache.clear();
        }
    }
}

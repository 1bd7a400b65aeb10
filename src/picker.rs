//! Declarative entity filters and their translation into `bevy_ecs` queries.

use bevy_ecs::component::ComponentId;
use bevy_ecs::prelude::{Entity, World};
use bevy_ecs::query::{QueryBuilder, QueryState};
use bevy_ecs::world::WorldId;
use bevy_reflect::Reflect;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::QueryError;
use crate::store::{ComponentRegistry, Store};
use crate::value::TypeKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Reflect, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentAccess {
    #[default]
    ReadOnly,
    ReadWrite,
    Exclude,
}

impl ComponentAccess {
    pub fn label(self) -> &'static str {
        match self {
            ComponentAccess::ReadOnly => "read",
            ComponentAccess::ReadWrite => "write",
            ComponentAccess::Exclude => "exclude",
        }
    }
}

/// Required (`all`), alternative (`any`) and excluded (`none`) component sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityPickerSpec {
    all: Vec<TypeKey>,
    all_access: ComponentAccess,
    any: Vec<TypeKey>,
    any_access: ComponentAccess,
    none: Vec<TypeKey>,
}

impl EntityPickerSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: 'static>(self) -> Self {
        self.with_key(TypeKey::of::<T>())
    }

    pub fn with_any<T: 'static>(mut self) -> Self {
        self.any.push(TypeKey::of::<T>());
        self
    }

    pub fn without<T: 'static>(self) -> Self {
        self.without_key(TypeKey::of::<T>())
    }

    pub fn with_key(mut self, key: TypeKey) -> Self {
        self.all.push(key);
        self
    }

    pub fn without_key(mut self, key: TypeKey) -> Self {
        self.none.push(key);
        self
    }

    pub fn all_access(mut self, access: ComponentAccess) -> Self {
        self.all_access = access;
        self
    }

    pub fn any_access(mut self, access: ComponentAccess) -> Self {
        self.any_access = access;
        self
    }

    pub fn required(&self) -> &[TypeKey] {
        &self.all
    }

    pub fn any_of(&self) -> &[TypeKey] {
        &self.any
    }

    pub fn excluded(&self) -> &[TypeKey] {
        &self.none
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty() && self.none.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessTerm {
    pub key: TypeKey,
    pub access: ComponentAccess,
}

/// Access tokens derived from a picker spec. An `Exclude` token in the required or any
/// set is moved to the excluded set, so excluded types always win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityQueryDesc {
    pub all: SmallVec<[AccessTerm; 4]>,
    pub any: SmallVec<[AccessTerm; 4]>,
    pub none: SmallVec<[TypeKey; 4]>,
}

impl EntityQueryDesc {
    pub fn universal() -> Self {
        Self::default()
    }

    pub fn from_spec(spec: &EntityPickerSpec) -> Self {
        let mut desc = Self::default();
        for &key in &spec.all {
            desc.push_term(key, spec.all_access, false);
        }
        for &key in &spec.any {
            desc.push_term(key, spec.any_access, true);
        }
        for &key in &spec.none {
            desc.push_term(key, ComponentAccess::Exclude, false);
        }
        desc
    }

    /// Required-only query over `keys`, as used for reference candidates.
    pub fn requiring<'a>(keys: impl IntoIterator<Item = &'a TypeKey>) -> Self {
        let mut desc = Self::default();
        for &key in keys {
            desc.push_term(key, ComponentAccess::ReadOnly, false);
        }
        desc
    }

    fn push_term(&mut self, key: TypeKey, access: ComponentAccess, any: bool) {
        if access == ComponentAccess::Exclude {
            if !self.none.contains(&key) {
                self.none.push(key);
            }
            return;
        }
        let terms = if any { &mut self.any } else { &mut self.all };
        if !terms.iter().any(|term| term.key == key) {
            terms.push(AccessTerm { key, access });
        }
    }

    pub fn is_universal(&self) -> bool {
        self.all.is_empty() && self.any.is_empty() && self.none.is_empty()
    }

    fn keys(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.all.iter().chain(self.any.iter()).map(|term| term.key).chain(self.none.iter().copied())
    }
}

/// A validated query bound to one store. Each evaluation reflects the store's current
/// contents.
pub struct EntityQuery {
    desc: EntityQueryDesc,
    store: String,
    world_id: WorldId,
    state: QueryState<Entity>,
}

impl EntityQuery {
    pub fn desc(&self) -> &EntityQueryDesc {
        &self.desc
    }

    pub fn evaluate(&mut self, store: &Store) -> Result<Vec<Entity>, QueryError> {
        if store.world.id() != self.world_id {
            return Err(QueryError::StoreMismatch { built_for: self.store.clone(), store: store.name().to_string() });
        }
        let mut entities: Vec<Entity> = self.state.iter(&store.world).collect();
        entities.sort();
        Ok(entities)
    }
}

/// Builds the query for `spec`, or the universal query when no spec is given. Every
/// named type must be registered with the store.
pub fn build_query(store: &mut Store, spec: Option<&EntityPickerSpec>) -> Result<EntityQuery, QueryError> {
    let desc = spec.map(EntityQueryDesc::from_spec).unwrap_or_default();
    build_from_desc(store, desc)
}

pub fn build_from_desc(store: &mut Store, desc: EntityQueryDesc) -> Result<EntityQuery, QueryError> {
    let components = store.shared_components();
    for key in desc.keys() {
        components.require(key)?;
    }
    log::debug!(
        "[picker] store '{}' all={:?} any={:?} none={:?}",
        store.name(),
        desc.all.iter().map(|t| format!("{}:{}", t.key, t.access.label())).collect::<Vec<_>>(),
        desc.any.iter().map(|t| format!("{}:{}", t.key, t.access.label())).collect::<Vec<_>>(),
        desc.none,
    );
    let world = &mut store.world;
    let all = component_ids(&components, world, desc.all.iter().map(|t| t.key));
    let any = component_ids(&components, world, desc.any.iter().map(|t| t.key));
    let none = component_ids(&components, world, desc.none.iter().copied());

    let state = {
        let mut builder = QueryBuilder::<Entity>::new(world);
        for id in &all {
            builder.with_id(*id);
        }
        for id in &none {
            builder.without_id(*id);
        }
        if !any.is_empty() {
            builder.or(|or| {
                for id in &any {
                    or.with_id(*id);
                }
            });
        }
        builder.build()
    };
    Ok(EntityQuery { desc, store: store.name().to_string(), world_id: store.world.id(), state })
}

fn component_ids(
    components: &ComponentRegistry,
    world: &mut World,
    keys: impl Iterator<Item = TypeKey>,
) -> SmallVec<[ComponentId; 4]> {
    keys.filter_map(|key| components.get(key)).map(|info| info.component_id(world)).collect()
}

/// Convenience for one-off evaluation.
pub fn query_entities(store: &mut Store, spec: Option<&EntityPickerSpec>) -> Result<Vec<Entity>, QueryError> {
    let mut query = build_query(store, spec)?;
    query.evaluate(store)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChoice {
    pub entity: Entity,
    pub label: String,
}

/// Entities a picker can offer, plus the current selection. `stale` is set when the
/// selection is no longer among the candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerChoices {
    pub choices: Vec<EntityChoice>,
    pub selected: Option<Entity>,
    pub stale: bool,
}

impl PickerChoices {
    pub fn new(store: &Store, candidates: Vec<Entity>, selected: Option<Entity>) -> Self {
        let selected = selected.filter(|entity| *entity != Entity::PLACEHOLDER);
        let stale = selected.is_some_and(|entity| !candidates.contains(&entity));
        let choices = candidates
            .into_iter()
            .map(|entity| EntityChoice { entity, label: store.entity_label(entity) })
            .collect();
        Self { choices, selected, stale }
    }

    pub fn selected_label(&self) -> String {
        match self.selected {
            None => "None".to_string(),
            Some(entity) => match self.choices.iter().find(|choice| choice.entity == entity) {
                Some(choice) => choice.label.clone(),
                None => format!("Missing ({}:{})", entity.index(), entity.generation()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::Component;
    use bevy_reflect::Reflect;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Component, Reflect, Default, Clone, Copy, Serialize, Deserialize)]
    struct Position;
    #[derive(Component, Reflect, Default, Clone, Copy, Serialize, Deserialize)]
    struct Static;
    #[derive(Component, Reflect, Default, Clone, Copy, Serialize, Deserialize)]
    struct Disabled;
    #[derive(Component, Reflect, Default, Clone, Copy, Serialize, Deserialize)]
    struct Glow;

    fn store() -> Store {
        let mut components = ComponentRegistry::new();
        components.register::<Position>().register::<Static>().register::<Disabled>();
        Store::new("Default", Arc::new(components))
    }

    #[test]
    fn required_and_excluded_sets_filter_entities() {
        let mut store = store();
        let e1 = store.spawn((Position, Static));
        let _e2 = store.spawn((Position, Static, Disabled));
        let _e3 = store.spawn(Position);
        let spec = EntityPickerSpec::new().with::<Position>().with::<Static>().without::<Disabled>();
        assert_eq!(query_entities(&mut store, Some(&spec)).expect("query"), vec![e1]);
    }

    #[test]
    fn required_set_order_does_not_matter() {
        let mut store = store();
        store.spawn((Position, Static));
        store.spawn(Static);
        store.spawn(Position);
        let ab = EntityPickerSpec::new().with::<Position>().with::<Static>();
        let ba = EntityPickerSpec::new().with::<Static>().with::<Position>();
        let left = query_entities(&mut store, Some(&ab)).expect("ab");
        let right = query_entities(&mut store, Some(&ba)).expect("ba");
        assert_eq!(left, right);
        assert_eq!(left.len(), 1);
    }

    #[test]
    fn exclusion_wins_over_any_and_access_modes() {
        let mut store = store();
        let keep = store.spawn(Static);
        store.spawn((Static, Disabled));
        let spec = EntityPickerSpec::new()
            .with_any::<Static>()
            .with_any::<Position>()
            .any_access(ComponentAccess::ReadWrite)
            .without::<Disabled>();
        assert_eq!(query_entities(&mut store, Some(&spec)).expect("query"), vec![keep]);

        let exclude_token = EntityPickerSpec::new().with::<Disabled>().all_access(ComponentAccess::Exclude);
        assert_eq!(query_entities(&mut store, Some(&exclude_token)).expect("query"), vec![keep]);
    }

    #[test]
    fn unregistered_types_fail_before_querying() {
        let mut store = store();
        let spec = EntityPickerSpec::new().with::<Glow>();
        let err = build_query(&mut store, Some(&spec)).err();
        assert!(matches!(err, Some(QueryError::InvalidComponentType { .. })));
    }

    #[test]
    fn queries_track_store_changes() {
        let mut store = store();
        let first = store.spawn(Position);
        let mut query = build_query(&mut store, None).expect("universal");
        assert_eq!(query.evaluate(&store).expect("eval"), vec![first]);
        let second = store.spawn((Position, Static));
        assert_eq!(query.evaluate(&store).expect("eval"), vec![first, second]);

        let other = Store::new("Other", Arc::new(ComponentRegistry::new()));
        assert!(matches!(query.evaluate(&other), Err(QueryError::StoreMismatch { .. })));
    }

    #[test]
    fn stale_selection_is_flagged() {
        let mut store = store();
        let gone = store.spawn(Position);
        let kept = store.spawn(Position);
        store.world.despawn(gone);
        let candidates = query_entities(&mut store, None).expect("query");
        let choices = PickerChoices::new(&store, candidates, Some(gone));
        assert!(choices.stale);
        assert!(choices.selected_label().starts_with("Missing"));
        let fresh = PickerChoices::new(&store, vec![kept], Some(kept));
        assert!(!fresh.stale);
    }
}

//! Turns a classified signature plus the command's value table into concrete arguments,
//! and exposes them to the command body through [`CallFrame`].

use bevy_ecs::component::Component;
use bevy_ecs::prelude::{Entity, Mut, World};
use bevy_reflect::{FromReflect, PartialReflect, Reflect};

use crate::command::{Binding, ClassifiedParam, Command, ContextKind, PassMode};
use crate::error::{AccessError, BindError, StoreError};
use crate::events::BufferKind;
use crate::store::{
    entity_id_label, BufferLookup, BufferScope, ComponentKind, ComponentLookup, DynamicBuffer, MutationBuffer,
    ParallelWriter, Store,
};
use crate::value::{TypeKey, ValueKinds, ValueType};

#[derive(Debug)]
pub enum BoundValue {
    Context(ContextKind),
    Accessor { component: TypeKey, kind: ComponentKind, read_only: bool },
    Value(Box<dyn PartialReflect>),
    Buffer { element: TypeKey, entity: Entity, read_only: bool },
}

/// Where a `ref`/`out` argument goes once the call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitTarget {
    None,
    ValueTable,
    Entity { reference: String, entity: Entity, component: TypeKey },
}

#[derive(Debug)]
pub struct BoundArgument {
    pub name: String,
    pub pass: PassMode,
    pub value_type: Option<ValueType>,
    pub value: BoundValue,
    pub commit: CommitTarget,
}

impl BoundArgument {
    pub fn writable(&self) -> bool {
        matches!(self.pass, PassMode::Ref | PassMode::Out)
    }

    pub fn value(&self) -> Option<&dyn PartialReflect> {
        match &self.value {
            BoundValue::Value(value) => Some(&**value),
            _ => None,
        }
    }
}

/// Arguments for one invocation plus the buffer scope the invoker must settle.
pub struct BoundCall {
    pub args: Vec<BoundArgument>,
    pub scope: Option<BufferScope>,
}

/// Builds the argument list for `command` against `store`. Nothing in the store is
/// modified; a failure here means the command is not called.
pub fn bind(command: &Command, store: Option<&Store>) -> Result<BoundCall, BindError> {
    let store = store.ok_or(BindError::NoStoreSelected)?;
    let signature = command.signature();

    let scope = match signature.context {
        Some(ContextKind::MutationBuffer) => {
            Some(BufferScope::allocate(command.display_name(), BufferKind::Plain, store.events().clone()))
        }
        Some(ContextKind::ParallelWriter) => {
            Some(BufferScope::allocate(command.display_name(), BufferKind::Parallel, store.events().clone()))
        }
        _ => None,
    };

    let mut args = Vec::with_capacity(signature.len());
    for param in signature.iter() {
        args.push(bind_param(command, store, param)?);
    }
    Ok(BoundCall { args, scope })
}

fn argument(param: &ClassifiedParam, value: BoundValue, commit: CommitTarget) -> BoundArgument {
    BoundArgument {
        name: param.name().to_string(),
        pass: param.pass(),
        value_type: param.binding.value_type(),
        value,
        commit,
    }
}

fn table_commit(param: &ClassifiedParam) -> CommitTarget {
    if param.commits_back() {
        CommitTarget::ValueTable
    } else {
        CommitTarget::None
    }
}

fn bind_param(command: &Command, store: &Store, param: &ClassifiedParam) -> Result<BoundArgument, BindError> {
    let name = param.name();
    match &param.binding {
        Binding::Context(kind) => Ok(argument(param, BoundValue::Context(*kind), CommitTarget::None)),
        Binding::Accessor { component, kind, read_only } => {
            require_registered(store, name, *component)?;
            Ok(argument(
                param,
                BoundValue::Accessor { component: *component, kind: *kind, read_only: *read_only },
                CommitTarget::None,
            ))
        }
        Binding::Reference { reference, component, kind, value_type, read_only } => {
            require_registered(store, name, *component)?;
            let references = command.references();
            match (references.resolved_entity(reference, store), kind, value_type) {
                (Some(entity), ComponentKind::Buffer, _) => {
                    if !store.has_component(entity, *component).unwrap_or(false) {
                        return Err(missing_component(name, reference, store, entity, *component));
                    }
                    let value = BoundValue::Buffer { element: *component, entity, read_only: *read_only };
                    Ok(argument(param, value, CommitTarget::None))
                }
                (Some(entity), ComponentKind::Component, Some(ty)) => {
                    let value = if param.pass() == PassMode::Out {
                        if !store.has_component(entity, *component).unwrap_or(false) {
                            return Err(missing_component(name, reference, store, entity, *component));
                        }
                        ty.default_value()?
                    } else {
                        let raw = references.resolve_component(reference, *component, store).map_err(|err| match err {
                            StoreError::Query(source) => {
                                BindError::InvalidComponentType { param: name.to_string(), source }
                            }
                            _ => missing_component(name, reference, store, entity, *component),
                        })?;
                        match raw {
                            Some(raw) => ty.coerce(name, &*raw)?,
                            None => ty.default_value()?,
                        }
                    };
                    let commit = if param.commits_back() {
                        CommitTarget::Entity { reference: reference.clone(), entity, component: *component }
                    } else {
                        CommitTarget::None
                    };
                    Ok(argument(param, BoundValue::Value(value), commit))
                }
                (None, ComponentKind::Buffer, _) => {
                    let value =
                        BoundValue::Buffer { element: *component, entity: Entity::PLACEHOLDER, read_only: *read_only };
                    Ok(argument(param, value, CommitTarget::None))
                }
                (None, ComponentKind::Component, Some(ty)) => {
                    let value = manual_value(command, param, ty)?;
                    Ok(argument(param, BoundValue::Value(value), table_commit(param)))
                }
                (_, ComponentKind::Component, None) => Err(BindError::UnsupportedParameterType {
                    param: name.to_string(),
                    type_name: component.name(),
                    supported: ValueKinds::SUPPORTED,
                }),
            }
        }
        Binding::EntityPicker(_) => {
            let value = manual_value(command, param, &ValueType::entity())?;
            Ok(argument(param, BoundValue::Value(value), table_commit(param)))
        }
        Binding::Value(ty) => {
            let value = manual_value(command, param, ty)?;
            Ok(argument(param, BoundValue::Value(value), table_commit(param)))
        }
        Binding::Unsupported { type_name } => Err(BindError::UnsupportedParameterType {
            param: name.to_string(),
            type_name,
            supported: ValueKinds::SUPPORTED,
        }),
    }
}

fn require_registered(store: &Store, param: &str, component: TypeKey) -> Result<(), BindError> {
    store
        .components()
        .require(component)
        .map(|_| ())
        .map_err(|source| BindError::InvalidComponentType { param: param.to_string(), source })
}

fn missing_component(param: &str, reference: &str, store: &Store, entity: Entity, component: TypeKey) -> BindError {
    BindError::MissingComponent {
        param: param.to_string(),
        reference: reference.to_string(),
        entity: store.entity_label(entity),
        type_name: component.name(),
    }
}

/// Value-table binding. `out` slots always start from the type default; everything
/// else binds what the command would show as its current value.
fn manual_value(command: &Command, param: &ClassifiedParam, ty: &ValueType) -> Result<Box<dyn PartialReflect>, BindError> {
    if param.pass() == PassMode::Out {
        return Ok(ty.default_value()?);
    }
    Ok(command.current_value(param.name())?)
}

/// The view a command body gets of its arguments and of the store it runs against.
pub struct CallFrame<'a> {
    command: &'a str,
    context: Option<ContextKind>,
    store: &'a mut Store,
    args: &'a mut [BoundArgument],
    scope: Option<&'a mut BufferScope>,
}

impl<'a> CallFrame<'a> {
    pub(crate) fn new(
        command: &'a str,
        context: Option<ContextKind>,
        store: &'a mut Store,
        args: &'a mut [BoundArgument],
        scope: Option<&'a mut BufferScope>,
    ) -> Self {
        Self { command, context, store, args, scope }
    }

    pub fn command_name(&self) -> &str {
        self.command
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    fn arg(&self, name: &str) -> Result<&BoundArgument, AccessError> {
        self.args
            .iter()
            .find(|arg| arg.name == name)
            .ok_or_else(|| AccessError::UnknownArgument(name.to_string()))
    }

    fn arg_mut(&mut self, name: &str) -> Result<&mut BoundArgument, AccessError> {
        self.args
            .iter_mut()
            .find(|arg| arg.name == name)
            .ok_or_else(|| AccessError::UnknownArgument(name.to_string()))
    }

    pub fn get<T: Reflect + FromReflect + Clone>(&self, name: &str) -> Result<T, AccessError> {
        let arg = self.arg(name)?;
        let value = arg.value().ok_or_else(|| AccessError::WrongBinding { param: name.to_string(), expected: "value" })?;
        value.try_downcast_ref::<T>().cloned().or_else(|| T::from_reflect(value)).ok_or_else(|| {
            AccessError::WrongType {
                param: name.to_string(),
                declared: arg.value_type.map_or("unknown", |ty| ty.name()),
                requested: std::any::type_name::<T>(),
            }
        })
    }

    /// Writes a `ref` or `out` argument.
    pub fn set<T: Reflect + FromReflect + Clone>(&mut self, name: &str, value: T) -> Result<(), AccessError> {
        let arg = self.arg_mut(name)?;
        if !arg.writable() {
            return Err(AccessError::NotWritable { param: name.to_string() });
        }
        let declared = arg.value_type.map(|ty| ty.key());
        if declared != Some(TypeKey::of::<T>()) {
            return Err(AccessError::WrongType {
                param: name.to_string(),
                declared: arg.value_type.map_or("unknown", |ty| ty.name()),
                requested: std::any::type_name::<T>(),
            });
        }
        arg.value = BoundValue::Value(Box::new(value));
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Result<Entity, AccessError> {
        self.get::<Entity>(name)
    }

    pub fn entity_label(&self, entity: Entity) -> String {
        self.store.entity_label(entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.store.contains(entity)
    }

    fn require_context(&self, allowed: &[ContextKind], what: &'static str) -> Result<(), AccessError> {
        match self.context {
            Some(kind) if allowed.contains(&kind) => Ok(()),
            _ => Err(AccessError::Unavailable(what)),
        }
    }

    /// The store itself, for commands whose first parameter asks for it.
    pub fn store(&self) -> Result<&Store, AccessError> {
        self.require_context(&[ContextKind::Store, ContextKind::EntityManager], "the store")?;
        Ok(self.store)
    }

    pub fn world(&self) -> Result<&World, AccessError> {
        self.require_context(&[ContextKind::Store, ContextKind::EntityManager], "the world")?;
        Ok(&self.store.world)
    }

    pub fn world_mut(&mut self) -> Result<&mut World, AccessError> {
        self.require_context(&[ContextKind::Store, ContextKind::EntityManager], "the world")?;
        Ok(&mut self.store.world)
    }

    fn accessor(&self, name: &str, component: TypeKey, kind: ComponentKind) -> Result<bool, AccessError> {
        match &self.arg(name)?.value {
            BoundValue::Accessor { component: bound, kind: bound_kind, read_only }
                if *bound == component && *bound_kind == kind =>
            {
                Ok(*read_only)
            }
            BoundValue::Accessor { .. } => Err(AccessError::WrongType {
                param: name.to_string(),
                declared: "another accessor type",
                requested: component.name(),
            }),
            _ => Err(AccessError::WrongBinding { param: name.to_string(), expected: "accessor" }),
        }
    }

    pub fn component_lookup<T: Component>(&self, name: &str) -> Result<ComponentLookup<'_, T>, AccessError> {
        self.accessor(name, TypeKey::of::<T>(), ComponentKind::Component)?;
        let param = self.arg(name)?.name.as_str();
        Ok(ComponentLookup::read_only(param, &self.store.world))
    }

    pub fn component_lookup_mut<T: Component>(&mut self, name: &str) -> Result<ComponentLookup<'_, T>, AccessError> {
        if self.accessor(name, TypeKey::of::<T>(), ComponentKind::Component)? {
            return Err(AccessError::ReadOnly { param: name.to_string() });
        }
        let param = self.args.iter().find(|arg| arg.name == name).map_or("", |arg| arg.name.as_str());
        Ok(ComponentLookup::read_write(param, &mut self.store.world))
    }

    pub fn buffer_lookup<E: Send + Sync + 'static>(&self, name: &str) -> Result<BufferLookup<'_, E>, AccessError> {
        self.accessor(name, TypeKey::of::<E>(), ComponentKind::Buffer)?;
        let param = self.arg(name)?.name.as_str();
        Ok(BufferLookup::read_only(param, &self.store.world))
    }

    pub fn buffer_lookup_mut<E: Send + Sync + 'static>(
        &mut self,
        name: &str,
    ) -> Result<BufferLookup<'_, E>, AccessError> {
        if self.accessor(name, TypeKey::of::<E>(), ComponentKind::Buffer)? {
            return Err(AccessError::ReadOnly { param: name.to_string() });
        }
        let param = self.args.iter().find(|arg| arg.name == name).map_or("", |arg| arg.name.as_str());
        Ok(BufferLookup::read_write(param, &mut self.store.world))
    }

    fn buffer_binding(&self, name: &str, element: TypeKey) -> Result<(Entity, bool), AccessError> {
        match &self.arg(name)?.value {
            BoundValue::Buffer { element: bound, entity, read_only } if *bound == element => Ok((*entity, *read_only)),
            BoundValue::Buffer { .. } => Err(AccessError::WrongType {
                param: name.to_string(),
                declared: "another buffer type",
                requested: element.name(),
            }),
            _ => Err(AccessError::WrongBinding { param: name.to_string(), expected: "buffer" }),
        }
    }

    /// Elements of a reference-bound buffer; empty while the reference is unresolved.
    pub fn buffer<E: Send + Sync + 'static>(&self, name: &str) -> Result<&[E], AccessError> {
        let (entity, _) = self.buffer_binding(name, TypeKey::of::<E>())?;
        Ok(self.store.world.get::<DynamicBuffer<E>>(entity).map(DynamicBuffer::as_slice).unwrap_or_default())
    }

    pub fn buffer_mut<E: Send + Sync + 'static>(&mut self, name: &str) -> Result<Mut<'_, DynamicBuffer<E>>, AccessError> {
        let (entity, read_only) = self.buffer_binding(name, TypeKey::of::<E>())?;
        if read_only {
            return Err(AccessError::ReadOnly { param: name.to_string() });
        }
        self.store.world.get_mut::<DynamicBuffer<E>>(entity).ok_or(AccessError::Unavailable("an unresolved buffer"))
    }

    pub fn commands(&mut self) -> Result<&mut MutationBuffer, AccessError> {
        self.scope
            .as_deref_mut()
            .and_then(BufferScope::mutation_buffer)
            .ok_or(AccessError::Unavailable("a mutation buffer"))
    }

    pub fn parallel_writer(&self) -> Result<ParallelWriter, AccessError> {
        self.scope
            .as_deref()
            .and_then(BufferScope::parallel_writer)
            .ok_or(AccessError::Unavailable("a parallel writer"))
    }

    pub fn describe(&self, entity: Entity) -> String {
        if self.store.contains(entity) {
            self.store.entity_label(entity)
        } else {
            format!("missing entity {}", entity_id_label(entity))
        }
    }
}

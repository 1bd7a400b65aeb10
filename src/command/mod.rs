//! Command registration, discovery and per-command state.

pub mod signature;

pub use signature::{classify, Binding, ClassifiedParam, ClassifiedSignature, ContextKind};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bevy_ecs::component::Component;
use bevy_reflect::{FromReflect, PartialReflect, Reflect};

use crate::binder::CallFrame;
use crate::config::CommandsConfig;
use crate::error::{ReflectError, ValueError};
use crate::invoke::RunOutcome;
use crate::picker::EntityPickerSpec;
use crate::reference::{requirements_for, ReferenceState, Requirements};
use crate::reflect::{self, FieldNode};
use crate::value::{short_type_name, ParamValue, TypeKey, ValueTable, ValueType};

pub type CommandResult = anyhow::Result<Option<Box<dyn PartialReflect>>>;

pub type CommandBody = Arc<dyn Fn(&mut CallFrame<'_>) -> CommandResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassMode {
    #[default]
    Value,
    In,
    Ref,
    Out,
}

impl PassMode {
    pub fn prefix(self) -> &'static str {
        match self {
            PassMode::Value => "",
            PassMode::In => "in ",
            PassMode::Ref => "ref ",
            PassMode::Out => "out ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclaredType {
    Store,
    EntityManager,
    MutationBuffer,
    ParallelWriter,
    ComponentLookup(TypeKey),
    BufferLookup(TypeKey),
    Buffer(TypeKey),
    Value(ValueType),
}

impl DeclaredType {
    pub fn type_name(&self) -> String {
        match self {
            DeclaredType::Store => "Store".to_string(),
            DeclaredType::EntityManager => "EntityManager".to_string(),
            DeclaredType::MutationBuffer => "MutationBuffer".to_string(),
            DeclaredType::ParallelWriter => "ParallelWriter".to_string(),
            DeclaredType::ComponentLookup(key) => format!("ComponentLookup<{}>", key.short_name()),
            DeclaredType::BufferLookup(key) => format!("BufferLookup<{}>", key.short_name()),
            DeclaredType::Buffer(key) => format!("Buffer<{}>", key.short_name()),
            DeclaredType::Value(ty) => ty.short_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDecl {
    pub name: String,
    pub extra: Vec<TypeKey>,
}

type DefaultFn = Arc<dyn Fn() -> Box<dyn PartialReflect> + Send + Sync>;

#[derive(Clone)]
pub struct ParamDecl {
    name: String,
    ty: DeclaredType,
    pass: PassMode,
    read_only: bool,
    picker: Option<EntityPickerSpec>,
    reference: Option<ReferenceDecl>,
    default: Option<DefaultFn>,
}

impl fmt::Debug for ParamDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamDecl")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("pass", &self.pass)
            .field("read_only", &self.read_only)
            .field("picker", &self.picker)
            .field("reference", &self.reference)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

impl ParamDecl {
    fn new(name: &str, ty: DeclaredType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            pass: PassMode::Value,
            read_only: false,
            picker: None,
            reference: None,
            default: None,
        }
    }

    pub fn store(name: &str) -> Self {
        Self::new(name, DeclaredType::Store)
    }

    pub fn entity_manager(name: &str) -> Self {
        Self::new(name, DeclaredType::EntityManager)
    }

    pub fn mutation_buffer(name: &str) -> Self {
        Self::new(name, DeclaredType::MutationBuffer)
    }

    pub fn parallel_writer(name: &str) -> Self {
        Self::new(name, DeclaredType::ParallelWriter)
    }

    pub fn component_lookup<T: Component>(name: &str) -> Self {
        Self::new(name, DeclaredType::ComponentLookup(TypeKey::of::<T>()))
    }

    pub fn buffer_lookup<E: Send + Sync + 'static>(name: &str) -> Self {
        Self::new(name, DeclaredType::BufferLookup(TypeKey::of::<E>()))
    }

    pub fn buffer<E: Send + Sync + 'static>(name: &str) -> Self {
        Self::new(name, DeclaredType::Buffer(TypeKey::of::<E>()))
    }

    pub fn value<T: ParamValue>(name: &str) -> Self {
        Self::new(name, DeclaredType::Value(ValueType::of::<T>()))
    }

    pub fn entity(name: &str) -> Self {
        Self::new(name, DeclaredType::Value(ValueType::entity()))
    }

    pub fn unsupported<T: 'static>(name: &str) -> Self {
        Self::new(name, DeclaredType::Value(ValueType::unsupported::<T>()))
    }

    pub fn input(mut self) -> Self {
        self.pass = PassMode::In;
        self
    }

    pub fn by_ref(mut self) -> Self {
        self.pass = PassMode::Ref;
        self
    }

    pub fn out(mut self) -> Self {
        self.pass = PassMode::Out;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_picker(mut self, picker: EntityPickerSpec) -> Self {
        self.picker = Some(picker);
        self
    }

    pub fn from_reference(self, reference: &str) -> Self {
        self.from_reference_with(reference, [])
    }

    /// Binds through the logical reference `reference`, which must additionally carry
    /// `extra` for an entity to be offered.
    pub fn from_reference_with(mut self, reference: &str, extra: impl IntoIterator<Item = TypeKey>) -> Self {
        self.reference = Some(ReferenceDecl { name: reference.to_string(), extra: extra.into_iter().collect() });
        self
    }

    pub fn default_value<T: ParamValue>(mut self, value: T) -> Self {
        self.default = Some(Arc::new(move || Box::new(value.clone()) as Box<dyn PartialReflect>));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_type(&self) -> &DeclaredType {
        &self.ty
    }

    pub fn pass(&self) -> PassMode {
        self.pass
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn picker(&self) -> Option<&EntityPickerSpec> {
        self.picker.as_ref()
    }

    pub fn reference(&self) -> Option<&ReferenceDecl> {
        self.reference.as_ref()
    }

    pub fn declared_default(&self) -> Option<Box<dyn PartialReflect>> {
        self.default.as_ref().map(|make| make())
    }

    fn signature_entry(&self) -> String {
        format!("{}{} {}", self.pass.prefix(), self.ty.type_name(), self.name)
    }
}

/// One entry of the registration table: where a command is declared, how it is shown
/// and the body the invoker calls.
#[derive(Clone)]
pub struct CommandSpec {
    declaring: String,
    function: String,
    display_name: Option<String>,
    category: Option<String>,
    show_in_window: bool,
    params: Vec<ParamDecl>,
    body: CommandBody,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("declaring", &self.declaring)
            .field("function", &self.function)
            .field("category", &self.category)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl CommandSpec {
    pub fn new<F>(declaring: &str, function: &str, body: F) -> Self
    where
        F: Fn(&mut CallFrame<'_>) -> CommandResult + Send + Sync + 'static,
    {
        Self {
            declaring: declaring.to_string(),
            function: function.to_string(),
            display_name: None,
            category: None,
            show_in_window: true,
            params: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn param(mut self, decl: ParamDecl) -> Self {
        self.params.push(decl);
        self
    }

    pub fn named(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.show_in_window = false;
        self
    }

    pub fn params(&self) -> &[ParamDecl] {
        &self.params
    }

    pub fn body(&self) -> CommandBody {
        Arc::clone(&self.body)
    }

    pub fn is_visible(&self) -> bool {
        self.show_in_window
    }

    pub fn category_name(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Explicit name, or `"{DeclaringShortName}.{function}"`.
    pub fn display_name(&self) -> String {
        match &self.display_name {
            Some(name) => name.clone(),
            None => format!("{}.{}", short_type_name(&self.declaring), self.function),
        }
    }

    pub fn signature(&self) -> String {
        self.params.iter().map(ParamDecl::signature_entry).collect::<Vec<_>>().join(", ")
    }

    /// Identity that survives rediscovery: declaring path, function and full signature.
    pub fn key(&self) -> String {
        format!("{}|{}({})", self.declaring, self.function, self.signature())
    }
}

#[derive(Clone, Default)]
pub struct CommandRegistry {
    specs: Vec<CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples() -> Self {
        let mut registry = Self::new();
        crate::samples::register_commands(&mut registry);
        registry
    }

    /// Adds `spec` unless a spec with the same identity key is already registered; the
    /// first registration wins so rediscovery keeps a one-to-one key mapping.
    pub fn register(&mut self, spec: CommandSpec) -> &mut Self {
        let key = spec.key();
        if self.specs.iter().any(|existing| existing.key() == key) {
            log::warn!("[commands] ignoring duplicate registration of {}", spec.display_name());
            return self;
        }
        self.specs.push(spec);
        self
    }

    pub fn specs(&self) -> &[CommandSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

pub fn fingerprint(key: &str) -> String {
    let hash = blake3::hash(key.as_bytes());
    hash.to_hex().as_str()[..16].to_string()
}

/// A discovered, runnable command with the state the presentation layer edits.
pub struct Command {
    key: String,
    fingerprint: String,
    display_name: String,
    spec: CommandSpec,
    signature: ClassifiedSignature,
    values: ValueTable,
    expansion: BTreeMap<String, bool>,
    references: ReferenceState,
    last_result: Option<RunOutcome>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("key", &self.key)
            .field("display_name", &self.display_name)
            .field("values", &self.values)
            .field("last_result", &self.last_result)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn new(spec: CommandSpec) -> Result<Self, crate::error::ClassificationError> {
        let signature = classify(&spec)?;
        let key = spec.key();
        let references = ReferenceState::new(requirements_for(&signature));
        Ok(Self {
            fingerprint: fingerprint(&key),
            display_name: spec.display_name(),
            key,
            spec,
            signature,
            values: ValueTable::default(),
            expansion: BTreeMap::new(),
            references,
            last_result: None,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn category(&self) -> Option<&str> {
        self.spec.category_name()
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn signature(&self) -> &ClassifiedSignature {
        &self.signature
    }

    pub fn values(&self) -> &ValueTable {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut ValueTable {
        &mut self.values
    }

    pub fn requirements(&self) -> &Requirements {
        self.references.requirements()
    }

    pub fn references(&self) -> &ReferenceState {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut ReferenceState {
        &mut self.references
    }

    pub fn last_result(&self) -> Option<&RunOutcome> {
        self.last_result.as_ref()
    }

    pub(crate) fn set_last_result(&mut self, outcome: RunOutcome) {
        self.last_result = Some(outcome);
    }

    pub fn matches(&self, id: &str) -> bool {
        self.key == id || self.fingerprint == id || self.display_name == id
    }

    fn editable_param(&self, param: &str) -> Result<(&ClassifiedParam, ValueType), ValueError> {
        let classified =
            self.signature.param(param).ok_or_else(|| ValueError::UnknownParameter { param: param.to_string() })?;
        let ty = classified
            .editable()
            .map_err(|reason| ValueError::NotEditable { param: param.to_string(), reason })?;
        Ok((classified, ty))
    }

    /// Stores `value` under `key`, either a parameter name or `param.field.sub` for one
    /// field of a structured parameter. The value must match the declared type.
    pub fn set_value(&mut self, key: &str, value: Box<dyn PartialReflect>) -> Result<(), ValueError> {
        match key.split_once('.') {
            None => {
                let (_, ty) = self.editable_param(key)?;
                let value = ty.coerce(key, &*value)?;
                self.values.clear_param(key);
                self.values.insert(key, value);
            }
            Some((param, path)) => {
                let (_, ty) = self.editable_param(param)?;
                if !ty.is_struct() {
                    return Err(ValueError::UnknownField { param: param.to_string(), path: path.to_string() });
                }
                let mut scratch = ty.default_value()?;
                let expected = reflect::field_at(&*scratch, path)
                    .map(|field| field.reflect_type_path().to_string())
                    .ok_or_else(|| ValueError::UnknownField { param: param.to_string(), path: path.to_string() })?;
                reflect::apply_path(&mut *scratch, path, &*value).map_err(|err| match err {
                    ReflectError::Apply { reason, .. } => {
                        ValueError::TypeMismatch { param: key.to_string(), expected, found: reason }
                    }
                    _ => ValueError::UnknownField { param: param.to_string(), path: path.to_string() },
                })?;
                self.values.insert(key, value);
            }
        }
        log::debug!("[commands] {} set {key}", self.display_name);
        Ok(())
    }

    pub fn set<T: ParamValue>(&mut self, key: &str, value: T) -> Result<(), ValueError> {
        self.set_value(key, Box::new(value))
    }

    /// JSON form of [`set_value`](Self::set_value). Field keys patch the JSON of the
    /// current value and store the whole value again.
    pub fn set_json(&mut self, key: &str, json: &serde_json::Value) -> Result<(), ValueError> {
        let (param, path) = match key.split_once('.') {
            Some((param, path)) => (param, Some(path)),
            None => (key, None),
        };
        let (_, ty) = self.editable_param(param)?;
        let Some(path) = path else {
            let value = ty.from_json(key, json)?;
            return self.set_value(key, value);
        };
        let current = self.current_value(param)?;
        let mut whole = ty.to_json(&*current).ok_or(ValueError::Unsupported { type_name: ty.name() })?;
        let slot = path
            .split('.')
            .try_fold(&mut whole, |node, segment| node.get_mut(segment))
            .ok_or_else(|| ValueError::UnknownField { param: param.to_string(), path: path.to_string() })?;
        *slot = json.clone();
        let value = ty.from_json(key, &whole)?;
        self.set_value(param, value)
    }

    /// Raw value table entry.
    pub fn value(&self, key: &str) -> Option<&dyn PartialReflect> {
        self.values.get(key)
    }

    pub fn typed_value<T: Reflect + FromReflect + Clone>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        value.try_downcast_ref::<T>().cloned().or_else(|| T::from_reflect(value))
    }

    /// Value the binder would use for `param` right now: the stored value, the declared
    /// default or the type default, with per-field edits applied.
    pub fn current_value(&self, param: &str) -> Result<Box<dyn PartialReflect>, ValueError> {
        let classified =
            self.signature.param(param).ok_or_else(|| ValueError::UnknownParameter { param: param.to_string() })?;
        let ty = classified
            .binding
            .value_type()
            .ok_or(ValueError::NotEditable { param: param.to_string(), reason: "no value is stored for it" })?;
        let base = match self.values.get(param).map(|value| ty.coerce(param, value)) {
            Some(Ok(value)) => value,
            Some(Err(err)) => {
                log::warn!("[commands] {}: dropping cached value: {err}", self.display_name);
                fallback_value(classified, &ty)?
            }
            None => fallback_value(classified, &ty)?,
        };
        let edits = self.values.field_edits(param);
        if edits.is_empty() || !ty.is_struct() {
            return Ok(base);
        }
        reflect::collapse(&ty, Some(&*base), &edits).map_err(|err| match err {
            ReflectError::Value(err) => err,
            other => ValueError::TypeMismatch {
                param: param.to_string(),
                expected: ty.name().to_string(),
                found: other.to_string(),
            },
        })
    }

    pub fn value_json(&self, param: &str) -> Option<serde_json::Value> {
        let ty = self.signature.param(param)?.binding.value_type()?;
        let value = self.current_value(param).ok()?;
        ty.to_json(&*value)
    }

    pub fn clear_value(&mut self, key: &str) {
        if key.contains('.') {
            self.values.remove(key);
        } else {
            self.values.clear_param(key);
        }
    }

    /// Field tree for a structured parameter, built from its current value.
    pub fn expand_param(&self, param: &str) -> Result<Vec<FieldNode>, ReflectError> {
        let current = self.current_value(param)?;
        reflect::expand_value(&*current)
    }

    pub fn set_expanded(&mut self, path: &str, expanded: bool) {
        self.expansion.insert(path.to_string(), expanded);
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.expansion.get(path).copied().unwrap_or(false)
    }

    /// Records an edit for the component `component` of reference `reference`. The
    /// edit is only used while the reference keeps pointing at the same entity.
    pub fn edit_reference_component(
        &mut self,
        reference: &str,
        component: TypeKey,
        value: Box<dyn PartialReflect>,
    ) -> Result<(), ValueError> {
        let ty = self
            .signature
            .iter()
            .find_map(|param| match &param.binding {
                Binding::Reference { reference: name, component: key, value_type: Some(ty), .. }
                    if name == reference && *key == component =>
                {
                    Some(*ty)
                }
                _ => None,
            })
            .ok_or(ValueError::UnknownReferenceComponent {
                reference: reference.to_string(),
                type_name: component.name(),
            })?;
        let value = ty.coerce(reference, &*value)?;
        self.references.edit_component(reference, component, value)
    }
}

fn fallback_value(param: &ClassifiedParam, ty: &ValueType) -> Result<Box<dyn PartialReflect>, ValueError> {
    match param.decl.declared_default() {
        Some(value) => ty.coerce(param.name(), &*value),
        None => ty.default_value(),
    }
}

/// Builds the runnable command list. Hidden specs are skipped unless configured
/// otherwise; specs that fail classification are logged and left out.
pub fn discover(registry: &CommandRegistry, config: &CommandsConfig) -> Vec<Command> {
    let mut commands: Vec<Command> = registry
        .specs()
        .iter()
        .filter(|spec| spec.is_visible() || config.show_hidden)
        .filter_map(|spec| match Command::new(spec.clone()) {
            Ok(command) => Some(command),
            Err(err) => {
                log::warn!("[commands] skipping {}: {err}", spec.display_name());
                None
            }
        })
        .collect();
    commands.sort_by(|a, b| {
        let category = |c: &Command| c.category().unwrap_or(&config.uncategorized_label).to_string();
        category(a).cmp(&category(b)).then_with(|| a.display_name.cmp(&b.display_name))
    });
    log::info!("[commands] discovered {} of {} registered commands", commands.len(), registry.len());
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Reflect, Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        count: i32,
        scale: f32,
    }

    fn tweak() -> CommandSpec {
        CommandSpec::new("tools::Tweaks", "tweak", |_| Ok(None))
            .param(ParamDecl::store("store"))
            .param(ParamDecl::value::<i32>("x").by_ref())
            .param(ParamDecl::value::<i32>("y").out())
            .param(ParamDecl::value::<Settings>("settings"))
    }

    #[test]
    fn keys_are_stable_across_rediscovery() {
        let first = Command::new(tweak()).expect("classifies");
        let second = Command::new(tweak()).expect("classifies");
        assert_eq!(first.key(), "tools::Tweaks|tweak(Store store, ref i32 x, out i32 y, Settings settings)");
        assert_eq!(first.key(), second.key());
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 16);
        assert_eq!(first.display_name(), "Tweaks.tweak");
    }

    #[test]
    fn writes_are_validated_against_the_declared_type() {
        let mut command = Command::new(tweak()).expect("classifies");
        command.set("x", 5_i32).expect("int accepted");
        assert_eq!(command.typed_value::<i32>("x"), Some(5));
        assert!(matches!(command.set("x", 5.0_f32), Err(ValueError::TypeMismatch { .. })));
        assert!(matches!(command.set("y", 1_i32), Err(ValueError::NotEditable { .. })));
        assert!(matches!(command.set("store", 1_i32), Err(ValueError::NotEditable { .. })));
        assert!(matches!(command.set("missing", 1_i32), Err(ValueError::UnknownParameter { .. })));
        assert_eq!(command.typed_value::<i32>("x"), Some(5), "rejected writes leave the table alone");
    }

    #[test]
    fn field_edits_compose_with_the_stored_value() {
        let mut command = Command::new(tweak()).expect("classifies");
        command.set("settings", Settings { count: 2, scale: 1.5 }).expect("whole value");
        command.set("settings.count", 9_i32).expect("field edit");
        let current = command.current_value("settings").expect("current");
        assert_eq!(Settings::from_reflect(&*current), Some(Settings { count: 9, scale: 1.5 }));

        assert!(matches!(command.set("settings.count", "nine".to_string()), Err(ValueError::TypeMismatch { .. })));
        assert!(matches!(command.set("settings.nope", 1_i32), Err(ValueError::UnknownField { .. })));

        command.set_json("settings.scale", &serde_json::json!(3.0)).expect("json field edit");
        assert_eq!(command.value_json("settings"), Some(serde_json::json!({ "count": 9, "scale": 3.0 })));

        command.set("settings", Settings::default()).expect("reset");
        let current = command.current_value("settings").expect("current");
        assert_eq!(Settings::from_reflect(&*current), Some(Settings::default()), "whole writes drop field edits");
    }

    #[test]
    fn discovery_filters_hidden_and_invalid_commands() {
        let mut registry = CommandRegistry::new();
        registry
            .register(tweak())
            .register(tweak().named("Secret").hidden().param(ParamDecl::value::<i32>("extra")))
            .register(CommandSpec::new("tools::Tweaks", "broken", |_| Ok(None)).param(ParamDecl::value::<i32>("n")));
        let mut config = CommandsConfig::default();
        let names: Vec<_> = discover(&registry, &config).iter().map(|c| c.display_name().to_string()).collect();
        assert_eq!(names, vec!["Tweaks.tweak"]);
        config.show_hidden = true;
        assert_eq!(discover(&registry, &config).len(), 2);
    }

    #[test]
    fn duplicate_keys_keep_the_first_registration() {
        let mut registry = CommandRegistry::new();
        registry.register(tweak()).register(tweak().named("Copy"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.specs()[0].display_name(), "Tweaks.tweak");
        let commands = discover(&registry, &CommandsConfig::default());
        assert_eq!(commands.len(), 1);
        assert!(commands[0].matches(&registry.specs()[0].key()));
    }
}

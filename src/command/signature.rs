use std::collections::BTreeSet;

use crate::error::ClassificationError;
use crate::picker::EntityPickerSpec;
use crate::store::ComponentKind;
use crate::value::{TypeKey, ValueKind, ValueType};

use super::{CommandSpec, DeclaredType, ParamDecl, PassMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Store,
    EntityManager,
    MutationBuffer,
    ParallelWriter,
}

impl ContextKind {
    pub fn label(self) -> &'static str {
        match self {
            ContextKind::Store => "store",
            ContextKind::EntityManager => "entity manager",
            ContextKind::MutationBuffer => "mutation buffer",
            ContextKind::ParallelWriter => "parallel writer",
        }
    }

    pub fn needs_buffer(self) -> bool {
        matches!(self, ContextKind::MutationBuffer | ContextKind::ParallelWriter)
    }
}

/// How the binder supplies one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Context(ContextKind),
    Accessor { component: TypeKey, kind: ComponentKind, read_only: bool },
    Reference { reference: String, component: TypeKey, kind: ComponentKind, value_type: Option<ValueType>, read_only: bool },
    EntityPicker(Option<EntityPickerSpec>),
    Value(ValueType),
    Unsupported { type_name: &'static str },
}

impl Binding {
    pub fn label(&self) -> &'static str {
        match self {
            Binding::Context(_) => "context",
            Binding::Accessor { .. } => "accessor",
            Binding::Reference { .. } => "reference",
            Binding::EntityPicker(_) => "entity picker",
            Binding::Value(_) => "value",
            Binding::Unsupported { .. } => "unsupported",
        }
    }

    /// Type the value table holds for this parameter, when it holds one. Reference slots
    /// keep one too so they can fall back to manual values while unresolved.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Binding::Value(ty) => Some(*ty),
            Binding::EntityPicker(_) => Some(ValueType::entity()),
            Binding::Reference { value_type, .. } => *value_type,
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedParam {
    pub index: usize,
    pub decl: ParamDecl,
    pub binding: Binding,
}

impl ClassifiedParam {
    pub fn name(&self) -> &str {
        self.decl.name()
    }

    pub fn pass(&self) -> PassMode {
        self.decl.pass()
    }

    pub fn commits_back(&self) -> bool {
        matches!(self.decl.pass(), PassMode::Ref | PassMode::Out)
    }

    /// Whether the presentation layer may write a value for this parameter.
    pub fn editable(&self) -> Result<ValueType, &'static str> {
        if self.decl.pass() == PassMode::Out {
            return Err("output parameters are produced by the command");
        }
        match &self.binding {
            Binding::Context(_) => Err("context parameters are supplied by the engine"),
            Binding::Accessor { .. } => Err("accessors are supplied by the engine"),
            Binding::Unsupported { .. } => Err("the parameter type is not supported"),
            Binding::Reference { value_type: None, .. } => Err("buffers are read from the referenced entity"),
            binding => binding.value_type().ok_or("the parameter has no editable value"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassifiedSignature {
    pub context: Option<ContextKind>,
    pub params: Vec<ClassifiedParam>,
}

impl ClassifiedSignature {
    pub fn param(&self, name: &str) -> Option<&ClassifiedParam> {
        self.params.iter().find(|param| param.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedParam> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

fn context_of(ty: &DeclaredType) -> Option<ContextKind> {
    match ty {
        DeclaredType::Store => Some(ContextKind::Store),
        DeclaredType::EntityManager => Some(ContextKind::EntityManager),
        DeclaredType::MutationBuffer => Some(ContextKind::MutationBuffer),
        DeclaredType::ParallelWriter => Some(ContextKind::ParallelWriter),
        _ => None,
    }
}

/// Assigns a binding strategy to every parameter of `spec`.
///
/// A command without parameters runs with no context. Otherwise the first parameter has
/// to be a context handle; commands that start with anything else are not runnable.
pub fn classify(spec: &CommandSpec) -> Result<ClassifiedSignature, ClassificationError> {
    let command = spec.display_name();
    let mut seen = BTreeSet::new();
    for decl in spec.params() {
        if !seen.insert(decl.name()) {
            return Err(ClassificationError::DuplicateParameter { command, param: decl.name().to_string() });
        }
    }

    let mut signature = ClassifiedSignature::default();
    let Some(first) = spec.params().first() else {
        return Ok(signature);
    };
    let context = context_of(first.declared_type()).ok_or_else(|| ClassificationError::UnsupportedFirstParameter {
        command: command.clone(),
        param: first.name().to_string(),
        type_name: first.declared_type().type_name(),
    })?;
    signature.context = Some(context);
    signature.params.push(ClassifiedParam { index: 0, decl: first.clone(), binding: Binding::Context(context) });

    for (index, decl) in spec.params().iter().enumerate().skip(1) {
        let binding = classify_param(&command, decl)?;
        signature.params.push(ClassifiedParam { index, decl: decl.clone(), binding });
    }
    Ok(signature)
}

fn classify_param(command: &str, decl: &ParamDecl) -> Result<Binding, ClassificationError> {
    let param = || decl.name().to_string();
    if let Some(context) = context_of(decl.declared_type()) {
        return Err(ClassificationError::MisplacedContext {
            command: command.to_string(),
            param: param(),
            context: context.label(),
        });
    }
    if decl.picker().is_some() && decl.reference().is_some() {
        return Err(ClassificationError::ConflictingAttributes { command: command.to_string(), param: param() });
    }
    let is_entity = matches!(decl.declared_type(), DeclaredType::Value(ty) if ty.kind() == ValueKind::Entity);
    if decl.picker().is_some() && !is_entity {
        return Err(ClassificationError::PickerOnNonEntity { command: command.to_string(), param: param() });
    }

    if let Some(reference) = decl.reference() {
        let read_only = decl.is_read_only() || matches!(decl.pass(), PassMode::Value | PassMode::In);
        return match decl.declared_type() {
            DeclaredType::Value(ty) if ty.kind().is_supported() && ty.kind() != ValueKind::Entity => {
                Ok(Binding::Reference {
                    reference: reference.name.clone(),
                    component: ty.key(),
                    kind: ComponentKind::Component,
                    value_type: Some(*ty),
                    read_only,
                })
            }
            DeclaredType::Buffer(element) => Ok(Binding::Reference {
                reference: reference.name.clone(),
                component: *element,
                kind: ComponentKind::Buffer,
                value_type: None,
                read_only,
            }),
            _ => Err(ClassificationError::ReferenceOnUnsupported {
                command: command.to_string(),
                param: param(),
                reference: reference.name.clone(),
            }),
        };
    }

    Ok(match decl.declared_type() {
        DeclaredType::ComponentLookup(component) => {
            Binding::Accessor { component: *component, kind: ComponentKind::Component, read_only: decl.is_read_only() }
        }
        DeclaredType::BufferLookup(element) => {
            Binding::Accessor { component: *element, kind: ComponentKind::Buffer, read_only: decl.is_read_only() }
        }
        DeclaredType::Buffer(element) => Binding::Unsupported { type_name: element.name() },
        DeclaredType::Value(ty) => match ty.kind() {
            ValueKind::Entity => Binding::EntityPicker(decl.picker().cloned()),
            ValueKind::Unsupported => Binding::Unsupported { type_name: ty.name() },
            _ => Binding::Value(*ty),
        },
        _ => Binding::Unsupported { type_name: "context handle" },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::EntityPickerSpec;
    use bevy_ecs::prelude::Component;
    use bevy_reflect::Reflect;
    use serde::{Deserialize, Serialize};

    #[derive(Component, Reflect, Default, Clone, Serialize, Deserialize)]
    struct Armor {
        rating: i32,
    }

    #[derive(Clone)]
    struct Child;

    fn spec(params: Vec<ParamDecl>) -> CommandSpec {
        params.into_iter().fold(CommandSpec::new("tests::Fixtures", "fixture", |_| Ok(None)), CommandSpec::param)
    }

    #[test]
    fn zero_parameters_classify_without_context() {
        let signature = classify(&spec(Vec::new())).expect("zero params classify");
        assert!(signature.context.is_none());
        assert!(signature.is_empty());
    }

    #[test]
    fn non_context_first_parameter_is_rejected() {
        let err = classify(&spec(vec![ParamDecl::value::<i32>("count")])).unwrap_err();
        assert!(matches!(err, ClassificationError::UnsupportedFirstParameter { .. }), "{err}");
    }

    #[test]
    fn assigns_one_strategy_per_parameter() {
        let signature = classify(&spec(vec![
            ParamDecl::mutation_buffer("commands"),
            ParamDecl::value::<i32>("count"),
            ParamDecl::entity("target").with_picker(EntityPickerSpec::new().with::<Armor>()),
            ParamDecl::component_lookup::<Armor>("armor").read_only(),
            ParamDecl::value::<Armor>("from").input().from_reference("From"),
            ParamDecl::buffer::<Child>("children").input().from_reference("Parent"),
            ParamDecl::unsupported::<std::fs::File>("file"),
        ]))
        .expect("classifies");
        assert_eq!(signature.context, Some(ContextKind::MutationBuffer));
        let labels: Vec<_> = signature.iter().map(|p| p.binding.label()).collect();
        assert_eq!(
            labels,
            vec!["context", "value", "entity picker", "accessor", "reference", "reference", "unsupported"]
        );
        assert!(matches!(
            signature.param("from").map(|p| &p.binding),
            Some(Binding::Reference { read_only: true, kind: ComponentKind::Component, .. })
        ));
        assert!(signature.param("armor").map(|p| p.editable().is_err()).unwrap_or(false));
    }

    #[test]
    fn conflicting_declarations_surface_at_discovery() {
        let conflict = ParamDecl::entity("target").with_picker(EntityPickerSpec::new()).from_reference("Target");
        let err = classify(&spec(vec![ParamDecl::store("store"), conflict])).unwrap_err();
        assert!(matches!(err, ClassificationError::ConflictingAttributes { .. }));

        let picker_on_int = ParamDecl::value::<i32>("n").with_picker(EntityPickerSpec::new());
        let err = classify(&spec(vec![ParamDecl::store("store"), picker_on_int])).unwrap_err();
        assert!(matches!(err, ClassificationError::PickerOnNonEntity { .. }));

        let twice = vec![ParamDecl::store("store"), ParamDecl::value::<i32>("n"), ParamDecl::value::<i32>("n").by_ref()];
        let err = classify(&spec(twice)).expect_err("duplicate names");
        assert!(matches!(err, ClassificationError::DuplicateParameter { ref param, .. } if param == "n"));

        let err = classify(&spec(vec![ParamDecl::store("store"), ParamDecl::entity_manager("manager")])).unwrap_err();
        assert!(matches!(err, ClassificationError::MisplacedContext { .. }));

        let lookup_ref = ParamDecl::component_lookup::<Armor>("armor").from_reference("Target");
        let err = classify(&spec(vec![ParamDecl::store("store"), lookup_ref])).unwrap_err();
        assert!(matches!(err, ClassificationError::ReferenceOnUnsupported { .. }));
    }
}

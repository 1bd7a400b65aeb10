use thiserror::Error;

use crate::value::ValueKinds;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error(
        "command `{command}` has an unsupported first parameter `{param}` ({type_name}); \
         expected a store, entity manager, mutation buffer or parallel writer"
    )]
    UnsupportedFirstParameter { command: String, param: String, type_name: String },
    #[error("parameter `{param}` of `{command}` requests a {context} handle outside the first position")]
    MisplacedContext { command: String, param: String, context: &'static str },
    #[error("parameter `{param}` of `{command}` declares both an entity picker and an entity reference")]
    ConflictingAttributes { command: String, param: String },
    #[error("parameter `{param}` of `{command}` has an entity picker but is not an Entity")]
    PickerOnNonEntity { command: String, param: String },
    #[error("parameter `{param}` of `{command}` references `{reference}` but is not a component or buffer value")]
    ReferenceOnUnsupported { command: String, param: String, reference: String },
    #[error("command `{command}` declares parameter `{param}` more than once")]
    DuplicateParameter { command: String, param: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("type {type_name} is not a registered component or buffer type")]
    InvalidComponentType { type_name: &'static str },
    #[error("query was built for store `{built_for}` and cannot be evaluated against `{store}`")]
    StoreMismatch { built_for: String, store: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("command has no parameter named `{param}`")]
    UnknownParameter { param: String },
    #[error("`{param}` expects a value of type {expected}, got {found}")]
    TypeMismatch { param: String, expected: String, found: String },
    #[error("`{param}` is not editable: {reason}")]
    NotEditable { param: String, reason: &'static str },
    #[error("`{param}` has no field `{path}`")]
    UnknownField { param: String, path: String },
    #[error("reference `{reference}` has no selected entity")]
    NoReferenceSelected { reference: String },
    #[error("reference `{reference}` has no parameter of type {type_name}")]
    UnknownReferenceComponent { reference: String, type_name: &'static str },
    #[error("type {type_name} cannot be represented as an editable value")]
    Unsupported { type_name: &'static str },
    #[error("invalid JSON for `{param}`: {reason}")]
    Json { param: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectError {
    #[error("{type_name} is not a structured value")]
    NotAStruct { type_name: String },
    #[error("no field `{path}` on {type_name}")]
    UnknownField { type_name: String, path: String },
    #[error("field `{path}` rejected the value: {reason}")]
    Apply { path: String, reason: String },
    #[error(transparent)]
    Value(#[from] ValueError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no store named `{0}`")]
    UnknownStore(String),
    #[error("entity {entity} is not alive in store `{store}`")]
    MissingEntity { store: String, entity: String },
    #[error("entity {entity} has no {type_name} component")]
    MissingComponent { entity: String, type_name: &'static str },
    #[error("{type_name} rejected the written value: {reason}")]
    Rejected { type_name: &'static str, reason: String },
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("No store selected.")]
    NoStoreSelected,
    #[error("Unsupported parameter type for `{param}`: {type_name}\n\nSupported: {supported}")]
    UnsupportedParameterType { param: String, type_name: &'static str, supported: ValueKinds },
    #[error("`{param}`: {source}")]
    InvalidComponentType { param: String, source: QueryError },
    #[error("`{param}` reads {type_name} from reference `{reference}`, but {entity} does not have it")]
    MissingComponent { param: String, reference: String, entity: String, type_name: &'static str },
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Errors raised by [`CallFrame`](crate::binder::CallFrame) accessors inside a command body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("no argument named `{0}`")]
    UnknownArgument(String),
    #[error("`{param}` is declared as {declared}, not {requested}")]
    WrongType { param: String, declared: &'static str, requested: &'static str },
    #[error("`{param}` is passed by value or `in` and cannot be written")]
    NotWritable { param: String },
    #[error("`{param}` is read-only")]
    ReadOnly { param: String },
    #[error("`{param}` is not a {expected}")]
    WrongBinding { param: String, expected: &'static str },
    #[error("{0} is not available to this command")]
    Unavailable(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("No store selected.")]
    NoStoreSelected,
    #[error("no command matches `{0}`")]
    UnknownCommand(String),
    #[error("`{param}` is not an entity picker")]
    NotAPicker { param: String },
    #[error("command has no entity reference named `{0}`")]
    UnknownReference(String),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

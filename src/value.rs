use std::any::{type_name, TypeId};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bevy_ecs::prelude::Entity;
use bevy_reflect::{FromReflect, PartialReflect, Reflect, ReflectRef};
use bitflags::bitflags;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ValueError;

/// Runtime identity of a Rust type, ordered by name so sets of them print deterministically.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: 'static + ?Sized>() -> Self {
        Self { id: TypeId::of::<T>(), name: type_name::<T>() }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for TypeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Strips module paths while keeping generic arguments readable:
/// `alloc::vec::Vec<i32>` becomes `Vec<i32>`.
pub fn short_type_name(full: &str) -> &str {
    let head_end = full.find('<').unwrap_or(full.len());
    let start = full[..head_end].rfind("::").map_or(0, |idx| idx + 2);
    &full[start..]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Float,
    Bool,
    Text,
    Enum,
    Vector,
    Entity,
    Struct,
    Unsupported,
}

impl ValueKind {
    pub fn label(self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Text => "string",
            ValueKind::Enum => "enum",
            ValueKind::Vector => "vector",
            ValueKind::Entity => "entity",
            ValueKind::Struct => "struct",
            ValueKind::Unsupported => "unsupported",
        }
    }

    pub fn is_supported(self) -> bool {
        self != ValueKind::Unsupported
    }
}

bitflags! {
    /// Parameter categories the binder can marshal; reported back when binding fails.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValueKinds: u16 {
        const INTEGER = 1 << 0;
        const FLOAT = 1 << 1;
        const BOOL = 1 << 2;
        const TEXT = 1 << 3;
        const ENUM = 1 << 4;
        const VECTOR = 1 << 5;
        const ENTITY = 1 << 6;
        const STRUCT = 1 << 7;
        const LOOKUP = 1 << 8;
        const CONTEXT = 1 << 9;
    }
}

impl ValueKinds {
    pub const SUPPORTED: ValueKinds = ValueKinds::all();

    fn describe(flag: ValueKinds) -> &'static str {
        match flag {
            f if f == ValueKinds::INTEGER => "integers (i8..i64, u8..u64)",
            f if f == ValueKinds::FLOAT => "f32, f64",
            f if f == ValueKinds::BOOL => "bool",
            f if f == ValueKinds::TEXT => "String",
            f if f == ValueKinds::ENUM => "reflected enums",
            f if f == ValueKinds::VECTOR => "glam Vec2/Vec3/Vec4/Quat",
            f if f == ValueKinds::ENTITY => "Entity (incl. in/ref/out)",
            f if f == ValueKinds::STRUCT => "reflected structs (fields not marked #[reflect(ignore)])",
            f if f == ValueKinds::LOOKUP => "injected ComponentLookup<T>, BufferLookup<T>",
            f if f == ValueKinds::CONTEXT => "first-parameter Store / EntityManager / mutation buffers",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ValueKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (_, flag) in self.iter_names() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            f.write_str(Self::describe(flag))?;
        }
        Ok(())
    }
}

/// Bound required of every value a command parameter can carry through the value table.
pub trait ParamValue: Reflect + FromReflect + Clone + Default + Serialize + DeserializeOwned {}

impl<T> ParamValue for T where T: Reflect + FromReflect + Clone + Default + Serialize + DeserializeOwned {}

#[derive(Clone, Copy)]
struct ValueOps {
    default: fn() -> Box<dyn PartialReflect>,
    from_reflect: fn(&dyn PartialReflect) -> Option<Box<dyn PartialReflect>>,
    from_json: fn(&serde_json::Value) -> Result<Box<dyn PartialReflect>, String>,
    to_json: fn(&dyn PartialReflect) -> Option<serde_json::Value>,
}

/// Declared type of a value slot: identity, binding category and the type-specific
/// conversions captured at registration time.
#[derive(Clone, Copy)]
pub struct ValueType {
    key: TypeKey,
    kind: ValueKind,
    ops: Option<ValueOps>,
}

impl ValueType {
    pub fn of<T: ParamValue>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            kind: infer_kind::<T>(),
            ops: Some(ValueOps {
                default: default_boxed::<T>,
                from_reflect: from_reflect_boxed::<T>,
                from_json: from_json_boxed::<T>,
                to_json: to_json_value::<T>,
            }),
        }
    }

    pub fn entity() -> Self {
        Self {
            key: TypeKey::of::<Entity>(),
            kind: ValueKind::Entity,
            ops: Some(ValueOps {
                default: || Box::new(Entity::PLACEHOLDER),
                from_reflect: |value| {
                    value
                        .try_downcast_ref::<Entity>()
                        .copied()
                        .or_else(|| Entity::from_reflect(value))
                        .map(|e| Box::new(e) as Box<dyn PartialReflect>)
                },
                from_json: |json| {
                    entity_from_json(json)
                        .map(|e| Box::new(e) as Box<dyn PartialReflect>)
                        .ok_or_else(|| format!("expected entity bits, found {json}"))
                },
                to_json: |value| Entity::from_reflect(value).map(entity_to_json),
            }),
        }
    }

    /// A type the binder cannot marshal; binding a parameter of this type fails.
    pub fn unsupported<T: 'static>() -> Self {
        Self { key: TypeKey::of::<T>(), kind: ValueKind::Unsupported, ops: None }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.key.name()
    }

    pub fn short_name(&self) -> &'static str {
        self.key.short_name()
    }

    pub fn kind(&self) -> ValueKind {
        if self.ops.is_none() {
            ValueKind::Unsupported
        } else {
            self.kind
        }
    }

    pub fn is_struct(&self) -> bool {
        self.kind() == ValueKind::Struct
    }

    fn ops(&self) -> Result<ValueOps, ValueError> {
        self.ops.ok_or(ValueError::Unsupported { type_name: self.name() })
    }

    pub fn default_value(&self) -> Result<Box<dyn PartialReflect>, ValueError> {
        Ok((self.ops()?.default)())
    }

    /// Converts `value` into a concrete instance of this type, rejecting values that
    /// represent a different type even when their fields happen to line up.
    pub fn coerce(&self, param: &str, value: &dyn PartialReflect) -> Result<Box<dyn PartialReflect>, ValueError> {
        let ops = self.ops()?;
        if let Some(info) = value.get_represented_type_info() {
            if info.type_id() != self.key.id() {
                return Err(ValueError::TypeMismatch {
                    param: param.to_string(),
                    expected: self.name().to_string(),
                    found: info.type_path().to_string(),
                });
            }
        }
        (ops.from_reflect)(value).ok_or_else(|| ValueError::TypeMismatch {
            param: param.to_string(),
            expected: self.name().to_string(),
            found: value.reflect_type_path().to_string(),
        })
    }

    /// The prior value when it still matches, otherwise the type default.
    pub fn materialize(&self, prior: Option<&dyn PartialReflect>) -> Result<Box<dyn PartialReflect>, ValueError> {
        match prior {
            Some(value) => self.coerce("value", value),
            None => self.default_value(),
        }
    }

    pub fn from_json(&self, param: &str, json: &serde_json::Value) -> Result<Box<dyn PartialReflect>, ValueError> {
        (self.ops()?.from_json)(json).map_err(|reason| ValueError::Json { param: param.to_string(), reason })
    }

    pub fn to_json(&self, value: &dyn PartialReflect) -> Option<serde_json::Value> {
        self.ops.and_then(|ops| (ops.to_json)(value))
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.kind() == other.kind()
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.short_name(), self.kind().label())
    }
}

fn default_boxed<T: ParamValue>() -> Box<dyn PartialReflect> {
    Box::new(T::default())
}

// Concrete values are cloned so fields hidden from reflection survive the copy.
fn from_reflect_boxed<T: ParamValue>(value: &dyn PartialReflect) -> Option<Box<dyn PartialReflect>> {
    value
        .try_downcast_ref::<T>()
        .cloned()
        .or_else(|| T::from_reflect(value))
        .map(|typed| Box::new(typed) as Box<dyn PartialReflect>)
}

fn from_json_boxed<T: ParamValue>(json: &serde_json::Value) -> Result<Box<dyn PartialReflect>, String> {
    serde_json::from_value::<T>(json.clone())
        .map(|typed| Box::new(typed) as Box<dyn PartialReflect>)
        .map_err(|err| err.to_string())
}

fn to_json_value<T: ParamValue>(value: &dyn PartialReflect) -> Option<serde_json::Value> {
    T::from_reflect(value).and_then(|typed| serde_json::to_value(typed).ok())
}

fn infer_kind<T: ParamValue>() -> ValueKind {
    let id = TypeId::of::<T>();
    let integers = [
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<i32>(),
        TypeId::of::<i64>(),
        TypeId::of::<isize>(),
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<usize>(),
    ];
    if integers.contains(&id) {
        return ValueKind::Integer;
    }
    if id == TypeId::of::<f32>() || id == TypeId::of::<f64>() {
        return ValueKind::Float;
    }
    if id == TypeId::of::<bool>() {
        return ValueKind::Bool;
    }
    if id == TypeId::of::<String>() {
        return ValueKind::Text;
    }
    if id == TypeId::of::<Entity>() {
        return ValueKind::Entity;
    }
    let sample = T::default();
    if is_builtin_vector(&sample) {
        return ValueKind::Vector;
    }
    match sample.reflect_ref() {
        ReflectRef::Struct(_) | ReflectRef::TupleStruct(_) => ValueKind::Struct,
        ReflectRef::Enum(_) => ValueKind::Enum,
        _ => ValueKind::Unsupported,
    }
}

/// glam types reflect as structs but are edited as a unit.
pub(crate) fn is_builtin_vector(value: &dyn PartialReflect) -> bool {
    value.reflect_type_path().starts_with("glam::")
}

pub fn entity_to_json(entity: Entity) -> serde_json::Value {
    serde_json::Value::from(entity.to_bits())
}

pub fn entity_from_json(json: &serde_json::Value) -> Option<Entity> {
    json.as_u64().and_then(|bits| Entity::try_from_bits(bits).ok())
}

/// Last-known parameter values of one command, keyed by parameter name or by
/// `param.field.sub` for per-field struct edits. Validation happens in
/// [`Command`](crate::command::Command), which knows the declared types.
#[derive(Debug, Default)]
pub struct ValueTable {
    entries: BTreeMap<String, Box<dyn PartialReflect>>,
}

impl ValueTable {
    pub fn get(&self, key: &str) -> Option<&dyn PartialReflect> {
        self.entries.get(key).map(|value| &**value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: Box<dyn PartialReflect>) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Box<dyn PartialReflect>> {
        self.entries.remove(key)
    }

    /// Removes `param` and every per-field edit below it.
    pub(crate) fn clear_param(&mut self, param: &str) {
        let prefix = format!("{param}.");
        self.entries.retain(|key, _| key != param && !key.starts_with(&prefix));
    }

    /// Per-field edits recorded for `param`, as (relative path, value), in key order.
    pub fn field_edits(&self, param: &str) -> Vec<(&str, &dyn PartialReflect)> {
        let prefix = format!("{param}.");
        self.entries
            .iter()
            .filter_map(|(key, value)| key.strip_prefix(&prefix).map(|path| (path, &**value)))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
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
    use glam::Vec3;
    use serde::Deserialize;

    #[derive(Reflect, Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        count: i32,
    }

    #[derive(Reflect, Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Lookalike {
        count: i32,
    }

    #[derive(Reflect, Default, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
    enum Mode {
        #[default]
        Fast,
        Slow,
    }

    #[test]
    fn infers_kinds_from_type() {
        assert_eq!(ValueType::of::<i32>().kind(), ValueKind::Integer);
        assert_eq!(ValueType::of::<f64>().kind(), ValueKind::Float);
        assert_eq!(ValueType::of::<bool>().kind(), ValueKind::Bool);
        assert_eq!(ValueType::of::<String>().kind(), ValueKind::Text);
        assert_eq!(ValueType::of::<Vec3>().kind(), ValueKind::Vector);
        assert_eq!(ValueType::of::<Settings>().kind(), ValueKind::Struct);
        assert_eq!(ValueType::of::<Mode>().kind(), ValueKind::Enum);
        assert_eq!(ValueType::of::<Vec<i32>>().kind(), ValueKind::Unsupported);
        assert_eq!(ValueType::entity().kind(), ValueKind::Entity);
        assert_eq!(ValueType::unsupported::<std::fs::File>().kind(), ValueKind::Unsupported);
    }

    #[test]
    fn coerce_rejects_values_of_another_type() {
        let ty = ValueType::of::<Settings>();
        let err = ty.coerce("settings", &Lookalike { count: 3 }).unwrap_err();
        assert!(matches!(err, ValueError::TypeMismatch { .. }), "lookalike struct must be rejected: {err}");

        let err = ValueType::of::<i32>().coerce("x", &1.5_f32).unwrap_err();
        assert!(matches!(err, ValueError::TypeMismatch { .. }));

        let ok = ty.coerce("settings", &Settings { count: 7 }).expect("same type coerces");
        assert_eq!(Settings::from_reflect(&*ok), Some(Settings { count: 7 }));
    }

    #[test]
    fn json_roundtrip_through_value_type() {
        let ty = ValueType::of::<Settings>();
        let value = ty.from_json("settings", &serde_json::json!({ "count": 4 })).expect("json parses");
        assert_eq!(ty.to_json(&*value), Some(serde_json::json!({ "count": 4 })));
        assert!(ty.from_json("settings", &serde_json::json!("nope")).is_err());

        let entity = Entity::from_raw(12);
        let ety = ValueType::entity();
        let boxed = ety.from_json("target", &entity_to_json(entity)).expect("entity parses");
        assert_eq!(Entity::from_reflect(&*boxed), Some(entity));
    }

    #[test]
    fn field_edits_are_scoped_to_their_param() {
        let mut table = ValueTable::default();
        table.insert("custom", Box::new(Settings::default()));
        table.insert("custom.count", Box::new(3_i32));
        table.insert("customer", Box::new(1_i32));
        let edits = table.field_edits("custom");
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, "count");
        table.clear_param("custom");
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["customer"]);
    }

    #[test]
    fn short_names_keep_generics() {
        assert_eq!(short_type_name("alloc::vec::Vec<i32>"), "Vec<i32>");
        assert_eq!(short_type_name("i32"), "i32");
        assert_eq!(TypeKey::of::<Settings>().short_name(), "Settings");
    }
}

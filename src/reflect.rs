//! Field-level view of structured parameter values.
//!
//! Structs are expanded into a tree of editable fields and recomposed from per-field
//! edits. Fields skipped with `#[reflect(ignore)]` never appear in the tree and are
//! never written, so a recomposed value keeps whatever the prior value held there.

use bevy_reflect::{PartialReflect, ReflectMut, ReflectRef};

use crate::error::ReflectError;
use crate::value::{is_builtin_vector, ValueType};

#[derive(Debug)]
pub enum FieldNode {
    Leaf { name: String, path: String, type_path: String, value: Box<dyn PartialReflect> },
    Nested { name: String, path: String, type_path: String, children: Vec<FieldNode> },
}

impl FieldNode {
    pub fn name(&self) -> &str {
        match self {
            FieldNode::Leaf { name, .. } | FieldNode::Nested { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FieldNode::Leaf { path, .. } | FieldNode::Nested { path, .. } => path,
        }
    }

    pub fn type_path(&self) -> &str {
        match self {
            FieldNode::Leaf { type_path, .. } | FieldNode::Nested { type_path, .. } => type_path,
        }
    }

    /// Depth-first list of leaf paths.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<String>) {
        match self {
            FieldNode::Leaf { path, .. } => out.push(path.clone()),
            FieldNode::Nested { children, .. } => children.iter().for_each(|child| child.collect_leaves(out)),
        }
    }
}

fn is_expandable(value: &dyn PartialReflect) -> bool {
    !is_builtin_vector(value) && matches!(value.reflect_ref(), ReflectRef::Struct(_) | ReflectRef::TupleStruct(_))
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Expands `current` (or the type default) into its visible fields.
pub fn expand(ty: &ValueType, current: Option<&dyn PartialReflect>) -> Result<Vec<FieldNode>, ReflectError> {
    let value = ty.materialize(current)?;
    expand_value(&*value)
}

pub fn expand_value(value: &dyn PartialReflect) -> Result<Vec<FieldNode>, ReflectError> {
    if !is_expandable(value) {
        return Err(ReflectError::NotAStruct { type_name: value.reflect_type_path().to_string() });
    }
    Ok(expand_fields(value, ""))
}

fn expand_fields(value: &dyn PartialReflect, prefix: &str) -> Vec<FieldNode> {
    let fields: Vec<(String, &dyn PartialReflect)> = match value.reflect_ref() {
        ReflectRef::Struct(s) => (0..s.field_len())
            .filter_map(|idx| Some((s.name_at(idx)?.to_string(), s.field_at(idx)?)))
            .collect(),
        ReflectRef::TupleStruct(t) => {
            (0..t.field_len()).filter_map(|idx| Some((idx.to_string(), t.field(idx)?))).collect()
        }
        _ => Vec::new(),
    };
    fields
        .into_iter()
        .map(|(name, field)| {
            let path = join(prefix, &name);
            let type_path = field.reflect_type_path().to_string();
            if is_expandable(field) {
                let children = expand_fields(field, &path);
                FieldNode::Nested { name, path, type_path, children }
            } else {
                FieldNode::Leaf { name, path, type_path, value: field.clone_value() }
            }
        })
        .collect()
}

/// Rebuilds a value from `prior` (or the default) with `edits` applied on top.
/// Untouched fields keep their prior contents.
pub fn collapse(
    ty: &ValueType,
    prior: Option<&dyn PartialReflect>,
    edits: &[(&str, &dyn PartialReflect)],
) -> Result<Box<dyn PartialReflect>, ReflectError> {
    let mut value = ty.materialize(prior)?;
    for (path, edit) in edits {
        apply_path(&mut *value, path, *edit)?;
    }
    Ok(value)
}

pub fn apply_path(target: &mut dyn PartialReflect, path: &str, value: &dyn PartialReflect) -> Result<(), ReflectError> {
    let type_name = target.reflect_type_path().to_string();
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let field = match target.reflect_mut() {
        ReflectMut::Struct(s) => s.field_mut(head),
        ReflectMut::TupleStruct(t) => head.parse::<usize>().ok().and_then(|idx| t.field_mut(idx)),
        _ => return Err(ReflectError::NotAStruct { type_name }),
    };
    let field = field.ok_or_else(|| ReflectError::UnknownField { type_name, path: path.to_string() })?;
    match rest {
        Some(rest) => apply_path(field, rest, value),
        None => field
            .try_apply(value)
            .map_err(|err| ReflectError::Apply { path: path.to_string(), reason: err.to_string() }),
    }
}

pub fn field_at<'a>(value: &'a dyn PartialReflect, path: &str) -> Option<&'a dyn PartialReflect> {
    path.split('.').try_fold(value, |current, segment| match current.reflect_ref() {
        ReflectRef::Struct(s) => s.field(segment),
        ReflectRef::TupleStruct(t) => segment.parse::<usize>().ok().and_then(|idx| t.field(idx)),
        _ => None,
    })
}

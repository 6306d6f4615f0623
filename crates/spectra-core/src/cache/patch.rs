//! Structural patches over JSON values.
//!
//! [`diff`] turns an edit into a forward patch list and its inverse, so a recipe that edits a
//! copy of cached data can later be undone without keeping the whole previous value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "/{i}"),
            Self::Key(k) => write!(f, "/{k}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// One patch operation. An empty path addresses the root value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: Vec<PathSegment>, value: Value },
    Remove { path: Vec<PathSegment> },
    Replace { path: Vec<PathSegment>, value: Value },
}

impl PatchOp {
    #[must_use]
    pub fn path(&self) -> &[PathSegment] {
        match self {
            Self::Add { path, .. } | Self::Remove { path } | Self::Replace { path, .. } => path,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Cannot address {segment} inside a {found}")]
    TypeMismatch { segment: String, found: &'static str },

    #[error("Cannot remove the root value")]
    RemoveRoot,
}

fn render_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter().map(ToString::to_string).collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Computes `(forward, inverse)` such that applying `forward` to `old` yields `new` and applying
/// `inverse` to `new` yields `old`.
///
/// Objects are diffed per key and equal-length arrays per index; anything else is replaced
/// whole.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> (Vec<PatchOp>, Vec<PatchOp>) {
    let mut forward = Vec::new();
    let mut inverse = Vec::new();
    let mut path = Vec::new();
    diff_into(old, new, &mut path, &mut forward, &mut inverse);
    inverse.reverse();
    (forward, inverse)
}

fn diff_into(
    old: &Value,
    new: &Value,
    path: &mut Vec<PathSegment>,
    forward: &mut Vec<PatchOp>,
    inverse: &mut Vec<PatchOp>,
) {
    if old == new {
        return;
    }

    match (old, new) {
        (Value::Object(before), Value::Object(after)) => {
            for (key, old_value) in before {
                path.push(PathSegment::Key(key.clone()));
                match after.get(key) {
                    Some(new_value) => diff_into(old_value, new_value, path, forward, inverse),
                    None => {
                        forward.push(PatchOp::Remove { path: path.clone() });
                        inverse.push(PatchOp::Add { path: path.clone(), value: old_value.clone() });
                    }
                }
                path.pop();
            }
            for (key, new_value) in after {
                if !before.contains_key(key) {
                    path.push(PathSegment::Key(key.clone()));
                    forward.push(PatchOp::Add { path: path.clone(), value: new_value.clone() });
                    inverse.push(PatchOp::Remove { path: path.clone() });
                    path.pop();
                }
            }
        }
        (Value::Array(before), Value::Array(after)) if before.len() == after.len() => {
            for (i, (old_item, new_item)) in before.iter().zip(after).enumerate() {
                path.push(PathSegment::Index(i));
                diff_into(old_item, new_item, path, forward, inverse);
                path.pop();
            }
        }
        _ => {
            forward.push(PatchOp::Replace { path: path.clone(), value: new.clone() });
            inverse.push(PatchOp::Replace { path: path.clone(), value: old.clone() });
        }
    }
}

/// Applies `ops` in order. On error `target` may be partially modified; callers that need
/// atomicity apply to a copy.
///
/// # Errors
///
/// Returns [`PatchError`] when a path does not resolve against `target`.
pub fn apply_patches(target: &mut Value, ops: &[PatchOp]) -> Result<(), PatchError> {
    for op in ops {
        apply_one(target, op)?;
    }
    Ok(())
}

fn apply_one(target: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let path = op.path();
    let Some((last, parent_path)) = path.split_last() else {
        return match op {
            PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => {
                *target = value.clone();
                Ok(())
            }
            PatchOp::Remove { .. } => Err(PatchError::RemoveRoot),
        };
    };

    let parent = navigate(target, parent_path)?;
    let missing = || PatchError::PathNotFound(render_path(path));

    match (parent, last) {
        (Value::Object(map), PathSegment::Key(key)) => match op {
            PatchOp::Add { value, .. } => {
                map.insert(key.clone(), value.clone());
            }
            PatchOp::Replace { value, .. } => {
                let slot = map.get_mut(key).ok_or_else(missing)?;
                *slot = value.clone();
            }
            PatchOp::Remove { .. } => {
                map.remove(key).ok_or_else(missing)?;
            }
        },
        (Value::Array(items), PathSegment::Index(index)) => match op {
            PatchOp::Add { value, .. } => {
                if *index > items.len() {
                    return Err(missing());
                }
                items.insert(*index, value.clone());
            }
            PatchOp::Replace { value, .. } => {
                let slot = items.get_mut(*index).ok_or_else(missing)?;
                *slot = value.clone();
            }
            PatchOp::Remove { .. } => {
                if *index >= items.len() {
                    return Err(missing());
                }
                items.remove(*index);
            }
        },
        (other, segment) => {
            return Err(PatchError::TypeMismatch { segment: segment.to_string(), found: type_name(other) })
        }
    }

    Ok(())
}

fn navigate<'a>(mut current: &'a mut Value, path: &[PathSegment]) -> Result<&'a mut Value, PatchError> {
    for (depth, segment) in path.iter().enumerate() {
        let found = type_name(current);
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key),
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
            _ => return Err(PatchError::TypeMismatch { segment: segment.to_string(), found }),
        }
        .ok_or_else(|| PatchError::PathNotFound(render_path(&path[..=depth])))?;
    }
    Ok(current)
}

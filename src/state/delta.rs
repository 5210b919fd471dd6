//! JSON Patch (RFC 6902) deltas between two state documents

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single JSON Patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Replace { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeltaError {
    #[error("path {0:?} does not exist in the document")]
    PathNotFound(String),

    #[error("path {0:?} is not a valid JSON pointer")]
    InvalidPath(String),
}

/// An ordered list of patch operations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDelta {
    operations: Vec<PatchOperation>,
}

impl StateDelta {
    /// Compute the operations that turn `old` into `new`.
    ///
    /// Objects are walked key by key; arrays and scalars are compared as a
    /// whole and replaced when they differ.
    pub fn diff(old: &Value, new: &Value) -> Self {
        let mut operations = Vec::new();
        diff_values("", old, new, &mut operations);
        Self { operations }
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(PatchOperation::path)
    }

    /// Apply the operations in order. On error `doc` may be partially patched.
    pub fn apply_to(&self, doc: &mut Value) -> Result<(), DeltaError> {
        for op in &self.operations {
            apply_operation(doc, op)?;
        }
        Ok(())
    }
}

/// Escape one reference token of a JSON pointer
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn diff_values(path: &str, old: &Value, new: &Value, ops: &mut Vec<PatchOperation>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_child) in old_map {
                let child_path = format!("{path}/{}", escape_pointer_token(key));
                match new_map.get(key) {
                    Some(new_child) => diff_values(&child_path, old_child, new_child, ops),
                    None => ops.push(PatchOperation::Remove { path: child_path }),
                }
            }
            for (key, new_child) in new_map {
                if !old_map.contains_key(key) {
                    ops.push(PatchOperation::Add {
                        path: format!("{path}/{}", escape_pointer_token(key)),
                        value: new_child.clone(),
                    });
                }
            }
        }
        _ if old == new => {}
        _ => ops.push(PatchOperation::Replace {
            path: path.to_string(),
            value: new.clone(),
        }),
    }
}

fn split_parent(path: &str) -> Result<(&str, String), DeltaError> {
    if !path.starts_with('/') {
        return Err(DeltaError::InvalidPath(path.to_string()));
    }
    // starts_with('/') guarantees a separator exists
    let idx = path.rfind('/').unwrap_or(0);
    Ok((&path[..idx], unescape_pointer_token(&path[idx + 1..])))
}

fn apply_operation(doc: &mut Value, op: &PatchOperation) -> Result<(), DeltaError> {
    match op {
        PatchOperation::Replace { path, value } => {
            let slot = doc
                .pointer_mut(path)
                .ok_or_else(|| DeltaError::PathNotFound(path.clone()))?;
            *slot = value.clone();
            Ok(())
        }
        PatchOperation::Add { path, value } => {
            if path.is_empty() {
                *doc = value.clone();
                return Ok(());
            }
            let (parent, token) = split_parent(path)?;
            match doc.pointer_mut(parent) {
                Some(Value::Object(map)) => {
                    map.insert(token, value.clone());
                    Ok(())
                }
                Some(Value::Array(items)) => {
                    let idx = if token == "-" {
                        items.len()
                    } else {
                        token
                            .parse::<usize>()
                            .map_err(|_| DeltaError::InvalidPath(path.clone()))?
                    };
                    if idx > items.len() {
                        return Err(DeltaError::PathNotFound(path.clone()));
                    }
                    items.insert(idx, value.clone());
                    Ok(())
                }
                _ => Err(DeltaError::PathNotFound(path.clone())),
            }
        }
        PatchOperation::Remove { path } => {
            let (parent, token) = split_parent(path)?;
            let removed = match doc.pointer_mut(parent) {
                Some(Value::Object(map)) => map.remove(&token).is_some(),
                Some(Value::Array(items)) => match token.parse::<usize>() {
                    Ok(idx) if idx < items.len() => {
                        items.remove(idx);
                        true
                    }
                    _ => false,
                },
                _ => false,
            };
            if removed {
                Ok(())
            } else {
                Err(DeltaError::PathNotFound(path.clone()))
            }
        }
    }
}

//! Dot-path addressed access to a nested JSON object.
//!
//! A path such as `"headers.x-trace"` walks one nested map per segment. Keys
//! are matched exactly; callers that want case-insensitive keys normalize
//! before calling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PathError;

/// A nested key/value tree addressed by dot-separated paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathMap {
    inner: Map<String, Value>,
}

impl PathMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.inner
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.inner
    }

    /// Whether a value exists at `path`.
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Look up the value at `path`.
    ///
    /// Fails with [`PathError::NotFound`] when any segment is missing or a
    /// traversed segment is not a map.
    pub fn get(&self, path: &str) -> Result<&Value, PathError> {
        let (parents, leaf) = split(path)?;

        let mut node = &self.inner;
        for segment in parents {
            node = node
                .get(segment)
                .and_then(Value::as_object)
                .ok_or_else(|| PathError::NotFound(path.to_string()))?;
        }

        node.get(leaf)
            .ok_or_else(|| PathError::NotFound(path.to_string()))
    }

    /// Look up a string value, `None` if absent or not a string.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).ok().and_then(Value::as_str)
    }

    /// Look up the value at `path`, falling back to `default` when absent.
    pub fn get_or<'a>(&'a self, path: &str, default: &'a Value) -> &'a Value {
        self.get(path).unwrap_or(default)
    }

    /// Store `value` at `path`.
    ///
    /// With `force` unset, every intermediate segment must already be a map.
    /// With `force` set, missing intermediates are created and non-map
    /// intermediates are replaced by an empty map.
    pub fn set(&mut self, path: &str, value: impl Into<Value>, force: bool) -> Result<(), PathError> {
        let (parents, leaf) = split(path)?;

        let mut node = &mut self.inner;
        for segment in parents {
            let slot = if force {
                let slot = node
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                slot
            } else {
                node.get_mut(segment)
                    .ok_or_else(|| PathError::NotFound(segment.to_string()))?
            };

            node = slot
                .as_object_mut()
                .ok_or_else(|| PathError::PathConflict(segment.to_string()))?;
        }

        node.insert(leaf.to_string(), value.into());
        Ok(())
    }

    /// Remove the leaf at `path`. Absent paths are not an error.
    pub fn clear(&mut self, path: &str) -> Result<(), PathError> {
        let (parents, leaf) = split(path)?;

        let mut node = &mut self.inner;
        for segment in parents {
            match node.get_mut(segment).and_then(Value::as_object_mut) {
                Some(child) => node = child,
                None => return Ok(()),
            }
        }

        node.remove(leaf);
        Ok(())
    }

    /// Remove the leaf at `path`, then every ancestor left empty by it.
    pub fn clear_pruned(&mut self, path: &str) -> Result<(), PathError> {
        let (parents, leaf) = split(path)?;
        prune(&mut self.inner, &parents, leaf);
        Ok(())
    }
}

impl From<Map<String, Value>> for PathMap {
    fn from(inner: Map<String, Value>) -> Self {
        Self { inner }
    }
}

/// Returns true when `node` ended up empty.
fn prune(node: &mut Map<String, Value>, parents: &[&str], leaf: &str) -> bool {
    match parents.split_first() {
        None => {
            node.remove(leaf);
        }
        Some((head, rest)) => {
            let emptied = match node.get_mut(*head).and_then(Value::as_object_mut) {
                Some(child) => prune(child, rest, leaf),
                None => false,
            };
            if emptied {
                node.remove(*head);
            }
        }
    }
    node.is_empty()
}

fn split(path: &str) -> Result<(Vec<&str>, &str), PathError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PathError::InvalidPath(path.to_string()));
    }

    // split always yields at least one segment
    let leaf = segments.pop().unwrap_or_default();
    Ok((segments, leaf))
}

//! Realtime mirror store: a tree-structured key-value store addressed by
//! slash-separated paths, mirroring chat content for low-latency delivery.
//! The relational store stays authoritative for persistence; this tree is
//! only authoritative for what connected clients see first.

pub mod push_id;

use std::sync::RwLock;

use serde_json::{Map, Value};
use thiserror::Error;

use push_id::PushIdGen;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid mirror path '{0}'")]
    InvalidPath(String),
    #[error("mirror store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, MirrorError>;

pub struct MirrorStore {
    root: RwLock<Value>,
    push_ids: PushIdGen,
}

impl MirrorStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            push_ids: PushIdGen::new(),
        }
    }

    /// Overwrite the subtree at `path`.
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        let segments = split_path(path)?;
        let mut root = self.root.write().map_err(|_| MirrorError::Poisoned)?;
        *node_mut(&mut root, &segments) = value;
        Ok(())
    }

    /// Merge `fields` into the object at `path`, creating it if absent.
    /// Existing keys not named in `fields` are left untouched.
    pub fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let segments = split_path(path)?;
        let mut root = self.root.write().map_err(|_| MirrorError::Poisoned)?;
        let target = as_object_mut(node_mut(&mut root, &segments));
        for (key, value) in fields {
            target.insert(key, value);
        }
        Ok(())
    }

    /// Append `value` under `path` with a generated key; returns the key.
    /// Keys are unique and sort in generation order, so natural key order
    /// approximates send order.
    pub fn push(&self, path: &str, value: Value) -> Result<String> {
        let key = self.push_ids.next();
        let child = format!("{}/{}", path.trim_end_matches('/'), key);
        self.set(&child, value)?;
        Ok(key)
    }

    /// Read a copy of the subtree at `path`. `None` when the path does not
    /// exist (or crosses a leaf).
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let segments = split_path(path)?;
        let root = self.root.read().map_err(|_| MirrorError::Poisoned)?;
        let mut current: &Value = &root;
        for segment in &segments {
            match current.get(segment) {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current.clone()))
    }

    /// Delete the subtree at `path`. Removing a missing path is a no-op.
    pub fn remove(&self, path: &str) -> Result<()> {
        let segments = split_path(path)?;
        let Some((leaf, parents)) = segments.split_last() else {
            // Removing the root resets the whole tree.
            let mut root = self.root.write().map_err(|_| MirrorError::Poisoned)?;
            *root = Value::Object(Map::new());
            return Ok(());
        };
        let mut root = self.root.write().map_err(|_| MirrorError::Poisoned)?;
        let mut current: &mut Value = &mut root;
        for segment in parents {
            match current.get_mut(segment) {
                Some(child) => current = child,
                None => return Ok(()),
            }
        }
        if let Some(map) = current.as_object_mut() {
            map.remove(leaf.as_str());
        }
        Ok(())
    }

    /// Children of the object at `path` as (key, value) pairs, in key order.
    pub fn children(&self, path: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .get(path)?
            .and_then(|value| value.as_object().cloned())
            .map(|map| map.into_iter().collect())
            .unwrap_or_default())
    }
}

impl Default for MirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn split_path(path: &str) -> Result<Vec<String>> {
    if path.contains("//") {
        return Err(MirrorError::InvalidPath(path.to_string()));
    }
    Ok(path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect())
}

/// Walk to `segments`, materializing intermediate objects. A leaf in the
/// way is overwritten, matching overwrite-on-set semantics.
fn node_mut<'a>(root: &'a mut Value, segments: &[String]) -> &'a mut Value {
    let mut current = root;
    for segment in segments {
        let map = as_object_mut(current);
        current = map.entry(segment.clone()).or_insert(Value::Null);
    }
    current
}

fn as_object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

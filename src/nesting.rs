//! Name transform: logical `namespace/key` <-> backend name.
//!
//! A backend only ever sees flat names; this module is where the Store
//! hides hash-sharded directory nesting and the soft-delete `.del` suffix
//! from callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

const DELETED_SUFFIX: &str = ".del";

/// Per-namespace nesting configuration.
///
/// `depths` lists the namespace's known nesting depths, most-recently
/// configured first. The first entry is the depth new objects are written
/// at; `Store::load`/`info`/`delete` probe the whole list on miss so that
/// objects written under a historical depth stay reachable after the
/// configuration changes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceLevels {
    /// Known nesting depths, active depth first.
    pub depths: Vec<u32>,
    /// Pre-create the sharding directory tree on `Store::create`.
    pub precreate_dirs: bool,
}

impl NamespaceLevels {
    /// A namespace with a single fixed nesting depth.
    pub fn depth(n: u32) -> Self {
        Self {
            depths: vec![n],
            precreate_dirs: false,
        }
    }

    /// Same depth, but pre-create the sharding tree on `create()`.
    pub fn with_precreate(mut self, precreate: bool) -> Self {
        self.precreate_dirs = precreate;
        self
    }

    /// The depth new objects are written at.
    pub fn active_depth(&self) -> u32 {
        self.depths.first().copied().unwrap_or(0)
    }
}

/// Levels configuration for every namespace a Store will use.
///
/// Must cover every namespace the store touches — there is no implicit
/// default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Levels {
    namespaces: HashMap<String, NamespaceLevels>,
}

impl Levels {
    /// An empty configuration; namespaces are added with `with_namespace`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace's nesting configuration.
    pub fn with_namespace(mut self, namespace: impl Into<String>, levels: NamespaceLevels) -> Self {
        self.namespaces.insert(namespace.into(), levels);
        self
    }

    /// Look up a namespace's configuration.
    pub fn get(&self, namespace: &str) -> Option<&NamespaceLevels> {
        self.namespaces.get(namespace)
    }

    /// Iterate all configured namespaces.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(|s| s.as_str())
    }
}

/// Validates a key: non-empty ASCII, no `/`, no `..`, no
/// whitespace; hex-only is enforced separately, only when nesting is active.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key must not be empty".to_string()));
    }
    if !key.is_ascii() {
        return Err(Error::InvalidKey(format!("key is not ASCII: {key}")));
    }
    if key.contains('/') || key.contains("..") || key.chars().any(|c| c.is_whitespace()) {
        return Err(Error::InvalidKey(format!(
            "key contains forbidden characters: {key}"
        )));
    }
    Ok(())
}

fn validate_hex(key: &str, depth: u32) -> Result<()> {
    let needed = 2 * depth as usize;
    if key.len() < needed || !key[..needed].bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidKey(format!(
            "key must be hex for the first {needed} characters under a nested namespace: {key}"
        )));
    }
    Ok(())
}

/// Composes the transformed backend name for `(namespace, key)` at the
/// given nesting depth, optionally appending the `.del` tombstone suffix.
pub fn transform_at_depth(
    namespace: &str,
    key: &str,
    depth: u32,
    deleted: bool,
) -> Result<String> {
    validate_key(key)?;
    if depth > 0 {
        validate_hex(key, depth)?;
    }

    let mut name = if namespace.is_empty() {
        String::new()
    } else {
        format!("{namespace}/")
    };

    for i in 0..depth {
        let start = (2 * i) as usize;
        name.push_str(&key[start..start + 2]);
        name.push('/');
    }
    name.push_str(key);

    if deleted {
        name.push_str(DELETED_SUFFIX);
    }

    Ok(name)
}

/// Composes the transformed backend name using a namespace's active
/// (most recently configured) nesting depth.
pub fn transform(namespace: &str, key: &str, levels: &Levels, deleted: bool) -> Result<String> {
    let depth = levels
        .get(namespace)
        .map(|l| l.active_depth())
        .unwrap_or(0);
    transform_at_depth(namespace, key, depth, deleted)
}

/// All backend names a logical `(namespace, key)` might currently live at:
/// the active depth first, then every other historically-known depth, each
/// in both live and soft-deleted form (live first). Used by `load`/`info`/
/// `delete` to fall back across nesting depths.
pub fn candidate_names(namespace: &str, key: &str, levels: &Levels) -> Result<Vec<String>> {
    let depths: Vec<u32> = match levels.get(namespace) {
        Some(l) if !l.depths.is_empty() => l.depths.clone(),
        _ => vec![0],
    };

    let mut names = Vec::with_capacity(depths.len() * 2);
    for depth in depths {
        names.push(transform_at_depth(namespace, key, depth, false)?);
        names.push(transform_at_depth(namespace, key, depth, true)?);
    }
    Ok(names)
}

/// Strips the sharding prefix and optional `.del` suffix from a backend
/// leaf name, recovering the logical key. `depth` is the nesting depth the
/// leaf was found under.
pub fn leaf_to_key(leaf: &str) -> (&str, bool) {
    match leaf.strip_suffix(DELETED_SUFFIX) {
        Some(key) => (key, true),
        None => (leaf, false),
    }
}

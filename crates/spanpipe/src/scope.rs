//! Log-side scope enrichment.
//!
//! The log analog of span attributes: a [`ScopeStack`] holds key/value
//! context for the duration of a bounded region. Nested scopes compose by
//! merging outer to inner, so the innermost value wins on key collision;
//! once a guard is released its entries have no further effect on
//! subsequently emitted records.
//!
//! The stack is an explicit per-task value (a cheap clonable handle), not
//! hidden task-local state - callers thread it through the code that needs
//! it, the same way span contexts are passed explicitly.

use crate::span::AttributeValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct ScopeInner {
    next_id: u64,
    /// Open scopes, outermost first.
    entries: Vec<(u64, Vec<(String, AttributeValue)>)>,
}

/// A stack of open log scopes for one logical task.
#[derive(Clone, Default)]
pub struct ScopeStack {
    inner: Arc<Mutex<ScopeInner>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope carrying the given pairs; the scope stays in effect
    /// until the returned guard is dropped.
    pub fn begin_scope<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> ScopeGuard
    where
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        let pairs: Vec<(String, AttributeValue)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, pairs));

        ScopeGuard {
            stack: Arc::clone(&self.inner),
            id,
        }
    }

    /// The merged key/value context of all open scopes, innermost winning
    /// on key collision. This is what a log record emitted right now would
    /// carry.
    pub fn snapshot(&self) -> HashMap<String, AttributeValue> {
        let inner = self.inner.lock().unwrap();
        let mut merged = HashMap::new();
        for (_, pairs) in &inner.entries {
            for (key, value) in pairs {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Number of currently open scopes.
    pub fn depth(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}

/// Releases its scope on drop. Guards may be dropped out of order; each
/// removes exactly its own entry.
pub struct ScopeGuard {
    stack: Arc<Mutex<ScopeInner>>,
    id: u64,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.stack.lock() {
            inner.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

//! Reference-inlined copy of a contract, for meta-schema validation only.
//!
//! Every `$ref` is replaced by a copy of its target merged with the sibling
//! keys of the reference object, and tagged with [`ORIGIN_MARKER`]. A reference
//! whose target contains the node being expanded, or contains any node
//! already entered on the current expansion chain, would recurse forever; it
//! is left in place and tagged with [`CIRCULAR_MARKER`] instead.

use super::store::{DocumentStore, Reference};
use crate::error::{ContractError, Result};
use serde_json::Value;
use tracing::debug;

/// Added to inlined nodes; holds the absolute reference they came from.
pub const ORIGIN_MARKER: &str = "x-ref";
/// Added (as `true`) to `$ref` nodes left in place at a cycle.
pub const CIRCULAR_MARKER: &str = "x-circular-ref";

pub struct CircularSafeFlattener<'s> {
    store: &'s DocumentStore,
}

impl<'s> CircularSafeFlattener<'s> {
    pub fn new(store: &'s DocumentStore) -> Self {
        Self { store }
    }

    /// Deep copy of the value at `root` with references inlined. Cached
    /// documents are left untouched.
    pub fn flatten(&self, root: &Reference) -> Result<Value> {
        let mut copy = self.store.get_cached(root)?;
        let mut chain = Vec::new();
        self.expand(&mut copy, root.clone(), &mut chain)?;
        Ok(copy)
    }

    fn expand(&self, value: &mut Value, scope: Reference, chain: &mut Vec<Reference>) -> Result<()> {
        match value {
            Value::Object(map) => {
                if let Some(raw) = map.get("$ref") {
                    let raw = raw.as_str().ok_or_else(|| {
                        ContractError::invalid_reference(raw.to_string(), "$ref must be a string")
                    })?;
                    let target = Reference::parse(raw)?;
                    if target.is_ancestor_or_equal(&scope)
                        || chain.iter().any(|entered| target.is_ancestor_or_equal(entered))
                    {
                        debug!(reference = %target, scope = %scope, "circular reference left in place");
                        map.insert(CIRCULAR_MARKER.to_string(), Value::Bool(true));
                        return Ok(());
                    }

                    let origin = raw.to_string();
                    let resolved = self.store.get_cached(&target)?;
                    map.remove("$ref");
                    match resolved {
                        Value::Object(fields) => {
                            for (key, field) in fields {
                                map.insert(key, field);
                            }
                        }
                        other => {
                            *value = other;
                            chain.push(scope);
                            let result = self.expand(value, target, chain);
                            chain.pop();
                            return result;
                        }
                    }
                    map.entry(ORIGIN_MARKER.to_string())
                        .or_insert(Value::String(origin));

                    chain.push(scope);
                    let result = self.expand(value, target, chain);
                    chain.pop();
                    return result;
                }

                for (key, child) in map.iter_mut() {
                    self.expand(child, scope.append(key), chain)?;
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter_mut().enumerate() {
                    self.expand(child, scope.append(&index.to_string()), chain)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Counts `$ref` keys left anywhere under `value`.
pub fn count_references(value: &Value) -> usize {
    match value {
        Value::Object(map) => {
            usize::from(map.contains_key("$ref")) + map.values().map(count_references).sum::<usize>()
        }
        Value::Array(items) => items.iter().map(count_references).sum(),
        _ => 0,
    }
}

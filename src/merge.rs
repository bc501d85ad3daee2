//! Structured-attribute merge engine.
//!
//! Product attributes arrive from multiple writers over the life of a
//! session (initial catalog upload, incremental disclosures during the
//! stream). Reconciliation is a recursive merge: nested objects merge
//! key-by-key, everything else is last-writer-wins at the leaf.

use serde_json::Value;

/// Merge `incoming` into `base` in place.
///
/// Where both sides hold an object under the same key, recurse; otherwise the
/// incoming value replaces the base value. A non-object `base` is replaced
/// entirely. Deterministic; commutative only when the key sets are disjoint.
pub fn deep_merge(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                let recurse =
                    value.is_object() && base_map.get(&key).map_or(false, Value::is_object);
                if recurse {
                    if let Some(slot) = base_map.get_mut(&key) {
                        deep_merge(slot, value);
                    }
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}

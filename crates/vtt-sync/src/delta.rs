//! Recursive state deltas.
//!
//! A delta mirrors the shape of the state it patches. Objects merge key by
//! key, and a few tagged objects carry operations:
//!
//! * `{"__deleted": true}` removes the key
//! * `{"__type": "primitive", "__value": v}` replaces the value with `v`
//! * `{"__type": "array", "__length": n, "__changes": {"i": delta}}` patches
//!   array elements by index, then resizes to `n`
//!
//! Any other non-object value replaces what was there.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use vtt_net::{Category, GameState, Record};

/// Errors from applying a delta.
#[derive(Debug, Error, PartialEq)]
pub enum DeltaError {
    /// The delta (or a category inside it) is not a JSON object.
    #[error("delta for {0} is not an object")]
    NotAnObject(String),

    /// An entity delta produced something other than an object.
    #[error("delta turns {category}/{entity_id} into a non-object")]
    InvalidEntity {
        /// Category.
        category: Category,
        /// Entity id.
        entity_id: String,
    },

    /// An array change used an index that is not a number.
    #[error("invalid array index {0:?}")]
    InvalidIndex(String),

    /// An array change or `__length` reaches past [`MAX_ARRAY_LEN`].
    #[error("array size {0} exceeds limit of {max}", max = MAX_ARRAY_LEN)]
    ArrayTooLong(u64),
}

/// Largest array a delta may produce.
pub const MAX_ARRAY_LEN: usize = 65_536;

fn is_deleted(value: &Value) -> bool {
    value.get("__deleted").and_then(Value::as_bool).unwrap_or(false)
}

/// Apply a state delta in place.
///
/// The delta is validated before anything changes, so an error leaves
/// `state` untouched. Unknown categories are skipped with a warning.
pub fn apply_delta(state: &mut GameState, delta: &Value) -> Result<(), DeltaError> {
    let categories = delta
        .as_object()
        .ok_or_else(|| DeltaError::NotAnObject("state".into()))?;

    let mut next = state.clone();
    for (name, change) in categories {
        let Some(category) = Category::from_wire(name) else {
            warn!(category = %name, "delta for unknown category skipped");
            continue;
        };

        if is_deleted(change) {
            next.remove(&category);
            continue;
        }
        let entities_delta = change
            .as_object()
            .ok_or_else(|| DeltaError::NotAnObject(name.clone()))?;

        let entities = next.entry(category).or_default();
        for (entity_id, entity_delta) in entities_delta {
            if is_deleted(entity_delta) {
                entities.remove(entity_id);
                continue;
            }
            let current = entities.remove(entity_id).map(Value::Object);
            let patched = apply_value(current, entity_delta)?;
            let Value::Object(record) = patched else {
                return Err(DeltaError::InvalidEntity {
                    category,
                    entity_id: entity_id.clone(),
                });
            };
            entities.insert(entity_id.clone(), record);
        }
    }

    *state = next;
    Ok(())
}

/// Apply one delta node to an optional current value.
fn apply_value(current: Option<Value>, delta: &Value) -> Result<Value, DeltaError> {
    let Some(node) = delta.as_object() else {
        return Ok(delta.clone());
    };

    match node.get("__type").and_then(Value::as_str) {
        Some("primitive") => Ok(node.get("__value").cloned().unwrap_or(Value::Null)),
        Some("array") => apply_array(current, node),
        _ => {
            let mut record = match current {
                Some(Value::Object(record)) => record,
                _ => Record::new(),
            };
            for (key, change) in node {
                if is_deleted(change) {
                    record.remove(key);
                } else {
                    let existing = record.remove(key);
                    record.insert(key.clone(), apply_value(existing, change)?);
                }
            }
            Ok(Value::Object(record))
        }
    }
}

fn apply_array(current: Option<Value>, node: &Record) -> Result<Value, DeltaError> {
    let mut items = match current {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    if node.contains_key("__operations") {
        debug!("array operations ignored, applying index changes only");
    }

    if let Some(changes) = node.get("__changes").and_then(Value::as_object) {
        let mut indexed = Vec::with_capacity(changes.len());
        for (index, change) in changes {
            let index: usize = index
                .parse()
                .map_err(|_| DeltaError::InvalidIndex(index.clone()))?;
            indexed.push((index, change));
        }
        indexed.sort_by_key(|(index, _)| *index);

        for (index, change) in indexed {
            if index >= MAX_ARRAY_LEN {
                return Err(DeltaError::ArrayTooLong(index as u64));
            }
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            let existing = std::mem::take(&mut items[index]);
            items[index] = apply_value(Some(existing), change)?;
        }
    }

    if let Some(length) = node.get("__length").and_then(Value::as_u64) {
        let length = usize::try_from(length)
            .ok()
            .filter(|len| *len <= MAX_ARRAY_LEN)
            .ok_or(DeltaError::ArrayTooLong(length))?;
        items.resize(length, Value::Null);
    }

    Ok(Value::Array(items))
}

//! Per-member parameter documents.

use serde_json::{Map, Value};

/// Deep-merge `overlay` onto `base`. Objects merge key by key; anything
/// else in the overlay replaces the base value.
pub fn merge_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                let next = match merged.get(key) {
                    Some(existing) => merge_values(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (base, Value::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}

/// Serialized document a member should run with: base values merged with
/// the member's override. A missing base renders as an empty object.
pub fn render_values(base: &Value, overlay: Option<&Value>) -> serde_json::Result<Vec<u8>> {
    let base = match base {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    let rendered = match overlay {
        Some(overlay) => merge_values(&base, overlay),
        None => base,
    };
    serde_json::to_vec(&rendered)
}

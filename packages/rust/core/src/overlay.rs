//! Custom overlays: hand-edited JSON merged over cached documents at export.
//!
//! Overlays use JSON merge patch semantics (RFC 7386): objects merge
//! recursively, `null` deletes a key, anything else replaces the value.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use spacecraft_shared::{Collection, Item, Result, SpaceCraftError};

/// Apply `patch` to `target` in place.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Value::Object(target_map) = target else {
        return;
    };

    for (key, value) in patch_map {
        if value.is_null() {
            target_map.remove(key);
        } else {
            merge_patch(
                target_map.entry(key.clone()).or_insert(Value::Null),
                value,
            );
        }
    }
}

/// Merge an overlay into an item. The item id cannot be changed.
pub fn apply_item_overlay(item: Item, patch: &Value) -> Result<Item> {
    let id = item.id.clone();
    let mut merged: Item = apply(&item, patch, "item")?;
    merged.id = id;
    Ok(merged)
}

/// Merge an overlay into a collection. The collection id cannot be changed.
pub fn apply_collection_overlay(collection: Collection, patch: &Value) -> Result<Collection> {
    let id = collection.id.clone();
    let mut merged: Collection = apply(&collection, patch, "collection")?;
    merged.id = id;
    Ok(merged)
}

fn apply<T: Serialize + DeserializeOwned>(doc: &T, patch: &Value, kind: &str) -> Result<T> {
    if !patch.is_object() {
        return Err(SpaceCraftError::validation(format!(
            "{kind} overlay must be a JSON object"
        )));
    }

    let mut value = serde_json::to_value(doc)
        .map_err(|e| SpaceCraftError::validation(format!("{kind} serialization failed: {e}")))?;
    merge_patch(&mut value, patch);

    serde_json::from_value(value)
        .map_err(|e| SpaceCraftError::validation(format!("{kind} overlay produces invalid document: {e}")))
}

//! Normalization for `v1/Event` objects.

use crate::error::Result;
use serde_json::Value;

/// Move the event's `type` field to `_type`.
///
/// `type` is a reserved identifier in the gateway's query grammar, so the
/// field is renamed before the object becomes visible to consumers.
pub(super) fn transform(obj: &mut Value) -> Result<()> {
    if let Some(root) = obj.as_object_mut() {
        if let Some(value) = root.remove("type") {
            root.insert("_type".to_string(), value);
        }
    }
    Ok(())
}

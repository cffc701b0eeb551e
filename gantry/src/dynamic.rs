//! Accessors for the dynamic JSON objects flowing through the pipeline.
//!
//! Objects are plain [`serde_json::Value`] trees carrying the usual
//! Kubernetes envelope. Keeping them untyped preserves unknown fields
//! byte-for-byte on re-serialize; these helpers cover the handful of
//! metadata fields the core actually reads.

use serde_json::{Map, Value};

/// The object's `metadata` map, if present.
#[must_use]
pub fn metadata(obj: &Value) -> Option<&Map<String, Value>> {
    obj.get("metadata")?.as_object()
}

/// Mutable access to the object's `metadata` map, created when absent.
pub fn metadata_mut(obj: &mut Value) -> Option<&mut Map<String, Value>> {
    let root = obj.as_object_mut()?;
    root.entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

/// `metadata.name`.
#[must_use]
pub fn name(obj: &Value) -> Option<&str> {
    metadata(obj)?.get("name")?.as_str()
}

/// `metadata.namespace`.
#[must_use]
pub fn namespace(obj: &Value) -> Option<&str> {
    metadata(obj)?.get("namespace")?.as_str()
}

/// `metadata.resourceVersion` parsed as an integer revision.
///
/// Resource versions are opaque strings on the wire, but every supported
/// apiserver emits etcd revisions; non-numeric versions yield `None`.
#[must_use]
pub fn revision(obj: &Value) -> Option<u64> {
    metadata(obj)?.get("resourceVersion")?.as_str()?.parse().ok()
}

/// The server-side printer cells stored under `metadata.fields`.
#[must_use]
pub fn fields(obj: &Value) -> Option<&Vec<Value>> {
    metadata(obj)?.get("fields")?.as_array()
}

/// Whether this is the deleted-final-state-unknown sentinel: a tombstone
/// carrying only a key, forwarded through the pipeline unchanged.
#[must_use]
pub fn is_tombstone(obj: &Value) -> bool {
    obj.as_object()
        .is_some_and(|o| o.contains_key("key") && !o.contains_key("metadata"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_the_envelope() {
        let obj = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "p1",
                "namespace": "default",
                "resourceVersion": "101",
                "fields": ["p1", "1/1", "Running"],
            },
        });
        assert_eq!(name(&obj), Some("p1"));
        assert_eq!(namespace(&obj), Some("default"));
        assert_eq!(revision(&obj), Some(101));
        assert_eq!(fields(&obj).map(Vec::len), Some(3));
        assert!(!is_tombstone(&obj));
    }

    #[test]
    fn non_numeric_revision_is_none() {
        let obj = json!({"metadata": {"resourceVersion": "abc"}});
        assert_eq!(revision(&obj), None);
    }

    #[test]
    fn tombstones_are_detected() {
        assert!(is_tombstone(&json!({"key": "default/p1"})));
        assert!(!is_tombstone(&json!({"key": "x", "metadata": {}})));
    }
}

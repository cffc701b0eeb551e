//! Default enrichment, applied to every object after the specialized steps.

use crate::dynamic;
use crate::error::Result;
use gantry_core::{Schema, SummaryCache};
use serde_json::{Map, Value};

pub(super) fn transform(schema: &Schema, summaries: &dyn SummaryCache, obj: &mut Value) -> Result<()> {
    let namespace = dynamic::namespace(obj).map(str::to_string);
    let Some(name) = dynamic::name(obj).map(str::to_string) else {
        return Ok(());
    };

    rewrite_id(obj, namespace.as_deref(), &name);

    let gvk = schema.group_version_kind();
    let state = summaries
        .summarized(&gvk, namespace.as_deref(), &name)
        .map(|s| {
            let mut out = Map::new();
            out.insert("name".to_string(), Value::from(s.state));
            out.insert("error".to_string(), Value::from(s.error));
            out.insert("transitioning".to_string(), Value::from(s.transitioning));
            out.insert("message".to_string(), Value::from(s.message.join(":")));
            Value::Object(out)
        });
    let relationships = summaries.relationships(&gvk, namespace.as_deref(), &name);

    if let Some(meta) = dynamic::metadata_mut(obj) {
        if let Some(state) = state {
            meta.insert("state".to_string(), state);
        }
        if !relationships.is_empty() {
            meta.insert(
                "relationships".to_string(),
                serde_json::to_value(relationships)?,
            );
        }
    }

    fill_condition_defaults(obj);
    Ok(())
}

/// Replace the object's `id` with `namespace/name`, keeping whatever was
/// there before under `_id`.
fn rewrite_id(obj: &mut Value, namespace: Option<&str>, name: &str) {
    let id = match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    };
    if let Some(root) = obj.as_object_mut() {
        if let Some(old) = root.insert("id".to_string(), Value::from(id)) {
            root.insert("_id".to_string(), old);
        }
    }
}

/// Every status condition carries `transitioning`, `error` and
/// `lastUpdateTime`; absent update times default to the transition time.
fn fill_condition_defaults(obj: &mut Value) {
    let Some(conditions) = obj
        .pointer_mut("/status/conditions")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for condition in conditions {
        let Some(c) = condition.as_object_mut() else {
            continue;
        };
        c.entry("transitioning").or_insert(Value::from(false));
        c.entry("error").or_insert(Value::from(false));
        if !c.contains_key("lastUpdateTime") {
            if let Some(transition) = c.get("lastTransitionTime").cloned() {
                c.insert("lastUpdateTime".to_string(), transition);
            }
        }
    }
}

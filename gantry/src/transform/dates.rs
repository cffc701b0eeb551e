//! Date-cell conversion for dynamically-columned (CRD) kinds.

use super::field_index;
use crate::error::Result;
use gantry_core::duration::parse_duration;
use gantry_core::Schema;
use serde_json::Value;

/// Replace relative date cells (a human-readable age such as `"5d"`) with
/// the absolute epoch-millisecond instant `now - age`, so clients can
/// re-render without the server's clock.
pub(super) fn transform(schema: &Schema, obj: &mut Value, now_ms: i64) -> Result<()> {
    let indexes: Vec<usize> = schema
        .columns
        .iter()
        .filter(|c| c.type_ == "date")
        .filter_map(field_index)
        .collect();
    if indexes.is_empty() {
        return Ok(());
    }

    let Some(fields) = obj
        .pointer_mut("/metadata/fields")
        .and_then(Value::as_array_mut)
    else {
        return Ok(());
    };
    for idx in indexes {
        let Some(cell) = fields.get(idx).and_then(Value::as_str) else {
            continue;
        };
        // the printer emits placeholders for unset dates
        if let Ok(age) = parse_duration(cell) {
            let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
            fields[idx] = Value::from(now_ms.saturating_sub(age_ms));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::Column;
    use serde_json::json;

    fn crd_schema() -> Schema {
        Schema {
            dynamic_columns: true,
            columns: vec![
                Column {
                    name: "Name".to_string(),
                    field: "$.metadata.fields[0]".to_string(),
                    type_: "string".to_string(),
                    ..Column::default()
                },
                Column {
                    name: "Age".to_string(),
                    field: "$.metadata.fields[1]".to_string(),
                    type_: "date".to_string(),
                    ..Column::default()
                },
            ],
            ..Schema::default()
        }
    }

    #[test]
    fn converts_relative_ages_to_epoch_millis() {
        let now = 1_700_000_000_000;
        let mut obj = json!({"metadata": {"fields": ["x", "5d"]}});
        transform(&crd_schema(), &mut obj, now).unwrap();
        assert_eq!(
            obj["metadata"]["fields"][1],
            json!(now - 5 * 86_400_000_i64)
        );
    }

    #[test]
    fn placeholders_are_left_alone() {
        let mut obj = json!({"metadata": {"fields": ["x", "<unknown>"]}});
        transform(&crd_schema(), &mut obj, 0).unwrap();
        assert_eq!(obj["metadata"]["fields"][1], json!("<unknown>"));
    }
}

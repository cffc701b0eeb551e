//! Restart-count cell parsing for `v1/Pod` objects.

use super::field_index;
use crate::error::Result;
use gantry_core::duration::parse_restart_cell;
use gantry_core::Schema;
use serde_json::{json, Value};

/// Parse every restart-count cell (`"4 (3h38m ago)"`) into a
/// `[count, lastRestartMillis | null]` pair stored back into the cell.
pub(super) fn transform(schema: &Schema, obj: &mut Value, now_ms: i64) -> Result<()> {
    let indexes: Vec<usize> = schema
        .columns
        .iter()
        .filter(|c| c.name == "Restarts")
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
    let mut result = Ok(());
    for idx in indexes {
        // already-parsed pairs show up on re-transform; leave them alone
        let Some(cell) = fields.get(idx).and_then(Value::as_str) else {
            continue;
        };
        match parse_restart_cell(cell, now_ms) {
            Ok((count, last)) => {
                fields[idx] = match last {
                    Some(ms) => json!([count, ms]),
                    None => json!([count, Value::Null]),
                };
            }
            Err(e) => {
                if result.is_ok() {
                    result = Err(gantry_core::Error::Invalid(e.to_string()).into());
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::Column;

    fn schema_with_restarts(idx: usize) -> Schema {
        Schema {
            columns: vec![Column {
                name: "Restarts".to_string(),
                field: format!("$.metadata.fields[{idx}]"),
                type_: "string".to_string(),
                ..Column::default()
            }],
            ..Schema::default()
        }
    }

    #[test]
    fn parses_count_and_elapsed_time() {
        let now = 1_000_000_000;
        let mut obj = json!({"metadata": {"fields": ["p", "4 (3m ago)"]}});
        transform(&schema_with_restarts(1), &mut obj, now).unwrap();
        assert_eq!(obj["metadata"]["fields"][1], json!([4, now - 180_000]));
    }

    #[test]
    fn bare_count_has_no_timestamp() {
        let mut obj = json!({"metadata": {"fields": ["0"]}});
        transform(&schema_with_restarts(0), &mut obj, 0).unwrap();
        assert_eq!(obj["metadata"]["fields"][0], json!([0, Value::Null]));
    }

    #[test]
    fn already_parsed_cells_are_left_alone() {
        let mut obj = json!({"metadata": {"fields": [[4, 123]]}});
        transform(&schema_with_restarts(0), &mut obj, 0).unwrap();
        assert_eq!(obj["metadata"]["fields"][0], json!([4, 123]));
    }
}

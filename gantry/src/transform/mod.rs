//! The object enrichment chain applied at cache ingress.
//!
//! For each kind a deterministic pipeline runs over every object before it
//! is stored: kind-specific normalization first, then cell parsing for
//! restart and date columns, then the default enrichment (id rewrite,
//! state summary, relationships, condition defaults) always last.
//!
//! Individual step failures are reported to the caller but never abort the
//! remaining steps; a partially enriched object is still stored.

mod cluster;
mod dates;
mod defaults;
mod event;
mod pod;

use crate::error::{Error, Result};
use crate::dynamic;
use gantry_core::{Schema, SummaryCache};
use serde_json::Value;
use std::sync::Arc;

/// The ordered transform pipeline.
pub struct TransformChain {
    summary: Arc<dyn SummaryCache>,
}

impl TransformChain {
    #[must_use]
    pub fn new(summary: Arc<dyn SummaryCache>) -> Self {
        TransformChain { summary }
    }

    /// Apply every applicable transform to `obj` in place.
    ///
    /// The deleted-final-state-unknown tombstone passes through unchanged.
    ///
    /// # Errors
    ///
    /// Returns the first step failure (after running the remaining steps),
    /// or an `Internal` error for non-object input.
    pub fn apply(&self, schema: &Schema, obj: &mut Value, now_ms: i64) -> Result<()> {
        if dynamic::is_tombstone(obj) {
            return Ok(());
        }
        if !obj.is_object() {
            return Err(Error::internal(format!(
                "transform input for {} is not an object",
                schema.id
            )));
        }

        let mut first_err = None;
        let mut record = |res: Result<()>| {
            if let Err(e) = res {
                first_err.get_or_insert(e);
            }
        };

        if schema.group.is_empty() && schema.kind == "Event" {
            record(event::transform(obj));
        }
        if schema.group == "management.cattle.io" && schema.kind == "Cluster" {
            record(cluster::transform(obj));
        }
        if schema.group.is_empty() && schema.kind == "Pod" {
            record(pod::transform(schema, obj, now_ms));
        }
        if schema.dynamic_columns {
            record(dates::transform(schema, obj, now_ms));
        }
        record(defaults::transform(schema, self.summary.as_ref(), obj));

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The cell index a column reads, parsed from its `$.metadata.fields[i]`
/// path. Columns addressing arbitrary object paths have no cell.
pub(crate) fn field_index(column: &gantry_core::Column) -> Option<usize> {
    column
        .field
        .strip_prefix("$.metadata.fields[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

#[cfg(test)]
pub(crate) mod testutil {
    use gantry_core::summary::{Relationship, Summary, SummaryCache};
    use kube::core::GroupVersionKind;

    /// A summary cache returning a fixed summary for every object.
    pub struct FixedSummaries(pub Option<Summary>, pub Vec<Relationship>);

    impl SummaryCache for FixedSummaries {
        fn summarized(
            &self,
            _gvk: &GroupVersionKind,
            _namespace: Option<&str>,
            _name: &str,
        ) -> Option<Summary> {
            self.0.clone()
        }

        fn relationships(
            &self,
            _gvk: &GroupVersionKind,
            _namespace: Option<&str>,
            _name: &str,
        ) -> Vec<Relationship> {
            self.1.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::FixedSummaries;
    use super::*;
    use assert_json_diff::assert_json_include;
    use gantry_core::summary::{Relationship, Summary};
    use gantry_core::Column;
    use serde_json::json;
    use std::sync::Arc;

    fn pod_schema() -> Schema {
        Schema {
            id: "pod".to_string(),
            group: String::new(),
            version: "v1".to_string(),
            kind: "Pod".to_string(),
            resource: "pods".to_string(),
            namespaced: true,
            columns: ["Name", "Ready", "Status", "Restarts", "Age"]
                .iter()
                .enumerate()
                .map(|(i, name)| Column {
                    name: (*name).to_string(),
                    field: format!("$.metadata.fields[{i}]"),
                    type_: "string".to_string(),
                    ..Column::default()
                })
                .collect(),
            ..Schema::default()
        }
    }

    #[test]
    fn chain_runs_in_order_and_enriches() {
        let chain = TransformChain::new(Arc::new(FixedSummaries(
            Some(Summary {
                state: "running".to_string(),
                transitioning: false,
                error: false,
                message: vec!["a".to_string(), "b".to_string()],
            }),
            vec![Relationship {
                to_id: "default/owner".to_string(),
                rel: "owner".to_string(),
                ..Relationship::default()
            }],
        )));
        let schema = pod_schema();
        let now = 1_700_000_000_000;
        let mut obj = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "id": "old-id",
            "metadata": {
                "name": "p",
                "namespace": "default",
                "fields": ["p", "1/1", "Running", "4 (3h38m ago)", "5d"],
            },
        });
        chain.apply(&schema, &mut obj, now).unwrap();

        assert_json_include!(
            actual: obj.clone(),
            expected: json!({
                "id": "default/p",
                "_id": "old-id",
                "metadata": {
                    "state": {
                        "name": "running",
                        "error": false,
                        "transitioning": false,
                        "message": "a:b",
                    },
                    "relationships": [{"toId": "default/owner", "rel": "owner"}],
                },
            })
        );
        assert_eq!(
            obj["metadata"]["fields"][3],
            json!([4, now - (3 * 3600 + 38 * 60) * 1000])
        );
    }

    #[test]
    fn tombstones_pass_through() {
        let chain = TransformChain::new(Arc::new(FixedSummaries(None, vec![])));
        let mut obj = json!({"key": "default/p1"});
        let before = obj.clone();
        chain.apply(&pod_schema(), &mut obj, 0).unwrap();
        assert_eq!(obj, before);
    }

    #[test]
    fn non_object_input_is_an_internal_error() {
        let chain = TransformChain::new(Arc::new(FixedSummaries(None, vec![])));
        let mut obj = json!("nope");
        let err = chain.apply(&pod_schema(), &mut obj, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Core(gantry_core::Error::Internal(_))
        ));
    }

    #[test]
    fn step_failure_does_not_stop_default_enrichment() {
        let chain = TransformChain::new(Arc::new(FixedSummaries(None, vec![])));
        let schema = pod_schema();
        let mut obj = json!({
            "metadata": {
                "name": "p",
                "namespace": "default",
                "fields": ["p", "1/1", "Running", "garbage cell", "5d"],
            },
        });
        assert!(chain.apply(&schema, &mut obj, 0).is_err());
        // id rewrite still ran
        assert_eq!(obj["id"], json!("default/p"));
    }
}

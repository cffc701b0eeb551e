//! Aggregate count records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The id of the single logical counts resource.
pub const COUNT_ID: &str = "count";

/// The count state for one kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCount {
    pub count: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespaces: BTreeMap<String, i64>,
    /// Highest resource version observed across counted objects.
    #[serde(default)]
    pub revision: u64,
}

impl ItemCount {
    /// Apply one add (`delta = 1`) or remove (`delta = -1`) event.
    pub fn apply(&mut self, delta: i64, namespace: Option<&str>, revision: u64) {
        self.count += delta;
        if let Some(ns) = namespace {
            let per_ns = self.namespaces.entry(ns.to_string()).or_default();
            *per_ns += delta;
            if *per_ns <= 0 {
                self.namespaces.remove(ns);
            }
        }
        self.revision = revision;
    }
}

/// The counts resource: one [`ItemCount`] per visible schema id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Count {
    pub id: String,
    pub counts: BTreeMap<String, ItemCount>,
}

impl Count {
    #[must_use]
    pub fn new(counts: BTreeMap<String, ItemCount>) -> Self {
        Count {
            id: COUNT_ID.to_string(),
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_tracks_namespaces_and_revision() {
        let mut item = ItemCount::default();
        item.apply(1, Some("default"), 100);
        item.apply(1, Some("default"), 101);
        item.apply(1, Some("kube-system"), 102);
        assert_eq!(item.count, 3);
        assert_eq!(item.namespaces["default"], 2);
        assert_eq!(item.revision, 102);

        item.apply(-1, Some("kube-system"), 103);
        assert_eq!(item.count, 2);
        assert!(!item.namespaces.contains_key("kube-system"));
        assert_eq!(item.revision, 103);
    }

    #[test]
    fn cluster_scoped_objects_have_no_namespace_breakdown() {
        let mut item = ItemCount::default();
        item.apply(1, None, 5);
        assert_eq!(item.count, 1);
        assert!(item.namespaces.is_empty());
    }
}

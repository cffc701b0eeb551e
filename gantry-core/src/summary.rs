//! Object summaries and relationship edges.

use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};

/// A condensed view of an object's state, attached under `metadata.state`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub state: String,
    #[serde(default)]
    pub transitioning: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message: Vec<String>,
}

/// A directed edge between two objects, attached under
/// `metadata.relationships`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_type: String,
    pub rel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<serde_json::Value>,
}

/// External collaborator resolving summaries and relationships for cached
/// objects.
pub trait SummaryCache: Send + Sync {
    /// The summarized state of the named object, if known.
    fn summarized(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str)
        -> Option<Summary>;

    /// The relationship edges of the named object.
    fn relationships(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Vec<Relationship>;
}

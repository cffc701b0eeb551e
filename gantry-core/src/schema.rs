//! Schema records for discovered resource kinds.
//!
//! A [`Schema`] is the contract record for one kind: both of its identities
//! (the Kind used in payloads and the Resource used in URL paths), the verbs
//! the apiserver advertises, printer columns, and the per-user method sets
//! populated during projection.

use crate::access::AccessList;
use kube::core::{GroupVersionKind, GroupVersionResource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A table-print column definition for a kind.
///
/// Inherited from the kind's server-side printer columns; `field` is a
/// JSON path into `metadata.fields[i]` or an arbitrary object path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub field: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Column {
    /// The two columns every kind carries when the server declares none.
    #[must_use]
    pub fn defaults() -> Vec<Column> {
        vec![
            Column {
                name: "Name".to_string(),
                field: "metadata.name".to_string(),
                type_: "string".to_string(),
                format: "name".to_string(),
                description: String::new(),
            },
            Column {
                name: "Created".to_string(),
                field: "metadata.creationTimestamp".to_string(),
                type_: "date".to_string(),
                format: String::new(),
                description: String::new(),
            },
        ]
    }
}

/// The contract record for one discoverable kind.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Unversioned public id, set after preferred-version selection.
    pub id: String,
    pub plural_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name as used in URL paths.
    pub resource: String,
    pub namespaced: bool,
    /// Verbs discovered from the apiserver, untouched by projection.
    pub verbs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_group: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<Column>,
    /// Columns came from a live table probe rather than a CRD declaration.
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub dynamic_columns: bool,
    /// OpenAPI v3 resource field schema, present only when the CRD version
    /// declares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_fields: Option<serde_json::Value>,

    /// Per-verb access entries. Populated only in per-user projections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<BTreeMap<String, AccessList>>,
    /// HTTP methods available on the collection endpoint for the caller.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub collection_methods: Vec<String>,
    /// HTTP methods available on individual resources for the caller.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub resource_methods: Vec<String>,

    /// Methods blocked regardless of permission; projected as the literal
    /// `blocked-<METHOD>` string.
    #[serde(skip)]
    pub disallow_methods: HashSet<String>,
}

/// Builds the unversioned id for a group/kind pair.
///
/// The core group contributes no segment: `("", "Pod")` is `pod` while
/// `("apps", "Deployment")` is `apps.deployment`.
#[must_use]
pub fn public_id(group: &str, kind: &str) -> String {
    if group.is_empty() {
        kind.to_lowercase()
    } else {
        format!("{}.{}", group, kind).to_lowercase()
    }
}

/// Builds the versioned id used internally during discovery.
#[must_use]
pub fn versioned_id(group: &str, version: &str, kind: &str) -> String {
    if group.is_empty() {
        format!("{}.{}", version, kind).to_lowercase()
    } else {
        format!("{}.{}.{}", group, version, kind).to_lowercase()
    }
}

impl Schema {
    /// The versioned discovery id of this schema.
    #[must_use]
    pub fn versioned_id(&self) -> String {
        versioned_id(&self.group, &self.version, &self.kind)
    }

    /// The unversioned public id of this schema.
    #[must_use]
    pub fn public_id(&self) -> String {
        public_id(&self.group, &self.kind)
    }

    #[must_use]
    pub fn group_version_kind(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    #[must_use]
    pub fn group_version_resource(&self) -> GroupVersionResource {
        GroupVersionResource::gvr(&self.group, &self.version, &self.resource)
    }

    /// Whether the apiserver advertises `verb` for this kind.
    #[must_use]
    pub fn supports_verb(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v == verb)
    }

    /// Whether this kind can back an informer.
    #[must_use]
    pub fn can_list_watch(&self) -> bool {
        self.supports_verb("list") && self.supports_verb("watch")
    }

    /// The `group/version` string used in payload `apiVersion` fields.
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

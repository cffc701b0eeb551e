//! Authorization access sets.
//!
//! An [`AccessSet`] is the summary of one user's permissions: for each
//! `(verb, group, resource)` an ordered list of namespace/name grants where
//! `"*"` denotes wildcard. Sets are produced by an external evaluator, are
//! immutable once produced, and carry a content-addressable id so that users
//! with identical permissions share cache entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Matches any namespace or resource name.
pub const ALL: &str = "*";

/// One namespace/name grant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Access {
    pub namespace: String,
    pub resource_name: String,
}

impl Access {
    /// A grant over every namespace and name.
    #[must_use]
    pub fn everything() -> Self {
        Access {
            namespace: ALL.to_string(),
            resource_name: ALL.to_string(),
        }
    }

    /// Whether this grant covers the given namespace and name.
    #[must_use]
    pub fn grants(&self, namespace: &str, name: &str) -> bool {
        (self.namespace == ALL || self.namespace == namespace)
            && (self.resource_name == ALL || self.resource_name == name)
    }
}

/// An ordered list of grants for one `(verb, group, resource)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessList(Vec<Access>);

impl AccessList {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, access: Access) {
        if !self.0.contains(&access) {
            self.0.push(access);
        }
    }

    /// Whether any entry covers the given namespace and name.
    #[must_use]
    pub fn grants(&self, namespace: &str, name: &str) -> bool {
        self.0.iter().any(|a| a.grants(namespace, name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Access> {
        self.0.iter()
    }

    /// Drop entries scoped to a concrete namespace.
    ///
    /// Cluster-scoped schemas must never carry a per-namespace grant; a
    /// binding that names one anyway is spurious.
    pub fn retain_cluster_scoped(&mut self) {
        self.0.retain(|a| a.namespace == ALL);
    }

    fn extend_from(&mut self, other: &AccessList) {
        for access in &other.0 {
            self.push(access.clone());
        }
    }
}

impl FromIterator<Access> for AccessList {
    fn from_iter<I: IntoIterator<Item = Access>>(iter: I) -> Self {
        let mut list = AccessList::default();
        for access in iter {
            list.push(access);
        }
        list
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct AccessKey {
    verb: String,
    group: String,
    resource: String,
}

/// The authorization summary for one user.
///
/// Keys are ordered so that iteration, and therefore [`AccessSet::id`], is
/// deterministic for a given set of permissions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSet {
    set: BTreeMap<AccessKey, AccessList>,
}

impl AccessSet {
    /// Record a grant of `verb` over `group`/`resource`.
    pub fn add(&mut self, verb: &str, group: &str, resource: &str, access: Access) {
        self.set
            .entry(AccessKey {
                verb: verb.to_string(),
                group: group.to_string(),
                resource: resource.to_string(),
            })
            .or_default()
            .push(access);
    }

    /// The grants for `verb` over `group`/`resource`, merged with any
    /// wildcard-verb grants.
    #[must_use]
    pub fn access_list_for(&self, verb: &str, group: &str, resource: &str) -> AccessList {
        let mut result = AccessList::default();
        for v in [verb, ALL] {
            let key = AccessKey {
                verb: v.to_string(),
                group: group.to_string(),
                resource: resource.to_string(),
            };
            if let Some(list) = self.set.get(&key) {
                result.extend_from(list);
            }
        }
        result
    }

    /// Whether the user may perform `verb` on the named object.
    #[must_use]
    pub fn grants(&self, verb: &str, group: &str, resource: &str, namespace: &str, name: &str) -> bool {
        self.access_list_for(verb, group, resource).grants(namespace, name)
    }

    /// The distinct concrete namespaces named anywhere in the set, sorted.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        for list in self.set.values() {
            for access in list.iter() {
                if access.namespace != ALL {
                    out.insert(access.namespace.clone());
                }
            }
        }
        out.into_iter().collect()
    }

    /// The stable content digest of this set.
    ///
    /// Two evaluations over the same permissions produce the same id, so
    /// users with identical permissions share one projection cache entry.
    #[must_use]
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, list) in &self.set {
            hasher.update(key.verb.as_bytes());
            hasher.update([0]);
            hasher.update(key.group.as_bytes());
            hasher.update([0]);
            hasher.update(key.resource.as_bytes());
            hasher.update([0]);
            let mut entries: Vec<&Access> = list.iter().collect();
            entries.sort();
            for access in entries {
                hasher.update(access.namespace.as_bytes());
                hasher.update([0]);
                hasher.update(access.resource_name.as_bytes());
                hasher.update([0]);
            }
            hasher.update([0xff]);
        }
        format!("{:x}", hasher.finalize())
    }
}

//! RBAC change observation.
//!
//! Watches the four RBAC kinds through the cluster cache and purges the
//! cached authorization state of every user whose permissions just
//! changed, so the next projection rebuilds instead of serving stale
//! state. Binding-to-role indexes make Role/ClusterRole edits cheap to
//! map back to affected users.

use super::AccessEvaluator;
use crate::clustercache::{CacheEvent, ClusterCache};
use ahash::{AHashMap, AHashSet};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, Subject};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const USER_KIND: &str = "User";

#[derive(Default)]
struct Indexes {
    /// role key -> binding ids referencing it
    role_to_bindings: AHashMap<String, AHashSet<String>>,
    /// binding id -> role key
    binding_to_role: AHashMap<String, String>,
    /// binding id -> its user subjects
    binding_subjects: AHashMap<String, Vec<String>>,
}

impl Indexes {
    fn upsert(&mut self, binding: String, role_key: String, subjects: Vec<String>) {
        self.drop_binding(&binding);
        self.role_to_bindings
            .entry(role_key.clone())
            .or_default()
            .insert(binding.clone());
        self.binding_to_role.insert(binding.clone(), role_key);
        self.binding_subjects.insert(binding, subjects);
    }

    fn drop_binding(&mut self, binding: &str) {
        if let Some(role_key) = self.binding_to_role.remove(binding) {
            if let Some(bindings) = self.role_to_bindings.get_mut(&role_key) {
                bindings.remove(binding);
                if bindings.is_empty() {
                    self.role_to_bindings.remove(&role_key);
                }
            }
        }
        self.binding_subjects.remove(binding);
    }

    /// The distinct user subjects of every binding referencing a role.
    fn subjects_for_role(&self, role_key: &str) -> AHashSet<String> {
        let mut users = AHashSet::new();
        if let Some(bindings) = self.role_to_bindings.get(role_key) {
            for binding in bindings {
                if let Some(subjects) = self.binding_subjects.get(binding) {
                    users.extend(subjects.iter().cloned());
                }
            }
        }
        users
    }
}

/// Purges per-user authorization state when RBAC objects change.
pub struct Invalidator {
    access: Arc<dyn AccessEvaluator>,
    indexes: Mutex<Indexes>,
}

impl Invalidator {
    #[must_use]
    pub fn new(access: Arc<dyn AccessEvaluator>) -> Self {
        Invalidator {
            access,
            indexes: Mutex::new(Indexes::default()),
        }
    }

    /// Drain RBAC events from the cluster cache until `token` cancels.
    pub async fn run(&self, cache: &ClusterCache, token: CancellationToken) {
        let mut add = cache.on_add(token.clone());
        let mut change = cache.on_change(token.clone());
        let mut remove = cache.on_remove(token.clone());
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                event = add.recv() => match event {
                    Some(event) => self.handle(&event, false),
                    None => break,
                },
                event = change.recv() => match event {
                    Some(event) => self.handle(&event, false),
                    None => break,
                },
                event = remove.recv() => match event {
                    Some(event) => self.handle(&event, true),
                    None => break,
                },
            }
        }
    }

    fn handle(&self, event: &CacheEvent, removed: bool) {
        let gvr = event.gvr();
        if gvr.group != RBAC_GROUP {
            return;
        }
        match gvr.resource.as_str() {
            "rolebindings" | "clusterrolebindings" => self.handle_binding(event, removed),
            "roles" | "clusterroles" => self.handle_role(event),
            _ => {}
        }
    }

    /// A binding changed: purge the user subjects of both the old and the
    /// new object, and keep the role indexes current.
    fn handle_binding(&self, event: &CacheEvent, removed: bool) {
        let cluster_wide = event.gvr().resource == "clusterrolebindings";
        let Some((binding_id, role_key, subjects)) = parse_binding(event.obj(), cluster_wide)
        else {
            return;
        };

        let mut users: AHashSet<String> = subjects.iter().cloned().collect();
        if let CacheEvent::Change { old, .. } = event {
            if let Some((_, _, old_subjects)) = parse_binding(old, cluster_wide) {
                users.extend(old_subjects);
            }
        }

        {
            let mut indexes = self.indexes.lock();
            if removed {
                indexes.drop_binding(&binding_id);
            } else {
                indexes.upsert(binding_id, role_key, subjects);
            }
        }
        self.purge(users);
    }

    /// A role changed: purge the union of user subjects across every
    /// binding referencing it.
    fn handle_role(&self, event: &CacheEvent) {
        let Some(name) = crate::dynamic::name(event.obj()) else {
            return;
        };
        let role_key = match event.gvr().resource.as_str() {
            "roles" => {
                let Some(ns) = crate::dynamic::namespace(event.obj()) else {
                    return;
                };
                role_key("Role", Some(ns), name)
            }
            _ => role_key("ClusterRole", None, name),
        };
        let users = self.indexes.lock().subjects_for_role(&role_key);
        self.purge(users);
    }

    fn purge(&self, users: AHashSet<String>) {
        for user in users {
            debug!(%user, "purging cached access after rbac change");
            self.access.purge_user_data(&user);
        }
    }
}

fn role_key(kind: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{kind}/{ns}/{name}"),
        None => format!("{kind}/{name}"),
    }
}

/// Decode a binding object into its id, the key of the role it references,
/// and its user subjects.
fn parse_binding(obj: &Value, cluster_wide: bool) -> Option<(String, String, Vec<String>)> {
    if cluster_wide {
        let binding: ClusterRoleBinding = serde_json::from_value(obj.clone()).ok()?;
        let name = binding.metadata.name?;
        let key = role_key("ClusterRole", None, &binding.role_ref.name);
        let subjects = user_subjects(binding.subjects.as_deref());
        Some((format!("clusterrolebindings/{name}"), key, subjects))
    } else {
        let binding: RoleBinding = serde_json::from_value(obj.clone()).ok()?;
        let namespace = binding.metadata.namespace?;
        let name = binding.metadata.name?;
        let key = match binding.role_ref.kind.as_str() {
            "Role" => role_key("Role", Some(&namespace), &binding.role_ref.name),
            "ClusterRole" => role_key("ClusterRole", None, &binding.role_ref.name),
            other => {
                trace!(kind = other, "ignoring binding with unknown roleRef kind");
                return None;
            }
        };
        let subjects = user_subjects(binding.subjects.as_deref());
        Some((format!("rolebindings/{namespace}/{name}"), key, subjects))
    }
}

/// The names of `User`-kind subjects in the RBAC group.
fn user_subjects(subjects: Option<&[Subject]>) -> Vec<String> {
    subjects
        .unwrap_or_default()
        .iter()
        .filter(|s| s.kind == USER_KIND && s.api_group.as_deref() == Some(RBAC_GROUP))
        .map(|s| s.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{AccessSet, UserInfo};
    use kube::core::GroupVersionResource;
    use serde_json::json;

    struct RecordingEvaluator {
        purged: Mutex<Vec<String>>,
    }

    impl AccessEvaluator for RecordingEvaluator {
        fn access_for(&self, _user: &UserInfo) -> Arc<AccessSet> {
            Arc::new(AccessSet::default())
        }

        fn purge_user_data(&self, id: &str) {
            self.purged.lock().push(id.to_string());
        }
    }

    fn invalidator() -> (Arc<RecordingEvaluator>, Invalidator) {
        let evaluator = Arc::new(RecordingEvaluator {
            purged: Mutex::new(Vec::new()),
        });
        let invalidator = Invalidator::new(Arc::clone(&evaluator) as Arc<dyn AccessEvaluator>);
        (evaluator, invalidator)
    }

    fn role_binding(ns: &str, name: &str, role: &str, users: &[&str]) -> Arc<Value> {
        Arc::new(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "RoleBinding",
            "metadata": {"name": name, "namespace": ns},
            "roleRef": {
                "apiGroup": RBAC_GROUP,
                "kind": "Role",
                "name": role,
            },
            "subjects": users.iter().map(|u| json!({
                "apiGroup": RBAC_GROUP,
                "kind": "User",
                "name": u,
            })).collect::<Vec<_>>(),
        }))
    }

    fn gvr(resource: &str) -> GroupVersionResource {
        GroupVersionResource::gvr(RBAC_GROUP, "v1", resource)
    }

    #[test]
    fn binding_changes_purge_their_user_subjects() {
        let (evaluator, invalidator) = invalidator();
        invalidator.handle(
            &CacheEvent::Add {
                gvr: gvr("rolebindings"),
                obj: role_binding("ns1", "rb1", "edit", &["alice"]),
            },
            false,
        );
        assert_eq!(*evaluator.purged.lock(), vec!["alice".to_string()]);
    }

    #[test]
    fn old_and_new_subjects_are_both_purged_on_change() {
        let (evaluator, invalidator) = invalidator();
        invalidator.handle(
            &CacheEvent::Change {
                gvr: gvr("rolebindings"),
                obj: role_binding("ns1", "rb1", "edit", &["bob"]),
                old: role_binding("ns1", "rb1", "edit", &["alice"]),
            },
            false,
        );
        let mut purged = evaluator.purged.lock().clone();
        purged.sort();
        assert_eq!(purged, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn non_user_subjects_are_ignored() {
        let (evaluator, invalidator) = invalidator();
        let binding = Arc::new(json!({
            "metadata": {"name": "rb1", "namespace": "ns1"},
            "roleRef": {"apiGroup": RBAC_GROUP, "kind": "Role", "name": "edit"},
            "subjects": [
                {"kind": "ServiceAccount", "name": "sa1", "namespace": "ns1"},
                {"apiGroup": "wrong.group", "kind": "User", "name": "mallory"},
            ],
        }));
        invalidator.handle(
            &CacheEvent::Add {
                gvr: gvr("rolebindings"),
                obj: binding,
            },
            false,
        );
        assert!(evaluator.purged.lock().is_empty());
    }

    #[test]
    fn role_changes_purge_the_union_of_referencing_bindings() {
        let (evaluator, invalidator) = invalidator();
        for (name, users) in [("rb1", vec!["alice"]), ("rb2", vec!["bob", "alice"])] {
            invalidator.handle(
                &CacheEvent::Add {
                    gvr: gvr("rolebindings"),
                    obj: role_binding("ns1", name, "edit", &users),
                },
                false,
            );
        }
        evaluator.purged.lock().clear();

        invalidator.handle(
            &CacheEvent::Change {
                gvr: gvr("roles"),
                obj: Arc::new(json!({"metadata": {"name": "edit", "namespace": "ns1"}})),
                old: Arc::new(json!({"metadata": {"name": "edit", "namespace": "ns1"}})),
            },
            false,
        );
        let mut purged = evaluator.purged.lock().clone();
        purged.sort();
        // a set, not a multiset: each affected user purged once
        assert_eq!(purged, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn removed_bindings_leave_the_indexes() {
        let (evaluator, invalidator) = invalidator();
        invalidator.handle(
            &CacheEvent::Add {
                gvr: gvr("rolebindings"),
                obj: role_binding("ns1", "rb1", "edit", &["alice"]),
            },
            false,
        );
        invalidator.handle(
            &CacheEvent::Remove {
                gvr: gvr("rolebindings"),
                obj: role_binding("ns1", "rb1", "edit", &["alice"]),
            },
            true,
        );
        evaluator.purged.lock().clear();

        invalidator.handle(
            &CacheEvent::Change {
                gvr: gvr("roles"),
                obj: Arc::new(json!({"metadata": {"name": "edit", "namespace": "ns1"}})),
                old: Arc::new(json!({"metadata": {"name": "edit", "namespace": "ns1"}})),
            },
            false,
        );
        assert!(evaluator.purged.lock().is_empty());
    }

    #[test]
    fn cluster_role_bindings_key_cluster_roles() {
        let (evaluator, invalidator) = invalidator();
        let crb = Arc::new(json!({
            "metadata": {"name": "crb1"},
            "roleRef": {"apiGroup": RBAC_GROUP, "kind": "ClusterRole", "name": "admin"},
            "subjects": [{"apiGroup": RBAC_GROUP, "kind": "User", "name": "carol"}],
        }));
        invalidator.handle(
            &CacheEvent::Add {
                gvr: gvr("clusterrolebindings"),
                obj: crb,
            },
            false,
        );
        evaluator.purged.lock().clear();

        invalidator.handle(
            &CacheEvent::Change {
                gvr: gvr("clusterroles"),
                obj: Arc::new(json!({"metadata": {"name": "admin"}})),
                old: Arc::new(json!({"metadata": {"name": "admin"}})),
            },
            false,
        );
        assert_eq!(*evaluator.purged.lock(), vec!["carol".to_string()]);
    }
}

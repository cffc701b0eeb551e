//! Per-user schema projection.
//!
//! Derives the caller's view of the aggregated catalog from their access
//! set: verbs with at least one grant map onto HTTP method sets, schemas
//! the caller cannot touch at all are omitted, and explicitly disallowed
//! methods surface as `blocked-<METHOD>` literals.

use super::template::Template;
use ahash::AHashMap;
use gantry_core::access::{Access, AccessList, AccessSet, ALL};
use gantry_core::Schema;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The id of the namespaces schema, which every caller may list.
const NAMESPACE_ID: &str = "namespace";

pub(super) fn project(
    schemas: &AHashMap<String, Arc<Schema>>,
    base: &AHashMap<String, Arc<Schema>>,
    access: &AccessSet,
    templates: &[Template],
) -> BTreeMap<String, Arc<Schema>> {
    let mut out = BTreeMap::new();
    for (id, schema) in base {
        out.insert(id.clone(), Arc::clone(schema));
    }
    for schema in schemas.values() {
        if let Some(projected) = project_one(schema, access, templates) {
            out.insert(projected.id.clone(), Arc::new(projected));
        }
    }
    out
}

fn project_one(schema: &Schema, access: &AccessSet, templates: &[Template]) -> Option<Schema> {
    // deep-copy; the aggregated catalog must never be mutated
    let mut copy = (*schema).clone();

    let mut verb_access: BTreeMap<String, AccessList> = BTreeMap::new();
    for verb in &schema.verbs {
        let mut list = access.access_list_for(verb, &schema.group, &schema.resource);
        if !schema.namespaced {
            // a binding can name a namespace for a cluster-scoped kind;
            // such grants are spurious and dropped
            list.retain_cluster_scoped();
        }
        if !list.is_empty() {
            verb_access.insert(verb.clone(), list);
        }
    }

    let mut force_collection_get = false;
    if verb_access.is_empty() && schema.id == NAMESPACE_ID {
        let namespaces = access.namespaces();
        if namespaces.is_empty() {
            // even a caller with no grants at all may list namespaces
            force_collection_get = true;
        } else {
            for verb in ["get", "watch"] {
                let list: AccessList = namespaces
                    .iter()
                    .map(|ns| Access {
                        namespace: ALL.to_string(),
                        resource_name: ns.clone(),
                    })
                    .collect();
                verb_access.insert(verb.to_string(), list);
            }
        }
    }

    let mut collection = MethodSet::new(schema);
    let mut resource = MethodSet::new(schema);
    for verb in schema.verbs.iter().filter(|v| verb_access.contains_key(*v)) {
        match verb.as_str() {
            "list" | "get" => {
                collection.add("GET");
                resource.add("GET");
            }
            "delete" => resource.add("DELETE"),
            "update" => {
                resource.add("PUT");
                resource.add("PATCH");
            }
            "create" => collection.add("POST"),
            _ => {}
        }
    }
    if force_collection_get {
        collection.add("GET");
    }

    let collection_methods = collection.into_methods();
    let resource_methods = resource.into_methods();
    if collection_methods.is_empty() && resource_methods.is_empty() {
        return None;
    }
    copy.collection_methods = collection_methods;
    copy.resource_methods = resource_methods;
    copy.access = Some(verb_access);

    for template in templates.iter().filter(|t| t.is_default()) {
        if let Some(customize) = &template.customize {
            customize(&mut copy);
        }
    }
    for template in templates.iter() {
        if !template.matches(&copy) {
            continue;
        }
        if let Some(customize) = &template.customize {
            customize(&mut copy);
        }
    }
    Some(copy)
}

/// De-duplicated method strings with the disallow overlay applied.
struct MethodSet<'a> {
    methods: Vec<String>,
    schema: &'a Schema,
}

impl<'a> MethodSet<'a> {
    fn new(schema: &'a Schema) -> Self {
        MethodSet {
            methods: Vec::new(),
            schema,
        }
    }

    fn add(&mut self, method: &str) {
        let method = if self.schema.disallow_methods.contains(method) {
            format!("blocked-{method}")
        } else {
            method.to_string()
        };
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
    }

    fn into_methods(self) -> Vec<String> {
        self.methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pods() -> Schema {
        Schema {
            id: "pod".to_string(),
            group: String::new(),
            version: "v1".to_string(),
            kind: "Pod".to_string(),
            resource: "pods".to_string(),
            namespaced: true,
            verbs: ["create", "delete", "get", "list", "update", "watch"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            ..Schema::default()
        }
    }

    fn cluster_roles() -> Schema {
        Schema {
            id: "rbac.authorization.k8s.io.clusterrole".to_string(),
            group: "rbac.authorization.k8s.io".to_string(),
            version: "v1".to_string(),
            kind: "ClusterRole".to_string(),
            resource: "clusterroles".to_string(),
            namespaced: false,
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Schema::default()
        }
    }

    fn namespaces() -> Schema {
        Schema {
            id: "namespace".to_string(),
            group: String::new(),
            version: "v1".to_string(),
            kind: "Namespace".to_string(),
            resource: "namespaces".to_string(),
            namespaced: false,
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Schema::default()
        }
    }

    #[test]
    fn verbs_map_onto_method_sets() {
        let mut access = AccessSet::default();
        access.add("list", "", "pods", Access::everything());
        access.add("delete", "", "pods", Access::everything());
        access.add("update", "", "pods", Access::everything());
        access.add("create", "", "pods", Access::everything());

        // methods appear in the schema's verb order
        let projected = project_one(&pods(), &access, &[]).unwrap();
        assert_eq!(projected.collection_methods, vec!["POST", "GET"]);
        assert_eq!(projected.resource_methods, vec!["DELETE", "GET", "PUT", "PATCH"]);
    }

    #[test]
    fn list_and_get_produce_one_get_each() {
        let mut access = AccessSet::default();
        access.add("list", "", "pods", Access::everything());
        access.add("get", "", "pods", Access::everything());

        let projected = project_one(&pods(), &access, &[]).unwrap();
        assert_eq!(projected.collection_methods, vec!["GET"]);
        assert_eq!(projected.resource_methods, vec!["GET"]);
    }

    #[test]
    fn no_grants_means_no_schema() {
        let access = AccessSet::default();
        assert!(project_one(&pods(), &access, &[]).is_none());
    }

    #[test]
    fn namespaced_grants_on_cluster_scoped_kinds_are_spurious() {
        let mut access = AccessSet::default();
        access.add("list", "rbac.authorization.k8s.io", "clusterroles", Access {
            namespace: "kube-system".to_string(),
            resource_name: ALL.to_string(),
        });
        assert!(project_one(&cluster_roles(), &access, &[]).is_none());
    }

    #[test]
    fn namespaces_are_always_listable() {
        let access = AccessSet::default();
        let projected = project_one(&namespaces(), &access, &[]).unwrap();
        assert_eq!(projected.collection_methods, vec!["GET"]);
        assert!(projected.resource_methods.is_empty());
    }

    #[test]
    fn namespace_grants_come_from_the_access_set() {
        let mut access = AccessSet::default();
        access.add("get", "", "pods", Access {
            namespace: "ns1".to_string(),
            resource_name: ALL.to_string(),
        });
        let projected = project_one(&namespaces(), &access, &[]).unwrap();
        let by_verb = projected.access.unwrap();
        let get = &by_verb["get"];
        assert!(get.grants("anything", "ns1"));
        assert!(!get.grants("anything", "ns2"));
        assert_eq!(projected.collection_methods, vec!["GET"]);
        assert_eq!(projected.resource_methods, vec!["GET"]);
    }

    #[test]
    fn disallowed_methods_surface_as_blocked_literals() {
        let mut schema = pods();
        schema.disallow_methods = HashSet::from(["POST".to_string()]);
        let mut access = AccessSet::default();
        access.add("create", "", "pods", Access::everything());
        access.add("list", "", "pods", Access::everything());

        let projected = project_one(&schema, &access, &[]).unwrap();
        assert_eq!(projected.collection_methods, vec!["blocked-POST", "GET"]);
    }

    #[test]
    fn customize_templates_run_during_projection() {
        let mut access = AccessSet::default();
        access.add("list", "", "pods", Access::everything());
        let template = Template {
            id: Some("pod".to_string()),
            customize: Some(Arc::new(|s: &mut Schema| {
                s.description = "customized".to_string();
            })),
            ..Template::default()
        };
        let projected = project_one(&pods(), &access, &[template]).unwrap();
        assert_eq!(projected.description, "customized");
    }
}

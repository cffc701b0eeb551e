//! Discovery-to-schema conversion and the overlay steps.
//!
//! Builds one versioned [`Schema`] per discovered resource, annotates it
//! from CRDs and the OpenAPI document, and finally collapses deprecated
//! versions so exactly one schema per public id survives.

use crate::error::Result;
use ahash::AHashMap;
use gantry_core::schema::versioned_id;
use gantry_core::{Column, Schema};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroupList, APIResourceList, APIVersions};
use kube::api::{Api, ListParams};
use kube::Client;
use serde_json::Value;
use tracing::{debug, warn};

/// Kinds renamed across group moves: when the replacement is discovered,
/// the legacy schema is dropped.
const LEGACY_RENAMES: &[(&str, &str)] = &[(
    "extensions.v1beta1.ingress",
    "networking.k8s.io.v1beta1.ingress",
)];

fn get(path: &str) -> Result<http::Request<Vec<u8>>> {
    Ok(http::Request::get(path).body(Vec::new())?)
}

/// Walk server discovery and build the versioned schema map.
///
/// Groups that fail to respond are skipped with a warning; the next
/// refresh retries them.
pub(super) async fn discover(client: &Client) -> Result<AHashMap<String, Schema>> {
    let mut schemas = AHashMap::new();

    let core: APIVersions = client.request(get("/api")?).await?;
    let core_preferred = core.versions.first().cloned();
    for version in &core.versions {
        collect_group(client, "", version, core_preferred.as_deref(), &mut schemas).await;
    }

    let groups: APIGroupList = client.request(get("/apis")?).await?;
    for group in groups.groups {
        let preferred = group.preferred_version.as_ref().map(|v| v.version.clone());
        for version in &group.versions {
            collect_group(
                client,
                &group.name,
                &version.version,
                preferred.as_deref(),
                &mut schemas,
            )
            .await;
        }
    }
    Ok(schemas)
}

async fn collect_group(
    client: &Client,
    group: &str,
    version: &str,
    preferred: Option<&str>,
    out: &mut AHashMap<String, Schema>,
) {
    let path = if group.is_empty() {
        format!("/api/{version}")
    } else {
        format!("/apis/{group}/{version}")
    };
    let list: APIResourceList = match get(&path).map(|req| client.request(req)) {
        Ok(fut) => match fut.await {
            Ok(list) => list,
            Err(err) => {
                warn!(%path, error = %err, "skipping undiscoverable group version");
                return;
            }
        },
        Err(err) => {
            warn!(%path, error = %err, "skipping undiscoverable group version");
            return;
        }
    };
    for resource in list.resources {
        // names or kinds containing a slash are subresources
        if resource.name.contains('/') || resource.kind.contains('/') {
            continue;
        }
        let schema = Schema {
            plural_name: resource.name.clone(),
            group: group.to_string(),
            version: version.to_string(),
            kind: resource.kind,
            resource: resource.name,
            namespaced: resource.namespaced,
            verbs: resource.verbs,
            preferred_version: preferred
                .filter(|p| *p != version)
                .map(str::to_string),
            ..Schema::default()
        };
        out.insert(schema.versioned_id(), schema);
    }
}

/// Annotate schemas with CRD printer columns and per-version OpenAPI v3
/// field schemas. Versions that declare no schema leave the resource
/// fields unset.
pub(super) async fn apply_crd_overlay(
    client: &Client,
    schemas: &mut AHashMap<String, Schema>,
) -> Result<()> {
    let crds = Api::<CustomResourceDefinition>::all(client.clone())
        .list(&ListParams::default())
        .await?;
    for crd in crds {
        let group = crd.spec.group;
        let kind = crd.spec.names.kind;
        for version in &crd.spec.versions {
            let id = versioned_id(&group, &version.name, &kind);
            let Some(schema) = schemas.get_mut(&id) else {
                continue;
            };
            if let Some(columns) = &version.additional_printer_columns {
                schema.columns = columns
                    .iter()
                    .map(|c| Column {
                        name: c.name.clone(),
                        field: format!("$.{}", c.json_path.trim_start_matches('.')),
                        type_: c.type_.clone(),
                        format: c.format.clone().unwrap_or_default(),
                        description: c.description.clone().unwrap_or_default(),
                    })
                    .collect();
            }
            if let Some(v3) = version
                .schema
                .as_ref()
                .and_then(|s| s.open_api_v3_schema.as_ref())
            {
                schema.resource_fields = Some(with_static_fields(serde_json::to_value(v3)?));
            }
        }
    }
    Ok(())
}

/// Every object schema carries the static envelope properties.
fn with_static_fields(mut fields: Value) -> Value {
    if let Some(props) = fields
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    {
        for (name, type_) in [("apiVersion", "string"), ("kind", "string"), ("metadata", "object")]
        {
            props
                .entry(name.to_string())
                .or_insert_with(|| serde_json::json!({"type": type_}));
        }
    }
    fields
}

/// Attach model descriptions from the OpenAPI document, matched through
/// the group-version-kind extension.
pub(super) async fn apply_descriptions(
    client: &Client,
    schemas: &mut AHashMap<String, Schema>,
) -> Result<()> {
    let doc: Value = client.request(get("/openapi/v2")?).await?;
    let Some(definitions) = doc.get("definitions").and_then(Value::as_object) else {
        return Ok(());
    };
    for model in definitions.values() {
        let Some(description) = model.get("description").and_then(Value::as_str) else {
            continue;
        };
        let Some(gvks) = model
            .get("x-kubernetes-group-version-kind")
            .and_then(Value::as_array)
        else {
            continue;
        };
        for gvk in gvks {
            let (Some(group), Some(version), Some(kind)) = (
                gvk.get("group").and_then(Value::as_str),
                gvk.get("version").and_then(Value::as_str),
                gvk.get("kind").and_then(Value::as_str),
            ) else {
                continue;
            };
            if let Some(schema) = schemas.get_mut(&versioned_id(group, version, kind)) {
                schema.description = description.to_string();
            }
        }
    }
    Ok(())
}

/// Collapse the versioned map to one schema per public id: legacy renames
/// drop out when their replacement exists, then the group's preferred
/// version wins over its siblings.
pub(super) fn dedupe_preferred(mut schemas: AHashMap<String, Schema>) -> AHashMap<String, Schema> {
    for (legacy, replacement) in LEGACY_RENAMES {
        if schemas.contains_key(*replacement) {
            if schemas.remove(*legacy).is_some() {
                debug!(id = legacy, "dropped renamed legacy schema");
            }
        }
    }

    let mut by_public: AHashMap<String, Schema> = AHashMap::new();
    for (_, schema) in schemas.drain() {
        let public = schema.public_id();
        let replace = match by_public.get(&public) {
            Some(existing) => prefer(&schema, existing),
            None => true,
        };
        if replace {
            by_public.insert(public, schema);
        }
    }
    for (public, schema) in by_public.iter_mut() {
        schema.id = public.clone();
    }
    by_public
}

/// Whether `candidate` should replace `incumbent` for one public id.
fn prefer(candidate: &Schema, incumbent: &Schema) -> bool {
    // a schema without a differing preferred version *is* the preferred one
    match (&candidate.preferred_version, &incumbent.preferred_version) {
        (None, Some(_)) => true,
        (Some(_), None) => false,
        _ => version_rank(&candidate.version) > version_rank(&incumbent.version),
    }
}

/// Kubernetes version priority: stable over beta over alpha, then by
/// major number. Unparsable versions rank last.
fn version_rank(version: &str) -> (u8, u32, u32) {
    let Some(rest) = version.strip_prefix('v') else {
        return (0, 0, 0);
    };
    let major_end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(rest.len(), |(i, _)| i);
    let Ok(major) = rest[..major_end].parse::<u32>() else {
        return (0, 0, 0);
    };
    let suffix = &rest[major_end..];
    if suffix.is_empty() {
        return (3, major, 0);
    }
    if let Some(n) = suffix.strip_prefix("beta") {
        return (2, major, n.parse().unwrap_or(0));
    }
    if let Some(n) = suffix.strip_prefix("alpha") {
        return (1, major, n.parse().unwrap_or(0));
    }
    (0, major, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(group: &str, version: &str, kind: &str, preferred: Option<&str>) -> Schema {
        Schema {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            resource: format!("{}s", kind.to_lowercase()),
            plural_name: format!("{}s", kind.to_lowercase()),
            preferred_version: preferred
                .filter(|p| *p != version)
                .map(str::to_string),
            ..Schema::default()
        }
    }

    fn keyed(schemas: Vec<Schema>) -> AHashMap<String, Schema> {
        schemas
            .into_iter()
            .map(|s| (s.versioned_id(), s))
            .collect()
    }

    #[test]
    fn preferred_version_wins() {
        let deduped = dedupe_preferred(keyed(vec![
            schema("apps", "v1", "Deployment", Some("v1")),
            schema("apps", "v1beta1", "Deployment", Some("v1")),
        ]));
        assert_eq!(deduped.len(), 1);
        let survivor = &deduped["apps.deployment"];
        assert_eq!(survivor.version, "v1");
        assert_eq!(survivor.id, "apps.deployment");
    }

    #[test]
    fn renamed_legacy_kinds_drop_out() {
        let deduped = dedupe_preferred(keyed(vec![
            schema("extensions", "v1beta1", "Ingress", Some("v1beta1")),
            schema("networking.k8s.io", "v1beta1", "Ingress", Some("v1beta1")),
        ]));
        assert_eq!(deduped.len(), 1);
        assert!(deduped.contains_key("networking.k8s.io.ingress"));
        assert!(!deduped.contains_key("extensions.ingress"));
    }

    #[test]
    fn without_a_preferred_marker_the_stabler_version_wins() {
        let deduped = dedupe_preferred(keyed(vec![
            schema("g", "v2beta1", "Widget", Some("v0")),
            schema("g", "v1", "Widget", Some("v0")),
        ]));
        assert_eq!(deduped["g.widget"].version, "v1");
    }

    #[test]
    fn version_ranks_order_stability_first() {
        assert!(version_rank("v2") > version_rank("v1"));
        assert!(version_rank("v1") > version_rank("v10beta3"));
        assert!(version_rank("v2beta2") > version_rank("v2beta1"));
        assert!(version_rank("v1beta1") > version_rank("v1alpha2"));
        assert!(version_rank("v1alpha1") > version_rank("junk"));
    }

    #[test]
    fn static_fields_join_declared_properties() {
        let fields = with_static_fields(json!({
            "type": "object",
            "properties": {"spec": {"type": "object"}},
        }));
        assert_eq!(fields["properties"]["spec"], json!({"type": "object"}));
        assert_eq!(fields["properties"]["kind"], json!({"type": "string"}));
        assert_eq!(fields["properties"]["metadata"], json!({"type": "object"}));
    }

    #[test]
    fn schemas_without_properties_stay_unset() {
        let fields = with_static_fields(json!({"type": "object"}));
        assert_eq!(fields, json!({"type": "object"}));
    }
}

//! Derived fields for `management.cattle.io/v3` Cluster objects.

use crate::error::Result;
use serde_json::{Map, Value};

const PROVIDER_ANNOTATION: &str = "provider.cattle.io";
const PROVIDER_LABEL: &str = "provider.cattle.io";
const IMPORTED: &str = "imported";

pub(super) fn transform(obj: &mut Value) -> Result<()> {
    let connected = has_ready_condition(obj);
    if let Some(status) = obj
        .get_mut("status")
        .and_then(Value::as_object_mut)
    {
        status.insert("connected".to_string(), Value::from(connected));
    }

    let provider = infer_provider(obj);
    let version = infer_k8s_version(obj);
    if let Some(meta) = crate::dynamic::metadata_mut(obj) {
        let fields = meta
            .entry("clusterFields")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(fields) = fields.as_object_mut() {
            if let Some((provider, priority)) = provider {
                fields.insert("provider".to_string(), Value::from(provider));
                fields.insert("providerPriority".to_string(), Value::from(priority));
            }
            if let Some((version, priority)) = version {
                fields.insert("k8sVersion".to_string(), Value::from(version));
                fields.insert("k8sVersionPriority".to_string(), Value::from(priority));
            }
        }
    }

    for section in ["requested", "allocatable"] {
        add_raw_quantities(obj, section);
    }
    Ok(())
}

fn has_ready_condition(obj: &Value) -> bool {
    obj.pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}

/// The provider inference ladder. Sources are tried in priority order and
/// the first hit wins; the priority number is recorded beside the value so
/// consumers can tell a strong signal from a fallback.
fn infer_provider(obj: &Value) -> Option<(String, u32)> {
    if let Some(p) = obj
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(PROVIDER_ANNOTATION))
        .and_then(Value::as_str)
    {
        return Some((p.to_string(), 1));
    }
    if let Some(kind) = obj
        .pointer("/spec/rkeConfig/machinePools/0/machineConfigRef/kind")
        .and_then(Value::as_str)
    {
        return Some((kind.to_lowercase(), 2));
    }
    if let Some(p) = obj
        .pointer("/metadata/labels")
        .and_then(|l| l.get(PROVIDER_LABEL))
        .and_then(Value::as_str)
    {
        return Some((p.to_string(), 3));
    }
    let driver = obj
        .pointer("/status/driver")
        .and_then(Value::as_str)
        .or_else(|| obj.pointer("/status/provider").and_then(Value::as_str));
    if let Some(d) = driver {
        return Some((d.to_string(), 4));
    }
    if let Some(spec) = obj.get("spec").and_then(Value::as_object) {
        let imported = spec.iter().any(|(key, value)| {
            key.ends_with("Config")
                && value.get("imported").and_then(Value::as_bool) == Some(true)
        });
        if imported {
            return Some((IMPORTED.to_string(), 5));
        }
    }
    // no driver at all means the cluster was imported
    Some((IMPORTED.to_string(), 6))
}

fn infer_k8s_version(obj: &Value) -> Option<(String, u32)> {
    if let Some(v) = obj
        .pointer("/spec/kubernetesVersion")
        .and_then(Value::as_str)
    {
        return Some((v.to_string(), 1));
    }
    obj.pointer("/status/version/gitVersion")
        .and_then(Value::as_str)
        .map(|v| (v.to_string(), 2))
}

/// Add `memoryRaw` / `cpuRaw` numeric forms beside the original quantity
/// strings under `status.requested` and `status.allocatable`.
fn add_raw_quantities(obj: &mut Value, section: &str) {
    let Some(map) = obj
        .get_mut("status")
        .and_then(|s| s.get_mut(section))
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    for (key, raw_key) in [("memory", "memoryRaw"), ("cpu", "cpuRaw")] {
        let Some(raw) = map
            .get(key)
            .and_then(Value::as_str)
            .and_then(parse_quantity)
        else {
            continue;
        };
        if let Some(n) = serde_json::Number::from_f64(raw) {
            map.insert(raw_key.to_string(), Value::Number(n));
        }
    }
}

/// Parse a Kubernetes resource quantity (`"16Gi"`, `"8000m"`, `"2"`) into
/// its base-unit numeric value.
fn parse_quantity(s: &str) -> Option<f64> {
    let s = s.trim();
    let split = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+'))
        .map_or(s.len(), |(i, _)| i);
    let number: f64 = s[..split].parse().ok()?;
    let multiplier = match &s[split..] {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return None,
    };
    Some(number * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connected_follows_the_ready_condition() {
        let mut obj = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        transform(&mut obj).unwrap();
        assert_eq!(obj["status"]["connected"], json!(true));

        let mut obj = json!({"status": {"conditions": [{"type": "Ready", "status": "False"}]}});
        transform(&mut obj).unwrap();
        assert_eq!(obj["status"]["connected"], json!(false));
    }

    #[test]
    fn annotation_beats_every_other_provider_source() {
        let mut obj = json!({
            "metadata": {"annotations": {"provider.cattle.io": "gke"}},
            "status": {"driver": "rke"},
        });
        transform(&mut obj).unwrap();
        assert_eq!(obj["metadata"]["clusterFields"]["provider"], json!("gke"));
        assert_eq!(obj["metadata"]["clusterFields"]["providerPriority"], json!(1));
    }

    #[test]
    fn machine_pool_kind_is_second() {
        let mut obj = json!({
            "spec": {"rkeConfig": {"machinePools": [
                {"machineConfigRef": {"kind": "Amazonec2Config"}},
            ]}},
        });
        transform(&mut obj).unwrap();
        assert_eq!(
            obj["metadata"]["clusterFields"]["provider"],
            json!("amazonec2config")
        );
        assert_eq!(obj["metadata"]["clusterFields"]["providerPriority"], json!(2));
    }

    #[test]
    fn no_driver_means_imported() {
        let mut obj = json!({"metadata": {"name": "c"}});
        transform(&mut obj).unwrap();
        assert_eq!(obj["metadata"]["clusterFields"]["provider"], json!("imported"));
        assert_eq!(obj["metadata"]["clusterFields"]["providerPriority"], json!(6));
    }

    #[test]
    fn raw_quantities_sit_beside_the_originals() {
        let mut obj = json!({
            "status": {
                "allocatable": {"memory": "1Ki", "cpu": "8000m"},
                "requested": {"cpu": "2"},
            },
        });
        transform(&mut obj).unwrap();
        let alloc = &obj["status"]["allocatable"];
        assert_eq!(alloc["memory"], json!("1Ki"));
        assert_eq!(alloc["memoryRaw"], json!(1024.0));
        assert_eq!(alloc["cpuRaw"], json!(8.0));
        assert_eq!(obj["status"]["requested"]["cpuRaw"], json!(2.0));
    }

    #[test]
    fn version_prefers_the_spec() {
        let mut obj = json!({
            "spec": {"kubernetesVersion": "v1.30.2+rke2r1"},
            "status": {"version": {"gitVersion": "v1.30.2"}},
        });
        transform(&mut obj).unwrap();
        assert_eq!(
            obj["metadata"]["clusterFields"]["k8sVersion"],
            json!("v1.30.2+rke2r1")
        );
    }
}

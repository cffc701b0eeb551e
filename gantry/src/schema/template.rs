//! Per-schema behavior overrides.
//!
//! A template selects schemas by public id or group/kind (a template with
//! no selector is a default applying to every schema) and installs a
//! backing store, an output formatter, or a customize hook run during
//! per-user projection.

use crate::error::Result;
use async_trait::async_trait;
use gantry_core::Schema;
use serde_json::Value;
use std::sync::Arc;

/// Read access to the objects behind a schema.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All objects of the kind.
    async fn list(&self, schema: &Schema) -> Result<Vec<Arc<Value>>>;

    /// One object by namespace and name.
    async fn get(&self, schema: &Schema, namespace: Option<&str>, name: &str)
        -> Result<Arc<Value>>;
}

/// Mutates an outgoing object just before serialization. Formatters chain:
/// the default template's formatter runs before a specific one.
pub type Formatter = Arc<dyn Fn(&Schema, &mut Value) + Send + Sync>;

/// Adjusts a schema copy during projection.
pub type Customize = Arc<dyn Fn(&mut Schema) + Send + Sync>;

#[derive(Default, Clone)]
pub struct Template {
    /// Select by public schema id.
    pub id: Option<String>,
    /// Select by API group (paired with `kind`).
    pub group: Option<String>,
    /// Select by kind.
    pub kind: Option<String>,
    pub store: Option<Arc<dyn ObjectStore>>,
    pub formatter: Option<Formatter>,
    pub customize: Option<Customize>,
}

impl Template {
    /// A template with no selector applies to every schema.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.id.is_none() && self.group.is_none() && self.kind.is_none()
    }

    #[must_use]
    pub fn matches(&self, schema: &Schema) -> bool {
        if let Some(id) = &self.id {
            return *id == schema.id;
        }
        if self.group.is_none() && self.kind.is_none() {
            return false;
        }
        self.group.as_deref().is_none_or(|g| g == schema.group)
            && self.kind.as_deref().is_none_or(|k| k == schema.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema {
            id: "apps.deployment".to_string(),
            group: "apps".to_string(),
            kind: "Deployment".to_string(),
            ..Schema::default()
        }
    }

    #[test]
    fn selects_by_id_or_group_kind() {
        let by_id = Template {
            id: Some("apps.deployment".to_string()),
            ..Template::default()
        };
        assert!(by_id.matches(&schema()));

        let by_kind = Template {
            group: Some("apps".to_string()),
            kind: Some("Deployment".to_string()),
            ..Template::default()
        };
        assert!(by_kind.matches(&schema()));

        let other = Template {
            id: Some("pod".to_string()),
            ..Template::default()
        };
        assert!(!other.matches(&schema()));
    }

    #[test]
    fn selector_less_templates_are_defaults() {
        let default = Template::default();
        assert!(default.is_default());
        assert!(!default.matches(&schema()));
    }
}

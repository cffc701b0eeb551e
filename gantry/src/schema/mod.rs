//! The schema catalog: aggregated state, per-user projection and caching.

mod lru;
mod projection;
pub mod template;

pub use template::{Formatter, ObjectStore, Template};

use crate::accesscontrol::AccessEvaluator;
use crate::config::Config;
use crate::error::{Error, Result};
use ahash::AHashMap;
use gantry_core::{AccessSet, Schema, UserInfo};
use kube::core::{GroupVersionKind, GroupVersionResource};
use lru::ExpiringLru;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A caller's projected view of the catalog.
///
/// Immutable once built; shared between every user whose access set has
/// the same id.
pub struct ProjectedSchemas {
    pub schemas: BTreeMap<String, Arc<Schema>>,
    /// The access-set digest this view was built for.
    pub access_id: String,
    /// The access set itself, for downstream per-object checks.
    pub access: Arc<AccessSet>,
}

impl ProjectedSchemas {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(id)
    }
}

#[derive(Default)]
struct Indexed {
    schemas: AHashMap<String, Arc<Schema>>,
    by_gvr: AHashMap<GroupVersionResource, String>,
    by_gvk: AHashMap<GroupVersionKind, String>,
    refreshed: bool,
}

/// The schema collection: built-ins, the aggregated catalog with its
/// lookup indexes, behavior templates, and the projection caches.
pub struct Collection {
    base_schemas: AHashMap<String, Arc<Schema>>,
    state: RwLock<Indexed>,
    templates: RwLock<Vec<Template>>,
    cache: Mutex<ExpiringLru<String, Arc<ProjectedSchemas>>>,
    user_cache: Mutex<ExpiringLru<String, String>>,
    access: Arc<dyn AccessEvaluator>,
    config: Config,
    on_change: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl Collection {
    #[must_use]
    pub fn new(access: Arc<dyn AccessEvaluator>, config: Config) -> Self {
        Collection {
            base_schemas: base_schemas(),
            state: RwLock::new(Indexed::default()),
            templates: RwLock::new(Vec::new()),
            cache: Mutex::new(ExpiringLru::new(
                "user-schemas",
                config.user_cache_size,
                config.log_cache_size_debug,
            )),
            user_cache: Mutex::new(ExpiringLru::new(
                "user-ids",
                config.user_cache_size,
                config.log_cache_size_debug,
            )),
            access,
            config,
            on_change: Mutex::new(Vec::new()),
        }
    }

    /// Atomically replace the aggregated catalog and notify subscribers.
    pub fn reset(&self, schemas: Vec<Schema>) {
        let mut indexed = Indexed {
            refreshed: true,
            ..Indexed::default()
        };
        for schema in schemas {
            let id = schema.id.clone();
            indexed.by_gvr.insert(schema.group_version_resource(), id.clone());
            indexed.by_gvk.insert(schema.group_version_kind(), id.clone());
            indexed.schemas.insert(id, Arc::new(schema));
        }
        debug!(schemas = indexed.schemas.len(), "schema catalog replaced");
        *self.state.write() = indexed;
        // cached projections describe the old catalog
        self.cache.lock().clear();

        let callbacks: Vec<_> = self.on_change.lock().clone();
        for callback in callbacks {
            callback();
        }
    }

    /// Register a callback fired after each catalog replacement.
    pub fn on_change(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_change.lock().push(Arc::new(callback));
    }

    /// Install a behavior template.
    pub fn add_template(&self, template: Template) {
        self.templates.write().push(template);
    }

    /// Every aggregated schema, unprojected.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Schema>> {
        self.state.read().schemas.values().cloned().collect()
    }

    /// Look up an aggregated schema by resource identity.
    #[must_use]
    pub fn by_gvr(&self, gvr: &GroupVersionResource) -> Option<Arc<Schema>> {
        let state = self.state.read();
        let id = state.by_gvr.get(gvr)?;
        state.schemas.get(id).cloned()
    }

    /// Look up an aggregated schema by kind identity.
    #[must_use]
    pub fn by_gvk(&self, gvk: &GroupVersionKind) -> Option<Arc<Schema>> {
        let state = self.state.read();
        let id = state.by_gvk.get(gvk)?;
        state.schemas.get(id).cloned()
    }

    /// An aggregated or built-in schema by public id.
    ///
    /// # Errors
    ///
    /// `NotRefreshed` before the first successful refresh, `NotFound` for
    /// unknown ids.
    pub fn schema_by_id(&self, id: &str) -> Result<Arc<Schema>> {
        let state = self.state.read();
        if !state.refreshed {
            return Err(Error::Core(gantry_core::Error::NotRefreshed));
        }
        state
            .schemas
            .get(id)
            .or_else(|| self.base_schemas.get(id))
            .cloned()
            .ok_or_else(|| Error::Core(gantry_core::Error::NotFound(id.to_string())))
    }

    /// The projected catalog for one caller.
    ///
    /// Views are cached by access-set id; users whose permissions changed
    /// since their last call have their stale entry purged first.
    ///
    /// # Errors
    ///
    /// `NotRefreshed` before the first successful refresh.
    pub fn schemas_for(&self, user: &UserInfo) -> Result<Arc<ProjectedSchemas>> {
        let access = self.access.access_for(user);
        let access_id = access.id();

        let prior = self.user_cache.lock().get(&user.name);
        if let Some(prior) = prior {
            if prior != access_id {
                self.user_cache.lock().remove(&user.name);
                self.cache.lock().remove(&prior);
                self.access.purge_user_data(&prior);
            }
        }

        let ttl = self.config.cache_ttl();
        let hit = self.cache.lock().get(&access_id);
        if let Some(hit) = hit {
            self.user_cache
                .lock()
                .insert(user.name.clone(), access_id, ttl);
            return Ok(hit);
        }

        let projected = {
            let state = self.state.read();
            if !state.refreshed {
                return Err(Error::Core(gantry_core::Error::NotRefreshed));
            }
            let templates = self.templates.read();
            projection::project(&state.schemas, &self.base_schemas, &access, &templates)
        };
        let projected = Arc::new(ProjectedSchemas {
            schemas: projected,
            access_id: access_id.clone(),
            access,
        });
        self.cache
            .lock()
            .insert(access_id.clone(), Arc::clone(&projected), ttl);
        self.user_cache
            .lock()
            .insert(user.name.clone(), access_id, ttl);
        Ok(projected)
    }

    /// The backing store for a schema: the most specific template wins,
    /// falling back to the default template's store.
    #[must_use]
    pub fn store_for(&self, schema: &Schema) -> Option<Arc<dyn ObjectStore>> {
        let templates = self.templates.read();
        templates
            .iter()
            .filter(|t| t.matches(schema))
            .find_map(|t| t.store.clone())
            .or_else(|| {
                templates
                    .iter()
                    .filter(|t| t.is_default())
                    .find_map(|t| t.store.clone())
            })
    }

    /// The formatter chain for a schema, default-first.
    #[must_use]
    pub fn formatters_for(&self, schema: &Schema) -> Vec<Formatter> {
        let templates = self.templates.read();
        templates
            .iter()
            .filter(|t| t.is_default())
            .chain(templates.iter().filter(|t| t.matches(schema)))
            .filter_map(|t| t.formatter.clone())
            .collect()
    }
}

/// The built-in schemas present in every projection.
fn base_schemas() -> AHashMap<String, Arc<Schema>> {
    let mut out = AHashMap::new();
    for (id, collection_methods, resource_methods) in [
        ("schema", vec!["GET"], vec!["GET"]),
        ("apiRoot", vec!["GET"], vec!["GET"]),
        ("count", vec!["GET"], vec!["GET"]),
        ("subscribe", vec!["GET"], vec![]),
    ] {
        out.insert(
            id.to_string(),
            Arc::new(Schema {
                id: id.to_string(),
                plural_name: format!("{id}s"),
                collection_methods: collection_methods.iter().map(ToString::to_string).collect(),
                resource_methods: resource_methods.iter().map(ToString::to_string).collect(),
                ..Schema::default()
            }),
        );
    }
    out
}

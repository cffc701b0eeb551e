//! Schema aggregation and the debounced refresh loop.
//!
//! A refresh walks discovery, overlays CRD and OpenAPI metadata, collapses
//! deprecated versions, drops kinds the gateway itself may not list, probes
//! live columns, and atomically publishes the result into the collection.
//! Change notifications only mark a dirty flag; a 500 ms ticker drains it
//! so any burst of notifications costs at most one rebuild.

mod columns;
mod convert;

use crate::clustercache::{CacheEvent, ClusterCache, Limiter, TableClient};
use crate::config::Config;
use crate::error::Result;
use crate::schema::Collection;
use ahash::{AHashMap, AHashSet};
use gantry_core::Schema;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, PostParams};
use kube::Client;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Builds and republishes the schema catalog.
pub struct SchemaAggregator {
    client: Client,
    tables: TableClient,
    collection: Arc<Collection>,
    config: Config,
    dirty: AtomicBool,
    refreshing: tokio::sync::Mutex<()>,
}

impl SchemaAggregator {
    #[must_use]
    pub fn new(client: Client, collection: Arc<Collection>, config: Config) -> Self {
        SchemaAggregator {
            tables: TableClient::new(client.clone()),
            client,
            collection,
            config,
            // start dirty so the first tick builds the catalog
            dirty: AtomicBool::new(true),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    /// Mark the catalog stale. The next tick rebuilds it.
    pub fn trigger(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Rebuild the catalog once.
    ///
    /// # Errors
    ///
    /// `AlreadySyncing` when a refresh is in flight (callers treat it as a
    /// no-op), or the first fatal discovery error.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self
            .refreshing
            .try_lock()
            .map_err(|_| gantry_core::Error::AlreadySyncing)?;

        let mut schemas = convert::discover(&self.client).await?;
        if let Err(err) = convert::apply_crd_overlay(&self.client, &mut schemas).await {
            warn!(error = %err, "crd overlay failed; continuing without printer columns");
        }
        if let Err(err) = convert::apply_descriptions(&self.client, &mut schemas).await {
            warn!(error = %err, "openapi descriptions unavailable");
        }
        let deduped = convert::dedupe_preferred(schemas);
        let mut filtered = self.filter_by_self_access(deduped).await;
        columns::fetch_columns(&self.tables, &mut filtered, self.config.column_fetch_concurrency)
            .await;

        debug!(schemas = filtered.len(), "publishing refreshed schema catalog");
        self.collection
            .reset(filtered.into_iter().map(|(_, schema)| schema).collect());
        Ok(())
    }

    /// Drop schemas the gateway itself is not allowed to list, checked via
    /// self-subject access review. Review failures keep the schema; the
    /// next refresh re-checks.
    async fn filter_by_self_access(
        &self,
        mut schemas: AHashMap<String, Schema>,
    ) -> AHashMap<String, Schema> {
        let api = Api::<SelfSubjectAccessReview>::all(self.client.clone());
        let denied: Arc<Mutex<AHashSet<String>>> = Arc::default();
        let token = CancellationToken::new();
        let mut limiter = Limiter::new(self.config.column_fetch_concurrency);
        for schema in schemas.values().filter(|s| s.supports_verb("list")) {
            let api = api.clone();
            let denied = Arc::clone(&denied);
            let id = schema.id.clone();
            let review = list_review(schema);
            limiter.execute(&token, async move {
                match api.create(&PostParams::default(), &review).await {
                    Ok(result) => {
                        let allowed = result
                            .status
                            .is_some_and(|s| s.allowed && !s.denied.unwrap_or(false));
                        if !allowed {
                            denied.lock().insert(id);
                        }
                    }
                    Err(err) => {
                        warn!(schema = %id, error = %err, "self access review failed; keeping schema");
                    }
                }
                Ok(())
            });
        }
        if let Err(err) = limiter.wait().await {
            warn!(error = %err, "self access reviews failed");
        }
        let denied = denied.lock();
        schemas.retain(|id, _| !denied.contains(id));
        schemas
    }

    /// Tick every `refresh_debounce`, draining the dirty flag into at most
    /// one refresh. Failed refreshes leave the flag set for the next tick.
    pub async fn run(&self, token: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.refresh_debounce);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = tick.tick() => {
                    if !self.dirty.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    match self.refresh().await {
                        Ok(()) => {}
                        Err(err) if err.is_already_syncing() => {
                            trace!("refresh already in progress");
                            self.dirty.store(true, Ordering::SeqCst);
                        }
                        Err(err) => {
                            warn!(error = %err, "schema refresh failed; will retry");
                            self.dirty.store(true, Ordering::SeqCst);
                        }
                    }
                }
            }
        }
    }

    /// Re-trigger on CRD and APIService changes observed by the cluster
    /// cache.
    pub fn watch_changes(self: &Arc<Self>, cache: &ClusterCache, token: CancellationToken) {
        let mut add = cache.on_add(token.clone());
        let mut change = cache.on_change(token.clone());
        let mut remove = cache.on_remove(token.clone());
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = token.cancelled() => break,
                    event = add.recv() => event,
                    event = change.recv() => event,
                    event = remove.recv() => event,
                };
                match event {
                    Some(event) if changes_discovery(&event) => aggregator.trigger(),
                    Some(_) => {}
                    None => break,
                }
            }
        });
    }
}

/// Whether an object change can alter the discoverable type surface.
fn changes_discovery(event: &CacheEvent) -> bool {
    let gvr = event.gvr();
    (gvr.group == "apiextensions.k8s.io" && gvr.resource == "customresourcedefinitions")
        || (gvr.group == "apiregistration.k8s.io" && gvr.resource == "apiservices")
}

fn list_review(schema: &Schema) -> SelfSubjectAccessReview {
    SelfSubjectAccessReview {
        spec: SelfSubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                group: Some(schema.group.clone()),
                version: Some(schema.version.clone()),
                resource: Some(schema.resource.clone()),
                verb: Some("list".to_string()),
                ..ResourceAttributes::default()
            }),
            ..SelfSubjectAccessReviewSpec::default()
        },
        ..SelfSubjectAccessReview::default()
    }
}

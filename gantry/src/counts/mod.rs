//! The aggregate counts service.
//!
//! One logical `count` resource per caller: the per-kind object count with
//! per-namespace breakdown over every kind the caller may list and watch,
//! kept current from cluster-cache events and delivered through the
//! debounce buffer.

mod buffer;

use crate::clustercache::{CacheEvent, ClusterCache};
use crate::config::Config;
use crate::dynamic;
use crate::error::{Error, Result};
use crate::schema::ProjectedSchemas;
use ahash::AHashMap;
use gantry_core::counts::COUNT_ID;
use gantry_core::{Count, ItemCount, Schema};
use kube::core::GroupVersionResource;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Serves count snapshots and streams incremental updates.
pub struct CountsService {
    cache: Arc<ClusterCache>,
    config: Config,
}

impl CountsService {
    #[must_use]
    pub fn new(cache: Arc<ClusterCache>, config: Config) -> Self {
        CountsService { cache, config }
    }

    /// The current counts over every kind the caller may list+watch.
    ///
    /// Collection runs under a fixed budget; kinds not reached in time are
    /// missing from the (partial) snapshot.
    pub async fn snapshot(&self, projected: &ProjectedSchemas) -> Count {
        let counts = parking_lot::Mutex::new(BTreeMap::new());
        let collect = async {
            for schema in countable(projected) {
                let gvr = schema.group_version_resource();
                let item = count_objects(&self.cache.list(&gvr));
                counts.lock().insert(schema.id.clone(), item);
                tokio::task::yield_now().await;
            }
        };
        if tokio::time::timeout(self.config.counts_budget, collect)
            .await
            .is_err()
        {
            debug!("counts snapshot hit its budget; returning partial result");
        }
        let counts = counts.into_inner();
        Count::new(counts)
    }

    /// The snapshot as a single-element listing.
    pub async fn list(&self, projected: &ProjectedSchemas) -> Vec<Count> {
        vec![self.snapshot(projected).await]
    }

    /// The snapshot by resource id.
    ///
    /// # Errors
    ///
    /// `NotFound` for ids other than `count`.
    pub async fn by_id(&self, projected: &ProjectedSchemas, id: &str) -> Result<Count> {
        if id != COUNT_ID {
            return Err(Error::Core(gantry_core::Error::NotFound(id.to_string())));
        }
        Ok(self.snapshot(projected).await)
    }

    /// Stream debounced count updates until `token` cancels.
    ///
    /// Each delivery is a full snapshot carrying its own copy of the map;
    /// subscribers may mutate what they receive.
    #[must_use]
    pub fn watch(
        &self,
        projected: Arc<ProjectedSchemas>,
        token: CancellationToken,
    ) -> mpsc::Receiver<Count> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let out = buffer::debounce(updates_rx, self.config.counts_debounce, token.clone());

        // subscribe before the seed snapshot so no event is missed; the
        // revision check drops anything the snapshot already covered
        let mut add = self.cache.on_add(token.clone());
        let mut remove = self.cache.on_remove(token.clone());

        let cache = Arc::clone(&self.cache);
        let budget = self.config.counts_budget;
        tokio::spawn(async move {
            let visible: AHashMap<GroupVersionResource, String> = countable(&projected)
                .map(|s| (s.group_version_resource(), s.id.clone()))
                .collect();

            let mut state = seed_counts(&cache, &projected, budget).await;
            if updates_tx.send(Count::new(state.clone())).is_err() {
                return;
            }

            loop {
                let (event, delta) = tokio::select! {
                    () = token.cancelled() => break,
                    event = add.recv() => match event {
                        Some(event) => (event, 1),
                        None => break,
                    },
                    event = remove.recv() => match event {
                        Some(event) => (event, -1),
                        None => break,
                    },
                };
                if apply_event(&mut state, &visible, &event, delta)
                    && updates_tx.send(Count::new(state.clone())).is_err()
                {
                    break;
                }
            }
        });
        out
    }
}

/// The kinds that contribute to counts for a caller.
fn countable(projected: &ProjectedSchemas) -> impl Iterator<Item = &Arc<Schema>> + '_ {
    projected.schemas.values().filter(|s| s.can_list_watch())
}

async fn seed_counts(
    cache: &ClusterCache,
    projected: &ProjectedSchemas,
    budget: std::time::Duration,
) -> BTreeMap<String, ItemCount> {
    let counts = parking_lot::Mutex::new(BTreeMap::new());
    let collect = async {
        for schema in countable(projected) {
            let gvr = schema.group_version_resource();
            let item = count_objects(&cache.list(&gvr));
            counts.lock().insert(schema.id.clone(), item);
            tokio::task::yield_now().await;
        }
    };
    if tokio::time::timeout(budget, collect).await.is_err() {
        debug!("counts seed hit its budget; starting from a partial state");
    }
    counts.into_inner()
}

fn count_objects(objects: &[Arc<Value>]) -> ItemCount {
    let mut item = ItemCount::default();
    for obj in objects {
        item.count += 1;
        if let Some(ns) = dynamic::namespace(obj) {
            *item.namespaces.entry(ns.to_string()).or_default() += 1;
        }
        if let Some(revision) = dynamic::revision(obj) {
            item.revision = item.revision.max(revision);
        }
    }
    item
}

/// Fold one cache event into the per-stream state.
///
/// Events for kinds outside the caller's view, or older than the state's
/// revision for the kind, are dropped. Returns whether anything changed.
fn apply_event(
    state: &mut BTreeMap<String, ItemCount>,
    visible: &AHashMap<GroupVersionResource, String>,
    event: &CacheEvent,
    delta: i64,
) -> bool {
    let Some(id) = visible.get(event.gvr()) else {
        return false;
    };
    let Some(revision) = dynamic::revision(event.obj()) else {
        return false;
    };
    let item = state.entry(id.clone()).or_default();
    if revision <= item.revision {
        return false;
    }
    item.apply(delta, dynamic::namespace(event.obj()), revision);
    true
}

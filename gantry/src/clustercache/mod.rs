//! The cluster-wide object cache.
//!
//! For every list+watch-capable schema an informer task keeps a local
//! store of the kind's objects in table representation, applies the
//! transform chain at ingress, and fans add/change/remove events out to
//! subscriber channels. Subscribers detach by cancelling their token;
//! stopping the cache cancels every informer.

mod limiter;
pub mod table;
mod watcher;

pub use limiter::Limiter;
pub use table::{TableClient, TableList};

use crate::config::Config;
use crate::dynamic;
use crate::error::{Error, Result};
use crate::transform::TransformChain;
use ahash::AHashMap;
use futures::StreamExt;
use gantry_core::Schema;
use kube::core::{GroupVersionKind, GroupVersionResource};
use kube::Client;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Identity of one object within a kind's store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

/// A change observed by an informer, fanned out to subscribers.
#[derive(Clone, Debug)]
pub enum CacheEvent {
    Add {
        gvr: GroupVersionResource,
        obj: Arc<Value>,
    },
    Change {
        gvr: GroupVersionResource,
        obj: Arc<Value>,
        old: Arc<Value>,
    },
    Remove {
        gvr: GroupVersionResource,
        obj: Arc<Value>,
    },
}

impl CacheEvent {
    /// The resource identity the event belongs to.
    #[must_use]
    pub fn gvr(&self) -> &GroupVersionResource {
        match self {
            CacheEvent::Add { gvr, .. }
            | CacheEvent::Change { gvr, .. }
            | CacheEvent::Remove { gvr, .. } => gvr,
        }
    }

    /// The (new) object the event carries.
    #[must_use]
    pub fn obj(&self) -> &Arc<Value> {
        match self {
            CacheEvent::Add { obj, .. }
            | CacheEvent::Change { obj, .. }
            | CacheEvent::Remove { obj, .. } => obj,
        }
    }
}

/// The per-kind object store. Access goes through this interface only;
/// the backing map never escapes.
#[derive(Default)]
pub struct Store {
    objects: RwLock<AHashMap<ObjectKey, Arc<Value>>>,
}

struct ReplaceDelta {
    added: Vec<Arc<Value>>,
    changed: Vec<(Arc<Value>, Arc<Value>)>,
    removed: Vec<Arc<Value>>,
}

impl Store {
    fn get(&self, key: &ObjectKey) -> Option<Arc<Value>> {
        self.objects.read().get(key).cloned()
    }

    fn list(&self) -> Vec<Arc<Value>> {
        self.objects.read().values().cloned().collect()
    }

    fn insert(&self, key: ObjectKey, obj: Arc<Value>) -> Option<Arc<Value>> {
        self.objects.write().insert(key, obj)
    }

    fn remove(&self, key: &ObjectKey) -> Option<Arc<Value>> {
        self.objects.write().remove(key)
    }

    /// Atomically replace the contents after a re-list, reporting the
    /// difference against the previous state.
    fn replace(&self, new: AHashMap<ObjectKey, Arc<Value>>) -> ReplaceDelta {
        let mut objects = self.objects.write();
        let mut delta = ReplaceDelta {
            added: Vec::new(),
            changed: Vec::new(),
            removed: Vec::new(),
        };
        for (key, old) in objects.iter() {
            if !new.contains_key(key) {
                delta.removed.push(Arc::clone(old));
            }
        }
        for (key, obj) in &new {
            match objects.get(key) {
                Some(old) if old != obj => {
                    delta.changed.push((Arc::clone(obj), Arc::clone(old)));
                }
                Some(_) => {}
                None => delta.added.push(Arc::clone(obj)),
            }
        }
        *objects = new;
        delta
    }
}

struct Subscriber {
    tx: mpsc::UnboundedSender<CacheEvent>,
    token: CancellationToken,
}

#[derive(Default)]
struct Handlers {
    add: Mutex<Vec<Subscriber>>,
    change: Mutex<Vec<Subscriber>>,
    remove: Mutex<Vec<Subscriber>>,
}

impl Handlers {
    fn subscribe(
        list: &Mutex<Vec<Subscriber>>,
        token: CancellationToken,
    ) -> mpsc::UnboundedReceiver<CacheEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        list.lock().push(Subscriber { tx, token });
        rx
    }

    fn dispatch(list: &Mutex<Vec<Subscriber>>, event: &CacheEvent) {
        list.lock()
            .retain(|s| !s.token.is_cancelled() && s.tx.send(event.clone()).is_ok());
    }
}

struct Informer {
    schema: Arc<Schema>,
    store: Arc<Store>,
    token: CancellationToken,
}

#[derive(Default)]
struct CacheState {
    informers: AHashMap<GroupVersionResource, Informer>,
    by_kind: AHashMap<GroupVersionKind, GroupVersionResource>,
}

/// Live local caches for every watchable kind, with event fan-out.
pub struct ClusterCache {
    tables: TableClient,
    transforms: Arc<TransformChain>,
    start_permits: Option<Arc<Semaphore>>,
    handlers: Arc<Handlers>,
    state: Mutex<CacheState>,
    root: CancellationToken,
}

impl ClusterCache {
    #[must_use]
    pub fn new(client: Client, transforms: Arc<TransformChain>, config: &Config) -> Self {
        ClusterCache {
            tables: TableClient::new(client),
            transforms,
            start_permits: config
                .client_limit
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
            handlers: Arc::new(Handlers::default()),
            state: Mutex::new(CacheState::default()),
            root: CancellationToken::new(),
        }
    }

    /// Reconcile the informer set to exactly the list+watch-capable
    /// schemas. New kinds get an informer, vanished kinds lose theirs.
    pub fn on_schemas(&self, schemas: &[Arc<Schema>]) {
        let desired: AHashMap<GroupVersionResource, Arc<Schema>> = schemas
            .iter()
            .filter(|s| s.can_list_watch() && s.kind != "APIGroup")
            .map(|s| (s.group_version_resource(), Arc::clone(s)))
            .collect();

        let mut state = self.state.lock();
        let CacheState { informers, by_kind } = &mut *state;
        informers.retain(|gvr, informer| {
            if desired.contains_key(gvr) {
                true
            } else {
                debug!(resource = %gvr.resource, "stopping informer");
                informer.token.cancel();
                false
            }
        });
        for (gvr, schema) in desired {
            if informers.contains_key(&gvr) {
                continue;
            }
            debug!(resource = %gvr.resource, "starting informer");
            let store = Arc::new(Store::default());
            let token = self.root.child_token();
            tokio::spawn(run_informer(
                self.tables.clone(),
                Arc::clone(&schema),
                gvr.clone(),
                Arc::clone(&store),
                Arc::clone(&self.transforms),
                Arc::clone(&self.handlers),
                self.start_permits.clone(),
                token.clone(),
            ));
            by_kind.insert(schema.group_version_kind(), gvr.clone());
            informers.insert(gvr, Informer { schema, store, token });
        }
        by_kind.retain(|_, gvr| informers.contains_key(gvr));
    }

    /// All cached objects of one kind.
    #[must_use]
    pub fn list(&self, gvr: &GroupVersionResource) -> Vec<Arc<Value>> {
        self.state
            .lock()
            .informers
            .get(gvr)
            .map(|i| i.store.list())
            .unwrap_or_default()
    }

    /// One cached object, looked up by kind.
    pub fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Arc<Value>> {
        let state = self.state.lock();
        let gvr = state
            .by_kind
            .get(gvk)
            .ok_or_else(|| Error::Core(gantry_core::Error::NotFound(gvk.kind.clone())))?;
        let informer = state
            .informers
            .get(gvr)
            .ok_or_else(|| Error::Core(gantry_core::Error::NotFound(gvk.kind.clone())))?;
        let key = ObjectKey {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        };
        informer.store.get(&key).ok_or_else(|| {
            Error::Core(gantry_core::Error::NotFound(format!(
                "{}/{name}",
                gvk.kind
            )))
        })
    }

    /// The schema an informer is running for, by resource identity.
    #[must_use]
    pub fn schema_for(&self, gvr: &GroupVersionResource) -> Option<Arc<Schema>> {
        self.state
            .lock()
            .informers
            .get(gvr)
            .map(|i| Arc::clone(&i.schema))
    }

    /// Subscribe to object additions. The channel closes when `token` is
    /// cancelled.
    #[must_use]
    pub fn on_add(&self, token: CancellationToken) -> mpsc::UnboundedReceiver<CacheEvent> {
        Handlers::subscribe(&self.handlers.add, token)
    }

    /// Subscribe to object changes.
    #[must_use]
    pub fn on_change(&self, token: CancellationToken) -> mpsc::UnboundedReceiver<CacheEvent> {
        Handlers::subscribe(&self.handlers.change, token)
    }

    /// Subscribe to object removals.
    #[must_use]
    pub fn on_remove(&self, token: CancellationToken) -> mpsc::UnboundedReceiver<CacheEvent> {
        Handlers::subscribe(&self.handlers.remove, token)
    }

    /// Cancel every informer and subscriber.
    pub fn stop(&self) {
        self.root.cancel();
    }
}

/// The default object store behind schema templates: reads come from the
/// local cache, with a real (table-converted) GET on miss so callers get
/// the same representation either way.
pub struct CacheStore {
    cache: Arc<ClusterCache>,
    tables: TableClient,
}

impl CacheStore {
    #[must_use]
    pub fn new(cache: Arc<ClusterCache>, client: Client) -> Self {
        CacheStore {
            cache,
            tables: TableClient::new(client),
        }
    }
}

#[async_trait::async_trait]
impl crate::schema::ObjectStore for CacheStore {
    async fn list(&self, schema: &Schema) -> Result<Vec<Arc<Value>>> {
        Ok(self.cache.list(&schema.group_version_resource()))
    }

    async fn get(
        &self,
        schema: &Schema,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Arc<Value>> {
        match self
            .cache
            .get(&schema.group_version_kind(), namespace, name)
        {
            Ok(obj) => Ok(obj),
            Err(_) => {
                let obj = self.tables.get(schema, namespace, name).await?;
                Ok(Arc::new(obj))
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_informer(
    tables: TableClient,
    schema: Arc<Schema>,
    gvr: GroupVersionResource,
    store: Arc<Store>,
    transforms: Arc<TransformChain>,
    handlers: Arc<Handlers>,
    start_permits: Option<Arc<Semaphore>>,
    token: CancellationToken,
) {
    let stream = watcher::watch(tables, Arc::clone(&schema), start_permits);
    futures::pin_mut!(stream);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            event = stream.next() => match event {
                None => break,
                Some(Err(err)) => {
                    debug!(resource = %gvr.resource, error = %err, "watch interrupted; retrying");
                    tokio::time::sleep(WATCH_RETRY_DELAY).await;
                }
                Some(Ok(event)) => {
                    handle_event(&schema, &gvr, &store, &transforms, &handlers, event);
                }
            },
        }
    }
}

fn handle_event(
    schema: &Schema,
    gvr: &GroupVersionResource,
    store: &Store,
    transforms: &TransformChain,
    handlers: &Handlers,
    event: watcher::Event,
) {
    match event {
        watcher::Event::Restarted(objs) => {
            let mut new = AHashMap::with_capacity(objs.len());
            for obj in objs {
                if let Some((key, obj)) = ingest(schema, transforms, obj) {
                    new.insert(key, obj);
                }
            }
            let delta = store.replace(new);
            for obj in delta.added {
                Handlers::dispatch(&handlers.add, &CacheEvent::Add {
                    gvr: gvr.clone(),
                    obj,
                });
            }
            for (obj, old) in delta.changed {
                Handlers::dispatch(&handlers.change, &CacheEvent::Change {
                    gvr: gvr.clone(),
                    obj,
                    old,
                });
            }
            for obj in delta.removed {
                Handlers::dispatch(&handlers.remove, &CacheEvent::Remove {
                    gvr: gvr.clone(),
                    obj,
                });
            }
        }
        watcher::Event::Applied(obj) => {
            if let Some((key, obj)) = ingest(schema, transforms, obj) {
                match store.insert(key, Arc::clone(&obj)) {
                    Some(old) => Handlers::dispatch(&handlers.change, &CacheEvent::Change {
                        gvr: gvr.clone(),
                        obj,
                        old,
                    }),
                    None => Handlers::dispatch(&handlers.add, &CacheEvent::Add {
                        gvr: gvr.clone(),
                        obj,
                    }),
                }
            }
        }
        watcher::Event::Deleted(obj) => {
            if let Some((key, obj)) = ingest(schema, transforms, obj) {
                store.remove(&key);
                Handlers::dispatch(&handlers.remove, &CacheEvent::Remove {
                    gvr: gvr.clone(),
                    obj,
                });
            }
        }
    }
}

/// Run the transform chain and derive the store key.
///
/// Transform failures are logged and the partially transformed object is
/// kept: surfacing them would make the informer retry forever.
fn ingest(
    schema: &Schema,
    transforms: &TransformChain,
    mut obj: Value,
) -> Option<(ObjectKey, Arc<Value>)> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    if let Err(err) = transforms.apply(schema, &mut obj, now_ms) {
        warn!(schema = %schema.id, error = %err, "object transform failed");
    }
    let Some(name) = dynamic::name(&obj) else {
        debug!(schema = %schema.id, "dropping object without a name");
        return None;
    };
    let key = ObjectKey {
        namespace: dynamic::namespace(&obj).map(str::to_string),
        name: name.to_string(),
    };
    Some((key, Arc::new(obj)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(name: &str, rv: u64) -> Arc<Value> {
        Arc::new(json!({"metadata": {"name": name, "resourceVersion": rv.to_string()}}))
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey {
            namespace: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn replace_reports_the_difference() {
        let store = Store::default();
        store.insert(key("a"), obj("a", 1));
        store.insert(key("b"), obj("b", 1));

        let mut new = AHashMap::new();
        new.insert(key("b"), obj("b", 2));
        new.insert(key("c"), obj("c", 1));
        let delta = store.replace(new);

        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.changed.len(), 1);
        assert_eq!(delta.removed.len(), 1);
        assert!(store.get(&key("a")).is_none());
        assert!(store.get(&key("c")).is_some());
    }

    #[test]
    fn replace_skips_unchanged_objects() {
        let store = Store::default();
        store.insert(key("a"), obj("a", 1));
        let mut new = AHashMap::new();
        new.insert(key("a"), obj("a", 1));
        let delta = store.replace(new);
        assert!(delta.added.is_empty());
        assert!(delta.changed.is_empty());
        assert!(delta.removed.is_empty());
    }

    #[tokio::test]
    async fn cancelled_subscribers_are_pruned() {
        let handlers = Handlers::default();
        let token = CancellationToken::new();
        let mut rx = Handlers::subscribe(&handlers.add, token.clone());
        let event = CacheEvent::Add {
            gvr: GroupVersionResource::gvr("", "v1", "pods"),
            obj: obj("p", 1),
        };
        Handlers::dispatch(&handlers.add, &event);
        assert!(rx.recv().await.is_some());

        token.cancel();
        Handlers::dispatch(&handlers.add, &event);
        assert!(handlers.add.lock().is_empty());
    }
}

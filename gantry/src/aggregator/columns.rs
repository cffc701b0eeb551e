//! Live column discovery.
//!
//! Probes each list+watch-capable schema with a one-row table list and
//! adopts the server's column definitions, so cells and columns line up
//! regardless of what (if anything) the kind declared. Probe failures are
//! logged and the schema keeps its declared or default columns.

use crate::clustercache::{Limiter, TableClient};
use ahash::AHashMap;
use gantry_core::{Column, Schema};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(super) async fn fetch_columns(
    tables: &TableClient,
    schemas: &mut AHashMap<String, Schema>,
    concurrency: usize,
) {
    let results: Arc<Mutex<AHashMap<String, Vec<Column>>>> = Arc::default();
    let token = CancellationToken::new();
    let mut limiter = Limiter::new(concurrency);
    for schema in schemas.values().filter(|s| s.can_list_watch()) {
        let id = schema.id.clone();
        let schema = schema.clone();
        let tables = tables.clone();
        let results = Arc::clone(&results);
        limiter.execute(&token, async move {
            let list = tables.list(&schema, Some(1)).await?;
            if !list.columns.is_empty() {
                results.lock().insert(id, list.columns);
            }
            Ok(())
        });
    }
    if let Err(err) = limiter.wait().await {
        warn!(error = %err, "column probes failed for some schemas");
    }

    let mut results = results.lock();
    for (id, schema) in schemas.iter_mut() {
        if let Some(columns) = results.remove(id) {
            schema.columns = columns;
            schema.dynamic_columns = true;
        } else if schema.columns.is_empty() {
            schema.columns = Column::defaults();
        }
    }
}

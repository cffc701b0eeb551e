//! The list-then-watch loop backing each informer.
//!
//! Modelled as a finite state machine driven through `stream::unfold`:
//! `Empty` performs the initial list, `InitListed` opens the watch, and
//! `Watching` relays events until the stream drops (re-watch) or the
//! server reports a 410 Gone (full re-list). Transient errors are
//! surfaced to the caller and the machine recovers on the next poll.

use super::table::{rows_to_objects, Table, TableClient};
use crate::error::{Error, Result};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use gantry_core::Schema;
use kube::api::WatchEvent;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Events emitted by the informer loop.
#[derive(Debug)]
pub enum Event {
    /// An object was added or modified.
    Applied(Value),
    /// An object was deleted.
    Deleted(Value),
    /// The stream was (re)started from a full list; the store should be
    /// replaced atomically.
    Restarted(Vec<Value>),
}

enum State {
    /// The next poll performs the initial list.
    Empty,
    /// The list succeeded; the next poll opens the watch.
    InitListed { resource_version: String },
    /// Relaying server events.
    Watching {
        resource_version: String,
        stream: BoxStream<'static, kube::Result<WatchEvent<Table>>>,
        /// Converted objects from a multi-row event not yet emitted.
        pending: VecDeque<Event>,
    },
}

/// Watch one schema's objects continuously, in table representation.
///
/// `start_permits` bounds concurrent initial lists across informers when a
/// client-side limit is configured; the permit is held only for the list.
pub(super) fn watch(
    tables: TableClient,
    schema: Arc<Schema>,
    start_permits: Option<Arc<Semaphore>>,
) -> impl Stream<Item = Result<Event>> {
    futures::stream::unfold(
        (State::Empty, tables, schema, start_permits),
        |(mut state, tables, schema, permits)| async move {
            loop {
                let (event, next) = step(&tables, &schema, permits.as_deref(), state).await;
                state = next;
                if let Some(event) = event {
                    return Some((event, (state, tables, schema, permits)));
                }
            }
        },
    )
}

async fn step(
    tables: &TableClient,
    schema: &Schema,
    start_permits: Option<&Semaphore>,
    state: State,
) -> (Option<Result<Event>>, State) {
    match state {
        State::Empty => {
            let _permit = match start_permits {
                Some(sem) => sem.acquire().await.ok(),
                None => None,
            };
            match tables.list(schema, None).await {
                Ok(list) => (
                    Some(Ok(Event::Restarted(list.objects))),
                    State::InitListed {
                        resource_version: list.resource_version,
                    },
                ),
                Err(err) => (Some(Err(err)), State::Empty),
            }
        }
        State::InitListed { resource_version } => {
            match tables.watch(schema, &resource_version).await {
                Ok(stream) => (None, State::Watching {
                    resource_version,
                    stream,
                    pending: VecDeque::new(),
                }),
                Err(err) => (Some(Err(err)), State::InitListed { resource_version }),
            }
        }
        State::Watching {
            mut resource_version,
            mut stream,
            mut pending,
        } => {
            if let Some(event) = pending.pop_front() {
                return (Some(Ok(event)), State::Watching {
                    resource_version,
                    stream,
                    pending,
                });
            }
            match stream.next().await {
                Some(Ok(WatchEvent::Added(table) | WatchEvent::Modified(table))) => {
                    queue_rows(table, Event::Applied, &mut pending, &mut resource_version);
                    (pending.pop_front().map(Ok), State::Watching {
                        resource_version,
                        stream,
                        pending,
                    })
                }
                Some(Ok(WatchEvent::Deleted(table))) => {
                    queue_rows(table, Event::Deleted, &mut pending, &mut resource_version);
                    (pending.pop_front().map(Ok), State::Watching {
                        resource_version,
                        stream,
                        pending,
                    })
                }
                Some(Ok(WatchEvent::Bookmark(bookmark))) => (None, State::Watching {
                    resource_version: bookmark.metadata.resource_version,
                    stream,
                    pending,
                }),
                Some(Ok(WatchEvent::Error(err))) => {
                    // 410 Gone means we fell out of the watch window and
                    // must re-list
                    let next = if err.code == 410 {
                        State::Empty
                    } else {
                        State::Watching {
                            resource_version,
                            stream,
                            pending,
                        }
                    };
                    (Some(Err(Error::Kube(kube::Error::Api(err)))), next)
                }
                Some(Err(err)) => (Some(Err(err.into())), State::Watching {
                    resource_version,
                    stream,
                    pending,
                }),
                None => (None, State::InitListed { resource_version }),
            }
        }
    }
}

/// Convert a watch-event table into events, advancing the resource version
/// to the newest object seen.
fn queue_rows(
    table: Table,
    wrap: fn(Value) -> Event,
    pending: &mut VecDeque<Event>,
    resource_version: &mut String,
) {
    for obj in rows_to_objects(table) {
        if let Some(rv) = obj
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
        {
            *resource_version = rv.to_string();
        }
        pending.push_back(wrap(obj));
    }
}

//! Bounded-concurrency execution with joined errors.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Schedules work on a bounded set of worker slots and collects failures.
///
/// Calls cancelled before a slot is acquired are dropped without recording
/// an error; failures after that point are collected and returned joined
/// from [`Limiter::wait`]. The error list is guarded by a mutex because
/// workers fail concurrently.
pub struct Limiter {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<()>,
    errors: Arc<Mutex<Vec<Error>>>,
}

impl Limiter {
    /// A limiter with `max(1, limit)` worker slots.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Limiter {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
            tasks: JoinSet::new(),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Schedule `fut` on the next free slot.
    pub fn execute<F>(&mut self, token: &CancellationToken, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let errors = Arc::clone(&self.errors);
        let token = token.clone();
        self.tasks.spawn(async move {
            if token.is_cancelled() {
                return;
            }
            let _permit = tokio::select! {
                () = token.cancelled() => return,
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            if let Err(err) = fut.await {
                errors.lock().push(err);
            }
        });
    }

    /// Block until outstanding calls finish and return the joined errors.
    pub async fn wait(mut self) -> Result<()> {
        while self.tasks.join_next().await.is_some() {}
        let errors = std::mem::take(&mut *self.errors.lock());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Multiple(errors))
        }
    }
}

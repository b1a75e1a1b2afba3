//! Rewriting batches that are already loaded, without reloading the list.
//!
//! An update names the batch keys it touches. Sync updates wait for running sync
//! updates on overlapping keys and apply one result; streaming updates start at once
//! and may apply any number of partial results through their [`UpdateContext`].

use super::list_source::{Batch, BatchListState};
use crate::supply::SupplyError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchUpdateResult<T> {
    /// Replacement batches, matched by key; keys that are no longer loaded are ignored
    Success(Vec<Batch<T>>),
    Error(SupplyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Sync,
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpdate<U> {
    pub operation_id: String,
    pub keys: BTreeSet<usize>,
    pub request: U,
    pub mode: UpdateMode,
}

impl<U> BatchUpdate<U> {
    pub fn new(operation_id: impl Into<String>, keys: impl IntoIterator<Item = usize>, request: U) -> Self {
        Self {
            operation_id: operation_id.into(),
            keys: keys.into_iter().collect(),
            request,
            mode: UpdateMode::Sync,
        }
    }

    #[must_use]
    pub const fn streaming(mut self) -> Self {
        self.mode = UpdateMode::Streaming;
        self
    }
}

/// Published for every applied or failed update, next to the request that caused it
pub type UpdateNotice<T, U> = (U, BatchUpdateResult<T>);

/// Computes new contents for loaded batches
#[async_trait]
pub trait BatchUpdateFetcher<T, U>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    async fn fetch_update(&self, to_update: Vec<Batch<T>>, request: &U) -> BatchUpdateResult<T>;

    /// Streaming form: call [`UpdateContext::update`] once per partial result.
    /// The default applies a single [`Self::fetch_update`].
    async fn fetch_update_streaming(&self, ctx: &UpdateContext<'_, T, U>, to_update: Vec<Batch<T>>, request: &U) {
        let result = self.fetch_update(to_update, request).await;
        ctx.update(|_| result);
    }
}

/// Handed to a running update; applies its results to the list
pub struct UpdateContext<'a, T, U> {
    state_tx: &'a watch::Sender<BatchListState<T>>,
    results: &'a broadcast::Sender<UpdateNotice<T, U>>,
    keys: &'a BTreeSet<usize>,
    request: &'a U,
    token: &'a CancellationToken,
    last: Mutex<Option<BatchUpdateResult<T>>>,
}

impl<'a, T, U> UpdateContext<'a, T, U>
where
    T: Clone,
    U: Clone,
{
    pub(crate) const fn new(
        state_tx: &'a watch::Sender<BatchListState<T>>,
        results: &'a broadcast::Sender<UpdateNotice<T, U>>,
        keys: &'a BTreeSet<usize>,
        request: &'a U,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            state_tx,
            results,
            keys,
            request,
            token,
            last: Mutex::new(None),
        }
    }

    /// The loaded batches this update covers, as they are now
    #[must_use]
    pub fn current_batches(&self) -> Vec<Batch<T>> {
        self.state_tx
            .borrow()
            .batches
            .iter()
            .filter(|batch| self.keys.contains(&batch.key))
            .cloned()
            .collect()
    }

    /// Build a result from the current batches and apply it. Returns false, applying
    /// nothing, once the update has been cancelled.
    pub fn update(&self, f: impl FnOnce(Vec<Batch<T>>) -> BatchUpdateResult<T>) -> bool {
        if self.token.is_cancelled() {
            return false;
        }

        let result = f(self.current_batches());
        if let BatchUpdateResult::Success(replacements) = &result {
            self.state_tx.send_modify(|state| {
                for batch in &mut state.batches {
                    if let Some(replacement) = replacements.iter().find(|r| r.key == batch.key) {
                        batch.data.clone_from(&replacement.data);
                    }
                }
            });
        }

        // nobody listening is fine
        let _ = self.results.send((self.request.clone(), result.clone()));
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        true
    }

    pub(crate) fn into_last(self) -> Option<BatchUpdateResult<T>> {
        self.last.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct RunningUpdate {
    id: u64,
    operation_id: String,
    keys: BTreeSet<usize>,
    token: CancellationToken,
    // set while a sync update owns its keys
    holds_keys: bool,
}

/// Updates that are waiting or running, by operation id
#[derive(Debug, Default)]
pub(crate) struct UpdateRegistry {
    running: Mutex<Vec<RunningUpdate>>,
    changed: Notify,
    next_id: AtomicU64,
}

impl UpdateRegistry {
    /// `None` if an update with the same operation id is still registered
    pub(crate) fn register(&self, operation_id: &str, keys: &BTreeSet<usize>) -> Option<Registration<'_>> {
        let mut running = self.lock();
        if running.iter().any(|update| update.operation_id == operation_id) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        running.push(RunningUpdate {
            id,
            operation_id: operation_id.to_string(),
            keys: keys.clone(),
            token: token.clone(),
            holds_keys: false,
        });
        Some(Registration {
            registry: self,
            id,
            token,
        })
    }

    /// Cancel and forget every update whose operation id matches
    pub(crate) fn cancel(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut running = self.lock();
        let before = running.len();
        running.retain(|update| {
            let keep = !predicate(&update.operation_id);
            if !keep {
                update.token.cancel();
            }
            keep
        });
        let cancelled = before - running.len();
        drop(running);

        if cancelled > 0 {
            debug!("🛑 UPDATE CANCEL: {} updates", cancelled);
            self.changed.notify_waiters();
        }
        cancelled
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RunningUpdate>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps an update registered; dropping it releases the update's keys
pub(crate) struct Registration<'a> {
    registry: &'a UpdateRegistry,
    id: u64,
    pub(crate) token: CancellationToken,
}

impl Registration<'_> {
    /// Wait until no other sync update holds one of our keys, then hold them.
    /// False if the update was cancelled while waiting.
    pub(crate) async fn acquire_keys(&self) -> bool {
        loop {
            // created before the check so a release in between still wakes us
            let changed = self.registry.changed.notified();
            {
                let mut running = self.registry.lock();
                let Some(index) = running.iter().position(|update| update.id == self.id) else {
                    return false;
                };
                let blocked = running.iter().any(|other| {
                    other.id != self.id && other.holds_keys && !other.keys.is_disjoint(&running[index].keys)
                });
                if !blocked {
                    running[index].holds_keys = true;
                    return true;
                }
            }

            tokio::select! {
                () = changed => {}
                () = self.token.cancelled() => return false,
            }
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.lock().retain(|update| update.id != self.id);
        self.registry.changed.notify_waiters();
    }
}

//! Observable paginated list on top of [`BatchFetchCoordinator`].
//!
//! Consumers drive it with [`BatchListSource::reload`], [`BatchListSource::load_more`]
//! and [`BatchListSource::reset`], and render whatever [`BatchListState`] the watch
//! channel holds. With a [`BatchUpdateFetcher`] attached, loaded batches can also be
//! rewritten in place through [`BatchListSource::update_batches`].

use super::coordinator::BatchFetchCoordinator;
use super::page_fetcher::PageFetcher;
use super::state::BatchFetchResult;
use super::update::{
    BatchUpdate, BatchUpdateFetcher, BatchUpdateResult, UpdateContext, UpdateMode, UpdateNotice, UpdateRegistry,
};
use crate::supply::SupplyError;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const UPDATE_RESULTS_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationStatus {
    None,
    InitialLoading,
    InitialLoadingError(SupplyError),
    /// More pages may follow; carries the error of the last `load_more`, if it failed
    Paginating { last_error: Option<SupplyError> },
    NextBatchLoading,
    EndOfPagination,
}

/// One loaded page, keyed by its position in the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    pub key: usize,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchListState<T> {
    pub batches: Vec<Batch<T>>,
    pub status: PaginationStatus,
}

impl<T> BatchListState<T> {
    const fn empty(status: PaginationStatus) -> Self {
        Self {
            batches: Vec::new(),
            status,
        }
    }

    /// All items of all batches, in order
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.batches.iter().flat_map(|batch| batch.data.iter())
    }
}

/// Who is loading right now; reload, reset and `cancel_batch_loading` swap the token
#[derive(Debug, Default)]
struct Loading {
    token: CancellationToken,
    // epoch of the reload in flight
    reloading: Option<u64>,
    // id of the load_more that owns the slot
    load_more: Option<u64>,
    next_load: u64,
}

impl Loading {
    /// Cancel reload and load_more in flight and free the load_more slot
    fn restart(&mut self) {
        self.token.cancel();
        self.token = CancellationToken::new();
        self.load_more = None;
    }
}

/// Frees the load_more slot unless a reload already handed it to someone else
struct LoadMoreSlot<'a> {
    loading: &'a Mutex<Loading>,
    id: u64,
}

impl Drop for LoadMoreSlot<'_> {
    fn drop(&mut self) {
        let mut loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if loading.load_more == Some(self.id) {
            loading.load_more = None;
        }
    }
}

pub struct BatchListSource<P, F, U = ()>
where
    P: Send + Sync,
    F: PageFetcher<P>,
    F::Item: 'static,
    U: Clone + Send + Sync + 'static,
{
    coordinator: BatchFetchCoordinator<P, F>,
    state_tx: watch::Sender<BatchListState<F::Item>>,
    last_result: Mutex<Option<BatchFetchResult<Vec<F::Item>>>>,
    loading: Mutex<Loading>,
    // bumped by reload/reset so that older operations drop their results
    epoch: AtomicU64,
    updater: Option<Arc<dyn BatchUpdateFetcher<F::Item, U>>>,
    updates: UpdateRegistry,
    update_results: broadcast::Sender<UpdateNotice<F::Item, U>>,
}

impl<P, F, U> BatchListSource<P, F, U>
where
    P: Clone + PartialEq + Debug + Send + Sync,
    F: PageFetcher<P>,
    F::Item: 'static,
    U: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(coordinator: BatchFetchCoordinator<P, F>) -> Self {
        let (state_tx, _rx) = watch::channel(BatchListState::empty(PaginationStatus::None));
        let (update_results, _) = broadcast::channel(UPDATE_RESULTS_CAPACITY);
        Self {
            coordinator,
            state_tx,
            last_result: Mutex::new(None),
            loading: Mutex::new(Loading::default()),
            epoch: AtomicU64::new(0),
            updater: None,
            updates: UpdateRegistry::default(),
            update_results,
        }
    }

    #[must_use]
    pub fn with_updater(mut self, updater: Arc<dyn BatchUpdateFetcher<F::Item, U>>) -> Self {
        self.updater = Some(updater);
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BatchListState<F::Item>> {
        self.state_tx.subscribe()
    }

    /// Results of every update from now on, applied or failed
    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateNotice<F::Item, U>> {
        self.update_results.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> BatchListState<F::Item> {
        self.state_tx.borrow().clone()
    }

    #[must_use]
    pub const fn coordinator(&self) -> &BatchFetchCoordinator<P, F> {
        &self.coordinator
    }

    /// Updates that are waiting for their keys or running
    #[must_use]
    pub fn running_updates(&self) -> usize {
        self.updates.len()
    }

    /// Drop everything and load the first page for `params`. A load_more or reload in
    /// flight is cancelled, as is every update.
    pub async fn reload(&self, params: P) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let token = {
            let mut loading = self.lock_loading();
            loading.restart();
            loading.reloading = Some(epoch);
            loading.token.clone()
        };
        self.cancel_all_updates();
        self.state_tx
            .send_replace(BatchListState::empty(PaginationStatus::InitialLoading));

        let result = tokio::select! {
            () = token.cancelled() => None,
            result = self.coordinator.fetch_first(params) => Some(result),
        };
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!("⏭️  Reload superseded, dropping its first page");
            return;
        }
        {
            let mut loading = self.lock_loading();
            if loading.reloading == Some(epoch) {
                loading.reloading = None;
            }
        }

        let Some(result) = result else {
            debug!("🛑 Reload cancelled");
            self.state_tx.send_replace(BatchListState::empty(PaginationStatus::None));
            return;
        };

        let state = match &result {
            BatchFetchResult::Success { data, empty, last } => BatchListState {
                batches: if *empty {
                    Vec::new()
                } else {
                    vec![Batch { key: 0, data: data.clone() }]
                },
                status: if *last {
                    PaginationStatus::EndOfPagination
                } else {
                    PaginationStatus::Paginating { last_error: None }
                },
            },
            BatchFetchResult::Error(e) => BatchListState::empty(PaginationStatus::InitialLoadingError(e.clone())),
        };

        self.state_tx.send_replace(state);
        *self.lock_last_result() = Some(result);
    }

    /// Load the next page, or restart with `override_params` if they differ from the
    /// current ones. Returns false when the call was skipped: another `load_more` is
    /// running, nothing was loaded yet, or the end was reached and no new params were
    /// given.
    pub async fn load_more(&self, override_params: Option<P>) -> bool {
        let (slot, token) = {
            let mut loading = self.lock_loading();
            if loading.load_more.is_some() {
                debug!("⏳ load_more already running, skipping");
                return false;
            }
            loading.next_load += 1;
            loading.load_more = Some(loading.next_load);
            let slot = LoadMoreSlot {
                loading: &self.loading,
                id: loading.next_load,
            };
            (slot, loading.token.clone())
        };

        let ran = self.run_load_more(override_params, &token).await;
        drop(slot);
        ran
    }

    async fn run_load_more(&self, override_params: Option<P>, token: &CancellationToken) -> bool {
        let status = self.state_tx.borrow().status.clone();
        let ready = match status {
            PaginationStatus::Paginating { .. } => true,
            PaginationStatus::EndOfPagination => override_params.is_some(),
            _ => false,
        };
        if !ready {
            return false;
        }
        let Some(last_result) = self.lock_last_result().clone() else {
            return false;
        };

        let epoch = self.epoch.load(Ordering::Acquire);
        let restarts = override_params
            .as_ref()
            .is_some_and(|params| self.coordinator.current_params().as_ref() != Some(params));

        self.state_tx.send_modify(|state| state.status = PaginationStatus::NextBatchLoading);
        let result = tokio::select! {
            () = token.cancelled() => None,
            result = self.coordinator.fetch_next(override_params, &last_result) => Some(result),
        };

        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!("⏭️  load_more superseded by reload/reset");
            return true;
        }
        let Some(result) = result else {
            debug!("🛑 load_more cancelled");
            self.state_tx.send_modify(|state| state.status = status);
            return true;
        };

        self.state_tx.send_modify(|state| match &result {
            BatchFetchResult::Success { data, empty, last } => {
                if restarts {
                    state.batches.clear();
                }
                if !*empty {
                    state.batches.push(Batch {
                        key: state.batches.len(),
                        data: data.clone(),
                    });
                }
                state.status = if *last {
                    PaginationStatus::EndOfPagination
                } else {
                    PaginationStatus::Paginating { last_error: None }
                };
            }
            BatchFetchResult::Error(SupplyError::EndOfPagination) => {
                state.status = PaginationStatus::EndOfPagination;
            }
            BatchFetchResult::Error(e) => {
                state.status = PaginationStatus::Paginating {
                    last_error: Some(e.clone()),
                };
            }
        });

        if matches!(result, BatchFetchResult::Success { .. }) {
            *self.lock_last_result() = Some(result);
        }
        true
    }

    /// Rewrite the batches named by `update` with the attached [`BatchUpdateFetcher`].
    ///
    /// Returns the last result that was applied, or `None` if nothing ran: no updater is
    /// attached, a reload is in progress, or the update was cancelled. An update whose
    /// operation id is already registered fails with [`SupplyError::UpdateInProgress`].
    /// Every result is also published to [`Self::subscribe_updates`].
    pub async fn update_batches(&self, update: BatchUpdate<U>) -> Option<BatchUpdateResult<F::Item>> {
        let Some(updater) = self.updater.as_ref() else {
            debug!("⏭️  Update {} skipped, no updater attached", update.operation_id);
            return None;
        };
        if self.lock_loading().reloading.is_some() {
            debug!("⏭️  Update {} skipped, reload in progress", update.operation_id);
            return None;
        }

        let Some(registration) = self.updates.register(&update.operation_id, &update.keys) else {
            warn!("⚠️  Update {} already in progress", update.operation_id);
            let result = BatchUpdateResult::Error(SupplyError::UpdateInProgress(update.operation_id.clone()));
            let _ = self.update_results.send((update.request, result.clone()));
            return Some(result);
        };

        let ctx = UpdateContext::new(
            &self.state_tx,
            &self.update_results,
            &update.keys,
            &update.request,
            &registration.token,
        );

        match update.mode {
            UpdateMode::Sync => {
                if !registration.acquire_keys().await {
                    debug!("🛑 Update {} cancelled while waiting", update.operation_id);
                    return None;
                }
                let result = tokio::select! {
                    () = registration.token.cancelled() => return None,
                    result = updater.fetch_update(ctx.current_batches(), &update.request) => result,
                };
                ctx.update(|_| result);
            }
            UpdateMode::Streaming => {
                tokio::select! {
                    () = registration.token.cancelled() => return None,
                    () = updater.fetch_update_streaming(&ctx, ctx.current_batches(), &update.request) => {}
                }
            }
        }

        if registration.token.is_cancelled() {
            return None;
        }
        debug!("✏️  Update {} done", update.operation_id);
        ctx.into_last()
    }

    /// Cancel the updates whose operation id matches; returns how many were cancelled
    pub fn cancel_updates(&self, predicate: impl Fn(&str) -> bool) -> usize {
        self.updates.cancel(predicate)
    }

    pub fn cancel_all_updates(&self) -> usize {
        self.updates.cancel(|_| true)
    }

    /// Stop a reload or load_more in flight. A cancelled reload leaves the list empty
    /// with status `None`; a cancelled load_more restores the status it started from.
    pub fn cancel_batch_loading(&self) {
        let mut loading = self.lock_loading();
        loading.restart();
        loading.reloading = None;
    }

    /// Back to an empty list with no pagination state
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        {
            let mut loading = self.lock_loading();
            loading.restart();
            loading.reloading = None;
        }
        self.cancel_all_updates();
        self.coordinator.reset();
        *self.lock_last_result() = None;
        self.state_tx.send_replace(BatchListState::empty(PaginationStatus::None));
    }

    fn lock_loading(&self) -> MutexGuard<'_, Loading> {
        self.loading.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_last_result(&self) -> MutexGuard<'_, Option<BatchFetchResult<Vec<F::Item>>>> {
        self.last_result.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

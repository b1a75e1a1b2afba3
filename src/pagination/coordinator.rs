use super::page_fetcher::PageFetcher;
use super::state::{BatchFetchResult, PageCursor, PageRequest, PaginationState};
use crate::supply::SupplyError;
use crate::supply::config::{DEFAULT_PAGE_LIMIT, SupplyConfig};
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Shared<P> {
    pagination: Option<PaginationState<P>>,
    // bumped by every operation that may commit; a commit only lands if it is unchanged
    generation: u64,
}

/// Cursor bookkeeping for one paginated list.
///
/// The lock only covers reading and committing [`PaginationState`]; it is released
/// while the page is fetched. If another operation starts while a fetch is in flight,
/// the older fetch's result is returned to its caller but not committed.
#[derive(Debug)]
pub struct BatchFetchCoordinator<P, F> {
    fetcher: F,
    limit: usize,
    shared: Mutex<Shared<P>>,
}

impl<P, F> BatchFetchCoordinator<P, F>
where
    P: Clone + PartialEq + Debug + Send + Sync,
    F: PageFetcher<P>,
{
    #[must_use]
    pub fn new(fetcher: F, limit: usize) -> Self {
        Self {
            fetcher,
            limit: limit.max(1),
            shared: Mutex::new(Shared {
                pagination: None,
                generation: 0,
            }),
        }
    }

    #[must_use]
    pub fn with_default_limit(fetcher: F) -> Self {
        Self::new(fetcher, DEFAULT_PAGE_LIMIT)
    }

    #[must_use]
    pub fn from_config(fetcher: F, config: &SupplyConfig) -> Self {
        Self::new(fetcher, config.page_limit)
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Snapshot of the committed state
    #[must_use]
    pub fn state(&self) -> Option<PaginationState<P>> {
        self.lock().pagination.clone()
    }

    /// Params of the committed state
    #[must_use]
    pub fn current_params(&self) -> Option<P> {
        self.lock().pagination.as_ref().map(|state| state.params.clone())
    }

    /// Forget the committed state; in-flight fetches will not commit
    pub fn reset(&self) {
        let mut shared = self.lock();
        shared.pagination = None;
        shared.generation += 1;
    }

    /// Load the first page for `params`, replacing any previous state on success
    pub async fn fetch_first(&self, params: P) -> BatchFetchResult<Vec<F::Item>> {
        let generation = self.begin();
        debug!("📄 PAGE FIRST: {:?}", params);
        self.load(generation, PageCursor::first(), params).await
    }

    /// Load the page after the committed one.
    ///
    /// * no committed state: [`SupplyError::StateMissing`]
    /// * `override_params` different from the committed params: restart at the first
    ///   page with them
    /// * otherwise, when `last_result` or the committed state marks the last page:
    ///   [`SupplyError::EndOfPagination`] without calling the fetcher
    /// * otherwise the committed cursor is fetched
    pub async fn fetch_next(
        &self,
        override_params: Option<P>,
        last_result: &BatchFetchResult<Vec<F::Item>>,
    ) -> BatchFetchResult<Vec<F::Item>> {
        let (generation, cursor, params) = {
            let mut shared = self.lock();
            let Some(state) = shared.pagination.as_ref() else {
                return BatchFetchResult::Error(SupplyError::StateMissing);
            };

            let (cursor, params) = match override_params.filter(|params| *params != state.params) {
                Some(params) => {
                    info!("🔁 PAGE RESET: params changed to {:?}", params);
                    (PageCursor::first(), params)
                }
                None if last_result.is_last() || state.is_last_page => {
                    debug!("🏁 PAGE END: {:?}", state.params);
                    return BatchFetchResult::Error(SupplyError::EndOfPagination);
                }
                None => (state.next_cursor.clone(), state.params.clone()),
            };

            shared.generation += 1;
            (shared.generation, cursor, params)
        };

        debug!("📄 PAGE NEXT: {:?} at {:?}", params, cursor);
        self.load(generation, cursor, params).await
    }

    async fn load(&self, generation: u64, cursor: PageCursor, params: P) -> BatchFetchResult<Vec<F::Item>> {
        let request = PageRequest {
            params,
            cursor,
            limit: self.limit,
        };

        let page = match self.fetcher.fetch_page(&request).await {
            Ok(page) => page,
            Err(e) => {
                warn!("❌ PAGE FAILED: {:?} at {:?} - {}", request.params, request.cursor, e);
                return BatchFetchResult::Error(e);
            }
        };

        let next_cursor = page.next_cursor.or_else(|| request.cursor.following());
        let last = page
            .last
            .unwrap_or_else(|| page.items.len() < request.limit || next_cursor.is_none());

        {
            let mut shared = self.lock();
            if shared.generation == generation {
                shared.pagination = Some(PaginationState {
                    next_cursor: next_cursor.unwrap_or_else(|| request.cursor.clone()),
                    params: request.params,
                    is_last_page: last,
                });
            } else {
                debug!("⏭️  PAGE STALE: {:?} superseded, not committing", request.cursor);
            }
        }

        BatchFetchResult::success(page.items, last)
    }

    fn begin(&self) -> u64 {
        let mut shared = self.lock();
        shared.generation += 1;
        shared.generation
    }

    fn lock(&self) -> MutexGuard<'_, Shared<P>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::state::Page;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Serves `total` numbered items for any params, `limit` at a time
    struct NumberPages {
        total: u32,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl NumberPages {
        fn new(total: u32) -> Self {
            Self {
                total,
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl PageFetcher<String> for NumberPages {
        type Item = u32;

        async fn fetch_page(&self, request: &PageRequest<String>) -> Result<Page<u32>, SupplyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SupplyError::Transport("503".to_string()));
            }
            let PageCursor::Page(page) = request.cursor else {
                return Err(SupplyError::InvalidArguments("token cursor".to_string()));
            };
            let limit = u32::try_from(request.limit).unwrap();
            let start = (page - 1) * limit;
            let items = (start..self.total.min(start + limit)).collect();
            Ok(Page::new(items))
        }
    }

    #[tokio::test]
    async fn test_short_page_marks_last() {
        let coordinator = BatchFetchCoordinator::new(NumberPages::new(5), 3);

        let first = coordinator.fetch_first("all".to_string()).await;
        assert_eq!(first, BatchFetchResult::Success { data: vec![0, 1, 2], empty: false, last: false });

        let second = coordinator.fetch_next(None, &first).await;
        assert_eq!(second, BatchFetchResult::Success { data: vec![3, 4], empty: false, last: true });
        assert!(coordinator.state().unwrap().is_last_page);

        let third = coordinator.fetch_next(None, &second).await;
        assert_eq!(third, BatchFetchResult::Error(SupplyError::EndOfPagination));
        assert_eq!(coordinator.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_next_without_first_is_state_missing() {
        let coordinator = BatchFetchCoordinator::new(NumberPages::new(5), 3);
        let placeholder = BatchFetchResult::Error(SupplyError::StateMissing);

        let result = coordinator.fetch_next(None, &placeholder).await;
        assert_eq!(result, BatchFetchResult::Error(SupplyError::StateMissing));
        assert_eq!(coordinator.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_changed_params_restart_at_first_page() {
        let coordinator = BatchFetchCoordinator::new(NumberPages::new(10), 2);
        let first = coordinator.fetch_first("usd".to_string()).await;
        let second = coordinator.fetch_next(None, &first).await;
        assert_eq!(second.data(), Some(&vec![2, 3]));

        let reset = coordinator.fetch_next(Some("eur".to_string()), &second).await;
        assert_eq!(reset.data(), Some(&vec![0, 1]));
        let state = coordinator.state().unwrap();
        assert_eq!(state.params, "eur");
        assert_eq!(state.next_cursor, PageCursor::Page(2));
    }

    #[tokio::test]
    async fn test_equal_override_does_not_reopen_the_end() {
        let coordinator = BatchFetchCoordinator::new(NumberPages::new(1), 2);
        let first = coordinator.fetch_first("usd".to_string()).await;
        assert!(first.is_last());

        let next = coordinator.fetch_next(Some("usd".to_string()), &first).await;
        assert_eq!(next.error(), Some(&SupplyError::EndOfPagination));
    }

    #[tokio::test]
    async fn test_failure_keeps_committed_state() {
        let coordinator = BatchFetchCoordinator::new(NumberPages::new(10), 2);
        let first = coordinator.fetch_first("usd".to_string()).await;
        let before = coordinator.state();

        coordinator.fetcher.fail.store(true, Ordering::SeqCst);
        let next = coordinator.fetch_next(None, &first).await;
        assert!(matches!(next, BatchFetchResult::Error(SupplyError::Transport(_))));
        assert_eq!(coordinator.state(), before);

        coordinator.fetcher.fail.store(false, Ordering::SeqCst);
        let retried = coordinator.fetch_next(None, &first).await;
        assert_eq!(retried.data(), Some(&vec![2, 3]));
    }

    #[tokio::test]
    async fn test_reset_discards_state() {
        let coordinator = BatchFetchCoordinator::new(NumberPages::new(10), 2);
        let first = coordinator.fetch_first("usd".to_string()).await;
        coordinator.reset();

        assert!(coordinator.state().is_none());
        let next = coordinator.fetch_next(None, &first).await;
        assert_eq!(next.error(), Some(&SupplyError::StateMissing));
    }
}

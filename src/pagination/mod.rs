pub mod coordinator;
pub mod list_source;
pub mod page_fetcher;
pub mod state;
pub mod update;

pub use coordinator::BatchFetchCoordinator;
pub use list_source::{Batch, BatchListSource, BatchListState, PaginationStatus};
pub use page_fetcher::PageFetcher;
pub use state::{BatchFetchResult, Page, PageCursor, PageRequest, PaginationState};
pub use update::{BatchUpdate, BatchUpdateFetcher, BatchUpdateResult, UpdateContext, UpdateMode, UpdateNotice};

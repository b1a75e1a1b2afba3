use super::state::{Page, PageRequest};
use crate::supply::SupplyError;
use async_trait::async_trait;
use std::sync::Arc;

/// Loads one page per call. Like [`crate::supply::Fetcher`], it never retries.
#[async_trait]
pub trait PageFetcher<P: Send + Sync>: Send + Sync {
    type Item: Clone + Send + Sync;

    async fn fetch_page(&self, request: &PageRequest<P>) -> Result<Page<Self::Item>, SupplyError>;
}

#[async_trait]
impl<P, T> PageFetcher<P> for Arc<T>
where
    P: Send + Sync,
    T: PageFetcher<P> + ?Sized,
{
    type Item = T::Item;

    async fn fetch_page(&self, request: &PageRequest<P>) -> Result<Page<Self::Item>, SupplyError> {
        (**self).fetch_page(request).await
    }
}

use super::config::DEFAULT_TTL_SECS;
use super::errors::SupplyError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One unit of remote work for a params value.
///
/// Implementations perform exactly one remote call per `fetch` and never retry
/// internally. Every failure, timeouts included, comes back as a [`SupplyError`].
#[async_trait]
pub trait Fetcher<P: Send + Sync>: Send + Sync {
    type Output: Clone + Send + Sync;

    async fn fetch(&self, params: &P) -> Result<Self::Output, SupplyError>;

    /// How long a fetched value stays fresh before a scheduled refresh picks it up
    fn ttl(&self) -> Duration {
        Duration::from_secs(DEFAULT_TTL_SECS)
    }
}

/// Type-erased fetcher as stored by producers
pub type DynFetcher<P, V> = Arc<dyn Fetcher<P, Output = V>>;

#[async_trait]
impl<P, T> Fetcher<P> for Arc<T>
where
    P: Send + Sync,
    T: Fetcher<P> + ?Sized,
{
    type Output = T::Output;

    async fn fetch(&self, params: &P) -> Result<Self::Output, SupplyError> {
        (**self).fetch(params).await
    }

    fn ttl(&self) -> Duration {
        (**self).ttl()
    }
}

/// Fetcher built from an async closure, for wiring a supplier at its use site.
pub struct FnFetcher<F> {
    f: F,
    ttl: Duration,
}

impl<F> FnFetcher<F> {
    pub const fn new(f: F) -> Self {
        Self {
            f,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
        }
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl<P, V, F, Fut> Fetcher<P> for FnFetcher<F>
where
    P: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, SupplyError>> + Send,
{
    type Output = V;

    async fn fetch(&self, params: &P) -> Result<V, SupplyError> {
        (self.f)(params.clone()).await
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Bounds every fetch of the wrapped fetcher; a timeout is reported as a transport
/// error so it follows the same fallback path as any other failure.
pub struct TimeoutFetcher<F> {
    inner: F,
    timeout: Duration,
}

impl<F> TimeoutFetcher<F> {
    pub const fn new(inner: F, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<P, F> Fetcher<P> for TimeoutFetcher<F>
where
    P: Send + Sync,
    F: Fetcher<P>,
{
    type Output = F::Output;

    async fn fetch(&self, params: &P) -> Result<Self::Output, SupplyError> {
        match tokio::time::timeout(self.timeout, self.inner.fetch(params)).await {
            Ok(result) => result,
            Err(_) => Err(SupplyError::timeout(self.timeout)),
        }
    }

    fn ttl(&self) -> Duration {
        self.inner.ttl()
    }
}

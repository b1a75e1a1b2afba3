use super::errors::SupplyError;
use super::key::SupplyKey;
use super::lce::Lce;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

/// Where a supplied value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusSource {
    /// Fetched from the remote API by this producer
    Actual,
    /// Read back from the persisted store before the first fetch completed
    Cache,
    /// Configured default substituted after a failed fetch
    Fallback,
}

/// A value plus its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Supplied<V> {
    pub value: V,
    pub source: StatusSource,
    pub obtained_at: DateTime<Utc>,
}

impl<V> Supplied<V> {
    pub fn new(value: V, source: StatusSource) -> Self {
        Self {
            value,
            source,
            obtained_at: Utc::now(),
        }
    }
}

/// What subscribers observe for one key
pub type SupplyItem<V> = Lce<SupplyError, Supplied<V>>;

/// Subscriber handle on the shared stream of one key.
///
/// Every handle for a key reads the same underlying channel; a new handle starts at
/// the latest item and then sees every later one. Dropping a handle only drops that
/// subscription.
#[derive(Debug, Clone)]
pub struct SupplyStream<V> {
    key: SupplyKey,
    producer_id: Uuid,
    rx: watch::Receiver<SupplyItem<V>>,
}

impl<V> SupplyStream<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) const fn new(key: SupplyKey, producer_id: Uuid, rx: watch::Receiver<SupplyItem<V>>) -> Self {
        Self { key, producer_id, rx }
    }

    #[must_use]
    pub const fn key(&self) -> &SupplyKey {
        &self.key
    }

    #[must_use]
    pub const fn producer_id(&self) -> Uuid {
        self.producer_id
    }

    /// True when both handles observe the same producer's channel
    #[must_use]
    pub fn is_same_stream(&self, other: &Self) -> bool {
        self.rx.same_channel(&other.rx)
    }

    /// Latest item, without waiting
    #[must_use]
    pub fn current(&self) -> SupplyItem<V> {
        self.rx.borrow().clone()
    }

    /// Latest value if there is one
    #[must_use]
    pub fn value(&self) -> Option<V> {
        self.rx.borrow().content().map(|supplied| supplied.value.clone())
    }

    /// Wait for the next item after the one last seen by this handle
    ///
    /// # Errors
    ///
    /// Returns [`SupplyError::Cancelled`] once the producer is gone
    pub async fn changed(&mut self) -> Result<SupplyItem<V>, SupplyError> {
        self.rx.changed().await.map_err(|_| SupplyError::Cancelled)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the stream has left the loading state and return that item
    ///
    /// # Errors
    ///
    /// Returns [`SupplyError::Cancelled`] if the producer goes away while still loading
    pub async fn settled(&mut self) -> Result<SupplyItem<V>, SupplyError> {
        let item = self
            .rx
            .wait_for(|item| !item.is_loading())
            .await
            .map_err(|_| SupplyError::Cancelled)?;
        Ok(item.clone())
    }

    /// Adapt into a `futures::Stream` that yields the latest item first
    #[must_use]
    pub fn into_stream(self) -> WatchStream<SupplyItem<V>> {
        WatchStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn channel() -> (watch::Sender<SupplyItem<u32>>, SupplyStream<u32>) {
        let (tx, rx) = watch::channel(Lce::Loading);
        (tx, SupplyStream::new(SupplyKey::new("k"), Uuid::new_v4(), rx))
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_latest_only() {
        let (tx, stream) = channel();
        tx.send_replace(Lce::Content(Supplied::new(1, StatusSource::Actual)));
        tx.send_replace(Lce::Content(Supplied::new(2, StatusSource::Actual)));

        let late = stream.clone();
        assert_eq!(late.value(), Some(2));
        assert!(late.is_same_stream(&stream));

        let mut items = late.into_stream();
        let first = items.next().await.unwrap();
        assert_eq!(first.content().map(|s| s.value), Some(2));
    }

    #[tokio::test]
    async fn test_settled_waits_past_loading() {
        let (tx, mut stream) = channel();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.send_replace(Lce::Error(SupplyError::Decode("bad".to_string())));
            // keep the sender alive until the receiver has looked
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        let item = stream.settled().await.unwrap();
        assert!(matches!(item, Lce::Error(SupplyError::Decode(_))));
    }

    #[tokio::test]
    async fn test_closed_channel_reports_cancelled() {
        let (tx, mut stream) = channel();
        drop(tx);
        assert_eq!(stream.changed().await, Err(SupplyError::Cancelled));
    }
}

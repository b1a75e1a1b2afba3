/**
 * Error taxonomy shared by fetchers, producers and the pagination coordinator
 */
use super::key::SupplyKey;
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong while supplying a value.
///
/// Errors are `Clone` because a single failed fetch is handed to every caller that
/// joined the in-flight request and is also published on the shared stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupplyError {
    /// Network failure, HTTP error status or timeout
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// The upstream answered but returned nothing usable
    #[error("upstream returned nothing usable: {0}")]
    EmptyUpstream(String),

    /// `fetch_next` after the last page with no new request params
    #[error("end of pagination reached")]
    EndOfPagination,

    /// `fetch_next` before a successful `fetch_first`
    #[error("pagination state missing: fetch_first has not completed")]
    StateMissing,

    /// Request params were rejected before any remote call was made
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Refresh requested for a key that has no producer
    #[error("no producer for key {0}")]
    NotSupplied(SupplyKey),

    /// The owning store was shut down while the fetch was running
    #[error("fetch cancelled")]
    Cancelled,

    /// A batch update with the same operation id is still running
    #[error("update {0} is already in progress")]
    UpdateInProgress(String),

    /// The fetcher panicked
    #[error("internal error: {0}")]
    Internal(String),
}

impl SupplyError {
    /// Build the transport error used when a fetch exceeds its deadline
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Transport(format!("timed out after {}ms", after.as_millis()))
    }

    /// Terminal errors are not worth retrying
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::EndOfPagination | Self::StateMissing | Self::InvalidArguments(_) | Self::Cancelled
        )
    }
}

use super::errors::SupplyError;
use std::time::{Duration, Instant};

/// Bookkeeping for one producer: freshness, fetch status and the last failure.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub created_at: Instant,
    pub last_updated: Option<Instant>,
    pub last_accessed: Instant,
    pub ttl: Duration,
    pub fetch_status: FetchStatus,
    pub version: u64, // bumped on every accepted value
    pub fetch_count: u64,
    pub last_error: Option<SupplyError>,
    pub invalidated: bool, // cleared only by an accepted value
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
    Fresh,
    Stale,
    Error(String),
}

impl EntryMeta {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_updated: None,
            last_accessed: now,
            ttl,
            fetch_status: FetchStatus::Idle,
            version: 0,
            fetch_count: 0,
            last_error: None,
            invalidated: false,
        }
    }

    /// Entries that never received a value, or were invalidated since the last one,
    /// count as expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.invalidated || self.last_updated.is_none_or(|at| at.elapsed() > self.ttl)
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        !self.is_expired() && matches!(self.fetch_status, FetchStatus::Fresh)
    }

    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        self.last_updated.map(|at| at.elapsed())
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    pub fn mark_fetching(&mut self) {
        self.fetch_status = FetchStatus::Fetching;
        self.fetch_count += 1;
    }

    pub fn mark_updated(&mut self) {
        self.last_updated = Some(Instant::now());
        self.fetch_status = FetchStatus::Fresh;
        self.last_error = None;
        self.invalidated = false;
        self.version += 1;
    }

    pub fn mark_stale(&mut self) {
        self.fetch_status = FetchStatus::Stale;
        self.invalidated = true;
    }

    pub fn mark_error(&mut self, error: SupplyError) {
        self.fetch_status = FetchStatus::Error(error.to_string());
        self.last_error = Some(error);
    }

    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        if self.invalidated {
            return None;
        }
        let elapsed = self.last_updated?.elapsed();
        if elapsed < self.ttl {
            Some(self.ttl - elapsed)
        } else {
            None
        }
    }
}

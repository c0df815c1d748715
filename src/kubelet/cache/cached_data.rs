use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CachedData<T> {
    pub data: T,
    pub last_updated: Instant,
    pub ttl: Duration,
}

impl<T> CachedData<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self::stored_at(data, ttl, Instant::now())
    }

    pub const fn stored_at(data: T, ttl: Duration, last_updated: Instant) -> Self {
        Self {
            data,
            last_updated,
            ttl,
        }
    }

    /// Servable iff `now - last_updated < ttl`
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_updated) < self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    pub fn age(&self) -> Duration {
        self.last_updated.elapsed()
    }

    /// `None` once the entry is no longer servable
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.ttl.checked_sub(self.age()).filter(|left| !left.is_zero())
    }
}

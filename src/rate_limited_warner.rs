//! Rate limiting for repeated drop warnings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How often to emit warnings about dropped log records.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Helper that rate limits dropped-record warnings.
///
/// The caller increments the drop counter via [`record_drop`]. The next call to
/// [`warn_if_due`] emits a warning using the provided callback if the configured
/// interval has elapsed. [`flush`] emits a warning immediately if any records
/// have been dropped since the last emission.
///
/// [`record_drop`]: RateLimitedWarner::record_drop
/// [`warn_if_due`]: RateLimitedWarner::warn_if_due
/// [`flush`]: RateLimitedWarner::flush
pub struct RateLimitedWarner {
    origin: Instant,
    interval_ms: u64,
    /// Milliseconds since `origin` of the last warning, `u64::MAX` if none yet.
    last_warn: AtomicU64,
    dropped: AtomicU64,
    total_dropped: AtomicU64,
}

impl RateLimitedWarner {
    /// Create a warner whose first warning can be emitted immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            last_warn: AtomicU64::new(u64::MAX),
            dropped: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX - 1)
    }

    /// Increment the dropped-record counter.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.total_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of drops recorded over the warner's lifetime.
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    /// Emit a warning if the rate limit interval has elapsed.
    pub fn warn_if_due(&self, mut warn: impl FnMut(u64)) {
        let now = self.elapsed_ms();
        let prev = self.last_warn.load(Ordering::Relaxed);
        if prev == u64::MAX || now.saturating_sub(prev) >= self.interval_ms {
            let count = self.dropped.swap(0, Ordering::Relaxed);
            if count > 0 {
                warn(count);
                self.last_warn.store(now, Ordering::Relaxed);
            }
        }
    }

    /// Immediately warn about any dropped records.
    pub fn flush(&self, mut warn: impl FnMut(u64)) {
        let count = self.dropped.swap(0, Ordering::Relaxed);
        if count > 0 {
            warn(count);
            self.last_warn.store(self.elapsed_ms(), Ordering::Relaxed);
        }
    }
}

impl Default for RateLimitedWarner {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_INTERVAL)
    }
}

impl std::fmt::Debug for RateLimitedWarner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedWarner")
            .field("interval_ms", &self.interval_ms)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_first_warning_immediately() {
        let warner = RateLimitedWarner::default();
        let mut warnings = Vec::new();
        warner.record_drop();
        warner.warn_if_due(|c| warnings.push(c));
        assert_eq!(warnings, vec![1]);
    }

    #[test]
    fn rate_limits_subsequent_warnings() {
        let warner = RateLimitedWarner::default();
        let mut warnings = Vec::new();
        warner.record_drop();
        warner.warn_if_due(|c| warnings.push(c));
        warner.record_drop();
        warner.warn_if_due(|c| warnings.push(c));
        assert_eq!(warnings, vec![1]);
        assert_eq!(warner.total_dropped(), 2);
    }

    #[test]
    fn zero_interval_never_suppresses() {
        let warner = RateLimitedWarner::new(Duration::ZERO);
        let mut warnings = Vec::new();
        for _ in 0..3 {
            warner.record_drop();
            warner.warn_if_due(|c| warnings.push(c));
        }
        assert_eq!(warnings, vec![1, 1, 1]);
    }

    #[test]
    fn flush_emits_pending_warning() {
        let warner = RateLimitedWarner::default();
        let mut warnings = Vec::new();
        warner.record_drop();
        warner.flush(|c| warnings.push(c));
        warner.flush(|c| warnings.push(c));
        assert_eq!(warnings, vec![1]);
    }
}

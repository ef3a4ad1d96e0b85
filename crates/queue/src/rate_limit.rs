//! Per-sender hourly rate limiting.
//!
//! Sends are counted in fixed calendar-hour windows (UTC). Each window is one
//! counter keyed by sender and hour that expires at the end of its hour.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use fred::clients::Client as RedisClient;
use fred::interfaces::{KeysInterface, LuaInterface};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How many hour windows `next_available_time` looks ahead.
const LOOKAHEAD_HOURS: i64 = 24;

/// GET, compare, INCR and EXPIRE as one server-side step.
///
/// Returns the new count, or -1 when the window is already full.
const CHECK_AND_INCREMENT_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
  return -1
end
local count = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return count
";

/// Counter store error.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    /// The Redis command failed or Redis is unreachable.
    #[error("Redis error: {0}")]
    Redis(String),
}

/// Backing store for window counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for `key`, 0 when absent.
    async fn get(&self, key: &str) -> Result<u64, CounterStoreError>;

    /// Atomically increment `key` if its count is below `limit` and set its
    /// expiry to `ttl_secs`.
    ///
    /// Returns the new count, or `None` when the limit was already reached.
    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        ttl_secs: u64,
    ) -> Result<Option<u64>, CounterStoreError>;
}

/// Counters shared through Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    redis: Arc<RedisClient>,
}

impl RedisCounterStore {
    /// Create a new Redis counter store.
    #[must_use]
    pub const fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<u64, CounterStoreError> {
        let count: Option<u64> = self
            .redis
            .get(key)
            .await
            .map_err(|e| CounterStoreError::Redis(e.to_string()))?;
        Ok(count.unwrap_or(0))
    }

    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        ttl_secs: u64,
    ) -> Result<Option<u64>, CounterStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);

        let result: i64 = self
            .redis
            .eval(
                CHECK_AND_INCREMENT_SCRIPT,
                vec![key.to_string()],
                vec![limit, ttl],
            )
            .await
            .map_err(|e| CounterStoreError::Redis(e.to_string()))?;

        Ok(u64::try_from(result).ok())
    }
}

/// Counters kept in process memory.
///
/// Only meaningful for a single process.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryCounterStore {
    /// Create an empty counter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<u64, CounterStoreError> {
        let counters = self.counters.lock().await;
        let now = Instant::now();
        Ok(counters
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map_or(0, |(count, _)| *count))
    }

    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        ttl_secs: u64,
    ) -> Result<Option<u64>, CounterStoreError> {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();
        counters.retain(|_, (_, expires_at)| *expires_at > now);

        let current = counters.get(key).map_or(0, |(count, _)| *count);
        if current >= limit {
            return Ok(None);
        }

        let count = current + 1;
        let expires_at = now + std::time::Duration::from_secs(ttl_secs);
        counters.insert(key.to_string(), (count, expires_at));
        Ok(Some(count))
    }
}

/// Start of the calendar hour containing `at`.
fn hour_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let ts = at.timestamp();
    DateTime::from_timestamp(ts - ts.rem_euclid(3600), 0).unwrap_or(at)
}

/// Seconds left until the end of the hour containing `at`, at least 1.
fn seconds_left_in_hour(at: DateTime<Utc>) -> u64 {
    let elapsed = u64::from(at.minute() * 60 + at.second());
    3600u64.saturating_sub(elapsed).max(1)
}

/// Midnight (UTC) of the day after `at`.
fn next_midnight(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or_else(|| hour_start(at) + Duration::hours(LOOKAHEAD_HOURS), |d| d.and_utc())
}

/// Per-sender hourly send limiter.
///
/// Without a counter store, or when the store fails, the limiter lets
/// every send through.
#[derive(Clone)]
pub struct SenderRateLimiter {
    store: Option<Arc<dyn CounterStore>>,
    max_per_hour: u64,
    prefix: String,
}

impl SenderRateLimiter {
    /// Create a new limiter.
    #[must_use]
    pub fn new(store: Option<Arc<dyn CounterStore>>, max_per_hour: u64, prefix: &str) -> Self {
        Self {
            store,
            max_per_hour,
            prefix: prefix.to_string(),
        }
    }

    /// Counter key for `sender` in the hour containing `at`.
    #[must_use]
    pub fn window_key(&self, sender: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}:email_rate:{sender}:{}",
            self.prefix,
            at.format("%Y-%m-%d-%H")
        )
    }

    /// Consume one send from the sender's current window.
    ///
    /// Returns `false` without counting when the window is full.
    pub async fn check_and_increment(&self, sender: &str) -> bool {
        self.check_and_increment_at(sender, Utc::now()).await
    }

    /// [`Self::check_and_increment`] evaluated at `now`.
    pub async fn check_and_increment_at(&self, sender: &str, now: DateTime<Utc>) -> bool {
        let Some(store) = &self.store else {
            return true;
        };

        let key = self.window_key(sender, now);
        match store
            .increment_below(&key, self.max_per_hour, seconds_left_in_hour(now))
            .await
        {
            Ok(Some(count)) => {
                debug!(sender = %sender, count, limit = self.max_per_hour, "Send counted");
                true
            }
            Ok(None) => {
                debug!(sender = %sender, limit = self.max_per_hour, "Hourly send limit reached");
                false
            }
            Err(e) => {
                warn!(sender = %sender, error = %e, "Rate limit store unavailable, allowing send");
                true
            }
        }
    }

    /// Earliest time the sender may send again.
    pub async fn next_available_time(&self, sender: &str) -> DateTime<Utc> {
        self.next_available_time_at(sender, Utc::now()).await
    }

    /// [`Self::next_available_time`] evaluated at `now`.
    ///
    /// The current hour yields `now`, later hours yield their start. When all
    /// looked-at hours are full, the next midnight is returned.
    pub async fn next_available_time_at(&self, sender: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(store) = &self.store else {
            return now + Duration::seconds(1);
        };

        let first = hour_start(now);
        for offset in 0..LOOKAHEAD_HOURS {
            let window = first + Duration::hours(offset);
            let key = self.window_key(sender, window);

            match store.get(&key).await {
                Ok(count) if count < self.max_per_hour => {
                    return if offset == 0 { now } else { window };
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(sender = %sender, error = %e, "Rate limit store unavailable, retrying shortly");
                    return now + Duration::seconds(1);
                }
            }
        }

        next_midnight(now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<u64, CounterStoreError> {
            Err(CounterStoreError::Redis("connection refused".into()))
        }

        async fn increment_below(
            &self,
            _key: &str,
            _limit: u64,
            _ttl_secs: u64,
        ) -> Result<Option<u64>, CounterStoreError> {
            Err(CounterStoreError::Redis("connection refused".into()))
        }
    }

    fn limiter(max: u64) -> SenderRateLimiter {
        SenderRateLimiter::new(Some(Arc::new(MemoryCounterStore::new())), max, "test")
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_window_key_format() {
        let limiter = limiter(1);
        assert_eq!(
            limiter.window_key("a@example.com", at(9, 41, 7)),
            "test:email_rate:a@example.com:2025-03-14-09"
        );
    }

    #[test]
    fn test_seconds_left_in_hour() {
        assert_eq!(seconds_left_in_hour(at(9, 0, 0)), 3600);
        assert_eq!(seconds_left_in_hour(at(9, 30, 0)), 1800);
        assert_eq!(seconds_left_in_hour(at(9, 59, 59)), 1);
    }

    #[test]
    fn test_next_midnight() {
        assert_eq!(next_midnight(at(23, 59, 59)), Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_allows_up_to_limit() {
        let limiter = limiter(3);
        let now = at(10, 5, 0);
        for _ in 0..3 {
            assert!(limiter.check_and_increment_at("s@example.com", now).await);
        }
        assert!(!limiter.check_and_increment_at("s@example.com", now).await);
        // Other senders are counted separately
        assert!(limiter.check_and_increment_at("t@example.com", now).await);
    }

    #[tokio::test]
    async fn test_denied_check_does_not_count() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = SenderRateLimiter::new(Some(store.clone()), 1, "test");
        let now = at(10, 5, 0);

        assert!(limiter.check_and_increment_at("s@example.com", now).await);
        assert!(!limiter.check_and_increment_at("s@example.com", now).await);
        assert!(!limiter.check_and_increment_at("s@example.com", now).await);

        let key = limiter.window_key("s@example.com", now);
        assert_eq!(store.get(&key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_next_available_current_hour() {
        let limiter = limiter(2);
        let now = at(10, 5, 0);
        limiter.check_and_increment_at("s@example.com", now).await;
        assert_eq!(limiter.next_available_time_at("s@example.com", now).await, now);
    }

    #[tokio::test]
    async fn test_next_available_next_hour() {
        let limiter = limiter(1);
        let now = at(10, 5, 0);
        assert!(limiter.check_and_increment_at("s@example.com", now).await);
        assert_eq!(
            limiter.next_available_time_at("s@example.com", now).await,
            at(11, 0, 0)
        );
    }

    #[tokio::test]
    async fn test_next_available_skips_full_hours() {
        let limiter = limiter(1);
        let now = at(10, 5, 0);
        assert!(limiter.check_and_increment_at("s@example.com", now).await);
        assert!(limiter.check_and_increment_at("s@example.com", at(11, 0, 0)).await);
        assert_eq!(
            limiter.next_available_time_at("s@example.com", now).await,
            at(12, 0, 0)
        );
    }

    #[tokio::test]
    async fn test_next_available_all_full_falls_back_to_midnight() {
        let limiter = limiter(0);
        let now = at(10, 5, 0);
        assert!(!limiter.check_and_increment_at("s@example.com", now).await);
        assert_eq!(
            limiter.next_available_time_at("s@example.com", now).await,
            Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_permissive_without_store() {
        let limiter = SenderRateLimiter::new(None, 0, "test");
        let now = at(10, 5, 0);
        assert!(limiter.check_and_increment_at("s@example.com", now).await);
        assert_eq!(
            limiter.next_available_time_at("s@example.com", now).await,
            now + Duration::seconds(1)
        );
    }

    #[tokio::test]
    async fn test_permissive_on_store_error() {
        let limiter = SenderRateLimiter::new(Some(Arc::new(FailingStore)), 1, "test");
        let now = at(10, 5, 0);
        assert!(limiter.check_and_increment_at("s@example.com", now).await);
        assert_eq!(
            limiter.next_available_time_at("s@example.com", now).await,
            now + Duration::seconds(1)
        );
    }

    #[tokio::test]
    async fn test_memory_counter_expires() {
        tokio::time::pause();
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment_below("k", 1, 2).await.unwrap(), Some(1));
        assert_eq!(store.increment_below("k", 1, 2).await.unwrap(), None);

        tokio::time::advance(std::time::Duration::from_secs(3)).await;
        assert_eq!(store.get("k").await.unwrap(), 0);
        assert_eq!(store.increment_below("k", 1, 2).await.unwrap(), Some(1));
    }
}

// =============================================================================
// ratelimit.rs - per-client request limiting
// =============================================================================
//
// Two limiters behind one capability:
//
//   InMemoryRateLimiter  sliding 60-second window over a per-client deque.
//                        Right for single-instance deployments.
//   RedisRateLimiter     fixed one-minute window via INCR + EXPIRE. Right
//                        when multiple instances share a budget.
//
// The builder prefers Redis when a URL is configured and answers PING quickly,
// and degrades to in-memory with a warning otherwise. Runtime Redis failures
// also degrade open: losing the limiter should never take the API down.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use tracing::{info, warn};

const WINDOW_SECONDS: u64 = 60;
const REDIS_KEY_TTL_SECONDS: i64 = 65;
const REDIS_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Capability: admit or reject one request for a client id.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, client_id: &str) -> bool;
}

// =============================================================================
// In-memory sliding window
// =============================================================================

pub struct InMemoryRateLimiter {
    limit_per_minute: usize,
    events: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl InMemoryRateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute: limit_per_minute.max(1) as usize,
            events: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn allow(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let mut events = self.events.lock();
        let bucket = events.entry(client_id.to_string()).or_default();

        while let Some(front) = bucket.front() {
            if now.duration_since(*front).as_secs() >= WINDOW_SECONDS {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= self.limit_per_minute {
            return false;
        }
        bucket.push_back(now);
        true
    }
}

// =============================================================================
// Redis fixed window
// =============================================================================

pub struct RedisRateLimiter {
    manager: redis::aio::ConnectionManager,
    limit_per_minute: i64,
    prefix: String,
}

impl RedisRateLimiter {
    pub fn new(
        manager: redis::aio::ConnectionManager,
        limit_per_minute: u32,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            limit_per_minute: limit_per_minute.max(1) as i64,
            prefix: prefix.into(),
        }
    }

    fn current_window() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() / WINDOW_SECONDS)
            .unwrap_or(0)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, client_id: &str) -> bool {
        let key = format!("{}:{client_id}:{}", self.prefix, Self::current_window());
        let mut connection = self.manager.clone();

        let count: i64 = match connection.incr(&key, 1).await {
            Ok(count) => count,
            Err(err) => {
                // Degrade open: the limiter protects capacity, the API
                // protects users.
                warn!(error = %err, "redis rate limiter INCR failed; admitting request");
                return true;
            }
        };
        if count == 1 {
            let expired: Result<i64, _> = connection.expire(&key, REDIS_KEY_TTL_SECONDS).await;
            if let Err(err) = expired {
                warn!(error = %err, "redis rate limiter EXPIRE failed");
            }
        }
        count <= self.limit_per_minute
    }
}

/// Prefer Redis when it is configured and answers PING; fall back to the
/// in-memory limiter on any failure.
pub async fn build_rate_limiter(
    limit_per_minute: u32,
    redis_url: Option<&str>,
) -> Arc<dyn RateLimiter> {
    let Some(redis_url) = redis_url else {
        info!("using in-memory API rate limiter (REDIS_URL not configured)");
        return Arc::new(InMemoryRateLimiter::new(limit_per_minute));
    };

    match connect_redis(redis_url).await {
        Ok(manager) => {
            info!("using Redis-backed API rate limiter");
            Arc::new(RedisRateLimiter::new(
                manager,
                limit_per_minute,
                "immcad:ratelimit",
            ))
        }
        Err(err) => {
            warn!(error = %err, "redis rate limiter unavailable; falling back to in-memory limiter");
            Arc::new(InMemoryRateLimiter::new(limit_per_minute))
        }
    }
}

async fn connect_redis(redis_url: &str) -> Result<redis::aio::ConnectionManager, String> {
    let client = redis::Client::open(redis_url).map_err(|err| err.to_string())?;
    let manager = tokio::time::timeout(REDIS_PROBE_TIMEOUT, client.get_connection_manager())
        .await
        .map_err(|_| "connection timed out".to_string())?
        .map_err(|err| err.to_string())?;

    let mut probe = manager.clone();
    let pong: String = tokio::time::timeout(
        REDIS_PROBE_TIMEOUT,
        redis::cmd("PING").query_async(&mut probe),
    )
    .await
    .map_err(|_| "PING timed out".to_string())?
    .map_err(|err| err.to_string())?;
    if pong != "PONG" {
        return Err(format!("unexpected PING reply: {pong}"));
    }
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limit_of_one_admits_first_and_rejects_second() {
        let limiter = InMemoryRateLimiter::new(1);
        assert!(limiter.allow("client-a").await);
        assert!(!limiter.allow("client-a").await);
    }

    #[tokio::test]
    async fn clients_have_independent_buckets() {
        let limiter = InMemoryRateLimiter::new(1);
        assert!(limiter.allow("client-a").await);
        assert!(limiter.allow("client-b").await);
        assert!(!limiter.allow("client-a").await);
    }

    #[tokio::test]
    async fn limit_counts_within_the_window() {
        let limiter = InMemoryRateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.allow("client").await);
        }
        assert!(!limiter.allow("client").await);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_to_one() {
        let limiter = InMemoryRateLimiter::new(0);
        assert!(limiter.allow("client").await);
        assert!(!limiter.allow("client").await);
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back_to_in_memory() {
        // Nothing listens on this port; the builder must degrade.
        let limiter = build_rate_limiter(1, Some("redis://127.0.0.1:1/")).await;
        assert!(limiter.allow("client").await);
        assert!(!limiter.allow("client").await);
    }
}

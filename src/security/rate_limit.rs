//! Per-client token bucket rate limiting.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::http::error::ApiError;
use crate::observability::metrics;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Duration,
    last_seen: Duration,
}

impl TokenBucket {
    fn new(capacity: f64, now: Duration) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn try_acquire(&mut self, now: Duration, capacity: f64, refill_rate: f64) -> bool {
        // A clock step backwards refills nothing.
        let elapsed = now.saturating_sub(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = self.last_refill.max(now);
        self.last_seen = self.last_seen.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token bucket limiter keyed by client identity.
///
/// Each identity's bucket has its own mutex, so concurrent calls for one
/// client cannot double-spend a token while different clients never wait on
/// each other. `allow` keeps a shared guard on the bucket's map shard while
/// it takes the token; the sweeper needs that shard exclusively, so it can
/// never remove a bucket out from under an acquire.
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<TokenBucket>>,
    rate: f64,
    burst: f64,
    idle_ttl: Duration,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// `rate` tokens per second, at most `burst` tokens banked.
    pub fn new(rate: f64, burst: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            rate,
            burst: f64::from(burst),
            idle_ttl: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(180),
            clock,
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.requests_per_second, config.burst_size, clock)
            .with_idle_ttl(Duration::from_secs(config.idle_ttl_secs))
            .with_sweep_interval(Duration::from_secs(config.sweep_interval_secs))
    }

    /// Forget clients idle for longer than `ttl`.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// How often the sweeper looks for idle clients.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Take one token for `identity`. Returns false when none is available.
    ///
    /// A client seen for the first time starts with a full bucket.
    pub fn allow(&self, identity: &str) -> bool {
        let now = self.clock.now();
        let entry = match self.buckets.get(identity) {
            Some(entry) => entry,
            None => self
                .buckets
                .entry(identity.to_string())
                .or_insert_with(|| Mutex::new(TokenBucket::new(self.burst, now)))
                .downgrade(),
        };
        let mut bucket = entry.value().lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire(now, self.burst, self.rate)
    }

    /// Drop every client idle longer than the TTL. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        self.sweep(|_| {})
    }

    /// Remove idle buckets, handing each one to `on_evict` first.
    ///
    /// A bucket whose mutex is held is in use and kept.
    fn sweep(&self, mut on_evict: impl FnMut(&TokenBucket)) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        self.buckets.retain(|_, bucket| {
            let keep = match bucket.try_lock() {
                Ok(b) => {
                    let keep = now.saturating_sub(b.last_seen) <= self.idle_ttl;
                    if !keep {
                        on_evict(&*b);
                    }
                    keep
                }
                Err(TryLockError::WouldBlock) => true,
                Err(TryLockError::Poisoned(_)) => false,
            };
            if !keep {
                evicted += 1;
            }
            keep
        });

        metrics::record_tracked_identities(self.buckets.len());
        evicted
    }

    /// Number of clients currently holding a bucket.
    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) periodically until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::info!(
                interval_secs = limiter.sweep_interval.as_secs(),
                idle_ttl_secs = limiter.idle_ttl.as_secs(),
                "Rate limiter sweeper started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Rate limiter sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle();
                        if evicted > 0 {
                            tracing::debug!(
                                evicted,
                                remaining = limiter.tracked_identities(),
                                "Evicted idle clients"
                            );
                        }
                    }
                }
            }
        })
    }
}

/// Middleware keyed on the peer IP address.
///
/// A rejected request goes no further: no authentication, no handler, no
/// background work.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = addr.ip().to_string();

    if limiter.allow(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, "Rate limit exceeded");
        metrics::record_rate_limited();
        ApiError::TooManyRequests.into_response()
    }
}

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter as Governor,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DefaultKeyedStateStore,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AdmissionRejected;

type ClientLimiter<C> =
    Governor<String, DefaultKeyedStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Per-client token bucket: `per_second` tokens refill every second up to
/// `burst`. Buckets are created on first sight of a client.
pub struct RateLimiter<C = DefaultClock>
where
    C: Clock,
{
    limiter: ClientLimiter<C>,
    per_second: u32,
    burst: u32,
}

impl RateLimiter {
    pub fn new(per_second: u32, burst: u32) -> Self {
        Self::with_clock(per_second, burst, DefaultClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(per_second: u32, burst: u32, clock: C) -> Self {
        let replenish = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst_size = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(replenish).allow_burst(burst_size);

        Self {
            limiter: Governor::new(quota, DefaultKeyedStateStore::default(), clock),
            per_second: replenish.get(),
            burst: burst_size.get(),
        }
    }

    /// Spends one token for `client`. Returns false when the bucket is empty.
    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }

    /// Drops clients whose bucket has refilled completely and returns how many
    /// are still tracked.
    pub fn evict_idle(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        self.limiter.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }
}

/// Periodically evicts idle clients until `shutdown` fires.
pub fn spawn_eviction_task(
    limiter: Arc<RateLimiter>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let remaining = limiter.evict_idle();
                    tracing::debug!(remaining, "Evicted idle rate limit entries");
                }
            }
        }
    })
}

/// Identifies the caller: proxy headers first, then the peer address.
pub fn client_ip(req: &Request<Body>) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&req);

    if !limiter.check(&ip) {
        tracing::warn!(
            client = %ip,
            path = %req.uri().path(),
            per_second = limiter.per_second(),
            burst = limiter.burst(),
            "Rate limit exceeded"
        );
        return AdmissionRejected::RateLimit.into_response();
    }

    next.run(req).await
}

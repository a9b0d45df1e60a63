//! Per-IP rate limiting middleware.
//!
//! Each client IP gets a token bucket refilled at `requests_per_second` with
//! room for `burst_size` extra requests. The set of tracked IPs is bounded by
//! `max_entries`; a background janitor evicts IPs idle for longer than
//! `entry_ttl_secs`.
//!
//! X-Forwarded-For and X-Real-IP are only read when the connection comes
//! from an address listed in `trusted_proxies`:
//!
//! - Empty list (default): only the direct connection IP is used
//! - List of IPs/CIDRs: headers trusted only from those peers
//! - ["*"]: headers trusted from everyone

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::{DashMap, mapref::entry::Entry};
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState,
};
use ipnet::IpNet;
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use subarea_core::config::RateLimitConfig;

use crate::error::ErrorResponse;

type KeyedLimiter =
    RateLimiter<String, DashMap<String, InMemoryState>, DefaultClock, NoOpMiddleware>;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<RateLimitStateInner>>,
}

/// Evictions below this fraction of tracked entries don't rebuild the limiter.
const REBUILD_EVICTION_THRESHOLD_FRACTION: f64 = 0.10;

/// Evictions at or above this count always rebuild the limiter.
const REBUILD_EVICTION_MIN_COUNT: usize = 100;

/// Rebuild at least this often while evictions keep happening.
const REBUILD_MIN_INTERVAL: Duration = Duration::from_secs(300);

struct RateLimitStateInner {
    /// Rebuilt after large evictions; governor's map never shrinks on its own.
    limiter: RwLock<KeyedLimiter>,
    last_access: DashMap<String, Instant>,
    trusted_proxies: TrustedProxies,
    max_entries: u32,
    entry_ttl: Duration,
    connect_info_warned: AtomicBool,
    at_capacity_warned: AtomicBool,
    quota: Quota,
    last_rebuild: RwLock<Instant>,
}

#[derive(Clone, Debug)]
enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

#[derive(Clone, Debug)]
enum TrustedProxies {
    None,
    All,
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    fn from_config(proxies: &[String]) -> Self {
        if proxies.is_empty() {
            return Self::None;
        }
        if proxies.len() == 1 && proxies[0] == "*" {
            return Self::All;
        }

        let entries = proxies
            .iter()
            .filter_map(|p| {
                if p.contains('/') {
                    match p.parse::<IpNet>() {
                        Ok(net) => Some(TrustedEntry::Cidr(net)),
                        Err(e) => {
                            tracing::warn!(proxy = %p, error = %e, "invalid CIDR in trusted_proxies");
                            None
                        }
                    }
                } else {
                    match p.parse::<IpAddr>() {
                        Ok(ip) => Some(TrustedEntry::Ip(ip)),
                        Err(e) => {
                            tracing::warn!(proxy = %p, error = %e, "invalid IP in trusted_proxies");
                            None
                        }
                    }
                }
            })
            .collect();
        Self::List(entries)
    }

    fn is_trusted(&self, connection_ip: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(entries) => {
                let Ok(ip) = connection_ip.parse::<IpAddr>() else {
                    return false;
                };
                entries.iter().any(|entry| match entry {
                    TrustedEntry::Ip(trusted) => *trusted == ip,
                    TrustedEntry::Cidr(network) => network.contains(&ip),
                })
            }
        }
    }
}

impl RateLimitState {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }

        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            inner: Some(Arc::new(RateLimitStateInner {
                limiter: RwLock::new(RateLimiter::dashmap(quota)),
                last_access: DashMap::new(),
                trusted_proxies: TrustedProxies::from_config(&config.trusted_proxies),
                max_entries: config.max_entries,
                entry_ttl: config.entry_ttl(),
                connect_info_warned: AtomicBool::new(false),
                at_capacity_warned: AtomicBool::new(false),
                quota,
                last_rebuild: RwLock::new(Instant::now()),
            })),
        }
    }

    /// Check if a request from the given IP is allowed.
    pub fn check_ip(&self, ip: &str) -> Result<(), RateLimitError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        let now = Instant::now();
        let key = ip.to_string();

        // len() must not be called while holding an entry lock
        let current_len = inner.last_access.len();
        let at_capacity = current_len >= inner.max_entries as usize;

        match inner.last_access.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                if at_capacity {
                    Self::warn_at_capacity(&inner.at_capacity_warned, current_len, inner.max_entries);
                    return Err(RateLimitError {
                        retry_after_secs: inner.entry_ttl.as_secs().max(1),
                        reason: RateLimitReason::AtCapacity,
                    });
                }
                entry.insert(now);
            }
        }

        let limiter = inner.limiter.read().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter lock was poisoned, recovering");
            poisoned.into_inner()
        });
        match limiter.check_key(&key) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait_time =
                    not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
                Err(RateLimitError {
                    retry_after_secs: wait_time.as_secs() + 1,
                    reason: RateLimitReason::RateLimited,
                })
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Evict IPs idle for longer than the entry TTL. Returns how many were evicted.
    ///
    /// Large evictions also rebuild the governor limiter, since its internal
    /// map cannot drop keys.
    pub fn cleanup(&self) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };

        let now = Instant::now();
        let ttl = inner.entry_ttl;

        let stale: Vec<String> = inner
            .last_access
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in stale {
            // Re-check under the shard lock; the IP may have come back since.
            if inner
                .last_access
                .remove_if(&key, |_, last| now.duration_since(*last) > ttl)
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted == 0 {
            return 0;
        }

        let before = inner.last_access.len() + evicted;
        if Self::should_rebuild(evicted, before, &inner.last_rebuild, now) {
            Self::rebuild(inner);
            tracing::debug!(
                evicted,
                remaining = inner.last_access.len(),
                "rebuilt rate limiter after cleanup"
            );
        } else {
            tracing::trace!(
                evicted,
                remaining = inner.last_access.len(),
                "skipped rate limiter rebuild"
            );
        }

        inner.at_capacity_warned.store(false, Ordering::Relaxed);
        evicted
    }

    fn should_rebuild(
        evicted: usize,
        entries_before_eviction: usize,
        last_rebuild: &RwLock<Instant>,
        now: Instant,
    ) -> bool {
        let by_fraction =
            (entries_before_eviction as f64 * REBUILD_EVICTION_THRESHOLD_FRACTION) as usize;
        if evicted >= by_fraction.max(REBUILD_EVICTION_MIN_COUNT) {
            return true;
        }

        let last = last_rebuild.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        now.duration_since(*last) >= REBUILD_MIN_INTERVAL
    }

    /// Replace the limiter, resetting every bucket. Tracked IPs stay tracked.
    fn rebuild(inner: &RateLimitStateInner) {
        let fresh = RateLimiter::dashmap(inner.quota);
        *inner
            .limiter
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
        *inner
            .last_rebuild
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    /// Number of IPs currently tracked.
    pub fn entry_count(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.last_access.len())
    }

    fn warn_connect_info_missing(&self) {
        if let Some(inner) = &self.inner
            && !inner.connect_info_warned.swap(true, Ordering::Relaxed)
        {
            tracing::warn!(
                "ConnectInfo not available for rate limiting; all requests share the \
                 'unknown' bucket. Serve with into_make_service_with_connect_info::<SocketAddr>()."
            );
        }
    }

    /// Logged once per capacity event.
    fn warn_at_capacity(warned: &AtomicBool, current_entries: usize, max_entries: u32) {
        if !warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                current_entries,
                max_entries,
                "rate limiter at capacity, rejecting new IPs until cleanup"
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// The IP's bucket is empty.
    RateLimited,
    /// The table of tracked IPs is full.
    AtCapacity,
}

/// Error returned when a request is rejected.
#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after_secs: u64,
    pub reason: RateLimitReason,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let message = match self.reason {
            RateLimitReason::RateLimited => format!(
                "rate limit exceeded. retry after {} seconds.",
                self.retry_after_secs
            ),
            RateLimitReason::AtCapacity => "server is busy. retry later.".to_string(),
        };

        let status = StatusCode::TOO_MANY_REQUESTS;
        (
            status,
            [(RETRY_AFTER, self.retry_after_secs.to_string())],
            Json(ErrorResponse {
                code: status.as_u16(),
                message,
            }),
        )
            .into_response()
    }
}

fn extract_forwarded_ip(req: &Request<Body>) -> Option<String> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(ip) = s.split(',').next()
    {
        return Some(ip.trim().to_string());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(s) = real_ip.to_str()
    {
        return Some(s.trim().to_string());
    }

    None
}

fn extract_connection_ip(req: &Request<Body>) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}

/// Client IP of a request, honoring forwarded headers only from trusted proxies.
fn extract_ip(req: &Request<Body>, state: &RateLimitState) -> String {
    let Some(inner) = &state.inner else {
        return "unknown".to_string();
    };

    let connection_ip = extract_connection_ip(req);
    let trust_headers = match (&connection_ip, &inner.trusted_proxies) {
        (None, TrustedProxies::All) => true,
        (None, _) => false,
        (Some(conn_ip), trusted) => trusted.is_trusted(conn_ip),
    };

    if trust_headers && let Some(forwarded_ip) = extract_forwarded_ip(req) {
        return forwarded_ip;
    }

    match connection_ip {
        Some(ip) => ip,
        None => {
            state.warn_connect_info_missing();
            "unknown".to_string()
        }
    }
}

pub async fn ip_rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !rate_limit.is_enabled() {
        return next.run(req).await;
    }

    let ip = extract_ip(&req, &rate_limit);
    match rate_limit.check_ip(&ip) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            tracing::debug!(ip = %ip, reason = ?e.reason, "request rate limited");
            e.into_response()
        }
    }
}

/// Spawn the janitor that periodically evicts idle IPs.
pub fn spawn_cleanup_task(
    state: RateLimitState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = state.cleanup();
            if evicted > 0 {
                tracing::info!(evicted, "rate limiter evicted idle clients");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(requests_per_second: u32, burst_size: u32, max_entries: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second,
            burst_size,
            max_entries,
            ..Default::default()
        }
    }

    #[test]
    fn test_rate_limit_state_disabled() {
        let config = RateLimitConfig {
            enabled: false,
            ..Default::default()
        };
        let state = RateLimitState::new(&config);
        assert!(!state.is_enabled());
        for _ in 0..100 {
            assert!(state.check_ip("127.0.0.1").is_ok());
        }
        assert_eq!(state.entry_count(), 0);
    }

    #[test]
    fn test_burst_then_limited() {
        let state = RateLimitState::new(&enabled(1, 5, 1000));
        assert!(state.is_enabled());

        for _ in 0..5 {
            assert!(state.check_ip("127.0.0.1").is_ok());
        }

        let err = state.check_ip("127.0.0.1").unwrap_err();
        assert_eq!(err.reason, RateLimitReason::RateLimited);
        assert!(err.retry_after_secs >= 1);

        // Buckets are per IP
        assert!(state.check_ip("192.168.1.1").is_ok());
    }

    #[test]
    fn test_rate_limit_max_entries() {
        let state = RateLimitState::new(&enabled(10, 5, 3));

        assert!(state.check_ip("1.1.1.1").is_ok());
        assert!(state.check_ip("2.2.2.2").is_ok());
        assert!(state.check_ip("3.3.3.3").is_ok());

        let err = state.check_ip("4.4.4.4").unwrap_err();
        assert_eq!(err.reason, RateLimitReason::AtCapacity);

        assert!(state.check_ip("1.1.1.1").is_ok());
    }

    #[test]
    fn test_rate_limit_cleanup() {
        let config = RateLimitConfig {
            entry_ttl_secs: 0,
            ..enabled(10, 5, 1000)
        };
        let state = RateLimitState::new(&config);

        assert!(state.check_ip("1.1.1.1").is_ok());
        assert!(state.check_ip("2.2.2.2").is_ok());
        assert_eq!(state.entry_count(), 2);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(state.cleanup(), 2);
        assert_eq!(state.entry_count(), 0);

        // Capacity is freed for new IPs
        assert!(state.check_ip("3.3.3.3").is_ok());
    }

    #[test]
    fn test_should_rebuild_thresholds() {
        let now = Instant::now();
        let recent = RwLock::new(now);
        assert!(!RateLimitState::should_rebuild(5, 1000, &recent, now));
        assert!(RateLimitState::should_rebuild(100, 1000, &recent, now));
        assert!(RateLimitState::should_rebuild(200, 1000, &recent, now));

        let later = now + REBUILD_MIN_INTERVAL;
        assert!(RateLimitState::should_rebuild(1, 1000, &recent, later));
    }

    #[test]
    fn test_trusted_proxies_none() {
        let proxies = TrustedProxies::from_config(&[]);
        assert!(!proxies.is_trusted("127.0.0.1"));
        assert!(!proxies.is_trusted("10.0.0.1"));
    }

    #[test]
    fn test_trusted_proxies_all() {
        let proxies = TrustedProxies::from_config(&["*".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("anything"));
    }

    #[test]
    fn test_trusted_proxies_list() {
        let proxies = TrustedProxies::from_config(&[
            "127.0.0.1".to_string(),
            "10.0.0.0/8".to_string(),
            "not-an-ip".to_string(),
        ]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("10.255.255.255"));
        assert!(!proxies.is_trusted("192.168.1.1"));
        assert!(!proxies.is_trusted("11.0.0.1"));
    }

    #[test]
    fn test_forwarded_header_only_from_trusted_peer() {
        let config = RateLimitConfig {
            trusted_proxies: vec!["10.0.0.0/8".to_string()],
            ..enabled(10, 5, 1000)
        };
        let state = RateLimitState::new(&config);

        let request = |peer: &str| {
            let mut req = Request::builder()
                .uri("/")
                .header("x-forwarded-for", "203.0.113.7, 10.0.0.2")
                .body(Body::empty())
                .unwrap();
            let addr: SocketAddr = format!("{peer}:4000").parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
            req
        };

        assert_eq!(extract_ip(&request("10.1.2.3"), &state), "203.0.113.7");
        assert_eq!(extract_ip(&request("198.51.100.1"), &state), "198.51.100.1");
    }
}

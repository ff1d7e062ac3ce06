use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::{
    collections::VecDeque,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

/// Header a client without a request body uses to name its conversation.
pub const SESSION_ID_HEADER: &str = "x-session-id";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Sliding-log limiter: at most `limit` calls per key inside any trailing
/// `window`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    hits: DashMap<String, VecDeque<Instant>>,
}

pub type KeyedRateLimiter = Arc<SlidingWindowLimiter>;

/// Create a keyed limiter allowing `attempts` calls per `window_seconds`.
pub fn create_keyed_rate_limiter(attempts: u32, window_seconds: u64) -> KeyedRateLimiter {
    Arc::new(SlidingWindowLimiter::new(
        attempts,
        Duration::from_secs(window_seconds.max(1)),
    ))
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            hits: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a call for `key`, or return how long until one would be admitted.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) as of `now`.
    ///
    /// A rejected call is not logged, so hammering a full key does not push
    /// its recovery further out.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut entry = self.hits.entry(key.to_string()).or_default();
        let log = entry.value_mut();
        self.expire(log, now);

        if log.len() >= self.limit {
            let wait = log
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            return Err(wait);
        }

        log.push_back(now);
        Ok(())
    }

    fn expire(&self, log: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) < self.window {
                break;
            }
            log.pop_front();
        }
    }

    /// Forget keys with no call inside the window. Returns how many went.
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.hits.len();
        self.hits.retain(|_, log| {
            self.expire(log, now);
            !log.is_empty()
        });
        before.saturating_sub(self.hits.len())
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Seconds for a `Retry-After` header, rounded up so it is never zero.
pub fn retry_after_secs(wait: Duration) -> u64 {
    (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1)
}

/// Reverse proxies whose `x-forwarded-for` entries are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Arc<Vec<IpAddr>>);

impl TrustedProxies {
    pub fn new(proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(Arc::new(proxies.into_iter().collect()))
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Address of the caller.
///
/// This is the socket peer. Only when the peer is a trusted proxy is
/// `x-forwarded-for` consulted, and then the nearest hop that is not itself
/// a trusted proxy wins.
pub fn client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted: &TrustedProxies,
) -> Option<IpAddr> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())?;

    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let hops: Vec<IpAddr> = headers
        .get_all(FORWARDED_FOR_HEADER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect();

    Some(
        hops.into_iter()
            .rev()
            .find(|hop| !trusted.contains(hop))
            .unwrap_or(peer),
    )
}

/// Limiter key: the session token when the client sent one, else its address.
pub fn client_key(session_id: Option<&str>, ip: Option<IpAddr>) -> Option<String> {
    match session_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => Some(format!("session:{}", id)),
        None => ip.map(|ip| format!("ip:{}", ip)),
    }
}

/// State for [`keyed_rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: KeyedRateLimiter,
    pub trusted_proxies: TrustedProxies,
}

/// Middleware bounding calls per session header (or address) for routes
/// that carry no body.
pub async fn keyed_rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session_id = request
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok());
    let ip = client_ip(
        request.headers(),
        request.extensions(),
        &state.trusted_proxies,
    );

    match client_key(session_id, ip) {
        Some(key) => match state.limiter.check(&key) {
            Ok(()) => Ok(next.run(request).await),
            Err(wait) => {
                tracing::warn!(key = %key, "API rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests. Please try again later.".to_string(),
                    Some(retry_after_secs(wait)),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine client key for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn peer(ip: &str) -> Extensions {
        let mut extensions = Extensions::new();
        let addr = SocketAddr::new(ip.parse().unwrap(), 40_000);
        extensions.insert(ConnectInfo(addr));
        extensions
    }

    #[test]
    fn rejects_once_limit_reached() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at("session:a", t0).is_ok());
        }
        let wait = limiter.check_at("session:a", t0).unwrap_err();
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[test]
    fn stays_closed_for_the_whole_window() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(2));
        let t0 = Instant::now();

        assert!(limiter.check_at("k", t0).is_ok());
        assert!(limiter.check_at("k", t0).is_ok());
        assert!(limiter.check_at("k", t0).is_err());

        let midway = t0 + Duration::from_millis(1050);
        let wait = limiter.check_at("k", midway).unwrap_err();
        assert_eq!(wait, Duration::from_millis(950));

        assert!(limiter.check_at("k", t0 + Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn window_slides_per_call() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(limiter.check_at("k", t0).is_ok());
        assert!(limiter
            .check_at("k", t0 + Duration::from_secs(6))
            .is_ok());

        // Only the first call has aged out.
        assert!(limiter
            .check_at("k", t0 + Duration::from_secs(10))
            .is_ok());
        assert!(limiter
            .check_at("k", t0 + Duration::from_secs(11))
            .is_err());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = create_keyed_rate_limiter(1, 60);

        assert!(limiter.check("session:a").is_ok());
        assert!(limiter.check("session:a").is_err());
        assert!(limiter.check("session:b").is_ok());
    }

    #[test]
    fn prune_drops_quiet_keys() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(60));
        let t0 = Instant::now();
        limiter.check_at("old", t0).unwrap();
        limiter.check_at("recent", t0 + Duration::from_secs(50)).unwrap();

        assert_eq!(limiter.prune(t0 + Duration::from_secs(61)), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(2500)), 3);
        assert_eq!(retry_after_secs(Duration::from_secs(4)), 4);
    }

    #[test]
    fn client_key_prefers_session() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(client_key(Some("abc"), Some(ip)), Some("session:abc".to_string()));
        assert_eq!(client_key(Some("  "), Some(ip)), Some("ip:10.0.0.1".to_string()));
        assert_eq!(client_key(None, None), None);
    }

    #[test]
    fn forwarded_header_ignored_from_untrusted_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, "203.0.113.7".parse().unwrap());

        let ip = client_ip(&headers, &peer("198.51.100.1"), &TrustedProxies::default());
        assert_eq!(ip, Some("198.51.100.1".parse().unwrap()));

        assert_eq!(
            client_ip(&headers, &Extensions::new(), &TrustedProxies::default()),
            None
        );
    }

    #[test]
    fn forwarded_header_honoured_behind_trusted_proxy() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let trusted = TrustedProxies::new([proxy]);
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            "1.2.3.4, 203.0.113.7, 10.0.0.1".parse().unwrap(),
        );

        // The spoofable left-most entry loses to the hop the proxy appended.
        let ip = client_ip(&headers, &peer("10.0.0.1"), &trusted);
        assert_eq!(ip, Some("203.0.113.7".parse().unwrap()));

        let ip = client_ip(&HeaderMap::new(), &peer("10.0.0.1"), &trusted);
        assert_eq!(ip, Some(proxy));
    }

    #[tokio::test]
    async fn middleware_rejects_with_retry_after() {
        let state = RateLimitState {
            limiter: create_keyed_rate_limiter(1, 60),
            trusted_proxies: TrustedProxies::default(),
        };
        let app = Router::new()
            .route("/api/ping", get(|| async { "pong" }))
            .layer(from_fn_with_state(state, keyed_rate_limit_middleware));

        let request = || {
            HttpRequest::builder()
                .uri("/api/ping")
                .header(SESSION_ID_HEADER, "s1")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "60");
    }
}

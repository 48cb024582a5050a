//! Per-client submission quotas.
//!
//! Fixed windows keyed by `{action}:{client}`. With Redis configured the
//! counter is shared by every server process; otherwise, or whenever Redis
//! errors, a per-process map applies the same rule. The local map is lost on
//! restart. It exists to dampen abuse, not to enforce a hard quota.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::config::RateLimitPolicy;
use crate::limits::MAX_CLIENT_KEY_LEN;
use crate::observability;

const REDIS_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    VisitRequest,
    BuyRequest,
    MaintenanceRequest,
}

impl RateLimitAction {
    pub fn namespace(self) -> &'static str {
        match self {
            RateLimitAction::VisitRequest => "visit",
            RateLimitAction::BuyRequest => "buy",
            RateLimitAction::MaintenanceRequest => "maintenance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes.
    pub reset_after: Duration,
}

impl RateDecision {
    /// Whole seconds for a `Retry-After` header, at least 1.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs() + u64::from(self.reset_after.subsec_nanos() > 0);
        secs.max(1)
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate-limit backend error: {0}")]
    Backend(String),
    #[error("rate-limit backend timed out")]
    Timeout,
}

impl From<redis::RedisError> for RateLimitError {
    fn from(e: redis::RedisError) -> Self {
        RateLimitError::Backend(e.to_string())
    }
}

/// Atomic "count this attempt and tell me where the window stands".
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    async fn consume(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateDecision, RateLimitError>;

    fn name(&self) -> &'static str;
}

// ── In-process fallback ─────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    reset_at: Instant,
}

/// Per-process window counters. The DashMap entry lock makes each key's
/// read-modify-write atomic.
#[derive(Default)]
pub struct LocalWindows {
    counters: DashMap<String, WindowCounter>,
}

impl LocalWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume_now(&self, key: &str, policy: &RateLimitPolicy) -> RateDecision {
        let now = Instant::now();
        let limit = policy.capacity;
        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert(WindowCounter {
                count: 0,
                reset_at: now,
            });

        if counter.reset_at <= now {
            counter.count = 0;
            counter.reset_at = now + policy.window;
        }
        let reset_after = counter.reset_at - now;

        if counter.count < limit {
            counter.count += 1;
            RateDecision {
                allowed: true,
                limit,
                remaining: limit - counter.count,
                reset_after,
            }
        } else {
            RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_after,
            }
        }
    }

    /// Drop counters whose window has closed. Returns how many remain.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        self.counters.retain(|_, c| c.reset_at > now);
        self.counters.len()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl RateLimitBackend for LocalWindows {
    async fn consume(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateDecision, RateLimitError> {
        Ok(self.consume_now(key, policy))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ── Redis ───────────────────────────────────────────────────────

/// Shared fixed windows in Redis. `SET NX PX` opens the window, `INCR` counts,
/// `PTTL` reports what is left; all three run in one MULTI.
pub struct RedisWindows {
    client: redis::Client,
    prefix: String,
    conn: OnceCell<ConnectionManager>,
}

impl RedisWindows {
    pub fn new(url: &str, prefix: &str) -> Result<Self, RateLimitError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            prefix: prefix.to_string(),
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, RateLimitError> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }

    async fn consume_inner(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateDecision, RateLimitError> {
        let window_ms = policy.window.as_millis().max(1) as u64;
        let redis_key = format!("{}:{key}", self.prefix);
        let mut conn = self.connection().await?;
        let (count, pttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&redis_key)
            .arg(0)
            .arg("NX")
            .arg("PX")
            .arg(window_ms)
            .ignore()
            .cmd("INCR")
            .arg(&redis_key)
            .cmd("PTTL")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await?;
        Ok(decide(count, pttl, policy))
    }
}

/// Decision for a window whose counter reached `count` after this request.
/// A negative `pttl` (key without expiry) reports a full window.
fn decide(count: u64, pttl: i64, policy: &RateLimitPolicy) -> RateDecision {
    let limit = policy.capacity;
    let window_ms = policy.window.as_millis().max(1) as u64;
    let allowed = count <= u64::from(limit);
    RateDecision {
        allowed,
        limit,
        remaining: if allowed {
            (u64::from(limit) - count) as u32
        } else {
            0
        },
        reset_after: Duration::from_millis(u64::try_from(pttl).unwrap_or(window_ms)),
    }
}

#[async_trait]
impl RateLimitBackend for RedisWindows {
    async fn consume(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateDecision, RateLimitError> {
        tokio::time::timeout(REDIS_TIMEOUT, self.consume_inner(key, policy))
            .await
            .map_err(|_| RateLimitError::Timeout)?
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// ── Front door ──────────────────────────────────────────────────

pub struct RateLimiter {
    shared: Option<Arc<dyn RateLimitBackend>>,
    local: Arc<LocalWindows>,
    default_policy: RateLimitPolicy,
    policies: HashMap<RateLimitAction, RateLimitPolicy>,
}

impl RateLimiter {
    /// Local counters only.
    pub fn local(policy: RateLimitPolicy) -> Self {
        Self {
            shared: None,
            local: Arc::new(LocalWindows::new()),
            default_policy: policy,
            policies: HashMap::new(),
        }
    }

    /// Prefer `shared`; fall back to local counters when it errors.
    pub fn with_backend(shared: Arc<dyn RateLimitBackend>, policy: RateLimitPolicy) -> Self {
        Self {
            shared: Some(shared),
            ..Self::local(policy)
        }
    }

    pub fn with_policy(mut self, action: RateLimitAction, policy: RateLimitPolicy) -> Self {
        self.policies.insert(action, policy);
        self
    }

    pub fn policy(&self, action: RateLimitAction) -> RateLimitPolicy {
        self.policies
            .get(&action)
            .copied()
            .unwrap_or(self.default_policy)
    }

    pub fn local_windows(&self) -> Arc<LocalWindows> {
        self.local.clone()
    }

    pub fn backend_name(&self) -> &'static str {
        self.shared.as_ref().map_or("local", |b| b.name())
    }

    pub async fn check_and_consume(
        &self,
        action: RateLimitAction,
        client_key: &str,
    ) -> RateDecision {
        let policy = self.policy(action);
        let key = window_key(action, client_key);

        let decision = match &self.shared {
            Some(backend) => match backend.consume(&key, &policy).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(
                        action = action.namespace(),
                        "rate-limit fallback to local: {e}"
                    );
                    metrics::counter!(observability::RATE_LIMIT_FALLBACKS_TOTAL).increment(1);
                    self.local.consume_now(&key, &policy)
                }
            },
            None => self.local.consume_now(&key, &policy),
        };

        let outcome = if decision.allowed { "allowed" } else { "denied" };
        metrics::counter!(
            observability::RATE_LIMIT_DECISIONS_TOTAL,
            "action" => action.namespace(),
            "outcome" => outcome
        )
        .increment(1);
        if !decision.allowed {
            tracing::debug!(action = action.namespace(), client = client_key, "rate limited");
        }
        decision
    }
}

fn window_key(action: RateLimitAction, client_key: &str) -> String {
    let client: String = client_key.chars().take(MAX_CLIENT_KEY_LEN).collect();
    format!("rl:{}:{client}", action.namespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            capacity: 3,
            window: HOUR,
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl RateLimitBackend for BrokenBackend {
        async fn consume(
            &self,
            _key: &str,
            _policy: &RateLimitPolicy,
        ) -> Result<RateDecision, RateLimitError> {
            Err(RateLimitError::Backend("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_request_in_window_is_denied() {
        let limiter = RateLimiter::local(policy());
        let mut remaining = Vec::new();
        for _ in 0..3 {
            let d = limiter
                .check_and_consume(RateLimitAction::VisitRequest, "203.0.113.7")
                .await;
            assert!(d.allowed);
            assert_eq!(d.limit, 3);
            remaining.push(d.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter
            .check_and_consume(RateLimitAction::VisitRequest, "203.0.113.7")
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.limit, 3);
        assert_eq!(denied.reset_after, HOUR);
        assert_eq!(denied.retry_after_secs(), 3600);
    }

    #[tokio::test(start_paused = true)]
    async fn window_reset_restores_capacity() {
        let limiter = RateLimiter::local(policy());
        for _ in 0..4 {
            limiter
                .check_and_consume(RateLimitAction::VisitRequest, "c1")
                .await;
        }
        tokio::time::advance(Duration::from_secs(1800)).await;
        let still = limiter
            .check_and_consume(RateLimitAction::VisitRequest, "c1")
            .await;
        assert!(!still.allowed);
        assert_eq!(still.reset_after, Duration::from_secs(1800));

        tokio::time::advance(Duration::from_secs(1800)).await;
        let fresh = limiter
            .check_and_consume(RateLimitAction::VisitRequest, "c1")
            .await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn namespaces_and_clients_are_independent() {
        let limiter = RateLimiter::local(policy());
        for _ in 0..3 {
            limiter
                .check_and_consume(RateLimitAction::VisitRequest, "c1")
                .await;
        }
        assert!(
            !limiter
                .check_and_consume(RateLimitAction::VisitRequest, "c1")
                .await
                .allowed
        );
        assert!(
            limiter
                .check_and_consume(RateLimitAction::BuyRequest, "c1")
                .await
                .allowed
        );
        assert!(
            limiter
                .check_and_consume(RateLimitAction::MaintenanceRequest, "c1")
                .await
                .allowed
        );
        assert!(
            limiter
                .check_and_consume(RateLimitAction::VisitRequest, "c2")
                .await
                .allowed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn per_action_policy_override() {
        let limiter = RateLimiter::local(policy()).with_policy(
            RateLimitAction::BuyRequest,
            RateLimitPolicy {
                capacity: 1,
                window: Duration::from_secs(60),
            },
        );
        assert!(limiter.check_and_consume(RateLimitAction::BuyRequest, "c").await.allowed);
        let denied = limiter.check_and_consume(RateLimitAction::BuyRequest, "c").await;
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 1);
        assert_eq!(limiter.policy(RateLimitAction::VisitRequest).capacity, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_error_falls_back_to_local() {
        let limiter = RateLimiter::with_backend(Arc::new(BrokenBackend), policy());
        assert_eq!(limiter.backend_name(), "broken");
        let decisions: Vec<bool> = futures::future::join_all(
            (0..4).map(|_| limiter.check_and_consume(RateLimitAction::VisitRequest, "c")),
        )
        .await
        .into_iter()
        .map(|d| d.allowed)
        .collect();
        assert_eq!(decisions.iter().filter(|a| **a).count(), 3);
        assert_eq!(limiter.local_windows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_attempts_never_exceed_capacity() {
        let limiter = Arc::new(RateLimiter::local(policy()));
        let tasks = (0..32).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .check_and_consume(RateLimitAction::VisitRequest, "burst")
                    .await
                    .allowed
            })
        });
        let allowed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(allowed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_closed_windows() {
        let windows = LocalWindows::new();
        windows.consume_now("a", &policy());
        windows.consume_now(
            "b",
            &RateLimitPolicy {
                capacity: 3,
                window: Duration::from_secs(10),
            },
        );
        assert_eq!(windows.sweep(), 2);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(windows.sweep(), 1);
    }

    #[test]
    fn long_client_keys_are_truncated() {
        let key = window_key(RateLimitAction::VisitRequest, &"x".repeat(500));
        assert_eq!(key.len(), "rl:visit:".len() + MAX_CLIENT_KEY_LEN);
    }

    #[test]
    fn retry_after_rounds_up() {
        let d = RateDecision {
            allowed: false,
            limit: 3,
            remaining: 0,
            reset_after: Duration::from_millis(1500),
        };
        assert_eq!(d.retry_after_secs(), 2);
        let zero = RateDecision {
            reset_after: Duration::ZERO,
            ..d
        };
        assert_eq!(zero.retry_after_secs(), 1);
    }

    #[test]
    fn shared_counter_decisions() {
        let remaining: Vec<(bool, u32)> = (1..=4)
            .map(|count| decide(count, 3_599_000, &policy()))
            .map(|d| (d.allowed, d.remaining))
            .collect();
        assert_eq!(remaining, vec![(true, 2), (true, 1), (true, 0), (false, 0)]);

        let denied = decide(4, 1_500, &policy());
        assert_eq!(denied.limit, 3);
        assert_eq!(denied.retry_after_secs(), 2);
    }

    #[test]
    fn shared_counter_with_zero_capacity_always_denies() {
        let closed = RateLimitPolicy {
            capacity: 0,
            window: HOUR,
        };
        let d = decide(1, 3_600_000, &closed);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
    }

    #[test]
    fn key_without_expiry_reports_full_window() {
        let d = decide(1, -1, &policy());
        assert!(d.allowed);
        assert_eq!(d.reset_after, HOUR);
    }
}

use crate::token::SessionToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct RateLimiterInner {
    /// Last accepted click per session token
    by_token: HashMap<SessionToken, Instant>,
    /// Last accepted click per client address
    by_addr: HashMap<IpAddr, Instant>,
}

impl RateLimiterInner {
    fn too_recent(last: Option<&Instant>, now: Instant, min_interval: Duration) -> bool {
        last.is_some_and(|&last| now.saturating_duration_since(last) < min_interval)
    }

    fn cleanup_idle(&mut self, now: Instant, idle: Duration) -> usize {
        let before = self.by_token.len() + self.by_addr.len();
        self.by_token
            .retain(|_, last| now.saturating_duration_since(*last) <= idle);
        self.by_addr
            .retain(|_, last| now.saturating_duration_since(*last) <= idle);
        before - (self.by_token.len() + self.by_addr.len())
    }
}

/// Enforces a minimum spacing between accepted clicks, tracked
/// independently per session token and per client address.
///
/// Checking does not record anything: the gateway calls
/// [`record`](Self::record) only after the click was actually counted, so
/// the tables reflect accepted clicks only.
#[derive(Clone, Debug)]
pub struct ClickRateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    min_interval: Duration,
}

impl ClickRateLimiter {
    /// A zero interval disables limiting
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner::default())),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Whether a click for `token` from `addr` at `now` is outside both windows
    pub fn admit(&self, token: &SessionToken, addr: IpAddr, now: Instant) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }

        let inner = self.inner.lock();
        if RateLimiterInner::too_recent(inner.by_token.get(token), now, self.min_interval) {
            trace!(%token, "Token clicked too often");
            return false;
        }
        if RateLimiterInner::too_recent(inner.by_addr.get(&addr), now, self.min_interval) {
            trace!(%addr, "Address clicked too often");
            return false;
        }

        true
    }

    /// Remember an accepted click
    pub fn record(&self, token: &SessionToken, addr: IpAddr, now: Instant) {
        let mut inner = self.inner.lock();
        inner.by_token.insert(*token, now);
        inner.by_addr.insert(addr, now);
    }

    /// Drop entries that have not clicked for longer than `idle`
    pub fn cleanup_idle(&self, now: Instant, idle: Duration) -> usize {
        // An entry younger than the window still matters for admission.
        let idle = idle.max(self.min_interval);
        self.inner.lock().cleanup_idle(now, idle)
    }

    /// Number of tracked (tokens, addresses)
    pub fn tracked(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.by_token.len(), inner.by_addr.len())
    }

    /// Start the background cleanup task.
    /// This must be called from within a tokio runtime.
    pub fn start_cleanup_task(&self, idle: Duration) {
        let limiter = self.clone();
        let period = idle.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = limiter.cleanup_idle(Instant::now(), idle);
                if removed > 0 {
                    debug!(removed, "Purged idle rate-limit entries");
                }
            }
        });
    }
}

//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use openaero_market::{Actor, FeatureFlags, PaymentReconciler, ReviewNotifier};
use openaero_storage::MarketStorage;
use tokio::sync::Mutex;

use super::RATE_LIMIT_WINDOW_SECS;

/// Per-IP request counts: (request count, window start time).
struct IpTracker {
    windows: HashMap<IpAddr, (u64, Instant)>,
    last_sweep: Instant,
}

/// In-memory per-IP rate limiter over a fixed window.
///
/// Expired windows are dropped at most once per window, so addresses that
/// stop sending do not accumulate.
pub(crate) struct RateLimiter {
    tracker: Mutex<IpTracker>,
    pub(crate) max_requests: u64,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self {
            tracker: Mutex::new(IpTracker {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_requests,
        }
    }

    /// Ok(()) if allowed, Err(retry_after_secs) if limited.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let window = Duration::from_secs(RATE_LIMIT_WINDOW_SECS);
        let mut tracker = self.tracker.lock().await;

        if now.duration_since(tracker.last_sweep) >= window {
            tracker
                .windows
                .retain(|_, (_, start)| now.duration_since(*start) < window);
            tracker.last_sweep = now;
        }

        let entry = tracker.windows.entry(ip).or_insert((0, now));

        let elapsed = now.duration_since(entry.1).as_secs();
        if elapsed >= RATE_LIMIT_WINDOW_SECS {
            entry.0 = 0;
            entry.1 = now;
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            Err(RATE_LIMIT_WINDOW_SECS.saturating_sub(elapsed))
        } else {
            Ok(())
        }
    }
}

/// Shared across request handlers.
pub(crate) struct AppState<S: MarketStorage> {
    pub(crate) storage: Arc<S>,
    pub(crate) reconciler: PaymentReconciler<S>,
    pub(crate) flags: FeatureFlags,
    pub(crate) notifier: Arc<dyn ReviewNotifier>,
    pub(crate) rate_limiter: RateLimiter,
    /// API token to caller.
    pub(crate) tokens: HashMap<String, Actor>,
}

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::order_number::OrderNumber;

struct Window {
    started: Instant,
    seen: HashSet<OrderNumber>,
}

/// Fixed-window budget of distinct orders. Repeated requests for an order already
/// admitted in the current window are free.
#[derive(Clone)]
pub struct OrderRateLimiter {
    limit: usize,
    period: Duration,
    clock: Arc<dyn Clock>,
    window: Arc<Mutex<Window>>,
}

impl OrderRateLimiter {
    pub fn new(limit: usize, period: Duration, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            limit,
            period,
            clock,
            window: Arc::new(Mutex::new(Window {
                started,
                seen: HashSet::new(),
            })),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Admits the order or returns how long the caller has to wait for the next window.
    pub fn check(&self, order: OrderNumber) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut window = self.window.lock();
        if now.duration_since(window.started) >= self.period {
            window.started = now;
            window.seen.clear();
        }
        if window.seen.contains(&order) {
            return Ok(());
        }
        if window.seen.len() >= self.limit {
            let retry_after = (window.started + self.period).saturating_duration_since(now);
            return Err(retry_after.max(Duration::from_secs(1)));
        }
        window.seen.insert(order);
        Ok(())
    }
}

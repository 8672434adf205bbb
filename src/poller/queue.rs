use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::order_number::OrderNumber;

/// Exponential backoff capped at `ceiling`, with up to `jitter` of extra random delay.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub ceiling: Duration,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exp).min(self.ceiling);
        if self.jitter > 0.0 {
            delay.mul_f64(1.0 + fastrand::f64() * self.jitter)
        } else {
            delay
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    /// Consecutive failed attempts since the order last made progress.
    pub attempts: u32,
    pub next_eligible: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkout {
    Ready(OrderNumber),
    /// Dispatch is suspended pool-wide until the given instant.
    Paused(Instant),
    /// Nothing is eligible; the earliest scheduled entry, if any.
    Idle(Option<Instant>),
}

/// Retry schedule for every order the poller knows about, plus the pool-wide pause.
///
/// All scheduling decisions take `now` explicitly so the queue never reads a clock.
/// An order is either waiting here or checked out by exactly one worker.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    entries: HashMap<OrderNumber, QueueEntry>,
    in_flight: HashSet<OrderNumber>,
    paused_until: Option<Instant>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an order eligible right away. Known orders keep their current schedule.
    pub fn offer(&mut self, order: OrderNumber, now: Instant) -> bool {
        if self.entries.contains_key(&order) || self.in_flight.contains(&order) {
            return false;
        }
        self.entries.insert(
            order,
            QueueEntry {
                attempts: 0,
                next_eligible: now,
            },
        );
        true
    }

    pub fn checkout(&mut self, now: Instant) -> Checkout {
        if let Some(until) = self.paused_until {
            if until > now {
                return Checkout::Paused(until);
            }
            self.paused_until = None;
        }
        let next = self
            .entries
            .iter()
            .filter(|(order, _)| !self.in_flight.contains(*order))
            .min_by_key(|(order, entry)| (entry.next_eligible, **order))
            .map(|(order, entry)| (*order, entry.next_eligible));
        match next {
            Some((order, at)) if at <= now => {
                self.in_flight.insert(order);
                Checkout::Ready(order)
            }
            Some((_, at)) => Checkout::Idle(Some(at)),
            None => Checkout::Idle(None),
        }
    }

    /// The order reached a terminal state; forget it.
    pub fn complete(&mut self, order: OrderNumber) {
        self.in_flight.remove(&order);
        self.entries.remove(&order);
    }

    /// The order made progress; poll it again at `at` with a clean retry count.
    pub fn reschedule(&mut self, order: OrderNumber, at: Instant) {
        self.in_flight.remove(&order);
        self.entries.insert(
            order,
            QueueEntry {
                attempts: 0,
                next_eligible: at,
            },
        );
    }

    /// The attempt failed; push the order back by the next backoff step.
    pub fn retry(&mut self, order: OrderNumber, now: Instant, backoff: &Backoff) -> Duration {
        self.in_flight.remove(&order);
        let entry = self.entries.entry(order).or_insert(QueueEntry {
            attempts: 0,
            next_eligible: now,
        });
        entry.attempts = entry.attempts.saturating_add(1);
        let delay = backoff.delay(entry.attempts);
        entry.next_eligible = now + delay;
        delay
    }

    /// Returns a checked out order untouched, eligible again from `at`.
    pub fn release(&mut self, order: OrderNumber, at: Instant) {
        self.in_flight.remove(&order);
        if let Some(entry) = self.entries.get_mut(&order) {
            entry.next_eligible = entry.next_eligible.max(at);
        }
    }

    /// Suspends every checkout until `until`. Never shortens a pause already in force.
    pub fn pause_until(&mut self, until: Instant) {
        self.paused_until = Some(self.paused_until.map_or(until, |current| current.max(until)));
    }

    pub fn paused_until(&self) -> Option<Instant> {
        self.paused_until
    }

    pub fn entry(&self, order: OrderNumber) -> Option<QueueEntry> {
        self.entries.get(&order).copied()
    }

    pub fn is_in_flight(&self, order: OrderNumber) -> bool {
        self.in_flight.contains(&order)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

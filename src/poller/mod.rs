//! Accrual poller.
//!
//! A fixed pool of workers drives every pending order to a terminal state by asking the
//! accrual service about it. A refresh task periodically pulls pending orders from the
//! ledger into a shared [`DispatchQueue`]; workers check orders out of it one at a time,
//! so no order is ever queried by two workers at once. When the service throttles us,
//! the queue is paused for everyone, not just the worker that got the answer.
//!
//! Shutdown is cooperative: once the shutdown signal flips, workers finish the order
//! they hold (query and ledger write included) and stop taking new ones.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, sleep_until};
use tracing::{debug, error, info, warn};

use crate::accrual::{AccrualClient, AccrualReply};
use crate::clock::Clock;
use crate::database::{Ledger, LedgerError, Resolution, Settlement};
use crate::order_number::OrderNumber;

pub mod queue;

pub use queue::{Backoff, Checkout, DispatchQueue, QueueEntry};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub workers: usize,
    /// How often the ledger is scanned for pending orders, and how long an order the
    /// service is still working on waits before being asked about again.
    pub poll_interval: Duration,
    /// Upper bound on orders pulled from the ledger per scan. Consecutive scans page
    /// through the pending set, so orders past the first batch are reached too.
    pub batch_size: usize,
    pub backoff: Backoff,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            poll_interval: Duration::from_secs(1),
            batch_size: 1000,
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Error)]
enum ApplyError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("ledger task failed: {0}")]
    Join(#[from] JoinError),
}

struct Shared {
    config: PollerConfig,
    ledger: Arc<dyn Ledger>,
    client: Arc<dyn AccrualClient>,
    clock: Arc<dyn Clock>,
    queue: Mutex<DispatchQueue>,
    wakeup: Notify,
}

pub struct Poller {
    shared: Arc<Shared>,
}

impl Poller {
    pub fn new(
        config: PollerConfig,
        ledger: Arc<dyn Ledger>,
        client: Arc<dyn AccrualClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                ledger,
                client,
                clock,
                queue: Mutex::new(DispatchQueue::new()),
                wakeup: Notify::new(),
            }),
        }
    }

    /// Runs until `shutdown` turns `true` (or its sender goes away).
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let workers = self.shared.config.workers.max(1);
        info!(workers, poll_interval = ?self.shared.config.poll_interval, "accrual poller started");

        let mut tasks = JoinSet::new();
        tasks.spawn(refresh_loop(self.shared.clone(), shutdown.clone()));
        for id in 0..workers {
            tasks.spawn(worker_loop(self.shared.clone(), id, shutdown.clone()));
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "poller task failed");
            }
        }
        info!("accrual poller stopped");
    }
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

async fn refresh_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let batch_size = shared.config.batch_size.max(1);
    // last order number seen on the previous page; None starts over from the lowest
    let mut cursor: Option<OrderNumber> = None;
    while !is_shutdown(&shutdown) {
        let after = cursor;
        match shared.ledger_call(move |ledger| ledger.pending_orders(after, batch_size)).await {
            Ok(pending) => {
                cursor = if pending.len() < batch_size { None } else { pending.last().copied() };
                let now = shared.clock.now();
                let added = {
                    let mut queue = shared.queue.lock();
                    pending.into_iter().filter(|order| queue.offer(*order, now)).count()
                };
                if added > 0 {
                    debug!(added, "pending orders queued");
                    shared.wakeup.notify_waiters();
                }
            }
            Err(e) => error!(error = %e, "failed to load pending orders"),
        }

        tokio::select! {
            biased;
            res = shutdown.changed() => if res.is_err() { break },
            _ = sleep(shared.config.poll_interval) => {}
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, id: usize, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = id, "worker started");
    while !is_shutdown(&shutdown) {
        // registered before looking at the queue so an offer made in between still wakes us
        let notified = shared.wakeup.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let now = shared.clock.now();
        let checkout = shared.queue.lock().checkout(now);
        let wake_at = match checkout {
            Checkout::Ready(order) => {
                shared.resolve(order).await;
                continue;
            }
            Checkout::Paused(until) => until,
            Checkout::Idle(next) => next
                .unwrap_or(now + shared.config.poll_interval)
                .min(now + shared.config.poll_interval),
        };
        tokio::select! {
            biased;
            res = shutdown.changed() => if res.is_err() { break },
            _ = notified => {}
            _ = sleep_until(wake_at) => {}
        }
    }
    debug!(worker = id, "worker stopped");
}

impl Shared {
    async fn ledger_call<T, F>(&self, f: F) -> Result<T, ApplyError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Ledger) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        Ok(tokio::task::spawn_blocking(move || f(ledger.as_ref())).await??)
    }

    async fn resolve(&self, order: OrderNumber) {
        let reply = self.client.query(order).await;
        let now = self.clock.now();
        match reply {
            Ok(AccrualReply::Processed(accrual)) => self.settle(order, Resolution::Processed(accrual)).await,
            Ok(AccrualReply::Invalid) => self.settle(order, Resolution::Invalid).await,
            Ok(AccrualReply::Registered | AccrualReply::Processing) => {
                match self.ledger_call(move |ledger| ledger.mark_processing(order)).await {
                    Ok(()) => self.queue.lock().reschedule(order, now + self.config.poll_interval),
                    Err(e) => {
                        let delay = self.retry_later(order);
                        error!(%order, error = %e, ?delay, "failed to mark order as processing");
                    }
                }
            }
            Ok(AccrualReply::Unknown) => {
                let delay = self.queue.lock().retry(order, now, &self.config.backoff);
                debug!(%order, ?delay, "order not known to the accrual service yet");
            }
            Ok(AccrualReply::RateLimited(retry_after)) => {
                let until = now + retry_after;
                {
                    let mut queue = self.queue.lock();
                    queue.pause_until(until);
                    queue.release(order, until);
                }
                warn!(%order, ?retry_after, "accrual service rate limit hit, pausing dispatch");
            }
            Err(e) => {
                let delay = self.retry_later(order);
                warn!(%order, error = %e, ?delay, "accrual query failed, will retry");
            }
        }
    }

    async fn settle(&self, order: OrderNumber, resolution: Resolution) {
        match self.ledger_call(move |ledger| ledger.settle(order, resolution)).await {
            Ok(Settlement::Applied) => {
                match resolution {
                    Resolution::Processed(accrual) => info!(%order, %accrual, "order processed, balance credited"),
                    Resolution::Invalid => info!(%order, "order invalid"),
                }
                self.queue.lock().complete(order);
            }
            Ok(Settlement::AlreadySettled(status)) => {
                debug!(%order, %status, "order already settled");
                self.queue.lock().complete(order);
            }
            Err(e) => {
                let delay = self.retry_later(order);
                error!(%order, error = %e, ?delay, "failed to settle order");
            }
        }
    }

    fn retry_later(&self, order: OrderNumber) -> Duration {
        self.queue.lock().retry(order, self.clock.now(), &self.config.backoff)
    }
}

//! Periodic reconciliation of pending orders.
//!
//! Each tick lists the pending orders and reconciles them concurrently, one
//! task per order. A failure is confined to its own order: it is logged and
//! the order is picked up again on a later tick.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accrual::OracleError;
use crate::config::ConfigError;
use crate::ledger::{OrderService, ReconcileError};
use crate::model::Order;

/// Bounds of the randomized pause between two ticks.
///
/// Randomizing keeps several instances from polling the accrual service in
/// lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval {
    min: Duration,
    max: Duration,
}

impl PollInterval {
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if max.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if min > max {
            return Err(ConfigError::InvalidPollInterval(min, max));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw the next pause uniformly from `min..=max`.
    pub fn sample(&self) -> Duration {
        rand::rng().random_range(self.min..=self.max)
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(7),
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Orders found pending at the start of the tick
    pub pending: usize,
    /// Orders whose status changed
    pub updated: usize,
    /// Orders the accrual service had nothing new for
    pub unchanged: usize,
    /// Orders that failed and will be retried on a later tick
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Updated,
    Unchanged,
    Failed,
}

/// Reconcile every pending order once, concurrently.
///
/// Waits for all per-order tasks. A panicking task counts as failed.
pub async fn run_tick(orders: &Arc<OrderService>) -> TickReport {
    let pending = match orders.list_pending_orders().await {
        Ok(pending) => pending,
        Err(e) => {
            error!(reason = %e, "failed to list pending orders");
            return TickReport::default();
        }
    };

    let mut report = TickReport {
        pending: pending.len(),
        ..TickReport::default()
    };

    let mut tasks = JoinSet::new();
    for order in pending {
        let orders = Arc::clone(orders);
        tasks.spawn(async move {
            let result = orders.reconcile_order(&order.number).await;
            settle(&order, &result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Outcome::Updated) => report.updated += 1,
            Ok(Outcome::Unchanged) => report.unchanged += 1,
            Ok(Outcome::Failed) => report.failed += 1,
            Err(e) => {
                error!(reason = %e, "reconciliation task aborted");
                report.failed += 1;
            }
        }
    }

    report
}

/// Log the result of reconciling one order and classify it.
fn settle(order: &Order, result: &Result<Order, ReconcileError>) -> Outcome {
    let number = order.number.as_str();
    match result {
        Ok(updated) => {
            info!(
                number,
                owner = updated.owner,
                status = %updated.status,
                reward = ?updated.reward,
                "order reconciled"
            );
            Outcome::Updated
        }
        Err(ReconcileError::NoChange(_, status)) => {
            debug!(number, %status, "order status not updated yet");
            Outcome::Unchanged
        }
        Err(ReconcileError::Oracle(OracleError::NotRegistered(_))) => {
            warn!(number, "order not registered in the accrual system yet");
            Outcome::Failed
        }
        Err(e @ (ReconcileError::NoOrders(_) | ReconcileError::BalanceOverflow(..))) => {
            error!(number, reason = %e, "order cannot be reconciled");
            Outcome::Failed
        }
        Err(e) => {
            warn!(number, reason = %e, "reconciliation failed, retrying next tick");
            Outcome::Failed
        }
    }
}

/// Drives [`run_tick`] at randomized intervals until shut down.
pub struct ReconciliationScheduler {
    orders: Arc<OrderService>,
    interval: PollInterval,
}

impl ReconciliationScheduler {
    pub fn new(orders: Arc<OrderService>, interval: PollInterval) -> Self {
        Self { orders, interval }
    }

    /// Main loop. Returns the number of ticks run.
    ///
    /// Cancellation is only observed between ticks, so a tick in flight
    /// always finishes its transactions before this returns.
    pub async fn run(self, shutdown: CancellationToken) -> usize {
        info!(
            min = ?self.interval.min(),
            max = ?self.interval.max(),
            "reconciliation scheduler started"
        );

        let mut ticks = 0;
        loop {
            let pause = self.interval.sample();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(ticks, "reconciliation scheduler stopped");
                    return ticks;
                }
                _ = tokio::time::sleep(pause) => {}
            }

            let report = run_tick(&self.orders).await;
            ticks += 1;
            if report.pending > 0 {
                info!(
                    pending = report.pending,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    failed = report.failed,
                    "reconciliation tick finished"
                );
            } else {
                debug!("no pending orders");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::accrual::{AccrualReport, AccrualState, ScriptedOracle};
    use crate::model::OrderStatus;
    use crate::store::{LedgerStore, MemoryStore};
    use chrono::Utc;

    async fn setup(numbers: &[&str]) -> (Arc<OrderService>, Arc<MemoryStore>, Arc<ScriptedOracle>) {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(ScriptedOracle::new());
        let orders = Arc::new(OrderService::new(store.clone(), oracle.clone()));
        for number in numbers {
            orders.admit_order(number, 1, Utc::now()).await.unwrap();
        }
        (orders, store, oracle)
    }

    #[test]
    fn poll_interval_validation() {
        let secs = Duration::from_secs;
        assert!(PollInterval::new(secs(2), secs(7)).is_ok());
        assert!(PollInterval::new(secs(3), secs(3)).is_ok());
        assert!(matches!(
            PollInterval::new(secs(7), secs(2)),
            Err(ConfigError::InvalidPollInterval(..))
        ));
        assert!(matches!(
            PollInterval::new(Duration::ZERO, Duration::ZERO),
            Err(ConfigError::ZeroPollInterval)
        ));
    }

    #[test]
    fn poll_interval_samples_within_bounds() {
        let interval = PollInterval::default();
        for _ in 0..100 {
            let pause = interval.sample();
            assert!(pause >= Duration::from_secs(2) && pause <= Duration::from_secs(7));
        }
    }

    #[tokio::test]
    async fn tick_without_pending_orders_is_empty() {
        let (orders, _, oracle) = setup(&[]).await;
        assert_eq!(run_tick(&orders).await, TickReport::default());
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn tick_classifies_each_order_independently() {
        let (orders, store, oracle) =
            setup(&["2377225624", "12345678903", "79927398713", "4561261212345467"]).await;
        oracle.respond(AccrualReport::new(
            "2377225624",
            AccrualState::Processed,
            Some(Amount::from_points(500)),
        ));
        oracle.respond(AccrualReport::new(
            "12345678903",
            AccrualState::Registered,
            None,
        ));
        oracle.fail("79927398713", "maintenance");
        // 4561261212345467 is unscripted: not registered

        let report = run_tick(&orders).await;
        assert_eq!(
            report,
            TickReport {
                pending: 4,
                updated: 1,
                unchanged: 1,
                failed: 2,
            }
        );

        let processed = store.find_order_by_number("2377225624").await.unwrap().unwrap();
        assert_eq!(processed.status, OrderStatus::Processed);
        assert_eq!(
            store.get_balance(1).await.unwrap().unwrap().current,
            Amount::from_points(500)
        );
    }

    #[tokio::test]
    async fn settled_orders_are_not_polled_again() {
        let (orders, _, oracle) = setup(&["2377225624"]).await;
        oracle.respond(AccrualReport::new(
            "2377225624",
            AccrualState::Invalid,
            None,
        ));

        run_tick(&orders).await;
        let second = run_tick(&orders).await;
        assert_eq!(second.pending, 0);
        assert_eq!(oracle.calls_for("2377225624"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_ticks_until_cancelled() {
        let (orders, store, oracle) = setup(&["2377225624"]).await;
        oracle.respond(AccrualReport::new(
            "2377225624",
            AccrualState::Processed,
            Some(Amount::from_points(10)),
        ));

        let shutdown = CancellationToken::new();
        let scheduler = ReconciliationScheduler::new(orders, PollInterval::default());
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        // longer than the maximum pause
        tokio::time::sleep(Duration::from_secs(8)).await;
        shutdown.cancel();
        let ticks = handle.await.unwrap();

        assert!(ticks >= 1);
        let order = store.find_order_by_number("2377225624").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
    }

    #[tokio::test]
    async fn cancelled_scheduler_runs_no_tick() {
        let (orders, _, oracle) = setup(&["2377225624"]).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let ticks = ReconciliationScheduler::new(orders, PollInterval::default())
            .run(shutdown)
            .await;
        assert_eq!(ticks, 0);
        assert_eq!(oracle.calls(), 0);
    }
}

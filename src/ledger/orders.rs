//! Order admission and reconciliation with the accrual service.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::error::{OrderError, ReconcileError};
use crate::accrual::{AccrualOracle, AccrualReport};
use crate::luhn;
use crate::model::{Balance, Order, UserId};
use crate::store::{LedgerStore, StoreError};

/// Outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new order was stored in the `New` state.
    Accepted,
    /// The caller had already uploaded this number; nothing changed.
    AlreadyAccepted,
}

/// Owns the order state machine.
pub struct OrderService {
    store: Arc<dyn LedgerStore>,
    oracle: Arc<dyn AccrualOracle>,
}

impl OrderService {
    pub fn new(store: Arc<dyn LedgerStore>, oracle: Arc<dyn AccrualOracle>) -> Self {
        Self { store, oracle }
    }

    /// Admit an order number uploaded by `owner`:
    /// - An existing order of the same owner is accepted again without change
    /// - An existing order of another owner is a conflict
    /// - A new number must pass the Luhn check and is stored as `New`
    pub async fn admit_order(
        &self,
        number: &str,
        owner: UserId,
        submitted_at: DateTime<Utc>,
    ) -> Result<Admission, OrderError> {
        if let Some(existing) = self.store.find_order_by_number(number).await? {
            return Self::readmission(&existing, owner);
        }

        if !luhn::is_valid(number) {
            return Err(OrderError::FormatInvalid(number.to_string()));
        }

        match self
            .store
            .insert_order(Order::new(number, owner, submitted_at))
            .await
        {
            Ok(_) => Ok(Admission::Accepted),
            Err(StoreError::Duplicate(_)) => {
                // a concurrent upload of the same number got in first
                debug!(number, owner, "order inserted concurrently");
                let existing = self
                    .store
                    .find_order_by_number(number)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Backend(format!("order {number} vanished after insert"))
                    })?;
                Self::readmission(&existing, owner)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn readmission(existing: &Order, owner: UserId) -> Result<Admission, OrderError> {
        if existing.owner == owner {
            Ok(Admission::AlreadyAccepted)
        } else {
            Err(OrderError::Conflict(existing.number.clone(), existing.owner))
        }
    }

    /// Orders uploaded by `owner`, newest first.
    pub async fn list_orders(&self, owner: UserId) -> Result<Vec<Order>, OrderError> {
        let orders = self.store.find_orders_by_owner(owner).await?;
        if orders.is_empty() {
            return Err(OrderError::NoOrders(owner));
        }
        Ok(orders)
    }

    /// Orders the accrual service has not settled yet, across all owners.
    pub async fn list_pending_orders(&self) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.find_pending_orders().await?)
    }

    /// Ask the accrual service about `number` and apply its verdict.
    ///
    /// The request runs before the transaction opens so no lock is held
    /// across network I/O.
    pub async fn reconcile_order(&self, number: &str) -> Result<Order, ReconcileError> {
        let report = self.oracle.order_status(number).await?;
        self.apply_report(&report).await
    }

    /// Apply an accrual verdict in one transaction:
    /// - Lock the order row
    /// - Reject reports that are not a forward transition (`NoChange`)
    /// - Store the new status and reward
    /// - Credit the reward to the owner's balance
    ///
    /// Two concurrent calls for the same order serialize on the row lock; the
    /// second one sees the updated status and fails with `NoChange`, so a
    /// reward is credited at most once.
    pub async fn apply_report(&self, report: &AccrualReport) -> Result<Order, ReconcileError> {
        let next = report.status();
        let mut tx = self.store.begin().await?;

        let mut order = tx
            .order_for_update(&report.number)
            .await?
            .ok_or_else(|| ReconcileError::NoOrders(report.number.clone()))?;

        if !order.status.can_transition_to(next) {
            return Err(ReconcileError::NoChange(order.number, order.status));
        }

        order.status = next;
        order.reward = report.reward;
        tx.save_order(&order).await?;

        if let Some(reward) = report.reward {
            let mut balance = tx
                .balance_for_update(order.owner)
                .await?
                .unwrap_or_else(|| Balance::zero(order.owner));
            balance
                .credit(reward)
                .map_err(|_| ReconcileError::BalanceOverflow(order.owner, reward))?;
            tx.save_balance(&balance).await?;
        }

        tx.commit().await?;
        Ok(order)
    }
}

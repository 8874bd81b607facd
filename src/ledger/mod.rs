//! Loyalty ledger services.
//!
//! The ledger admits uploaded orders, credits the rewards the accrual
//! service assigns to them and lets users spend their balance. Every
//! mutation of an order or a balance runs in one store transaction.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::Amount;
use crate::accrual::AccrualOracle;
use crate::model::{Balance, Order, User, UserId, Withdrawal};
use crate::scheduler::{self, TickReport};
use crate::store::{LedgerStore, StoreError};

mod balance;
pub use balance::{BalanceService, WithdrawalService};

mod error;
pub use error::{OrderError, ReconcileError, UserError, WithdrawalError};

mod orders;
pub use orders::{Admission, OrderService};

mod users;
pub use users::UserService;

/// Entry point for the request-facing layer and the reconciliation loop.
pub struct Ledger {
    orders: Arc<OrderService>,
    balances: BalanceService,
    withdrawals: WithdrawalService,
    users: UserService,
}

/// Public API
impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, oracle: Arc<dyn AccrualOracle>) -> Self {
        Self {
            orders: Arc::new(OrderService::new(store.clone(), oracle)),
            balances: BalanceService::new(store.clone()),
            withdrawals: WithdrawalService::new(store.clone()),
            users: UserService::new(store),
        }
    }

    /// Shared handle on the order service, for the reconciliation scheduler.
    pub fn orders(&self) -> Arc<OrderService> {
        Arc::clone(&self.orders)
    }

    pub async fn register_user(&self, login: &str, password: &str) -> Result<User, UserError> {
        let result = self.users.register(login, password).await;
        match &result {
            Ok(user) => info!(owner = user.id, login, "user registered"),
            Err(e) => info!(login, reason = %e, "registration rejected"),
        }
        result
    }

    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User, UserError> {
        let result = self.users.authenticate(login, password).await;
        if let Err(e) = &result {
            info!(login, reason = %e, "authentication rejected");
        }
        result
    }

    pub async fn admit_order(
        &self,
        number: &str,
        owner: UserId,
        submitted_at: DateTime<Utc>,
    ) -> Result<Admission, OrderError> {
        let result = self.orders.admit_order(number, owner, submitted_at).await;
        Self::log_result("order upload", owner, number, None, &result);
        result
    }

    pub async fn list_orders(&self, owner: UserId) -> Result<Vec<Order>, OrderError> {
        let result = self.orders.list_orders(owner).await;
        if let Ok(orders) = &result {
            debug!(owner, count = orders.len(), "orders listed");
        }
        result
    }

    pub async fn balance(&self, owner: UserId) -> Result<Balance, StoreError> {
        self.balances.balance(owner).await
    }

    pub async fn withdraw(
        &self,
        order_number: &str,
        amount: Amount,
        owner: UserId,
        processed_at: DateTime<Utc>,
    ) -> Result<Withdrawal, WithdrawalError> {
        let result = self
            .withdrawals
            .withdraw(order_number, amount, owner, processed_at)
            .await;
        Self::log_result("withdrawal", owner, order_number, Some(amount), &result);
        result
    }

    pub async fn list_withdrawals(&self, owner: UserId) -> Result<Vec<Withdrawal>, WithdrawalError> {
        let result = self.withdrawals.list_withdrawals(owner).await;
        if let Ok(withdrawals) = &result {
            debug!(owner, count = withdrawals.len(), "withdrawals listed");
        }
        result
    }

    /// Reconcile every pending order once. Normally driven by
    /// [`ReconciliationScheduler`](crate::scheduler::ReconciliationScheduler).
    pub async fn run_reconciliation_tick(&self) -> TickReport {
        scheduler::run_tick(&self.orders).await
    }
}

/// Private API
impl Ledger {
    /// Small helper to log request-side results
    fn log_result<T: std::fmt::Debug, E: std::fmt::Display>(
        operation: &str,
        owner: UserId,
        number: &str,
        amount: Option<Amount>,
        result: &Result<T, E>,
    ) {
        match (result, amount) {
            (Ok(outcome), Some(amt)) => {
                info!(owner, number, amount = %amt, ?outcome, "{operation} applied");
            }
            (Ok(outcome), None) => {
                info!(owner, number, ?outcome, "{operation} applied");
            }
            (Err(e), Some(amt)) => {
                warn!(owner, number, amount = %amt, reason = %e, "{operation} rejected");
            }
            (Err(e), None) => {
                warn!(owner, number, reason = %e, "{operation} rejected");
            }
        }
    }
}

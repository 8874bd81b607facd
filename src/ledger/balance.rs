//! Balance reads and withdrawals.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::error::WithdrawalError;
use crate::Amount;
use crate::luhn;
use crate::model::{Balance, UserId, Withdrawal};
use crate::store::{LedgerStore, StoreError};

pub struct BalanceService {
    store: Arc<dyn LedgerStore>,
}

impl BalanceService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Current balance of `owner`; zero for users that never earned points.
    pub async fn balance(&self, owner: UserId) -> Result<Balance, StoreError> {
        Ok(self
            .store
            .get_balance(owner)
            .await?
            .unwrap_or_else(|| Balance::zero(owner)))
    }
}

pub struct WithdrawalService {
    store: Arc<dyn LedgerStore>,
}

impl WithdrawalService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Spend `amount` points against `order_number`:
    /// - Ensure the order number passes the Luhn check (it need not be an uploaded order)
    /// - Ensure the amount is positive
    /// - Lock the owner's balance and ensure it covers the amount
    /// - Debit the balance and record the withdrawal in the same transaction
    pub async fn withdraw(
        &self,
        order_number: &str,
        amount: Amount,
        owner: UserId,
        processed_at: DateTime<Utc>,
    ) -> Result<Withdrawal, WithdrawalError> {
        if !luhn::is_valid(order_number) {
            return Err(WithdrawalError::FormatInvalid(order_number.to_string()));
        }
        if !amount.is_positive() {
            return Err(WithdrawalError::NonPositiveAmount(amount));
        }

        let mut tx = self.store.begin().await?;

        let mut balance = tx
            .balance_for_update(owner)
            .await?
            .unwrap_or_else(|| Balance::zero(owner));

        if (balance.current - amount).is_negative() {
            return Err(WithdrawalError::InsufficientBalance(
                owner,
                balance.current,
                amount,
            ));
        }

        balance
            .debit(amount)
            .map_err(|_| WithdrawalError::BalanceOverflow(owner, amount))?;
        let withdrawal = Withdrawal {
            order_number: order_number.to_string(),
            amount,
            processed_at,
            owner,
        };

        tx.save_balance(&balance).await?;
        tx.save_withdrawal(&withdrawal).await?;
        tx.commit().await?;

        Ok(withdrawal)
    }

    /// Withdrawals made by `owner`, oldest first.
    pub async fn list_withdrawals(&self, owner: UserId) -> Result<Vec<Withdrawal>, WithdrawalError> {
        let withdrawals = self.store.find_withdrawals_by_owner(owner).await?;
        if withdrawals.is_empty() {
            return Err(WithdrawalError::NoWithdrawals(owner));
        }
        Ok(withdrawals)
    }
}

//! Core domain types for the loyalty ledger.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::Amount;
use crate::amount::AmountOverflow;

/// User identifier.
pub type UserId = u64;

/// Storage identifier of an order.
pub type OrderId = u64;

/// Processing state of an uploaded order.
///
/// `New -> {Processing, Invalid, Processed}`, `Processing -> {Invalid, Processed}`.
/// `Invalid` and `Processed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Orders the reconciliation loop still has to poll.
    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, Processing | Invalid | Processed) | (Processing, Invalid | Processed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchase order uploaded by a user for accrual.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    #[serde(skip)]
    pub id: Option<OrderId>,
    pub number: String,
    #[serde(skip)]
    pub owner: UserId,
    pub status: OrderStatus,
    #[serde(rename = "accrual", skip_serializing_if = "Option::is_none")]
    pub reward: Option<Amount>,
    #[serde(rename = "uploaded_at")]
    pub submitted_at: DateTime<Utc>,
}

impl Order {
    /// Create a not yet persisted order in the `New` state.
    pub fn new(number: impl Into<String>, owner: UserId, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            number: number.into(),
            owner,
            status: OrderStatus::New,
            reward: None,
            submitted_at,
        }
    }
}

/// Points balance of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    #[serde(skip)]
    pub owner: UserId,
    pub current: Amount,
    #[serde(rename = "withdrawn")]
    pub withdrawn_total: Amount,
}

impl Balance {
    pub fn zero(owner: UserId) -> Self {
        Self {
            owner,
            current: Amount::ZERO,
            withdrawn_total: Amount::ZERO,
        }
    }

    /// Leaves the balance untouched on overflow.
    pub fn credit(&mut self, amount: Amount) -> Result<(), AmountOverflow> {
        self.current = self.current.checked_add(amount)?;
        Ok(())
    }

    /// Move `amount` from the current balance to the withdrawn total.
    /// Leaves the balance untouched on overflow.
    pub fn debit(&mut self, amount: Amount) -> Result<(), AmountOverflow> {
        let current = self.current.checked_sub(amount)?;
        let withdrawn_total = self.withdrawn_total.checked_add(amount)?;
        self.current = current;
        self.withdrawn_total = withdrawn_total;
        Ok(())
    }
}

/// A spending of points against an order reference. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Withdrawal {
    #[serde(rename = "order")]
    pub order_number: String,
    #[serde(rename = "sum")]
    pub amount: Amount,
    pub processed_at: DateTime<Utc>,
    #[serde(skip)]
    pub owner: UserId,
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub password_hash: String,
}

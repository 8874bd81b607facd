//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::accrual::OracleError;
use crate::model::{OrderStatus, UserId};
use crate::store::StoreError;

/// Error during order admission or listing.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order number {0} has an invalid format")]
    FormatInvalid(String),

    #[error("order {0} was already uploaded by user {1}")]
    Conflict(String, UserId),

    #[error("no orders uploaded by user {0}")]
    NoOrders(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error while reconciling one order with the accrual service.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("order {0} not found")]
    NoOrders(String),

    #[error("order {0} is {1}, nothing to apply")]
    NoChange(String, OrderStatus),

    #[error("crediting {1} to user {0} overflows the balance")]
    BalanceOverflow(UserId, Amount),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error during withdrawal processing or listing.
#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error("order number {0} has an invalid format")]
    FormatInvalid(String),

    #[error("withdrawal amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("insufficient balance for user {0}: current {1}, requested {2}")]
    InsufficientBalance(UserId, Amount, Amount),

    #[error("withdrawing {1} overflows the withdrawn total of user {0}")]
    BalanceOverflow(UserId, Amount),

    #[error("no withdrawals made by user {0}")]
    NoWithdrawals(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error during registration or authentication.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("login and password must not be empty")]
    EmptyCredentials,

    #[error("user {0} already exists")]
    AlreadyExists(String),

    #[error("invalid login or password")]
    InvalidCredentials,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for UserError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(login) => UserError::AlreadyExists(login),
            other => UserError::Store(other),
        }
    }
}

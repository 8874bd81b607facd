//! Persistence contract for orders, balances, withdrawals and users.
//!
//! Reads that do not participate in a read-modify-write go straight through
//! [`LedgerStore`]. Every mutation of an order or a balance happens inside a
//! [`LedgerTx`] obtained from [`LedgerStore::begin`]: rows read with the
//! `*_for_update` methods stay locked until the transaction ends, writes are
//! staged and become visible together on [`LedgerTx::commit`]. Dropping a
//! transaction without committing rolls it back.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Balance, Order, User, UserId, Withdrawal};

mod memory;
pub use memory::MemoryStore;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (order number, user login).
    #[error("duplicate key {0}")]
    Duplicate(String),

    #[error("store is closed")]
    Closed,

    #[error("store backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction.
    async fn begin<'a>(&'a self) -> Result<Box<dyn LedgerTx + 'a>, StoreError>;

    async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError>;

    /// Persist a new order and return it with its assigned id.
    ///
    /// Fails with [`StoreError::Duplicate`] when the number is already taken,
    /// whoever owns it.
    async fn insert_order(&self, order: Order) -> Result<Order, StoreError>;

    /// Every order in a non-terminal state, across all owners.
    async fn find_pending_orders(&self) -> Result<Vec<Order>, StoreError>;

    async fn find_orders_by_owner(&self, owner: UserId) -> Result<Vec<Order>, StoreError>;

    async fn get_balance(&self, owner: UserId) -> Result<Option<Balance>, StoreError>;

    async fn find_withdrawals_by_owner(&self, owner: UserId)
    -> Result<Vec<Withdrawal>, StoreError>;

    /// Persist a new user. Fails with [`StoreError::Duplicate`] on a taken login.
    async fn insert_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError>;

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;
}

/// A unit of work against the store.
#[async_trait]
pub trait LedgerTx: Send {
    /// Read an order and lock it for the rest of the transaction.
    async fn order_for_update(&mut self, number: &str) -> Result<Option<Order>, StoreError>;

    /// Read a balance and lock it for the rest of the transaction.
    async fn balance_for_update(&mut self, owner: UserId) -> Result<Option<Balance>, StoreError>;

    /// Update an existing order, keyed by number.
    async fn save_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Insert or replace the owner's balance.
    async fn save_balance(&mut self, balance: &Balance) -> Result<(), StoreError>;

    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), StoreError>;

    /// Apply all staged writes atomically.
    async fn commit(&mut self) -> Result<(), StoreError>;
}

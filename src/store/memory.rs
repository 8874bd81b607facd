use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{LedgerStore, LedgerTx, StoreError};
use crate::model::{Balance, Order, OrderId, User, UserId, Withdrawal};

#[derive(Debug, Default)]
struct Tables {
    /// Keyed by order number, which is unique system-wide
    orders: HashMap<String, Order>,
    /// One balance per owner
    balances: HashMap<UserId, Balance>,
    /// Append-only, in processing order
    withdrawals: Vec<Withdrawal>,
    /// Keyed by login
    users: HashMap<String, User>,
    last_order_id: OrderId,
    last_user_id: UserId,
}

/// In-process store.
///
/// A transaction holds the table lock from `begin` until it is committed or
/// dropped, so transactions are fully serialized. Keep them short: never
/// await external I/O while one is open.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject all further access. Transactions already open run to completion.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(self.tables.lock().await)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin<'a>(&'a self) -> Result<Box<dyn LedgerTx + 'a>, StoreError> {
        let tables = self.tables().await?;
        Ok(Box::new(MemoryTx {
            tables,
            work: UnitOfWork::default(),
            committed: false,
        }))
    }

    async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.tables().await?.orders.get(number).cloned())
    }

    async fn insert_order(&self, mut order: Order) -> Result<Order, StoreError> {
        let mut tables = self.tables().await?;
        if tables.orders.contains_key(&order.number) {
            return Err(StoreError::Duplicate(order.number));
        }
        tables.last_order_id += 1;
        order.id = Some(tables.last_order_id);
        tables.orders.insert(order.number.clone(), order.clone());
        Ok(order)
    }

    async fn find_pending_orders(&self) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables().await?;
        let mut pending: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| order.status.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|order| order.id);
        Ok(pending)
    }

    async fn find_orders_by_owner(&self, owner: UserId) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables().await?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| order.owner == owner)
            .cloned()
            .collect();
        // newest first
        orders.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(orders)
    }

    async fn get_balance(&self, owner: UserId) -> Result<Option<Balance>, StoreError> {
        Ok(self.tables().await?.balances.get(&owner).cloned())
    }

    async fn find_withdrawals_by_owner(
        &self,
        owner: UserId,
    ) -> Result<Vec<Withdrawal>, StoreError> {
        let tables = self.tables().await?;
        let mut withdrawals: Vec<Withdrawal> = tables
            .withdrawals
            .iter()
            .filter(|withdrawal| withdrawal.owner == owner)
            .cloned()
            .collect();
        withdrawals.sort_by_key(|withdrawal| withdrawal.processed_at);
        Ok(withdrawals)
    }

    async fn insert_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut tables = self.tables().await?;
        if tables.users.contains_key(login) {
            return Err(StoreError::Duplicate(login.to_string()));
        }
        tables.last_user_id += 1;
        let user = User {
            id: tables.last_user_id,
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        };
        tables.users.insert(user.login.clone(), user.clone());
        Ok(user)
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables().await?.users.get(login).cloned())
    }
}

/// Writes staged by a transaction, applied together on commit.
#[derive(Debug, Default)]
struct UnitOfWork {
    orders: HashMap<String, Order>,
    balances: HashMap<UserId, Balance>,
    withdrawals: Vec<Withdrawal>,
}

impl UnitOfWork {
    fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.balances.is_empty() && self.withdrawals.is_empty()
    }
}

struct MemoryTx<'a> {
    tables: MutexGuard<'a, Tables>,
    work: UnitOfWork,
    committed: bool,
}

impl MemoryTx<'_> {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.committed {
            return Err(StoreError::Backend(
                "transaction already committed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryTx<'_> {
    async fn order_for_update(&mut self, number: &str) -> Result<Option<Order>, StoreError> {
        self.ensure_open()?;
        let staged = self.work.orders.get(number);
        Ok(staged.or_else(|| self.tables.orders.get(number)).cloned())
    }

    async fn balance_for_update(&mut self, owner: UserId) -> Result<Option<Balance>, StoreError> {
        self.ensure_open()?;
        let staged = self.work.balances.get(&owner);
        Ok(staged.or_else(|| self.tables.balances.get(&owner)).cloned())
    }

    async fn save_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.ensure_open()?;
        if !self.tables.orders.contains_key(&order.number) {
            return Err(StoreError::Backend(format!(
                "order {} does not exist",
                order.number
            )));
        }
        self.work.orders.insert(order.number.clone(), order.clone());
        Ok(())
    }

    async fn save_balance(&mut self, balance: &Balance) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.work.balances.insert(balance.owner, balance.clone());
        Ok(())
    }

    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.work.withdrawals.push(withdrawal.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let tables = &mut *self.tables;
        tables.orders.extend(self.work.orders.drain());
        tables.balances.extend(self.work.balances.drain());
        tables.withdrawals.append(&mut self.work.withdrawals);
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.work.is_empty() {
            debug!(
                orders = self.work.orders.len(),
                balances = self.work.balances.len(),
                withdrawals = self.work.withdrawals.len(),
                "rolling back uncommitted transaction"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::OrderStatus;
    use chrono::{Duration, Utc};

    async fn store_with_order(number: &str, owner: UserId) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_order(Order::new(number, owner, Utc::now()))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn insert_order_assigns_ids() {
        let store = MemoryStore::new();
        let first = store
            .insert_order(Order::new("2377225624", 1, Utc::now()))
            .await
            .unwrap();
        let second = store
            .insert_order(Order::new("12345678903", 1, Utc::now()))
            .await
            .unwrap();
        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));
    }

    #[tokio::test]
    async fn insert_order_rejects_taken_number() {
        let store = store_with_order("2377225624", 1).await;
        let result = store
            .insert_order(Order::new("2377225624", 2, Utc::now()))
            .await;
        assert!(matches!(result, Err(StoreError::Duplicate(n)) if n == "2377225624"));
    }

    #[tokio::test]
    async fn commit_applies_all_writes() {
        let store = store_with_order("2377225624", 1).await;

        let mut tx = store.begin().await.unwrap();
        let mut order = tx.order_for_update("2377225624").await.unwrap().unwrap();
        order.status = OrderStatus::Processed;
        tx.save_order(&order).await.unwrap();
        let mut balance = Balance::zero(1);
        balance.credit(Amount::from_points(10)).unwrap();
        tx.save_balance(&balance).await.unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        let order = store.find_order_by_number("2377225624").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
        assert_eq!(store.get_balance(1).await.unwrap(), Some(balance));
    }

    #[tokio::test]
    async fn drop_without_commit_rolls_back() {
        let store = store_with_order("2377225624", 1).await;

        {
            let mut tx = store.begin().await.unwrap();
            let mut order = tx.order_for_update("2377225624").await.unwrap().unwrap();
            order.status = OrderStatus::Invalid;
            tx.save_order(&order).await.unwrap();
            tx.save_balance(&Balance::zero(1)).await.unwrap();
            tx.save_withdrawal(&Withdrawal {
                order_number: "2377225624".to_string(),
                amount: Amount::from_points(1),
                processed_at: Utc::now(),
                owner: 1,
            })
            .await
            .unwrap();
        }

        let order = store.find_order_by_number("2377225624").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(store.get_balance(1).await.unwrap(), None);
        assert!(store.find_withdrawals_by_owner(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_inside_transaction_see_staged_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut balance = Balance::zero(3);
        balance.credit(Amount::from_points(7)).unwrap();
        tx.save_balance(&balance).await.unwrap();
        assert_eq!(tx.balance_for_update(3).await.unwrap(), Some(balance));
    }

    #[tokio::test]
    async fn save_order_requires_existing_row() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let result = tx.save_order(&Order::new("2377225624", 1, Utc::now())).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn committed_transaction_cannot_be_reused() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();
        assert!(tx.save_balance(&Balance::zero(1)).await.is_err());
    }

    #[tokio::test]
    async fn pending_orders_exclude_terminal_states() {
        let store = MemoryStore::new();
        for (number, status) in [
            ("2377225624", OrderStatus::New),
            ("12345678903", OrderStatus::Processing),
            ("79927398713", OrderStatus::Invalid),
            ("4561261212345467", OrderStatus::Processed),
        ] {
            let order = store
                .insert_order(Order::new(number, 1, Utc::now()))
                .await
                .unwrap();
            let mut tx = store.begin().await.unwrap();
            tx.save_order(&Order { status, ..order }).await.unwrap();
            tx.commit().await.unwrap();
        }

        let pending = store.find_pending_orders().await.unwrap();
        let numbers: Vec<_> = pending.iter().map(|o| o.number.as_str()).collect();
        assert_eq!(numbers, ["2377225624", "12345678903"]);
    }

    #[tokio::test]
    async fn orders_by_owner_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_order(Order::new("2377225624", 1, now - Duration::minutes(5)))
            .await
            .unwrap();
        store
            .insert_order(Order::new("12345678903", 1, now))
            .await
            .unwrap();
        store
            .insert_order(Order::new("79927398713", 2, now))
            .await
            .unwrap();

        let orders = store.find_orders_by_owner(1).await.unwrap();
        let numbers: Vec<_> = orders.iter().map(|o| o.number.as_str()).collect();
        assert_eq!(numbers, ["12345678903", "2377225624"]);
    }

    #[tokio::test]
    async fn insert_user_rejects_taken_login() {
        let store = MemoryStore::new();
        let user = store.insert_user("alice", "hash").await.unwrap();
        assert_eq!(user.id, 1);
        assert!(matches!(
            store.insert_user("alice", "other").await,
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.find_user_by_login("alice").await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn closed_store_rejects_access() {
        let store = MemoryStore::new();
        store.close();
        assert!(matches!(store.begin().await, Err(StoreError::Closed)));
        assert!(matches!(store.get_balance(1).await, Err(StoreError::Closed)));
    }
}

pub mod accrual;
pub mod amount;
pub mod config;
pub mod ledger;
pub mod luhn;
pub mod model;
pub mod scheduler;
pub mod store;

pub use accrual::{AccrualOracle, AccrualReport, AccrualState, HttpAccrualClient, ScriptedOracle};
pub use amount::{Amount, AmountOverflow};
pub use config::{Config, ConfigError};
pub use ledger::{Admission, Ledger, OrderService};
pub use model::{Balance, Order, OrderId, OrderStatus, User, UserId, Withdrawal};
pub use scheduler::{PollInterval, ReconciliationScheduler, TickReport};
pub use store::{LedgerStore, LedgerTx, MemoryStore, StoreError};

//! bookledger Library
//!
//! Atomic multi-item transaction engine behind a conversational bookstore
//! front end: a purchase request either applies every stock decrement and
//! the account debit together, or applies nothing.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod domain;
pub mod store;

mod error;

pub use config::Config;
pub use coordinator::PurchaseCoordinator;
pub use domain::{
    AbortReason, CommittedLine, Pricing, PurchaseLine, PurchaseRequest, StockShortfall,
    TransactionOutcome, DEFAULT_UNIT_PRICE,
};
pub use error::{AppError, AppResult};
pub use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore, StoreError};

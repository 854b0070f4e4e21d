//! Ledger Store module
//!
//! Durable holder of account balances and item stock with transactional
//! read and conditional-write access. Conflicting concurrent writers are
//! serialized by optimistic, version-based conflict detection at commit.

mod error;
mod memory;
mod postgres;

use uuid::Uuid;

pub use error::StoreError;
pub use memory::{MemoryLedgerStore, MemoryTxn};
pub use postgres::{PgLedgerStore, PgTxn};

/// Row identity used by the backends to track read versions and writes.
/// Accounts and items live in separate namespaces even when their ids
/// collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RowKey {
    Account(Uuid),
    Item(Uuid),
}

impl RowKey {
    pub(crate) fn id(self) -> Uuid {
        match self {
            RowKey::Account(id) | RowKey::Item(id) => id,
        }
    }
}

/// Transactional access to the two ledger entities.
///
/// All reads and writes for one purchase happen under one `Txn` scope:
/// either every write under the scope becomes visible at `commit`, or none
/// do. Dropping a scope without committing must never publish state, so a
/// caller abandoning a call mid-flight cannot leave half a purchase behind.
///
/// `debit_account` and `decrement_item_stock` must reject any write that
/// would drive a balance or stock negative with
/// [`StoreError::ConstraintViolation`]. The coordinator checks first; the
/// store check is the independent last-line guard.
#[allow(async_fn_in_trait)]
pub trait LedgerStore {
    type Txn: Send;

    /// Acquire a transactional scope.
    async fn begin(&self) -> Result<Self::Txn, StoreError>;

    /// Current balance of an account, read under the scope.
    async fn account_balance(
        &self,
        txn: &mut Self::Txn,
        account_id: Uuid,
    ) -> Result<i64, StoreError>;

    /// Current stock of an item, read under the scope.
    async fn item_stock(&self, txn: &mut Self::Txn, item_id: Uuid) -> Result<i64, StoreError>;

    /// Decrement an account balance.
    async fn debit_account(
        &self,
        txn: &mut Self::Txn,
        account_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError>;

    /// Increment an account balance.
    async fn credit_account(
        &self,
        txn: &mut Self::Txn,
        account_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError>;

    /// Decrement an item's stock count.
    async fn decrement_item_stock(
        &self,
        txn: &mut Self::Txn,
        item_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError>;

    /// Durably apply every write made under the scope. Fails with
    /// [`StoreError::Conflict`] if a row read under this scope was modified
    /// by a concurrent transaction, in which case nothing is applied.
    async fn commit(&self, txn: Self::Txn) -> Result<(), StoreError>;

    /// Discard every write made under the scope. Always succeeds and is a
    /// no-op on an already-terminated scope.
    async fn rollback(&self, txn: &mut Self::Txn) -> Result<(), StoreError>;
}

//! In-memory ledger backend
//!
//! Versioned rows behind a single mutex, with buffered writes and
//! commit-time version validation. Reads record the version of every row
//! they touch; commit re-checks those versions and applies the buffered
//! writes only if none moved, so two scopes racing over the same row
//! resolve exactly like the Postgres backend: one commits, one conflicts.
//!
//! Used by tests and by callers embedding the engine without a database.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{LedgerStore, RowKey, StoreError};

#[derive(Debug, Clone, Copy)]
struct Row {
    value: i64,
    version: i64,
}

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<Uuid, Row>,
    items: HashMap<Uuid, Row>,
}

impl Tables {
    fn row(&self, key: RowKey) -> Option<Row> {
        match key {
            RowKey::Account(id) => self.accounts.get(&id).copied(),
            RowKey::Item(id) => self.items.get(&id).copied(),
        }
    }

    fn row_mut(&mut self, key: RowKey) -> Option<&mut Row> {
        match key {
            RowKey::Account(id) => self.accounts.get_mut(&id),
            RowKey::Item(id) => self.items.get_mut(&id),
        }
    }
}

/// Transaction scope over the in-memory ledger.
///
/// Holds only read versions and buffered deltas; dropping it publishes
/// nothing.
#[derive(Debug, Default)]
pub struct MemoryTxn {
    reads: Vec<(RowKey, i64)>,
    writes: Vec<(RowKey, i64)>,
    finished: bool,
}

impl MemoryTxn {
    fn pending_delta(&self, key: RowKey) -> i64 {
        self.writes
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, delta)| delta)
            .sum()
    }

    fn record_read(&mut self, key: RowKey, version: i64) {
        // Keep the first observed version; commit validates against it.
        if !self.reads.iter().any(|(k, _)| *k == key) {
            self.reads.push((key, version));
        }
    }
}

/// In-memory [`LedgerStore`]. Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision an account row. Provisioning is external to the engine.
    pub fn insert_account(&self, account_id: Uuid, balance: i64) {
        self.inner
            .lock()
            .accounts
            .insert(account_id, Row { value: balance, version: 0 });
    }

    /// Provision an item row.
    pub fn insert_item(&self, item_id: Uuid, stock: i64) {
        self.inner
            .lock()
            .items
            .insert(item_id, Row { value: stock, version: 0 });
    }

    /// Committed balance, outside any scope.
    pub fn balance_of(&self, account_id: Uuid) -> Option<i64> {
        self.inner.lock().accounts.get(&account_id).map(|r| r.value)
    }

    /// Committed stock, outside any scope.
    pub fn stock_of(&self, item_id: Uuid) -> Option<i64> {
        self.inner.lock().items.get(&item_id).map(|r| r.value)
    }

    fn read(&self, txn: &mut MemoryTxn, key: RowKey) -> Result<i64, StoreError> {
        Self::check_open(txn)?;
        let tables = self.inner.lock();
        let row = tables.row(key).ok_or_else(|| Self::not_found(key))?;
        txn.record_read(key, row.version);
        Ok(row.value + txn.pending_delta(key))
    }

    fn write(&self, txn: &mut MemoryTxn, key: RowKey, delta: i64) -> Result<(), StoreError> {
        Self::check_open(txn)?;
        let tables = self.inner.lock();
        let row = tables.row(key).ok_or_else(|| Self::not_found(key))?;
        // Every prior write kept the running value in 0..=i64::MAX, so the
        // base sum cannot overflow; only the new delta can push it out.
        let base = row.value + txn.pending_delta(key);
        let projected = base.checked_add(delta).ok_or_else(|| {
            StoreError::ConstraintViolation(format!("write would overflow row {}", key.id()))
        })?;
        if projected < 0 {
            return Err(StoreError::ConstraintViolation(format!(
                "write would drive row {} to {}",
                key.id(),
                projected
            )));
        }
        txn.record_read(key, row.version);
        txn.writes.push((key, delta));
        Ok(())
    }

    fn check_open(txn: &MemoryTxn) -> Result<(), StoreError> {
        if txn.finished {
            return Err(StoreError::Unavailable(
                "transaction scope already terminated".into(),
            ));
        }
        Ok(())
    }

    fn not_found(key: RowKey) -> StoreError {
        match key {
            RowKey::Account(id) => StoreError::AccountNotFound(id),
            RowKey::Item(id) => StoreError::ItemNotFound(id),
        }
    }
}

impl LedgerStore for MemoryLedgerStore {
    type Txn = MemoryTxn;

    async fn begin(&self) -> Result<MemoryTxn, StoreError> {
        Ok(MemoryTxn::default())
    }

    async fn account_balance(
        &self,
        txn: &mut MemoryTxn,
        account_id: Uuid,
    ) -> Result<i64, StoreError> {
        self.read(txn, RowKey::Account(account_id))
    }

    async fn item_stock(&self, txn: &mut MemoryTxn, item_id: Uuid) -> Result<i64, StoreError> {
        self.read(txn, RowKey::Item(item_id))
    }

    async fn debit_account(
        &self,
        txn: &mut MemoryTxn,
        account_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError> {
        self.write(txn, RowKey::Account(account_id), -amount)
    }

    async fn credit_account(
        &self,
        txn: &mut MemoryTxn,
        account_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError> {
        self.write(txn, RowKey::Account(account_id), amount)
    }

    async fn decrement_item_stock(
        &self,
        txn: &mut MemoryTxn,
        item_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError> {
        self.write(txn, RowKey::Item(item_id), -amount)
    }

    async fn commit(&self, txn: MemoryTxn) -> Result<(), StoreError> {
        if txn.finished {
            return Ok(());
        }
        let mut tables = self.inner.lock();

        // Validate every read version before touching anything.
        for (key, observed) in &txn.reads {
            let current = tables.row(*key).map(|r| r.version).unwrap_or(-1);
            if current != *observed {
                return Err(StoreError::Conflict {
                    row_id: key.id(),
                    expected: *observed,
                    actual: current,
                });
            }
        }

        // Aggregate deltas per row and re-check the non-negativity guard
        // against the committed state.
        let mut applied: Vec<(RowKey, i64)> = Vec::new();
        for (key, delta) in &txn.writes {
            match applied.iter_mut().find(|(k, _)| k == key) {
                Some((_, total)) => *total += delta,
                None => applied.push((*key, *delta)),
            }
        }
        for (key, delta) in &applied {
            let current = tables
                .row(*key)
                .ok_or_else(|| Self::not_found(*key))?
                .value;
            let projected = current.checked_add(*delta).ok_or_else(|| {
                StoreError::ConstraintViolation(format!("commit would overflow row {}", key.id()))
            })?;
            if projected < 0 {
                return Err(StoreError::ConstraintViolation(format!(
                    "commit would drive row {} to {}",
                    key.id(),
                    projected
                )));
            }
        }

        for (key, delta) in &applied {
            let row = tables.row_mut(*key).expect("row validated above");
            row.value += delta;
            row.version += 1;
        }
        Ok(())
    }

    async fn rollback(&self, txn: &mut MemoryTxn) -> Result<(), StoreError> {
        txn.reads.clear();
        txn.writes.clear();
        txn.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(balance: i64, stock: i64) -> (MemoryLedgerStore, Uuid, Uuid) {
        let store = MemoryLedgerStore::new();
        let account = Uuid::new_v4();
        let item = Uuid::new_v4();
        store.insert_account(account, balance);
        store.insert_item(item, stock);
        (store, account, item)
    }

    #[tokio::test]
    async fn test_read_write_commit() {
        let (store, account, item) = store_with(100, 5);

        let mut txn = store.begin().await.unwrap();
        assert_eq!(store.account_balance(&mut txn, account).await.unwrap(), 100);
        assert_eq!(store.item_stock(&mut txn, item).await.unwrap(), 5);

        store.debit_account(&mut txn, account, 60).await.unwrap();
        store.decrement_item_stock(&mut txn, item, 3).await.unwrap();

        // Buffered writes are not visible outside the scope yet.
        assert_eq!(store.balance_of(account), Some(100));

        store.commit(txn).await.unwrap();
        assert_eq!(store.balance_of(account), Some(40));
        assert_eq!(store.stock_of(item), Some(2));
    }

    #[tokio::test]
    async fn test_reads_see_own_writes() {
        let (store, account, _) = store_with(100, 0);

        let mut txn = store.begin().await.unwrap();
        store.debit_account(&mut txn, account, 30).await.unwrap();
        assert_eq!(store.account_balance(&mut txn, account).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_commit_conflict_when_row_moved() {
        let (store, account, _) = store_with(100, 0);

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        store.account_balance(&mut first, account).await.unwrap();
        store.account_balance(&mut second, account).await.unwrap();
        store.debit_account(&mut first, account, 10).await.unwrap();
        store.debit_account(&mut second, account, 10).await.unwrap();

        store.commit(first).await.unwrap();
        let err = store.commit(second).await.unwrap_err();
        assert!(err.is_conflict());

        // Only the winner's debit landed.
        assert_eq!(store.balance_of(account), Some(90));
    }

    #[tokio::test]
    async fn test_write_rejected_when_value_would_go_negative() {
        let (store, account, item) = store_with(50, 2);

        let mut txn = store.begin().await.unwrap();
        let err = store.debit_account(&mut txn, account, 60).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));

        let err = store
            .decrement_item_stock(&mut txn, item, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_write_rejected_when_value_would_exceed_i64() {
        let (store, account, _) = store_with(i64::MAX - 1, 0);

        let mut txn = store.begin().await.unwrap();
        let err = store.credit_account(&mut txn, account, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));

        // A credit that still fits is accepted.
        store.credit_account(&mut txn, account, 1).await.unwrap();
        store.commit(txn).await.unwrap();
        assert_eq!(store.balance_of(account), Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes_and_is_idempotent() {
        let (store, account, _) = store_with(100, 0);

        let mut txn = store.begin().await.unwrap();
        store.debit_account(&mut txn, account, 40).await.unwrap();
        store.rollback(&mut txn).await.unwrap();
        store.rollback(&mut txn).await.unwrap();
        assert_eq!(store.balance_of(account), Some(100));

        // Rollback on a scope that never wrote is also fine.
        let mut fresh = store.begin().await.unwrap();
        store.rollback(&mut fresh).await.unwrap();
        store.rollback(&mut fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_scope_publishes_nothing() {
        let (store, account, _) = store_with(100, 0);

        {
            let mut txn = store.begin().await.unwrap();
            store.debit_account(&mut txn, account, 40).await.unwrap();
        }
        assert_eq!(store.balance_of(account), Some(100));
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = MemoryLedgerStore::new();
        let mut txn = store.begin().await.unwrap();

        let err = store
            .account_balance(&mut txn, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AccountNotFound(_)));

        let err = store.item_stock(&mut txn, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::ItemNotFound(_)));
    }
}

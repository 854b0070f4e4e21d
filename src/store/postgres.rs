//! Postgres ledger backend
//!
//! Rows carry a version column; every write is a conditional UPDATE against
//! the version observed when the row was first read under the scope, so a
//! concurrent commit on the same row surfaces as a conflict instead of a
//! lost update. The schema's CHECK constraints reject negative balances and
//! stock independently of coordinator validation.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LedgerStore, RowKey, StoreError};

/// Postgres error code for a CHECK constraint violation.
const CHECK_VIOLATION: &str = "23514";
/// Postgres error code for numeric overflow, raised when an update pushes
/// a BIGINT column past its range.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transaction scope over the Postgres ledger.
///
/// The underlying sqlx transaction rolls back on drop, so an abandoned
/// scope never publishes state.
pub struct PgTxn {
    tx: Option<Transaction<'static, Postgres>>,
    versions: HashMap<RowKey, i64>,
}

/// Postgres-backed [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect through an ordered list of endpoints, taking the first one
    /// that answers. The fallback list is an operational concern of store
    /// bootstrap, independent of per-transaction logic.
    pub async fn connect(urls: &[String], max_connections: u32) -> Result<Self, StoreError> {
        for url in urls {
            let attempt = PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect(url)
                .await;

            match attempt {
                Ok(pool) => {
                    sqlx::query("SELECT 1")
                        .execute(&pool)
                        .await
                        .map_err(map_sqlx)?;
                    tracing::info!("Connected to ledger database");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    tracing::warn!("Ledger endpoint unreachable, trying next: {}", e);
                }
            }
        }

        Err(StoreError::Unavailable(
            "no configured ledger endpoint reachable".into(),
        ))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn open_tx<'a>(
        txn: &'a mut PgTxn,
    ) -> Result<&'a mut Transaction<'static, Postgres>, StoreError> {
        txn.tx.as_mut().ok_or_else(|| {
            StoreError::Unavailable("transaction scope already terminated".into())
        })
    }

    /// Version to condition the next write on. Rows written without a
    /// prior read are looked up here first.
    async fn account_version(txn: &mut PgTxn, account_id: Uuid) -> Result<i64, StoreError> {
        let key = RowKey::Account(account_id);
        if let Some(version) = txn.versions.get(&key) {
            return Ok(*version);
        }
        let tx = Self::open_tx(txn)?;
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx)?;
        let version = version.ok_or(StoreError::AccountNotFound(account_id))?;
        txn.versions.insert(key, version);
        Ok(version)
    }

    async fn item_version(txn: &mut PgTxn, item_id: Uuid) -> Result<i64, StoreError> {
        let key = RowKey::Item(item_id);
        if let Some(version) = txn.versions.get(&key) {
            return Ok(*version);
        }
        let tx = Self::open_tx(txn)?;
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx)?;
        let version = version.ok_or(StoreError::ItemNotFound(item_id))?;
        txn.versions.insert(key, version);
        Ok(version)
    }

    async fn adjust_account(
        &self,
        txn: &mut PgTxn,
        account_id: Uuid,
        delta: i64,
    ) -> Result<(), StoreError> {
        let expected = Self::account_version(txn, account_id).await?;
        let tx = Self::open_tx(txn)?;

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + $1, version = version + 1
            WHERE id = $2 AND version = $3
            "#,
        )
        .bind(delta)
        .bind(account_id)
        .bind(expected)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM accounts WHERE id = $1")
                    .bind(account_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(map_sqlx)?;
            return Err(match actual {
                None => StoreError::AccountNotFound(account_id),
                Some(actual) => StoreError::Conflict {
                    row_id: account_id,
                    expected,
                    actual,
                },
            });
        }

        txn.versions.insert(RowKey::Account(account_id), expected + 1);
        Ok(())
    }
}

impl LedgerStore for PgLedgerStore {
    type Txn = PgTxn;

    async fn begin(&self) -> Result<PgTxn, StoreError> {
        let tx = self.pool.begin().await.map_err(map_sqlx)?;
        Ok(PgTxn {
            tx: Some(tx),
            versions: HashMap::new(),
        })
    }

    async fn account_balance(
        &self,
        txn: &mut PgTxn,
        account_id: Uuid,
    ) -> Result<i64, StoreError> {
        let tx = Self::open_tx(txn)?;
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT balance, version FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx)?;
        let (balance, version) = row.ok_or(StoreError::AccountNotFound(account_id))?;
        txn.versions.entry(RowKey::Account(account_id)).or_insert(version);
        Ok(balance)
    }

    async fn item_stock(&self, txn: &mut PgTxn, item_id: Uuid) -> Result<i64, StoreError> {
        let tx = Self::open_tx(txn)?;
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT stock, version FROM items WHERE id = $1")
                .bind(item_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx)?;
        let (stock, version) = row.ok_or(StoreError::ItemNotFound(item_id))?;
        txn.versions.entry(RowKey::Item(item_id)).or_insert(version);
        Ok(stock)
    }

    async fn debit_account(
        &self,
        txn: &mut PgTxn,
        account_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError> {
        self.adjust_account(txn, account_id, -amount).await
    }

    async fn credit_account(
        &self,
        txn: &mut PgTxn,
        account_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError> {
        self.adjust_account(txn, account_id, amount).await
    }

    async fn decrement_item_stock(
        &self,
        txn: &mut PgTxn,
        item_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError> {
        let expected = Self::item_version(txn, item_id).await?;
        let tx = Self::open_tx(txn)?;

        let result = sqlx::query(
            r#"
            UPDATE items
            SET stock = stock - $1, version = version + 1
            WHERE id = $2 AND version = $3
            "#,
        )
        .bind(amount)
        .bind(item_id)
        .bind(expected)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM items WHERE id = $1")
                    .bind(item_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(map_sqlx)?;
            return Err(match actual {
                None => StoreError::ItemNotFound(item_id),
                Some(actual) => StoreError::Conflict {
                    row_id: item_id,
                    expected,
                    actual,
                },
            });
        }

        txn.versions.insert(RowKey::Item(item_id), expected + 1);
        Ok(())
    }

    async fn commit(&self, txn: PgTxn) -> Result<(), StoreError> {
        match txn.tx {
            Some(tx) => tx.commit().await.map_err(map_sqlx),
            None => Ok(()),
        }
    }

    async fn rollback(&self, txn: &mut PgTxn) -> Result<(), StoreError> {
        if let Some(tx) = txn.tx.take() {
            // The connection drops the transaction either way; a rollback
            // error is not actionable for the caller.
            if let Err(e) = tx.rollback().await {
                tracing::warn!("Ledger rollback returned an error: {}", e);
            }
        }
        Ok(())
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db)
            if matches!(
                db.code().as_deref(),
                Some(CHECK_VIOLATION) | Some(NUMERIC_OUT_OF_RANGE)
            ) =>
        {
            StoreError::ConstraintViolation(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Database(e),
    }
}

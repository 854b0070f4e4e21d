//! Purchase coordinator
//!
//! Orchestrates one purchase end-to-end with all-or-nothing semantics:
//! validate, read fresh state under one store scope, write, commit. The
//! abort path carries no partial side effects because nothing is written
//! until every check has passed, and a commit-time conflict re-runs the
//! whole evaluation from a fresh scope.

use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::domain::{
    AbortReason, CommittedLine, Pricing, PurchaseLine, PurchaseRequest, StockShortfall,
    TransactionOutcome,
};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, StoreError};

const MAX_COMMIT_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(50);
const BACKOFF_JITTER_MS: u64 = 25;

/// Outcome of one evaluation pass, before commit.
enum Evaluation {
    Commit {
        lines: Vec<CommittedLine>,
        total_cost: i64,
        remaining_balance: i64,
    },
    Abort(AbortReason),
}

/// Coordinator enforcing all-or-nothing purchase semantics over a
/// [`LedgerStore`].
///
/// The store handle is passed in at construction; there is no global
/// connection state. One `execute` call opens exactly one scope per
/// attempt and guarantees it is committed or rolled back on every exit
/// path.
pub struct PurchaseCoordinator<S> {
    store: S,
    pricing: Pricing,
}

impl<S: LedgerStore> PurchaseCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            pricing: Pricing::default(),
        }
    }

    pub fn with_pricing(store: S, pricing: Pricing) -> Self {
        Self { store, pricing }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Execute one purchase request.
    ///
    /// Validation failures come back as aborted outcomes, never as panics
    /// or half-applied state. Optimistic conflicts are retried internally
    /// up to the budget before surfacing as `ConflictDetected`.
    pub async fn execute(&self, request: &PurchaseRequest) -> TransactionOutcome {
        if let Some((index, line)) = request.first_invalid_line() {
            return TransactionOutcome::aborted(AbortReason::InvalidLine {
                index,
                item_id: line.item_id,
                quantity: line.quantity,
            });
        }

        let lines = request.normalized_lines();
        if lines.is_empty() {
            return TransactionOutcome::aborted(AbortReason::EmptyRequest);
        }

        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            match self.try_purchase(request.account_id, &lines).await {
                Ok(outcome) => return outcome,
                Err(e) if e.is_retryable() && attempt + 1 < MAX_COMMIT_ATTEMPTS => {
                    tracing::warn!(
                        "Write conflict, retrying purchase (attempt {}/{})",
                        attempt + 1,
                        MAX_COMMIT_ATTEMPTS
                    );
                    backoff(attempt).await;
                }
                Err(e) if e.is_conflict() => {
                    tracing::warn!("Write conflict persisted past the retry budget: {}", e);
                    return TransactionOutcome::aborted(AbortReason::ConflictDetected);
                }
                Err(e) => return TransactionOutcome::aborted(infrastructure_reason(e)),
            }
        }

        TransactionOutcome::aborted(AbortReason::ConflictDetected)
    }

    /// Credit top-up for an account, with the same conflict retry policy
    /// as purchases. Returns the new balance.
    pub async fn add_credits(&self, account_id: Uuid, amount: i64) -> AppResult<i64> {
        if amount <= 0 {
            return Err(AppError::InvalidRequest(format!(
                "credit amount must be positive (got {})",
                amount
            )));
        }

        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            match self.try_add_credits(account_id, amount).await {
                Ok(balance) => return Ok(balance),
                Err(e) if e.is_retryable() && attempt + 1 < MAX_COMMIT_ATTEMPTS => {
                    tracing::warn!(
                        "Write conflict, retrying credit top-up (attempt {}/{})",
                        attempt + 1,
                        MAX_COMMIT_ATTEMPTS
                    );
                    backoff(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Unavailable("retry budget exhausted".into()).into())
    }

    /// One full evaluation under a fresh scope. `Ok` carries the business
    /// outcome (committed or aborted); `Err` is store-level trouble for the
    /// retry loop to classify.
    async fn try_purchase(
        &self,
        account_id: Uuid,
        lines: &[PurchaseLine],
    ) -> Result<TransactionOutcome, StoreError> {
        let mut txn = self.store.begin().await?;

        match self.evaluate(&mut txn, account_id, lines).await {
            Ok(Evaluation::Commit {
                lines,
                total_cost,
                remaining_balance,
            }) => {
                self.store.commit(txn).await?;
                Ok(TransactionOutcome::Committed {
                    lines,
                    total_cost,
                    remaining_balance,
                })
            }
            Ok(Evaluation::Abort(reason)) => {
                self.store.rollback(&mut txn).await?;
                Ok(TransactionOutcome::aborted(reason))
            }
            Err(e) => {
                if let Err(rb) = self.store.rollback(&mut txn).await {
                    tracing::warn!("Rollback after store failure also failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    /// Validate-then-write under one scope. Writes are only issued once
    /// every check has passed, in normalized line order.
    async fn evaluate(
        &self,
        txn: &mut S::Txn,
        account_id: Uuid,
        lines: &[PurchaseLine],
    ) -> Result<Evaluation, StoreError> {
        let balance = match self.store.account_balance(txn, account_id).await {
            Ok(balance) => balance,
            Err(StoreError::AccountNotFound(_)) => {
                return Ok(Evaluation::Abort(AbortReason::AccountNotFound { account_id }))
            }
            Err(e) => return Err(e),
        };

        let mut stocks = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match self.store.item_stock(txn, line.item_id).await {
                Ok(stock) => stocks.push(stock),
                Err(StoreError::ItemNotFound(_)) => {
                    return Ok(Evaluation::Abort(AbortReason::ItemNotFound {
                        index,
                        item_id: line.item_id,
                    }))
                }
                Err(e) => return Err(e),
            }
        }

        // Cost arithmetic is checked: a quantity large enough to overflow
        // i64 at 20 credits a copy can never be affordable, so it aborts
        // as a credit shortfall instead of panicking or wrapping.
        let mut line_costs = Vec::with_capacity(lines.len());
        let mut total_cost: i64 = 0;
        for line in lines {
            let unit_price = self.pricing.unit_price(line.item_id);
            let line_cost = match line.quantity.checked_mul(unit_price) {
                Some(cost) => cost,
                None => return Ok(Evaluation::Abort(unaffordable(balance))),
            };
            total_cost = match total_cost.checked_add(line_cost) {
                Some(sum) => sum,
                None => return Ok(Evaluation::Abort(unaffordable(balance))),
            };
            line_costs.push(line_cost);
        }
        if balance < total_cost {
            return Ok(Evaluation::Abort(AbortReason::InsufficientCredits {
                required: total_cost,
                available: balance,
            }));
        }

        // Report every under-stocked line, not just the first.
        let shortfalls: Vec<StockShortfall> = lines
            .iter()
            .zip(&stocks)
            .filter(|(line, stock)| **stock < line.quantity)
            .map(|(line, stock)| StockShortfall {
                item_id: line.item_id,
                requested: line.quantity,
                available: *stock,
            })
            .collect();
        if !shortfalls.is_empty() {
            return Ok(Evaluation::Abort(AbortReason::InsufficientStock {
                lines: shortfalls,
            }));
        }

        self.store.debit_account(txn, account_id, total_cost).await?;

        let mut committed = Vec::with_capacity(lines.len());
        for ((line, stock), line_cost) in lines.iter().zip(&stocks).zip(&line_costs) {
            self.store
                .decrement_item_stock(txn, line.item_id, line.quantity)
                .await?;
            committed.push(CommittedLine {
                item_id: line.item_id,
                quantity: line.quantity,
                unit_price: self.pricing.unit_price(line.item_id),
                line_cost: *line_cost,
                remaining_stock: stock - line.quantity,
            });
        }

        Ok(Evaluation::Commit {
            lines: committed,
            total_cost,
            remaining_balance: balance - total_cost,
        })
    }

    async fn try_add_credits(&self, account_id: Uuid, amount: i64) -> Result<i64, StoreError> {
        let mut txn = self.store.begin().await?;

        let balance = match self.store.account_balance(&mut txn, account_id).await {
            Ok(balance) => balance,
            Err(e) => {
                if let Err(rb) = self.store.rollback(&mut txn).await {
                    tracing::warn!("Rollback after store failure also failed: {}", rb);
                }
                return Err(e);
            }
        };

        let new_balance = match balance.checked_add(amount) {
            Some(new_balance) => new_balance,
            None => {
                if let Err(rb) = self.store.rollback(&mut txn).await {
                    tracing::warn!("Rollback after store failure also failed: {}", rb);
                }
                return Err(StoreError::ConstraintViolation(format!(
                    "credit would overflow balance of account {}",
                    account_id
                )));
            }
        };

        if let Err(e) = self.store.credit_account(&mut txn, account_id, amount).await {
            if let Err(rb) = self.store.rollback(&mut txn).await {
                tracing::warn!("Rollback after store failure also failed: {}", rb);
            }
            return Err(e);
        }

        self.store.commit(txn).await?;
        Ok(new_balance)
    }
}

/// A request whose cost exceeds the i64 credit range can never be paid
/// for; the exact total is unrepresentable, so the shortfall reports the
/// ceiling.
fn unaffordable(balance: i64) -> AbortReason {
    AbortReason::InsufficientCredits {
        required: i64::MAX,
        available: balance,
    }
}

/// Map a store failure to the generic abort surfaced to the caller.
/// Constraint trips are logged distinctly: coordinator validation should
/// have made them unreachable.
fn infrastructure_reason(e: StoreError) -> AbortReason {
    match &e {
        StoreError::ConstraintViolation(_) => {
            tracing::error!(
                "Ledger constraint guard tripped, coordinator validation is out of sync: {}",
                e
            );
        }
        _ => {
            tracing::error!("Ledger store failure during purchase: {}", e);
        }
    }
    AbortReason::StoreUnavailable
}

async fn backoff(attempt: u32) {
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    let delay = BACKOFF_BASE * (attempt + 1) + Duration::from_millis(jitter);
    tokio::time::sleep(delay).await;
}

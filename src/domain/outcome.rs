//! Transaction outcomes
//!
//! The `TransactionOutcome` is the sole contract the coordinator exposes to
//! its caller. It carries enough structured detail (per-line results,
//! shortfalls, total cost) that a presentation layer can render a
//! confirmation or explanation without re-querying the store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one committed purchase line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedLine {
    pub item_id: Uuid,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_cost: i64,
    /// Stock left after this purchase was applied.
    pub remaining_stock: i64,
}

/// One under-stocked line of an aborted purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub item_id: Uuid,
    pub requested: i64,
    pub available: i64,
}

/// Why a purchase was aborted.
///
/// Validation failures are expected business outcomes, not exceptions.
/// `ConflictDetected` and `StoreUnavailable` are the terminal forms of
/// infrastructure trouble after internal retry handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AbortReason {
    /// No lines remained after normalization.
    #[error("request contained no purchase lines")]
    EmptyRequest,

    /// A line carried a non-positive quantity.
    #[error("invalid quantity {quantity} on line {index}")]
    InvalidLine {
        index: usize,
        item_id: Uuid,
        quantity: i64,
    },

    #[error("account not found: {account_id}")]
    AccountNotFound { account_id: Uuid },

    /// Names the first offending line; the whole request is rejected.
    #[error("item not found: {item_id} (line {index})")]
    ItemNotFound { index: usize, item_id: Uuid },

    #[error("not enough credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// Names every under-stocked line so the caller can offer alternatives.
    #[error("not enough stock on {} line(s)", .lines.len())]
    InsufficientStock { lines: Vec<StockShortfall> },

    /// Optimistic conflict persisted past the retry budget.
    #[error("write conflict persisted past the retry budget")]
    ConflictDetected,

    #[error("ledger storage unavailable")]
    StoreUnavailable,
}

impl AbortReason {
    /// Credits missing when aborted with `InsufficientCredits`.
    pub fn shortfall(&self) -> Option<i64> {
        match self {
            Self::InsufficientCredits {
                required,
                available,
            } => Some(required - available),
            _ => None,
        }
    }

    /// Infrastructure failures are logged with full context and surfaced
    /// generically; everything else is the caller's business outcome.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::ConflictDetected | Self::StoreUnavailable)
    }
}

/// Outcome of one purchase evaluation. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionOutcome {
    Committed {
        lines: Vec<CommittedLine>,
        total_cost: i64,
        remaining_balance: i64,
    },
    Aborted {
        reason: AbortReason,
    },
}

impl TransactionOutcome {
    pub fn aborted(reason: AbortReason) -> Self {
        Self::Aborted { reason }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Self::Aborted { reason } => Some(reason),
            Self::Committed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfall_reported_for_insufficient_credits() {
        let reason = AbortReason::InsufficientCredits {
            required: 40,
            available: 30,
        };
        assert_eq!(reason.shortfall(), Some(10));
        assert!(!reason.is_infrastructure());
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(AbortReason::ConflictDetected.is_infrastructure());
        assert!(AbortReason::StoreUnavailable.is_infrastructure());
        assert!(!AbortReason::EmptyRequest.is_infrastructure());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = TransactionOutcome::aborted(AbortReason::EmptyRequest);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["reason"]["code"], "empty_request");

        let outcome = TransactionOutcome::Committed {
            lines: vec![],
            total_cost: 60,
            remaining_balance: 40,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "committed");
        assert_eq!(json["total_cost"], 60);
    }

    #[test]
    fn test_insufficient_stock_names_every_line() {
        let reason = AbortReason::InsufficientStock {
            lines: vec![
                StockShortfall {
                    item_id: Uuid::new_v4(),
                    requested: 2,
                    available: 1,
                },
                StockShortfall {
                    item_id: Uuid::new_v4(),
                    requested: 5,
                    available: 0,
                },
            ],
        };
        assert!(reason.to_string().contains("2 line(s)"));
    }
}

//! Purchase request types
//!
//! A `PurchaseRequest` is the structured, fully-resolved input produced by
//! the upstream search/intent collaborator: item identifiers already matched
//! to exact items, quantities already parsed. The coordinator still rejects
//! malformed lines defensively.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One requested item: identifier plus how many copies.
///
/// Quantity is carried signed so that a malformed upstream value can be
/// rejected explicitly instead of wrapping at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub item_id: Uuid,
    pub quantity: i64,
}

impl PurchaseLine {
    pub fn new(item_id: Uuid, quantity: i64) -> Self {
        Self { item_id, quantity }
    }
}

/// A purchase request for one account.
///
/// Multiple lines may reference the same item; they are semantically one
/// line with the quantities summed. Requests are ephemeral and never
/// persisted independently of their outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub account_id: Uuid,
    pub lines: Vec<PurchaseLine>,
}

impl PurchaseRequest {
    pub fn new(account_id: Uuid) -> Self {
        Self {
            account_id,
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, item_id: Uuid, quantity: i64) -> Self {
        self.lines.push(PurchaseLine::new(item_id, quantity));
        self
    }

    /// First line with a non-positive quantity, if any.
    pub fn first_invalid_line(&self) -> Option<(usize, &PurchaseLine)> {
        self.lines
            .iter()
            .enumerate()
            .find(|(_, line)| line.quantity <= 0)
    }

    /// Sum duplicate item references into one line each, preserving the
    /// order in which each item first appeared. Validation against stock
    /// must run on this form to avoid double-counting a shared item.
    pub fn normalized_lines(&self) -> Vec<PurchaseLine> {
        let mut normalized: Vec<PurchaseLine> = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            match normalized.iter_mut().find(|n| n.item_id == line.item_id) {
                // Saturate instead of wrapping: a sum past i64::MAX can
                // never pass the stock or cost checks anyway.
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(line.quantity)
                }
                None => normalized.push(*line),
            }
        }
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_sums_duplicates() {
        let item_a = Uuid::new_v4();
        let item_b = Uuid::new_v4();

        let request = PurchaseRequest::new(Uuid::new_v4())
            .with_line(item_a, 2)
            .with_line(item_b, 1)
            .with_line(item_a, 3);

        let normalized = request.normalized_lines();
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0], PurchaseLine::new(item_a, 5));
        assert_eq!(normalized[1], PurchaseLine::new(item_b, 1));
    }

    #[test]
    fn test_normalization_preserves_first_seen_order() {
        let item_a = Uuid::new_v4();
        let item_b = Uuid::new_v4();
        let item_c = Uuid::new_v4();

        let request = PurchaseRequest::new(Uuid::new_v4())
            .with_line(item_c, 1)
            .with_line(item_a, 1)
            .with_line(item_b, 1)
            .with_line(item_c, 4);

        let ids: Vec<Uuid> = request
            .normalized_lines()
            .iter()
            .map(|l| l.item_id)
            .collect();
        assert_eq!(ids, vec![item_c, item_a, item_b]);
    }

    #[test]
    fn test_normalization_saturates_instead_of_wrapping() {
        let item = Uuid::new_v4();
        let request = PurchaseRequest::new(Uuid::new_v4())
            .with_line(item, i64::MAX - 1)
            .with_line(item, i64::MAX - 1);

        let normalized = request.normalized_lines();
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].quantity, i64::MAX);
    }

    #[test]
    fn test_first_invalid_line() {
        let item = Uuid::new_v4();
        let request = PurchaseRequest::new(Uuid::new_v4())
            .with_line(item, 2)
            .with_line(item, 0)
            .with_line(item, -3);

        let (index, line) = request.first_invalid_line().unwrap();
        assert_eq!(index, 1);
        assert_eq!(line.quantity, 0);
    }

    #[test]
    fn test_empty_request_has_no_invalid_line() {
        let request = PurchaseRequest::new(Uuid::new_v4());
        assert!(request.first_invalid_line().is_none());
        assert!(request.normalized_lines().is_empty());
    }
}

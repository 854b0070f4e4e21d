//! Pricing policy
//!
//! Every copy costs a flat 20 credits unless an external pricing policy
//! overrides the price for a specific item.

use std::collections::HashMap;

use uuid::Uuid;

/// Flat price per copy, in credit units.
pub const DEFAULT_UNIT_PRICE: i64 = 20;

/// Per-item price resolution with a flat default.
#[derive(Debug, Clone)]
pub struct Pricing {
    default_unit_price: i64,
    overrides: HashMap<Uuid, i64>,
}

impl Pricing {
    pub fn new(default_unit_price: i64) -> Self {
        Self {
            default_unit_price,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, item_id: Uuid, unit_price: i64) -> Self {
        self.overrides.insert(item_id, unit_price);
        self
    }

    /// Price of one copy of the given item.
    pub fn unit_price(&self, item_id: Uuid) -> i64 {
        self.overrides
            .get(&item_id)
            .copied()
            .unwrap_or(self.default_unit_price)
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT_PRICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_unit_price() {
        let pricing = Pricing::default();
        assert_eq!(pricing.unit_price(Uuid::new_v4()), 20);
    }

    #[test]
    fn test_override_applies_only_to_named_item() {
        let discounted = Uuid::new_v4();
        let pricing = Pricing::default().with_override(discounted, 15);

        assert_eq!(pricing.unit_price(discounted), 15);
        assert_eq!(pricing.unit_price(Uuid::new_v4()), 20);
    }
}

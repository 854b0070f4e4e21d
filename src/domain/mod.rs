//! Domain module
//!
//! Core domain types for purchase processing.

pub mod outcome;
pub mod pricing;
pub mod request;

pub use outcome::{AbortReason, CommittedLine, StockShortfall, TransactionOutcome};
pub use pricing::{Pricing, DEFAULT_UNIT_PRICE};
pub use request::{PurchaseLine, PurchaseRequest};

//! Error handling module
//!
//! Crate-level error types. Business outcomes of a purchase are carried by
//! [`crate::domain::TransactionOutcome`], never by these errors.

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

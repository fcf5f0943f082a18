// src/error.rs
use thiserror::Error;

/// Failure reported by a ledger or source store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),
    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage call timed out")]
    Timeout,
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    /// A handler failed without producing a result (panic or cancelled task).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a rejected balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("Invalid amount")]
    InvalidAmount,
    #[error("No cashback found for owner")]
    NoBalance,
    #[error("Insufficient cashback amount")]
    InsufficientFunds,
    #[error("Mutation queue is saturated")]
    QueueSaturated,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    /// Exactly one of `turon_user_id` or `cinerama_user_id` must identify the owner.
    #[error("Cannot determine source: exactly one owner id must be provided")]
    AmbiguousOwner,
    #[error("Failed to resolve source: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by [`crate::CashbackService`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CashbackError {
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("Invalid {field} format. Use YYYY-MM-DD")]
    InvalidDate { field: &'static str, value: String },
    #[error("Cashback not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CashbackError {
    /// True when the caller sent something malformed, as opposed to a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Mutation(
                MutationError::InvalidAmount
                    | MutationError::NoBalance
                    | MutationError::InsufficientFunds
            ) | Self::Resolver(ResolverError::AmbiguousOwner)
                | Self::InvalidDate { .. }
                | Self::NotFound
        )
    }
}

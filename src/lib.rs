// src/lib.rs
pub mod adapters;
pub mod amount;
pub mod balance;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod owner;
pub mod pagination;
pub mod service;
pub mod source;
pub mod telemetry;

pub use amount::Amount;
pub use balance::Balance;
pub use config::{Config, ConfigError, DatabaseConfig};
pub use coordinator::{Ack, Coordinator, CoordinatorConfig, MutationRequest};
pub use error::{CashbackError, MutationError, ResolverError, StoreError};
pub use history::{HistoryEntry, HistoryFilter, NewHistoryEntry, OperationKind, Origin};
pub use owner::{OwnerIdentity, OwnerKey, OwnerKind};
pub use pagination::{Page, PageRequest};
pub use service::{CashbackRequest, CashbackService, HistoryQuery};
pub use source::{NewSource, Source, SourceResolver};

use async_trait::async_trait;
use uuid::Uuid;

/// Balance and history persistence.
///
/// Each call must be atomic on its own. No transaction spans calls: the
/// coordinator's owner lanes are what make read-then-write safe.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Live (not soft-deleted) balance of `owner`, if any.
    async fn get_balance(&self, owner: OwnerKey) -> Result<Option<Balance>, StoreError>;

    async fn create_balance(&self, owner: OwnerKey, amount: Amount)
    -> Result<Balance, StoreError>;

    async fn update_balance_amount(&self, balance_id: Uuid, amount: Amount)
    -> Result<(), StoreError>;

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError>;

    /// Entries for `owner`, newest first, plus the total matching `filter`.
    async fn get_history(
        &self,
        owner: OwnerKey,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> Result<(Vec<HistoryEntry>, i64), StoreError>;
}

/// Source persistence. Implementors MUST reject a second live row for the
/// same slug with [`StoreError::Conflict`].
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get_source_by_slug(&self, slug: &str) -> Result<Option<Source>, StoreError>;

    async fn create_source(&self, source: NewSource) -> Result<Source, StoreError>;
}

/// Connects to Postgres, prepares the schema and starts a service.
#[cfg(feature = "postgres")]
pub async fn connect(config: &Config) -> Result<CashbackService, StoreError> {
    use std::sync::Arc;

    let store = Arc::new(adapters::PostgresStore::connect(&config.database).await?);
    store.init_schema().await?;

    Ok(CashbackService::new(
        store.clone(),
        store,
        &config.coordinator,
    ))
}

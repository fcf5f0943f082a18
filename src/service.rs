// src/service.rs
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::{
    Ack, Amount, Balance, CashbackError, Coordinator, CoordinatorConfig, HistoryEntry,
    HistoryFilter, LedgerStore, MutationError, MutationRequest, OperationKind, Origin,
    OwnerIdentity, OwnerKey, Page, PageRequest, SourceResolver, SourceStore, StoreError,
};

/// Body of an increase/decrease call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CashbackRequest {
    #[serde(flatten)]
    pub owner: OwnerIdentity,
    pub cashback_amount: f64,
    /// Filled in from the connection, not the body.
    #[serde(default)]
    pub host_ip: String,
    /// Client descriptor, usually the `User-Agent` header.
    #[serde(default)]
    pub device: String,
}

/// Query parameters of a history listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryQuery {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Entry point for callers: validates requests, resolves sources and hands
/// mutations to the coordinator. Reads go straight to the ledger store.
pub struct CashbackService {
    ledger: Arc<dyn LedgerStore>,
    resolver: SourceResolver,
    coordinator: Coordinator,
    submit_timeout: Option<Duration>,
}

impl CashbackService {
    /// Must be called from within a tokio runtime.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        sources: Arc<dyn SourceStore>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            coordinator: Coordinator::spawn(Arc::clone(&ledger), config),
            ledger,
            resolver: SourceResolver::new(sources),
            submit_timeout: config.submit_timeout,
        }
    }

    pub async fn increase(&self, request: CashbackRequest) -> Result<Ack, CashbackError> {
        self.mutate(OperationKind::Increase, request).await
    }

    pub async fn decrease(&self, request: CashbackRequest) -> Result<Ack, CashbackError> {
        self.mutate(OperationKind::Decrease, request).await
    }

    #[instrument(skip(self, request), fields(owner = tracing::field::Empty))]
    async fn mutate(
        &self,
        kind: OperationKind,
        request: CashbackRequest,
    ) -> Result<Ack, CashbackError> {
        let amount = Amount::from_display(request.cashback_amount)?;
        let owner = request.owner.classify()?;
        tracing::Span::current().record("owner", tracing::field::display(owner));

        let origin = Origin::new(request.host_ip, request.device);
        let source = self
            .resolver
            .resolve_kind(owner.kind, &origin)
            .await?;

        let submit = self.coordinator.submit(MutationRequest {
            owner,
            kind,
            amount,
            source_id: source.id,
            origin,
        });

        let ack = match self.submit_timeout {
            None => submit.await?,
            Some(limit) => tokio::time::timeout(limit, submit)
                .await
                .map_err(|_| MutationError::Store(StoreError::Timeout))??,
        };

        info!(%kind, %amount, balance = %ack.balance, "cashback updated");
        Ok(ack)
    }

    pub async fn balance(&self, owner: OwnerKey) -> Result<Balance, CashbackError> {
        self.ledger
            .get_balance(owner)
            .await?
            .ok_or(CashbackError::NotFound)
    }

    pub async fn history(
        &self,
        owner: OwnerKey,
        query: &HistoryQuery,
    ) -> Result<Page<HistoryEntry>, CashbackError> {
        let filter = HistoryFilter::parse(query.from_date.as_deref(), query.to_date.as_deref())?;
        let page = PageRequest::new(query.page, query.page_size);

        let (entries, total) = self.ledger.get_history(owner, &filter, &page).await?;
        Ok(Page::new(entries, page, total))
    }

    /// Number of owners with mutations queued or running.
    pub fn active_owners(&self) -> usize {
        self.coordinator.active_lanes()
    }

    /// Stops accepting mutations and waits for the admitted ones to finish.
    pub async fn shutdown(self) {
        self.coordinator.shutdown().await;
    }
}

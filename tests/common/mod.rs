// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use cashback::adapters::MemoryStore;
use cashback::{
    Amount, Balance, CashbackRequest, CashbackService, CoordinatorConfig, HistoryEntry,
    HistoryFilter, LedgerStore, NewHistoryEntry, NewSource, OwnerIdentity, OwnerKey, PageRequest,
    Source, SourceStore, StoreError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, Notify, Semaphore};
use uuid::Uuid;

pub fn service(store: &MemoryStore) -> CashbackService {
    service_with(store, CoordinatorConfig::default())
}

pub fn service_with(store: &MemoryStore, config: CoordinatorConfig) -> CashbackService {
    CashbackService::new(Arc::new(store.clone()), Arc::new(store.clone()), &config)
}

pub fn request(identity: OwnerIdentity, amount: f64) -> CashbackRequest {
    CashbackRequest {
        owner: identity,
        cashback_amount: amount,
        host_ip: "192.168.1.1".to_string(),
        device: "Mozilla/5.0".to_string(),
    }
}

pub fn cents(minor: i64) -> Amount {
    Amount::from_minor(minor).unwrap()
}

pub async fn source(store: &MemoryStore, slug: &str) -> Source {
    store
        .create_source(NewSource {
            slug: slug.to_string(),
            host_ip: "127.0.0.1".to_string(),
        })
        .await
        .unwrap()
}

/// Polls until `check` holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Parks every `get_balance` for one owner until the test releases it.
#[derive(Clone)]
pub struct GatedStore {
    pub inner: MemoryStore,
    gated: OwnerKey,
    pub entered: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl GatedStore {
    pub fn new(inner: MemoryStore, gated: OwnerKey) -> Self {
        Self {
            inner,
            gated,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        }
    }

    /// Lets `n` parked (or future) calls through.
    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }
}

#[async_trait]
impl LedgerStore for GatedStore {
    async fn get_balance(&self, owner: OwnerKey) -> Result<Option<Balance>, StoreError> {
        if owner == self.gated {
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
        }
        self.inner.get_balance(owner).await
    }

    async fn create_balance(
        &self,
        owner: OwnerKey,
        amount: Amount,
    ) -> Result<Balance, StoreError> {
        self.inner.create_balance(owner, amount).await
    }

    async fn update_balance_amount(&self, id: Uuid, amount: Amount) -> Result<(), StoreError> {
        self.inner.update_balance_amount(id, amount).await
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        self.inner.append_history(entry).await
    }

    async fn get_history(
        &self,
        owner: OwnerKey,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> Result<(Vec<HistoryEntry>, i64), StoreError> {
        self.inner.get_history(owner, filter, page).await
    }
}

/// Panics inside `get_balance` once for the given owner.
pub struct PanicOnceStore {
    pub inner: MemoryStore,
    owner: OwnerKey,
    armed: AtomicBool,
}

impl PanicOnceStore {
    pub fn new(inner: MemoryStore, owner: OwnerKey) -> Self {
        Self {
            inner,
            owner,
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl LedgerStore for PanicOnceStore {
    async fn get_balance(&self, owner: OwnerKey) -> Result<Option<Balance>, StoreError> {
        if owner == self.owner && self.armed.swap(false, Ordering::SeqCst) {
            panic!("store exploded");
        }
        self.inner.get_balance(owner).await
    }

    async fn create_balance(
        &self,
        owner: OwnerKey,
        amount: Amount,
    ) -> Result<Balance, StoreError> {
        self.inner.create_balance(owner, amount).await
    }

    async fn update_balance_amount(&self, id: Uuid, amount: Amount) -> Result<(), StoreError> {
        self.inner.update_balance_amount(id, amount).await
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        self.inner.append_history(entry).await
    }

    async fn get_history(
        &self,
        owner: OwnerKey,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> Result<(Vec<HistoryEntry>, i64), StoreError> {
        self.inner.get_history(owner, filter, page).await
    }
}

/// Holds the first `racers` lookups that miss until all of them have missed,
/// so they all go on to insert.
pub struct RacingSourceStore {
    pub inner: MemoryStore,
    racers: usize,
    misses: AtomicUsize,
    barrier: Barrier,
}

impl RacingSourceStore {
    pub fn new(inner: MemoryStore, racers: usize) -> Self {
        Self {
            inner,
            racers,
            misses: AtomicUsize::new(0),
            barrier: Barrier::new(racers),
        }
    }
}

#[async_trait]
impl SourceStore for RacingSourceStore {
    async fn get_source_by_slug(&self, slug: &str) -> Result<Option<Source>, StoreError> {
        let found = self.inner.get_source_by_slug(slug).await?;
        if found.is_none() && self.misses.fetch_add(1, Ordering::SeqCst) < self.racers {
            self.barrier.wait().await;
        }
        Ok(found)
    }

    async fn create_source(&self, source: NewSource) -> Result<Source, StoreError> {
        self.inner.create_source(source).await
    }
}

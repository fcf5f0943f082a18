// src/adapters/memory.rs
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    Amount, Balance, HistoryEntry, HistoryFilter, LedgerStore, NewHistoryEntry, NewSource,
    OwnerKey, PageRequest, Source, SourceStore, StoreError,
};

#[derive(Default)]
struct MemoryState {
    balances: HashMap<Uuid, Balance>,
    live_balances: HashMap<OwnerKey, Uuid>,
    // Commit order.
    history: Vec<HistoryEntry>,
    sources: HashMap<Uuid, Source>,
    live_slugs: HashMap<String, Uuid>,
}

impl MemoryState {
    fn slug_of(&self, source_id: Uuid) -> Option<String> {
        self.sources
            .get(&source_id)
            .filter(|s| s.deleted_at.is_none())
            .map(|s| s.slug.clone())
    }
}

/// In-process store. Every call runs under a single lock, so each call is atomic
/// and constraints (one live balance per owner, one live source per slug) hold.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows recorded for `owner`, across all of its balances.
    pub fn history_count(&self, owner: OwnerKey) -> usize {
        let state = self.state.lock();
        let ids = owner_balance_ids(&state, owner);
        state
            .history
            .iter()
            .filter(|e| ids.contains(&e.balance_id))
            .count()
    }

    /// Ledger rows for `owner` in commit order (oldest first).
    pub fn history_in_commit_order(&self, owner: OwnerKey) -> Vec<HistoryEntry> {
        let state = self.state.lock();
        let ids = owner_balance_ids(&state, owner);
        state
            .history
            .iter()
            .filter(|e| ids.contains(&e.balance_id))
            .map(|e| HistoryEntry {
                source_slug: state.slug_of(e.source_id),
                ..e.clone()
            })
            .collect()
    }

    /// All source rows with `slug`, including soft-deleted ones.
    pub fn source_rows(&self, slug: &str) -> usize {
        self.state
            .lock()
            .sources
            .values()
            .filter(|s| s.slug == slug)
            .count()
    }

    /// Marks the owner's live balance as deleted. The next increase starts a new one.
    pub fn soft_delete_balance(&self, owner: OwnerKey) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.live_balances.remove(&owner) else {
            return false;
        };
        if let Some(balance) = state.balances.get_mut(&id) {
            balance.deleted_at = Some(Utc::now());
        }
        true
    }
}

fn owner_balance_ids(state: &MemoryState, owner: OwnerKey) -> HashSet<Uuid> {
    state
        .balances
        .values()
        .filter(|b| b.owner == owner)
        .map(|b| b.id)
        .collect()
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_balance(&self, owner: OwnerKey) -> Result<Option<Balance>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .live_balances
            .get(&owner)
            .and_then(|id| state.balances.get(id))
            .cloned())
    }

    async fn create_balance(
        &self,
        owner: OwnerKey,
        amount: Amount,
    ) -> Result<Balance, StoreError> {
        let mut state = self.state.lock();
        if state.live_balances.contains_key(&owner) {
            return Err(StoreError::Conflict(format!("balance for {owner} exists")));
        }

        let balance = Balance::new(owner, amount);
        state.live_balances.insert(owner, balance.id);
        state.balances.insert(balance.id, balance.clone());
        Ok(balance)
    }

    async fn update_balance_amount(
        &self,
        balance_id: Uuid,
        amount: Amount,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let balance = state
            .balances
            .get_mut(&balance_id)
            .filter(|b| !b.is_deleted())
            .ok_or_else(|| StoreError::Backend(format!("balance {balance_id} not found")))?;

        balance.amount = amount;
        balance.updated_at = Utc::now();
        Ok(())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        let mut state = self.state.lock();
        if !state.balances.contains_key(&entry.balance_id) {
            return Err(StoreError::Backend(format!(
                "balance {} not found",
                entry.balance_id
            )));
        }
        if !state.sources.contains_key(&entry.source_id) {
            return Err(StoreError::Backend(format!(
                "source {} not found",
                entry.source_id
            )));
        }

        let slug = state.slug_of(entry.source_id);
        let entry = HistoryEntry::from_new(entry, slug);
        state.history.push(entry.clone());
        Ok(entry)
    }

    async fn get_history(
        &self,
        owner: OwnerKey,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> Result<(Vec<HistoryEntry>, i64), StoreError> {
        let state = self.state.lock();
        let ids = owner_balance_ids(&state, owner);

        let matching: Vec<&HistoryEntry> = state
            .history
            .iter()
            .rev()
            .filter(|e| ids.contains(&e.balance_id) && filter.matches(e.created_at))
            .collect();

        let total = matching.len() as i64;
        let entries = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|e| HistoryEntry {
                source_slug: state.slug_of(e.source_id),
                ..e.clone()
            })
            .collect();

        Ok((entries, total))
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn get_source_by_slug(&self, slug: &str) -> Result<Option<Source>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .live_slugs
            .get(slug)
            .and_then(|id| state.sources.get(id))
            .cloned())
    }

    async fn create_source(&self, source: NewSource) -> Result<Source, StoreError> {
        let mut state = self.state.lock();
        if state.live_slugs.contains_key(&source.slug) {
            return Err(StoreError::Conflict(format!(
                "source slug {} already exists",
                source.slug
            )));
        }

        let source = Source::from_new(source);
        state.live_slugs.insert(source.slug.clone(), source.id);
        state.sources.insert(source.id, source.clone());
        Ok(source)
    }
}

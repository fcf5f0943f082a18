// src/coordinator/budget.rs
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::{MutationError, OwnerKey, StoreError};

/// Per-owner admission budgets.
///
/// Submitters take a unit of their owner's budget before entering the ingress
/// queue and hand it back once their operation is answered, so a flooded owner
/// makes its own submitters wait and never the dispatcher. An owner's entry
/// lives exactly as long as some [`Budget`] for it does.
pub(crate) struct BudgetRegistry {
    limit: usize,
    owners: Mutex<HashMap<OwnerKey, OwnerBudget>>,
}

struct OwnerBudget {
    permits: Arc<Semaphore>,
    holders: usize,
}

/// A claim on one owner's budget. Holds a permit once acquired; dropping it
/// (answered, or abandoned while waiting) releases both.
pub(crate) struct Budget {
    owner: OwnerKey,
    registry: Arc<BudgetRegistry>,
    permit: Option<OwnedSemaphorePermit>,
}

impl BudgetRegistry {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.clamp(1, Semaphore::MAX_PERMITS),
            owners: Mutex::new(HashMap::new()),
        })
    }

    /// Waits until `owner` has budget left.
    pub(crate) async fn acquire(self: &Arc<Self>, owner: OwnerKey) -> Result<Budget, MutationError> {
        let (mut budget, permits) = self.enter(owner);
        let permit = permits.acquire_owned().await.map_err(|_| closed())?;
        budget.permit = Some(permit);
        Ok(budget)
    }

    /// Fails with [`MutationError::QueueSaturated`] instead of waiting.
    pub(crate) fn try_acquire(self: &Arc<Self>, owner: OwnerKey) -> Result<Budget, MutationError> {
        let (mut budget, permits) = self.enter(owner);
        match permits.try_acquire_owned() {
            Ok(permit) => {
                budget.permit = Some(permit);
                Ok(budget)
            }
            Err(TryAcquireError::NoPermits) => Err(MutationError::QueueSaturated),
            Err(TryAcquireError::Closed) => Err(closed()),
        }
    }

    /// Owners holding or waiting for budget.
    pub(crate) fn len(&self) -> usize {
        self.owners.lock().len()
    }

    fn enter(self: &Arc<Self>, owner: OwnerKey) -> (Budget, Arc<Semaphore>) {
        let mut owners = self.owners.lock();
        let entry = owners.entry(owner).or_insert_with(|| OwnerBudget {
            permits: Arc::new(Semaphore::new(self.limit)),
            holders: 0,
        });
        entry.holders += 1;

        let budget = Budget {
            owner,
            registry: Arc::clone(self),
            permit: None,
        };
        (budget, Arc::clone(&entry.permits))
    }

    fn leave(&self, owner: OwnerKey) {
        let mut owners = self.owners.lock();
        if let Entry::Occupied(mut entry) = owners.entry(owner) {
            entry.get_mut().holders -= 1;
            if entry.get().holders == 0 {
                entry.remove();
            }
        }
    }
}

impl Drop for Budget {
    fn drop(&mut self) {
        // Hand the permit back before the entry can be evicted.
        drop(self.permit.take());
        self.registry.leave(self.owner);
    }
}

fn closed() -> MutationError {
    StoreError::Unavailable("owner budget closed".to_string()).into()
}

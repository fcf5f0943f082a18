// src/coordinator/lanes.rs
use metrics::gauge;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::OwnerKey;

/// Per-owner FIFO lanes.
///
/// An entry exists exactly while a worker is draining it: `route` opens the lane
/// and tells the caller to start a worker, `next` closes it once the worker finds
/// it empty. Both run under one short lock so an item can never be pushed onto a
/// lane whose worker has already exited.
pub(crate) struct LaneRegistry<T> {
    lanes: Mutex<HashMap<OwnerKey, VecDeque<T>>>,
}

impl<T> LaneRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Appends `item` to the owner's lane. Returns `true` when the lane was
    /// just opened and needs a worker.
    pub(crate) fn route(&self, owner: OwnerKey, item: T) -> bool {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get_mut(&owner) {
            lane.push_back(item);
            return false;
        }

        lanes.insert(owner, VecDeque::from([item]));
        gauge!("cashback.lanes.active").set(lanes.len() as f64);
        true
    }

    /// Pops the next item for a lane's worker, closing the lane when empty.
    pub(crate) fn next(&self, owner: OwnerKey) -> Option<T> {
        let mut lanes = self.lanes.lock();
        let lane = lanes.get_mut(&owner)?;

        match lane.pop_front() {
            Some(item) => Some(item),
            None => {
                lanes.remove(&owner);
                gauge!("cashback.lanes.active").set(lanes.len() as f64);
                None
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lanes.lock().len()
    }
}

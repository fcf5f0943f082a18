// src/coordinator/mod.rs
//! Serialized balance-mutation coordinator.
//!
//! ```text
//! submit ──► ingress (bounded) ──► dispatcher ──► lane[owner] ──► spawned handler
//!    ▲                                                                  │
//!    └──────────────────────── oneshot reply ◄──────────────────────────┘
//! ```
//!
//! The dispatcher only routes. Each owner gets a FIFO lane drained by its own
//! task, and each operation's handler runs in a task of its own so that a panic
//! is contained and still answered. Submitters take a unit of their owner's
//! budget before entering the queue, so a flooded owner backs up its own callers
//! and nothing else.
mod budget;
mod handlers;
mod lanes;

use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    Amount, HistoryEntry, LedgerStore, MutationError, OperationKind, Origin, OwnerKey, StoreError,
};
use budget::{Budget, BudgetRegistry};
use lanes::LaneRegistry;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Ingress queue size. Submitters wait once it is full.
    pub queue_capacity: usize,
    /// Admitted but unanswered operations per owner. Further submitters for
    /// that owner wait before entering the ingress queue.
    pub max_in_flight: usize,
    /// Upper bound a [`crate::CashbackService`] waits for a mutation. `None` waits forever.
    pub submit_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            submit_timeout: None,
        }
    }
}

/// A fully validated mutation for one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub owner: OwnerKey,
    pub kind: OperationKind,
    pub amount: Amount,
    pub source_id: Uuid,
    pub origin: Origin,
}

/// Acknowledgment of an accepted mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    /// The ledger row written for this mutation.
    pub entry: HistoryEntry,
    /// Balance amount right after this mutation committed.
    pub balance: Amount,
}

type Reply = oneshot::Sender<Result<Ack, MutationError>>;

/// A queued mutation. Holds one unit of its owner's budget until answered.
struct Operation {
    request: MutationRequest,
    reply: Reply,
    budget: Budget,
}

pub struct Coordinator {
    ingress: mpsc::Sender<Operation>,
    lanes: Arc<LaneRegistry<Operation>>,
    budgets: Arc<BudgetRegistry>,
    dispatcher: JoinHandle<()>,
}

impl Coordinator {
    /// Starts the dispatcher on the current tokio runtime.
    pub fn spawn(store: Arc<dyn LedgerStore>, config: &CoordinatorConfig) -> Self {
        let (ingress, rx) = mpsc::channel(config.queue_capacity.max(1));
        let lanes = Arc::new(LaneRegistry::new());
        let dispatcher = tokio::spawn(dispatch(rx, Arc::clone(&lanes), store));

        Self {
            ingress,
            lanes,
            budgets: BudgetRegistry::new(config.max_in_flight),
            dispatcher,
        }
    }

    /// Queues a mutation and waits for its result.
    ///
    /// Waits for the owner's budget and then for queue space; nothing is dropped.
    /// Dropping the returned future abandons the wait. Once queued, the
    /// mutation still runs.
    pub async fn submit(&self, request: MutationRequest) -> Result<Ack, MutationError> {
        let budget = self.budgets.acquire(request.owner).await?;
        let (reply, rx) = oneshot::channel();
        self.ingress
            .send(Operation {
                request,
                reply,
                budget,
            })
            .await
            .map_err(|_| shut_down())?;

        await_reply(rx).await
    }

    /// Like [`submit`](Self::submit) but fails with [`MutationError::QueueSaturated`]
    /// instead of waiting for the owner's budget or for queue space.
    pub async fn try_submit(&self, request: MutationRequest) -> Result<Ack, MutationError> {
        let budget = self
            .budgets
            .try_acquire(request.owner)
            .inspect_err(|err| {
                if *err == MutationError::QueueSaturated {
                    counter!("cashback.mutations.saturated.total").increment(1);
                }
            })?;

        let (reply, rx) = oneshot::channel();
        match self.ingress.try_send(Operation {
            request,
            reply,
            budget,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counter!("cashback.mutations.saturated.total").increment(1);
                return Err(MutationError::QueueSaturated);
            }
            Err(TrySendError::Closed(_)) => return Err(shut_down()),
        }

        await_reply(rx).await
    }

    /// Number of owners with queued or running mutations.
    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Stops accepting work and waits until every admitted mutation is answered.
    pub async fn shutdown(self) {
        let Coordinator {
            ingress,
            dispatcher,
            ..
        } = self;

        // The dispatcher returns only after its lane workers have drained.
        drop(ingress);
        if let Err(err) = dispatcher.await {
            warn!(error = %err, "dispatcher ended abnormally");
        }
        debug!("coordinator drained");
    }
}

fn shut_down() -> MutationError {
    StoreError::Unavailable("coordinator is shut down".to_string()).into()
}

async fn await_reply(
    rx: oneshot::Receiver<Result<Ack, MutationError>>,
) -> Result<Ack, MutationError> {
    rx.await.unwrap_or_else(|_| {
        Err(StoreError::Internal("mutation dropped without a reply".to_string()).into())
    })
}

/// Routes operations to lanes. Awaits nothing but the ingress queue.
async fn dispatch(
    mut ingress: mpsc::Receiver<Operation>,
    lanes: Arc<LaneRegistry<Operation>>,
    store: Arc<dyn LedgerStore>,
) {
    let mut workers = JoinSet::new();

    while let Some(op) = ingress.recv().await {
        let owner = op.request.owner;
        if lanes.route(owner, op) {
            workers.spawn(drain_lane(owner, Arc::clone(&lanes), Arc::clone(&store)));
        }

        while let Some(done) = workers.try_join_next() {
            reap(done);
        }
    }

    debug!("ingress closed, draining lanes");
    while let Some(done) = workers.join_next().await {
        reap(done);
    }
}

fn reap(done: Result<(), tokio::task::JoinError>) {
    if let Err(err) = done {
        error!(error = %err, "lane worker failed");
    }
}

async fn drain_lane(
    owner: OwnerKey,
    lanes: Arc<LaneRegistry<Operation>>,
    store: Arc<dyn LedgerStore>,
) {
    while let Some(op) = lanes.next(owner) {
        execute(op, &store).await;
    }
}

async fn execute(op: Operation, store: &Arc<dyn LedgerStore>) {
    let Operation {
        request,
        reply,
        budget,
    } = op;

    let owner = request.owner;
    let kind = request.kind;
    let started = Instant::now();

    let result = match tokio::spawn(handlers::apply(Arc::clone(store), request)).await {
        Ok(result) => result,
        Err(err) => {
            error!(%owner, %kind, error = %err, "mutation handler failed");
            Err(StoreError::Internal(err.to_string()).into())
        }
    };

    histogram!("cashback.mutation.duration_ms", "kind" => kind.as_str())
        .record(started.elapsed().as_secs_f64() * 1000.0);
    counter!("cashback.mutations.total",
        "kind" => kind.as_str(),
        "status" => status(&result)
    )
    .increment(1);

    match &result {
        Ok(ack) => debug!(%owner, %kind, balance = %ack.balance, "mutation applied"),
        Err(err) => debug!(%owner, %kind, error = %err, "mutation rejected"),
    }

    if reply.send(result).is_err() {
        debug!(%owner, %kind, "caller went away before the reply");
    }
    drop(budget);
}

fn status(result: &Result<Ack, MutationError>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(MutationError::Store(_)) => "failed",
        Err(_) => "rejected",
    }
}

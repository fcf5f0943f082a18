// src/coordinator/handlers.rs
//! Business rules, executed while the owner's lane is held.
//!
//! The read and the write below are two separate store calls. Nothing but the
//! lane serializes them, so these functions must only ever run from a lane worker.
use std::sync::Arc;
use uuid::Uuid;

use super::{Ack, MutationRequest};
use crate::{Amount, LedgerStore, MutationError, NewHistoryEntry, OperationKind};

pub(crate) async fn apply(
    store: Arc<dyn LedgerStore>,
    request: MutationRequest,
) -> Result<Ack, MutationError> {
    if request.amount.is_zero() {
        return Err(MutationError::InvalidAmount);
    }

    match request.kind {
        OperationKind::Increase => increase(store.as_ref(), request).await,
        OperationKind::Decrease => decrease(store.as_ref(), request).await,
    }
}

async fn increase(
    store: &dyn LedgerStore,
    request: MutationRequest,
) -> Result<Ack, MutationError> {
    let (balance_id, amount) = match store.get_balance(request.owner).await? {
        None => {
            let balance = store.create_balance(request.owner, request.amount).await?;
            (balance.id, balance.amount)
        }
        Some(balance) => {
            let amount = balance
                .amount
                .checked_add(request.amount)
                .ok_or(MutationError::InvalidAmount)?;
            store.update_balance_amount(balance.id, amount).await?;
            (balance.id, amount)
        }
    };

    record(store, balance_id, amount, request).await
}

async fn decrease(
    store: &dyn LedgerStore,
    request: MutationRequest,
) -> Result<Ack, MutationError> {
    let balance = store
        .get_balance(request.owner)
        .await?
        .ok_or(MutationError::NoBalance)?;

    let amount = balance
        .amount
        .checked_sub(request.amount)
        .ok_or(MutationError::InsufficientFunds)?;
    store.update_balance_amount(balance.id, amount).await?;

    record(store, balance.id, amount, request).await
}

async fn record(
    store: &dyn LedgerStore,
    balance_id: Uuid,
    balance: Amount,
    request: MutationRequest,
) -> Result<Ack, MutationError> {
    let entry = store
        .append_history(NewHistoryEntry {
            balance_id,
            source_id: request.source_id,
            amount: request.amount,
            kind: request.kind,
            origin: request.origin,
        })
        .await?;

    Ok(Ack { entry, balance })
}

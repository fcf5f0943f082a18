// tests/integration_tests.rs
mod common;

use cashback::adapters::MemoryStore;
use cashback::{
    CashbackError, CoordinatorConfig, HistoryQuery, MutationError, OperationKind, OwnerIdentity,
    OwnerKey, ResolverError, StoreError,
};
use chrono::{Days, Utc};
use common::{GatedStore, cents, eventually, request, service, service_with};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_increase_creates_balance() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let owner = OwnerKey::turon(42);

    let ack = svc
        .increase(request(OwnerIdentity::turon(42), 100.50))
        .await
        .unwrap();

    assert_eq!(ack.balance, cents(100_50));
    assert_eq!(ack.entry.kind, OperationKind::Increase);
    assert_eq!(ack.entry.amount, cents(100_50));
    assert_eq!(ack.entry.source_slug.as_deref(), Some("turon"));
    assert_eq!(ack.entry.host_ip, "192.168.1.1");
    assert_eq!(ack.entry.device, "Mozilla/5.0");

    let balance = svc.balance(owner).await.unwrap();
    assert_eq!(balance.amount, cents(100_50));
    assert_eq!(store.history_count(owner), 1);
}

#[tokio::test]
async fn test_increase_then_decrease() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let identity = OwnerIdentity::turon(42);
    let owner = OwnerKey::turon(42);

    svc.increase(request(identity, 100.50)).await.unwrap();
    svc.increase(request(identity, 50.25)).await.unwrap();
    let ack = svc.decrease(request(identity, 30.00)).await.unwrap();

    assert_eq!(ack.balance, cents(120_75));
    assert_eq!(svc.balance(owner).await.unwrap().amount, cents(120_75));

    let history = store.history_in_commit_order(owner);
    let kinds: Vec<_> = history.iter().map(|e| (e.kind, e.amount.minor())).collect();
    assert_eq!(
        kinds,
        vec![
            (OperationKind::Increase, 100_50),
            (OperationKind::Increase, 50_25),
            (OperationKind::Decrease, 30_00),
        ]
    );
}

#[tokio::test]
async fn test_insufficient_funds_leaves_ledger_untouched() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let identity = OwnerIdentity::turon(42);
    let owner = OwnerKey::turon(42);

    svc.increase(request(identity, 120.75)).await.unwrap();

    let err = svc.decrease(request(identity, 200.00)).await.unwrap_err();
    assert_eq!(err, CashbackError::Mutation(MutationError::InsufficientFunds));

    assert_eq!(svc.balance(owner).await.unwrap().amount, cents(120_75));
    assert_eq!(store.history_count(owner), 1);
}

#[tokio::test]
async fn test_decrease_to_exactly_zero() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let identity = OwnerIdentity::cinerama(5);

    svc.increase(request(identity, 10.00)).await.unwrap();
    let ack = svc.decrease(request(identity, 10.00)).await.unwrap();

    assert_eq!(ack.balance, cents(0));
    assert_eq!(ack.entry.source_slug.as_deref(), Some("cinerama"));
}

#[tokio::test]
async fn test_decrease_without_balance() {
    let store = MemoryStore::new();
    let svc = service(&store);

    let err = svc
        .decrease(request(OwnerIdentity::turon(9), 1.00))
        .await
        .unwrap_err();

    assert_eq!(err, CashbackError::Mutation(MutationError::NoBalance));
    assert_eq!(store.history_count(OwnerKey::turon(9)), 0);
    assert_eq!(
        svc.balance(OwnerKey::turon(9)).await.unwrap_err(),
        CashbackError::NotFound
    );
}

#[tokio::test]
async fn test_invalid_amounts_are_rejected_before_resolution() {
    let store = MemoryStore::new();
    let svc = service(&store);

    for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
        let err = svc
            .increase(request(OwnerIdentity::turon(1), amount))
            .await
            .unwrap_err();
        assert_eq!(err, CashbackError::Mutation(MutationError::InvalidAmount));
    }

    assert_eq!(store.source_rows("turon"), 0);
}

#[tokio::test]
async fn test_ambiguous_owner() {
    let store = MemoryStore::new();
    let svc = service(&store);

    let both = OwnerIdentity {
        turon_user_id: Some(1),
        cinerama_user_id: Some(2),
    };
    let err = svc.increase(request(both, 1.0)).await.unwrap_err();
    assert_eq!(err, CashbackError::Resolver(ResolverError::AmbiguousOwner));

    let err = svc
        .increase(request(OwnerIdentity::default(), 1.0))
        .await
        .unwrap_err();
    assert_eq!(err, CashbackError::Resolver(ResolverError::AmbiguousOwner));

    assert_eq!(store.source_rows("turon"), 0);
    assert_eq!(store.source_rows("cinerama"), 0);
}

#[tokio::test]
async fn test_namespaces_keep_separate_balances() {
    let store = MemoryStore::new();
    let svc = service(&store);

    svc.increase(request(OwnerIdentity::turon(5), 1.00))
        .await
        .unwrap();
    svc.increase(request(OwnerIdentity::cinerama(5), 2.00))
        .await
        .unwrap();

    assert_eq!(
        svc.balance(OwnerKey::turon(5)).await.unwrap().amount,
        cents(1_00)
    );
    assert_eq!(
        svc.balance(OwnerKey::cinerama(5)).await.unwrap().amount,
        cents(2_00)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increases_lose_nothing() {
    let store = MemoryStore::new();
    let svc = Arc::new(service(&store));
    let owner = OwnerKey::turon(7);

    let handles: Vec<_> = (0..1000)
        .map(|_| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.increase(request(OwnerIdentity::turon(7), 1.0)).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(svc.balance(owner).await.unwrap().amount, cents(1000_00));
    assert_eq!(store.history_count(owner), 1000);
    assert_eq!(store.source_rows("turon"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conservation_under_mixed_load() {
    let store = MemoryStore::new();
    let svc = Arc::new(service(&store));
    let owner = OwnerKey::turon(11);

    svc.increase(request(OwnerIdentity::turon(11), 50.00))
        .await
        .unwrap();

    let handles: Vec<_> = (0..300)
        .map(|i| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                let req = request(OwnerIdentity::turon(11), 1.0 + (i % 7) as f64);
                if i % 3 == 0 {
                    svc.decrease(req).await
                } else {
                    svc.increase(req).await
                }
            })
        })
        .collect();

    let mut acks = vec![];
    for handle in handles {
        match handle.await.unwrap() {
            Ok(ack) => acks.push(ack),
            Err(CashbackError::Mutation(MutationError::InsufficientFunds)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // Replaying the ledger in commit order reproduces every acknowledged balance.
    let history = store.history_in_commit_order(owner);
    assert_eq!(history.len(), acks.len() + 1);

    let mut running = 0i64;
    for entry in &history {
        running += entry.delta();
        assert!(running >= 0);
        if let Some(ack) = acks.iter().find(|a| a.entry.id == entry.id) {
            assert_eq!(ack.balance.minor(), running);
        }
    }
    assert_eq!(svc.balance(owner).await.unwrap().amount.minor(), running);
}

#[tokio::test]
async fn test_history_paging_and_totals() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let owner = OwnerKey::turon(3);

    for i in 1..=15 {
        svc.increase(request(OwnerIdentity::turon(3), i as f64))
            .await
            .unwrap();
    }

    let page = svc
        .history(
            owner,
            &HistoryQuery {
                page: Some(2),
                page_size: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(page.item_total, 15);
    assert_eq!(page.page_total, 2);
    assert_eq!(page.data.len(), 5);
    // Newest first: page two holds the five oldest entries.
    assert_eq!(page.data[0].amount, cents(5_00));
    assert_eq!(page.data[4].amount, cents(1_00));

    let defaults = svc.history(owner, &HistoryQuery::default()).await.unwrap();
    assert_eq!((defaults.page, defaults.page_size), (1, 10));
    assert_eq!(defaults.data[0].amount, cents(15_00));

    let clamped = svc
        .history(
            owner,
            &HistoryQuery {
                page_size: Some(1000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(clamped.page_size, 100);
    assert_eq!(clamped.data.len(), 15);
}

#[tokio::test]
async fn test_history_date_filter() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let owner = OwnerKey::turon(4);

    svc.increase(request(OwnerIdentity::turon(4), 1.0))
        .await
        .unwrap();

    let today = Utc::now().date_naive();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap();
    let fmt = |d: chrono::NaiveDate| d.format("%Y-%m-%d").to_string();

    let inclusive = svc
        .history(
            owner,
            &HistoryQuery {
                from_date: Some(fmt(today)),
                to_date: Some(fmt(today)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(inclusive.item_total, 1);

    let future = svc
        .history(
            owner,
            &HistoryQuery {
                from_date: Some(fmt(tomorrow)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(future.item_total, 0);
    assert!(future.data.is_empty());

    let err = svc
        .history(
            owner,
            &HistoryQuery {
                to_date: Some("yesterday".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CashbackError::InvalidDate { field: "to_date", .. }));
}

#[tokio::test]
async fn test_submit_timeout_abandons_wait_but_not_mutation() {
    let store = MemoryStore::new();
    let owner = OwnerKey::turon(8);
    let gated = GatedStore::new(store.clone(), owner);
    let svc = cashback::CashbackService::new(
        Arc::new(gated.clone()),
        Arc::new(store.clone()),
        &CoordinatorConfig {
            submit_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );

    let err = svc
        .increase(request(OwnerIdentity::turon(8), 3.00))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CashbackError::Mutation(MutationError::Store(StoreError::Timeout))
    );

    // The operation was admitted; it completes once the store responds.
    gated.release(1);
    eventually(|| store.history_count(owner) == 1).await;
    eventually(|| svc.active_owners() == 0).await;
}

#[tokio::test]
async fn test_soft_deleted_balance_restarts_from_zero() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let owner = OwnerKey::turon(12);

    svc.increase(request(OwnerIdentity::turon(12), 5.00))
        .await
        .unwrap();
    assert!(store.soft_delete_balance(owner));

    let err = svc
        .decrease(request(OwnerIdentity::turon(12), 1.00))
        .await
        .unwrap_err();
    assert_eq!(err, CashbackError::Mutation(MutationError::NoBalance));

    let ack = svc
        .increase(request(OwnerIdentity::turon(12), 2.00))
        .await
        .unwrap();
    assert_eq!(ack.balance, cents(2_00));

    // History spans both balances of the owner.
    assert_eq!(store.history_count(owner), 2);
}

#[tokio::test]
async fn test_shutdown_drains_admitted_work() {
    let store = MemoryStore::new();
    let svc = service_with(&store, CoordinatorConfig::default());

    svc.increase(request(OwnerIdentity::turon(1), 1.00))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), svc.shutdown())
        .await
        .unwrap();
}

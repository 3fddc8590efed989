//! Parallel delivery of the same payment callback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nox_core::{IdempotentRecorder, MemoryEventStore, TransactionId};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_of_many_parallel_deliveries_commits() {
    let store = MemoryEventStore::new();
    let recorder = IdempotentRecorder::new(Arc::new(store.clone()));
    let effects_applied = Arc::new(AtomicUsize::new(0));
    let id = TransactionId::new("gw-7f3a").unwrap();

    let mut handles = Vec::new();
    for attempt in 0..64 {
        let recorder = recorder.clone();
        let effects_applied = effects_applied.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            let outcome = recorder
                .record_if_new(&id, json!({ "attempt": attempt }))
                .await
                .unwrap();
            if outcome.committed {
                effects_applied.fetch_add(1, Ordering::SeqCst);
            }
            outcome
        }));
    }

    let mut committed = 0;
    for handle in handles {
        if handle.await.unwrap().committed {
            committed += 1;
        }
    }

    assert_eq!(committed, 1);
    assert_eq!(effects_applied.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 1);
    assert!(recorder.is_processed(&id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_transactions_all_commit() {
    let recorder = IdempotentRecorder::new(Arc::new(MemoryEventStore::new()));

    let handles: Vec<_> = (0..32)
        .map(|n| {
            let recorder = recorder.clone();
            tokio::spawn(async move {
                let id = TransactionId::new(format!("gw-{n}")).unwrap();
                recorder.record_if_new(&id, json!({})).await.unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().committed);
    }
}

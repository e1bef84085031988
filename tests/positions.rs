//! Stream position allocation under concurrency.

mod common;

use std::collections::BTreeSet;

use common::*;
use matrixon_streams::types::StreamKind;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_advances_are_distinct() {
    let services = services();
    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let services = services.clone();
            tokio::spawn(async move {
                let mut txn = services.begin();
                let position = services
                    .globals
                    .advance(&mut txn, StreamKind::Receipt)
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
                txn.commit().unwrap();
                position
            })
        })
        .collect();

    let mut positions = BTreeSet::new();
    for task in tasks {
        assert!(positions.insert(task.await.unwrap()));
    }
    assert_eq!(positions, (1..=32).collect());

    let snapshot = services.snapshot();
    assert_eq!(services.globals.position(&snapshot, StreamKind::Receipt).unwrap(), 32);
    // Other streams did not move
    assert_eq!(services.globals.position(&snapshot, StreamKind::Typing).unwrap(), 0);
    assert_eq!(services.globals.position(&snapshot, StreamKind::Pdu).unwrap(), 0);
}

#[tokio::test]
async fn test_rolled_back_advance_is_not_published() {
    let services = services();

    let mut txn = services.begin();
    assert_eq!(services.globals.advance(&mut txn, StreamKind::Presence).await.unwrap(), 1);
    txn.rollback();

    let mut txn = services.begin();
    let position = services.globals.advance(&mut txn, StreamKind::Presence).await.unwrap();
    txn.commit().unwrap();
    assert_eq!(position, 1);
    assert_eq!(
        services
            .globals
            .position(&services.snapshot(), StreamKind::Presence)
            .unwrap(),
        1
    );
}

//! FILE-UPDATE propagation through `Node::publish`.

use std::time::Duration;

use lanfolder_node::coordinator::{RoundOutcome, Trigger};

use crate::harness::{next_round, TestPair};

const ROUND_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_publish_propagates_new_versions() {
    let pair = TestPair::start(&[], &[]).await.unwrap();
    let mut y_rounds = pair.y.node.subscribe();

    let first = pair.x.node.publish("shared/plan.txt", b"v1").await.unwrap();
    assert_eq!(first.version.as_str(), "1");
    let round = next_round(&mut y_rounds, Trigger::FileUpdate, ROUND_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        round.outcome,
        RoundOutcome::Synced {
            merged: vec!["shared/plan.txt".into()],
            failed: vec![],
            stale: vec![],
        }
    );
    assert_eq!(pair.y.read_shared("shared/plan.txt").unwrap(), b"v1");

    let second = pair.x.node.publish("shared/plan.txt", b"second").await.unwrap();
    assert_eq!(second.version.as_str(), "2");
    next_round(&mut y_rounds, Trigger::FileUpdate, ROUND_TIMEOUT)
        .await
        .unwrap();

    let stored = pair.y.node.index().get("shared/plan.txt").await.unwrap();
    assert_eq!(stored.version.as_str(), "2");
    assert_eq!(stored.size, 6);
    assert_eq!(pair.y.read_shared("shared/plan.txt").unwrap(), b"second");

    // A FILE-UPDATE never triggers a reply or a full index sync.
    let y = pair.y.node.stats();
    assert_eq!(y.file_updates_received, 2);
    assert_eq!(y.replies_sent, 0);
    assert!(pair.x.node.registry().is_empty().await);

    pair.shutdown_all().await;
}

#[tokio::test]
async fn test_older_file_update_is_ignored() {
    let pair = TestPair::start(&[], &[]).await.unwrap();
    let mut y_rounds = pair.y.node.subscribe();

    // Y already holds version 2 of the file.
    pair.y.node.index().bump_local("doc.txt", 3).await;
    pair.y.node.index().bump_local("doc.txt", 3).await;

    pair.x.node.publish("doc.txt", b"old").await.unwrap();
    let round = next_round(&mut y_rounds, Trigger::FileUpdate, ROUND_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(round.outcome, RoundOutcome::UpToDate);
    assert_eq!(pair.y.node.stats().files_fetched, 0);
    assert_eq!(
        pair.y.node.index().get("doc.txt").await.unwrap().version.as_str(),
        "2"
    );

    pair.shutdown_all().await;
}

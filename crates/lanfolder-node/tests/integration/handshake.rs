//! ANNOUNCE / ANNOUNCE-REPLY exchange between two live nodes.

use std::time::Duration;

use lanfolder_node::coordinator::{RoundOutcome, Trigger};

use crate::harness::{next_round, TestPair};

const ROUND_TIMEOUT: Duration = Duration::from_secs(10);

/// X announces; Y replies and pulls X's files; X pulls Y's files on the reply.
#[tokio::test]
async fn test_announce_exchange_syncs_both_ways() {
    let pair = TestPair::start(
        &[("docs/readme.txt", b"read me first")],
        &[("notes/todo.md", b"- ship it")],
    )
    .await
    .unwrap();
    let mut x_rounds = pair.x.node.subscribe();
    let mut y_rounds = pair.y.node.subscribe();

    pair.x.node.announce().await.unwrap();

    let y_round = next_round(&mut y_rounds, Trigger::Announce, ROUND_TIMEOUT)
        .await
        .unwrap();
    let x_round = next_round(&mut x_rounds, Trigger::Reply, ROUND_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(y_round.peer.as_str(), "node-x");
    assert_eq!(x_round.peer.as_str(), "node-y");
    assert!(matches!(y_round.outcome, RoundOutcome::Synced { .. }));
    assert!(matches!(x_round.outcome, RoundOutcome::Synced { .. }));

    let readme = pair.y.node.index().get("docs/readme.txt").await.unwrap();
    assert_eq!(readme.version.as_str(), "1");
    assert_eq!(readme.size, 13);
    assert_eq!(pair.y.read_shared("docs/readme.txt").unwrap(), b"read me first");

    let todo = pair.x.node.index().get("notes/todo.md").await.unwrap();
    assert_eq!(todo.size, 9);
    assert_eq!(pair.x.read_shared("notes/todo.md").unwrap(), b"- ship it");

    // Registered under the protocol port, not the sender's ephemeral one.
    assert_eq!(
        pair.y.node.registry().addresses(pair.x.node.peer_id()).await,
        vec![pair.x.node.local_addr()]
    );

    pair.shutdown_all().await;
}

/// Exactly one ANNOUNCE and one REPLY cross the wire; the reply is never answered.
#[tokio::test]
async fn test_handshake_terminates_after_one_reply() {
    let pair = TestPair::start(&[("a.txt", b"a")], &[]).await.unwrap();
    let mut x_rounds = pair.x.node.subscribe();

    pair.x.node.announce().await.unwrap();
    next_round(&mut x_rounds, Trigger::Reply, ROUND_TIMEOUT)
        .await
        .unwrap();

    // Give a runaway handshake time to show itself.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let x = pair.x.node.stats();
    let y = pair.y.node.stats();
    assert_eq!(y.announces_received, 1);
    assert_eq!(y.replies_sent, 1);
    assert_eq!(y.replies_received, 0);
    assert_eq!(x.announces_received, 0);
    assert_eq!(x.replies_received, 1);
    assert_eq!(x.replies_sent, 0);
    assert_eq!(x.rounds_completed + y.rounds_completed, 2);

    pair.shutdown_all().await;
}

/// A peer that is not listening over HTTP aborts the round without touching the index.
#[tokio::test]
async fn test_unreachable_peer_aborts_round() {
    let pair = TestPair::start(&[], &[("keep.txt", b"keep")]).await.unwrap();
    let mut y_rounds = pair.y.node.subscribe();
    let x_id = pair.x.node.peer_id().clone();

    // Stop X's tasks (HTTP endpoint included) but announce as X by hand.
    pair.x.shutdown().await;
    let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let announce = lanfolder_protocol::Message::Announce { peer_id: x_id.clone() }
        .encode()
        .unwrap();
    sock.send_to(announce.as_bytes(), pair.y.node.local_addr())
        .await
        .unwrap();

    let round = next_round(&mut y_rounds, Trigger::Announce, ROUND_TIMEOUT)
        .await
        .unwrap();
    assert!(matches!(round.outcome, RoundOutcome::Aborted { .. }));
    assert_eq!(pair.y.node.registry().len().await, 1);
    assert_eq!(pair.y.node.index().len().await, 1);
    assert!(pair.y.node.registry().get(&x_id).await.is_some());

    pair.y.shutdown().await;
}

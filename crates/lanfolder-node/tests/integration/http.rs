//! The HTTP transfer client against a live node's endpoint.

use std::time::Duration;

use lanfolder_index::Staged;
use lanfolder_node::transfer::{FileTransfer, HttpTransfer, TransferError};

use crate::harness::{bind_loopback, TestNode};

#[tokio::test]
async fn test_client_reads_live_endpoint() {
    let sockets = bind_loopback().unwrap();
    let node = TestNode::start("node-a", sockets, 1, &[("music/list.txt", b"one\ntwo\n")])
        .await
        .unwrap();
    let addr = node.node.local_addr();

    let dest = tempfile::tempdir().unwrap();
    let client = HttpTransfer::new(dest.path().to_path_buf(), Duration::from_secs(2), 0).unwrap();

    let index = client.fetch_index(addr).await.unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.get("music/list.txt").unwrap().size, 8);

    let fetched = client.fetch_file(addr, "music/list.txt").await.unwrap();
    assert_eq!(fetched.size, 8);
    assert!(!dest.path().join("music/list.txt").exists());
    fetched.content.commit().unwrap();
    assert_eq!(
        std::fs::read(dest.path().join("music/list.txt")).unwrap(),
        b"one\ntwo\n"
    );

    let missing = client.fetch_file(addr, "music/none.txt").await;
    assert!(matches!(missing, Err(TransferError::Status(s)) if s.as_u16() == 404));
    assert!(!dest.path().join("music/none.txt").exists());

    node.shutdown().await;
}

//! Test harness for in-process lanfolder-node integration tests.
//!
//! Provides TestNode (single node on loopback) and TestPair (two nodes that
//! announce to each other) running in the same tokio runtime.

use std::path::Path;
use std::time::Duration;

use lanfolder_index::IndexStore;
use lanfolder_node::config::NodeConfig;
use lanfolder_node::coordinator::{RoundReport, Trigger};
use lanfolder_node::folders;
use lanfolder_node::node::{Node, Sockets};
use lanfolder_protocol::PeerId;
use tokio::sync::broadcast;

/// Reserve a loopback port that is free for both UDP and TCP. The sockets
/// stay bound and are handed to the node, so nothing can steal the port.
pub fn bind_loopback() -> anyhow::Result<Sockets> {
    for _ in 0..32 {
        let udp = std::net::UdpSocket::bind("127.0.0.1:0")?;
        let port = udp.local_addr()?.port();
        let Ok(tcp) = std::net::TcpListener::bind(("127.0.0.1", port)) else {
            continue;
        };
        udp.set_nonblocking(true)?;
        tcp.set_nonblocking(true)?;
        return Ok(Sockets {
            udp: vec![tokio::net::UdpSocket::from_std(udp)?],
            http: vec![tokio::net::TcpListener::from_std(tcp)?],
        });
    }
    anyhow::bail!("no loopback port free for both UDP and TCP")
}

/// Wait for the next round with the given trigger, skipping others.
pub async fn next_round(
    reports: &mut broadcast::Receiver<RoundReport>,
    trigger: Trigger,
    timeout: Duration,
) -> anyhow::Result<RoundReport> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let report = tokio::time::timeout_at(deadline, reports.recv())
            .await
            .map_err(|_| anyhow::anyhow!("timeout waiting for {trigger:?} round"))??;
        if report.trigger == trigger {
            return Ok(report);
        }
    }
}

/// A running in-process node with its own temporary root.
pub struct TestNode {
    pub node: Node,
    _tempdir: tempfile::TempDir,
}

#[allow(dead_code)]
impl TestNode {
    /// Start a node on `sockets` that talks to peers on `peer_port`.
    /// `defaults` are placed in default-files/ and seeded at version 1.
    pub async fn start(
        name: &str,
        sockets: Sockets,
        peer_port: u16,
        defaults: &[(&str, &[u8])],
    ) -> anyhow::Result<Self> {
        let tempdir = tempfile::tempdir()?;
        let root = tempdir.path();
        for (path, bytes) in defaults {
            let dest = root.join(folders::DEFAULT_FILES).join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, bytes)?;
        }

        let mut cfg = NodeConfig::default();
        cfg.node.root = root.display().to_string();
        cfg.network.listen_addr = sockets.local_addr()?.to_string();
        cfg.network.peer_port = peer_port;
        cfg.network.announce_targets = vec!["127.0.0.1".into()];
        cfg.sync.fetch_timeout_secs = 2;

        let folders = folders::prepare(root)?;
        let index = IndexStore::new();
        folders::seed_defaults(&folders, &index).await?;

        let node = Node::start(&cfg, PeerId::new(name)?, folders, index, sockets).await?;
        Ok(Self {
            node,
            _tempdir: tempdir,
        })
    }

    pub fn shared_root(&self) -> &Path {
        &self.node.folders().shared
    }

    pub fn read_shared(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        Ok(std::fs::read(self.shared_root().join(path))?)
    }

    pub async fn shutdown(self) {
        self.node.shutdown().await;
    }
}

/// Two nodes on loopback, each configured with the other's port.
pub struct TestPair {
    pub x: TestNode,
    pub y: TestNode,
}

impl TestPair {
    pub async fn start(
        x_defaults: &[(&str, &[u8])],
        y_defaults: &[(&str, &[u8])],
    ) -> anyhow::Result<Self> {
        let x_sockets = bind_loopback()?;
        let y_sockets = bind_loopback()?;
        let x_port = x_sockets.local_addr()?.port();
        let y_port = y_sockets.local_addr()?.port();

        let x = TestNode::start("node-x", x_sockets, y_port, x_defaults).await?;
        let y = TestNode::start("node-y", y_sockets, x_port, y_defaults).await?;
        Ok(Self { x, y })
    }

    pub async fn shutdown_all(self) {
        self.x.shutdown().await;
        self.y.shutdown().await;
    }
}

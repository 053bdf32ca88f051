//! Node assembly -- wires sockets, the HTTP endpoint, the transport tasks
//! and the coordinator together, and owns their shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use lanfolder_api::AppState;
use lanfolder_index::IndexStore;
use lanfolder_protocol::{validate_path, FileEntry, Message, PeerId};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::coordinator::{Coordinator, RoundReport, StatsSnapshot};
use crate::folders::Folders;
use crate::peer_registry::PeerRegistry;
use crate::transfer::{HttpTransfer, StagedFile};
use crate::transport::{self, Broadcaster, Outbound};

/// Listening sockets for one node: UDP for the protocol, TCP for HTTP, on
/// the same addresses and port. Usually one of each; two of each on hosts
/// whose wildcard IPv6 socket does not accept IPv4.
pub struct Sockets {
    pub udp: Vec<UdpSocket>,
    pub http: Vec<TcpListener>,
}

impl Sockets {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let udp = transport::bind_listeners(addr)
            .await
            .with_context(|| format!("binding UDP listener on {addr}"))?;
        let mut http = Vec::with_capacity(udp.len());
        for sock in &udp {
            // After a fallback the UDP socket may sit on a different family.
            let local = sock.local_addr()?;
            let listener = TcpListener::bind(local)
                .await
                .with_context(|| format!("binding HTTP listener on {local}"))?;
            http.push(listener);
        }
        Ok(Self { udp, http })
    }

    /// Address of the primary UDP socket.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        let sock = self.udp.first().context("no UDP socket bound")?;
        Ok(sock.local_addr()?)
    }
}

/// A running node.
pub struct Node {
    peer_id: PeerId,
    local_addr: SocketAddr,
    folders: Folders,
    index: IndexStore,
    registry: PeerRegistry,
    coordinator: Arc<Coordinator<HttpTransfer>>,
    outbound: mpsc::Sender<Outbound>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Node {
    /// Spawn every task of the node on the current runtime.
    pub async fn start(
        cfg: &NodeConfig,
        peer_id: PeerId,
        folders: Folders,
        index: IndexStore,
        sockets: Sockets,
    ) -> anyhow::Result<Self> {
        let targets = cfg.announce_targets()?;
        let local_addr = sockets.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (outbound, outbound_rx) = mpsc::channel::<Outbound>(256);
        let registry = PeerRegistry::new();

        let transfer = HttpTransfer::new(
            folders.shared.clone(),
            cfg.fetch_timeout(),
            cfg.sync.fetch_retries,
        )?;
        let coordinator = Arc::new(Coordinator::new(
            peer_id.clone(),
            cfg.network.peer_port,
            registry.clone(),
            index.clone(),
            Arc::new(transfer),
            outbound.clone(),
            cfg.sync.max_concurrent_fetches,
        ));

        let mut handles = Vec::new();

        // HTTP endpoint
        let state = Arc::new(AppState {
            index: index.clone(),
            shared_root: folders.shared.clone(),
        });
        let router = lanfolder_api::router(state);
        for listener in sockets.http {
            let addr = listener.local_addr()?;
            tracing::info!(%addr, "HTTP endpoint listening");
            let shutdown = shutdown_tx.subscribe();
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let mut shutdown = shutdown;
                        let _ = shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(%addr, "HTTP endpoint stopped: {e}");
                }
            }));
        }

        let udp: Vec<Arc<UdpSocket>> = sockets.udp.into_iter().map(Arc::new).collect();

        // Outbound sender
        handles.push({
            let broadcaster = Broadcaster::bind(local_addr.ip()).await;
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(transport::run_sender_loop(
                udp.clone(),
                broadcaster,
                targets,
                outbound_rx,
                shutdown,
            ))
        });

        // Datagram listeners
        for sock in udp {
            let shutdown = shutdown_tx.subscribe();
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(transport::run_listener_loop(
                sock,
                coordinator,
                shutdown,
            )));
        }

        tracing::info!(peer = %peer_id, addr = %local_addr, "node started");

        Ok(Self {
            peer_id,
            local_addr,
            folders,
            index,
            registry,
            coordinator,
            outbound,
            shutdown_tx,
            handles,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn folders(&self) -> &Folders {
        &self.folders
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.coordinator.stats()
    }

    /// Round completion notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundReport> {
        self.coordinator.subscribe()
    }

    /// Broadcast an ANNOUNCE to every configured target.
    pub async fn announce(&self) -> anyhow::Result<()> {
        let message = Message::Announce {
            peer_id: self.peer_id.clone(),
        };
        self.outbound
            .send(Outbound::Broadcast(message))
            .await
            .context("outbound channel closed")?;
        tracing::info!(peer = %self.peer_id, "announce sent");
        Ok(())
    }

    /// Write `bytes` as `path` in the shared folder, bump its version and
    /// tell the network with a FILE-UPDATE.
    pub async fn publish(&self, path: &str, bytes: &[u8]) -> anyhow::Result<FileEntry> {
        validate_path(path)?;
        let staged = StagedFile::write(self.folders.shared.join(path), bytes)
            .await
            .with_context(|| format!("writing {path}"))?;
        let entry = self
            .index
            .publish_local(path, bytes.len() as u64, staged)
            .await
            .with_context(|| format!("committing {path}"))?;
        let message = Message::FileUpdate {
            peer_id: self.peer_id.clone(),
            entry: entry.clone(),
        };
        self.outbound
            .send(Outbound::Broadcast(message))
            .await
            .context("outbound channel closed")?;
        Ok(entry)
    }

    /// Stop every task and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!(peer = %self.peer_id, "node stopped");
    }
}

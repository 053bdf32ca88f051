//! Synchronization coordinator -- one round per inbound message.
//!
//! ANNOUNCE:      register, reply point-to-point, full index sync.
//! ANNOUNCE-REPLY: register, full index sync (never replies).
//! FILE-UPDATE:   fetch the single announced entry if it is newer.
//!
//! Rounds run as independent tasks. File fetches inside a round run
//! concurrently (bounded by a shared semaphore); successful fetches are
//! merged into the index as one batch once every fetch has finished, and
//! their content is committed to disk by that merge.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lanfolder_index::IndexStore;
use lanfolder_protocol::{FileEntry, Message, PeerId};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::peer_registry::PeerRegistry;
use crate::transfer::FileTransfer;
use crate::transport::Outbound;

/// Which message started a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Announce,
    Reply,
    FileUpdate,
}

impl Trigger {
    fn of(message: &Message) -> Self {
        match message {
            Message::Announce { .. } => Trigger::Announce,
            Message::AnnounceReply { .. } => Trigger::Reply,
            Message::FileUpdate { .. } => Trigger::FileUpdate,
        }
    }
}

/// How a round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Our own datagram looped back.
    Ignored,
    /// Index fetch failed; nothing fetched, nothing merged.
    Aborted { reason: String },
    /// Nothing newer on the peer.
    UpToDate,
    Synced {
        merged: Vec<String>,
        failed: Vec<String>,
        /// Fetched, but a concurrent round merged an equal or newer version first.
        stale: Vec<String>,
    },
}

/// Published on the report channel when a round completes.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub peer: PeerId,
    pub addr: SocketAddr,
    pub trigger: Trigger,
    pub outcome: RoundOutcome,
}

/// Counters since startup.
#[derive(Debug, Default)]
pub struct SyncStats {
    announces_received: AtomicU64,
    replies_sent: AtomicU64,
    replies_received: AtomicU64,
    file_updates_received: AtomicU64,
    rounds_completed: AtomicU64,
    rounds_aborted: AtomicU64,
    files_fetched: AtomicU64,
    files_failed: AtomicU64,
    files_stale: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub announces_received: u64,
    pub replies_sent: u64,
    pub replies_received: u64,
    pub file_updates_received: u64,
    pub rounds_completed: u64,
    pub rounds_aborted: u64,
    pub files_fetched: u64,
    pub files_failed: u64,
    pub files_stale: u64,
}

impl SyncStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            announces_received: self.announces_received.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            file_updates_received: self.file_updates_received.load(Ordering::Relaxed),
            rounds_completed: self.rounds_completed.load(Ordering::Relaxed),
            rounds_aborted: self.rounds_aborted.load(Ordering::Relaxed),
            files_fetched: self.files_fetched.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            files_stale: self.files_stale.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

pub struct Coordinator<T> {
    local_id: PeerId,
    peer_port: u16,
    registry: PeerRegistry,
    index: IndexStore,
    transfer: Arc<T>,
    outbound: mpsc::Sender<Outbound>,
    fetch_limit: Arc<Semaphore>,
    reports: broadcast::Sender<RoundReport>,
    stats: SyncStats,
}

impl<T: FileTransfer> Coordinator<T> {
    pub fn new(
        local_id: PeerId,
        peer_port: u16,
        registry: PeerRegistry,
        index: IndexStore,
        transfer: Arc<T>,
        outbound: mpsc::Sender<Outbound>,
        max_concurrent_fetches: usize,
    ) -> Self {
        let (reports, _) = broadcast::channel(256);
        Self {
            local_id,
            peer_port,
            registry,
            index,
            transfer,
            outbound,
            fetch_limit: Arc::new(Semaphore::new(max_concurrent_fetches.max(1))),
            reports,
            stats: SyncStats::default(),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Completion notifications for every round started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundReport> {
        self.reports.subscribe()
    }

    /// Start a round for `message` on its own task. The caller may await
    /// the handle; the receive loop drops it.
    pub fn dispatch(self: &Arc<Self>, message: Message, from: SocketAddr) -> JoinHandle<RoundReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.handle(message, from).await })
    }

    /// Run one round to completion.
    pub async fn handle(&self, message: Message, from: SocketAddr) -> RoundReport {
        let trigger = Trigger::of(&message);
        let peer = message.peer_id().clone();
        let addr = self.peer_addr(from);

        let outcome = if peer == self.local_id {
            tracing::trace!(%from, "coordinator: ignoring own datagram");
            RoundOutcome::Ignored
        } else {
            self.registry.register(&peer, addr).await;
            match message {
                Message::Announce { .. } => {
                    self.stats.announces_received.fetch_add(1, Ordering::Relaxed);
                    self.reply(addr).await;
                    self.full_sync(&peer, addr).await
                }
                Message::AnnounceReply { .. } => {
                    self.stats.replies_received.fetch_add(1, Ordering::Relaxed);
                    self.full_sync(&peer, addr).await
                }
                Message::FileUpdate { entry, .. } => {
                    self.stats.file_updates_received.fetch_add(1, Ordering::Relaxed);
                    self.file_update(&peer, addr, entry).await
                }
            }
        };

        self.record(&outcome);
        let report = RoundReport {
            peer,
            addr,
            trigger,
            outcome,
        };
        // No subscribers is fine.
        let _ = self.reports.send(report.clone());
        report
    }

    /// Peers serve on the protocol port, not the ephemeral source port.
    fn peer_addr(&self, from: SocketAddr) -> SocketAddr {
        SocketAddr::new(from.ip().to_canonical(), self.peer_port)
    }

    async fn reply(&self, to: SocketAddr) {
        let message = Message::AnnounceReply {
            peer_id: self.local_id.clone(),
        };
        match self.outbound.send(Outbound::Reply { to, message }).await {
            Ok(()) => {
                self.stats.replies_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => tracing::warn!(%to, "coordinator: outbound channel closed, reply dropped"),
        }
    }

    async fn full_sync(&self, peer: &PeerId, addr: SocketAddr) -> RoundOutcome {
        let remote = match self.transfer.fetch_index(addr).await {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(%peer, %addr, "coordinator: index fetch failed: {e}");
                return RoundOutcome::Aborted {
                    reason: e.to_string(),
                };
            }
        };

        let wanted = self.index.diff_against(&remote).await;
        tracing::debug!(
            %peer,
            remote_entries = remote.len(),
            wanted = wanted.len(),
            "coordinator: index diffed"
        );
        if wanted.is_empty() {
            return RoundOutcome::UpToDate;
        }
        self.fetch_and_merge(peer, addr, wanted).await
    }

    async fn file_update(&self, peer: &PeerId, addr: SocketAddr, entry: FileEntry) -> RoundOutcome {
        if !self.index.wants(&entry).await {
            tracing::debug!(
                %peer,
                path = %entry.path,
                version = %entry.version,
                "coordinator: file update not newer, skipping"
            );
            return RoundOutcome::UpToDate;
        }
        self.fetch_and_merge(peer, addr, vec![entry]).await
    }

    async fn fetch_and_merge(
        &self,
        peer: &PeerId,
        addr: SocketAddr,
        wanted: Vec<FileEntry>,
    ) -> RoundOutcome {
        // Each entry stays next to its task so a panicked fetch is still reported.
        let mut fetches = Vec::with_capacity(wanted.len());
        for entry in wanted {
            let transfer = Arc::clone(&self.transfer);
            let limit = Arc::clone(&self.fetch_limit);
            let path = entry.path.clone();
            let task = tokio::spawn(async move {
                let _permit = limit.acquire_owned().await;
                transfer.fetch_file(addr, &path).await
            });
            fetches.push((entry, task));
        }

        let mut staged = Vec::new();
        let mut failed = Vec::new();
        for (entry, task) in fetches {
            match task.await {
                Ok(Ok(fetched)) => {
                    if fetched.size != entry.size {
                        tracing::debug!(
                            path = %entry.path,
                            advertised = entry.size,
                            received = fetched.size,
                            "coordinator: size differs from advertised"
                        );
                    }
                    let entry = FileEntry {
                        size: fetched.size,
                        ..entry
                    };
                    staged.push((entry, fetched.content));
                }
                Ok(Err(e)) => {
                    tracing::warn!(%peer, path = %entry.path, "coordinator: file fetch failed: {e}");
                    failed.push(entry.path);
                }
                Err(e) => {
                    tracing::error!(%peer, path = %entry.path, "coordinator: fetch task failed: {e}");
                    failed.push(entry.path);
                }
            }
        }

        let report = self.index.merge_staged(staged).await;
        failed.extend(report.failed);
        tracing::info!(
            %peer,
            merged = report.applied.len(),
            failed = failed.len(),
            stale = report.stale.len(),
            "coordinator: round complete"
        );
        RoundOutcome::Synced {
            merged: report.applied,
            failed,
            stale: report.stale,
        }
    }

    fn record(&self, outcome: &RoundOutcome) {
        match outcome {
            RoundOutcome::Ignored => {}
            RoundOutcome::Aborted { .. } => {
                self.stats.rounds_aborted.fetch_add(1, Ordering::Relaxed);
            }
            RoundOutcome::UpToDate => {
                self.stats.rounds_completed.fetch_add(1, Ordering::Relaxed);
            }
            RoundOutcome::Synced {
                merged,
                failed,
                stale,
            } => {
                self.stats.rounds_completed.fetch_add(1, Ordering::Relaxed);
                SyncStats::bump(&self.stats.files_fetched, merged.len());
                SyncStats::bump(&self.stats.files_failed, failed.len());
                SyncStats::bump(&self.stats.files_stale, stale.len());
            }
        }
    }
}

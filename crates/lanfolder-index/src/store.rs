//! The node's authoritative index and its merge guard.
//!
//! Every synchronization round reads and merges through this one handle.
//! Reads take the shared lock, merges take the exclusive lock, so at most one
//! merge is in flight and no diff ever sees a half-applied batch.

use std::sync::Arc;

use lanfolder_protocol::{FileEntry, Version};
use tokio::sync::{watch, RwLock};

use crate::{diff_index, needs_fetch, Index, IndexEntry};

/// Result of applying one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Paths whose entry was inserted or replaced.
    pub applied: Vec<String>,
    /// Paths skipped because the index already held an equal or newer version.
    pub stale: Vec<String>,
    /// Paths that won the version check but whose content could not be committed.
    pub failed: Vec<String>,
}

/// Content fetched ahead of a merge. It becomes visible only if its entry
/// wins the version check, and only while the merge holds the write lock, so
/// the content on disk always matches the indexed version.
pub trait Staged {
    /// Make the content visible under its final name.
    fn commit(self) -> std::io::Result<()>;
    /// Throw the content away.
    fn discard(self);
}

/// Entries whose content is already in place.
impl Staged for () {
    fn commit(self) -> std::io::Result<()> {
        Ok(())
    }

    fn discard(self) {}
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

#[derive(Clone)]
pub struct IndexStore {
    inner: Arc<RwLock<Index>>,
    /// Bumped after every merge that changed something.
    generation: Arc<watch::Sender<u64>>,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexStore {
    pub fn new() -> Self {
        Self::with_index(Index::new())
    }

    pub fn with_index(index: Index) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(index)),
            generation: Arc::new(generation),
        }
    }

    /// Consistent copy of the whole index.
    pub async fn snapshot(&self) -> Index {
        self.inner.read().await.clone()
    }

    pub async fn get(&self, path: &str) -> Option<IndexEntry> {
        self.inner.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Entries of `remote` that are missing here or strictly newer.
    pub async fn diff_against(&self, remote: &Index) -> Vec<FileEntry> {
        diff_index(&*self.inner.read().await, remote)
    }

    /// Whether a single announced entry is worth fetching.
    pub async fn wants(&self, entry: &FileEntry) -> bool {
        needs_fetch(self.inner.read().await.get(&entry.path), &entry.version)
    }

    /// Apply a batch of entries whose content is already in place.
    pub async fn merge_batch(&self, entries: Vec<FileEntry>) -> MergeReport {
        self.merge_staged(entries.into_iter().map(|e| (e, ())).collect())
            .await
    }

    /// Apply a batch of fetched entries atomically.
    ///
    /// Each entry is re-checked under the exclusive lock: a concurrent round
    /// may have merged an equal or newer version after our diff, and the
    /// per-path version must never go backwards. Winning entries commit their
    /// content before the index records them; losing entries discard it.
    pub async fn merge_staged<S: Staged>(&self, batch: Vec<(FileEntry, S)>) -> MergeReport {
        let mut report = MergeReport::default();
        if batch.is_empty() {
            return report;
        }

        {
            let mut index = self.inner.write().await;
            for (entry, staged) in batch {
                if !needs_fetch(index.get(&entry.path), &entry.version) {
                    staged.discard();
                    report.stale.push(entry.path);
                    continue;
                }
                match staged.commit() {
                    Ok(()) => {
                        report.applied.push(entry.path.clone());
                        index.insert(entry);
                    }
                    Err(e) => {
                        tracing::warn!(path = %entry.path, "index: cannot commit content: {e}");
                        report.failed.push(entry.path);
                    }
                }
            }
        }

        if !report.applied.is_empty() {
            self.generation.send_modify(|g| *g += 1);
            tracing::info!(
                applied = report.applied.len(),
                stale = report.stale.len(),
                failed = report.failed.len(),
                "index: merged batch"
            );
        } else {
            tracing::debug!(
                stale = report.stale.len(),
                failed = report.failed.len(),
                "index: batch applied nothing"
            );
        }
        report
    }

    /// Record a local change to `path`: the version becomes the successor of
    /// whatever the index holds, or the initial version for a new path.
    pub async fn bump_local(&self, path: &str, size: u64) -> FileEntry {
        let entry = {
            let mut index = self.inner.write().await;
            let entry = next_local(&index, path, size);
            index.insert(entry.clone());
            entry
        };
        self.local_changed(&entry);
        entry
    }

    /// `bump_local` for content that is not in place yet. The content is
    /// committed under the write lock, so no merge can land between the
    /// write and the version bump.
    pub async fn publish_local<S: Staged>(
        &self,
        path: &str,
        size: u64,
        staged: S,
    ) -> std::io::Result<FileEntry> {
        let entry = {
            let mut index = self.inner.write().await;
            let entry = next_local(&index, path, size);
            staged.commit()?;
            index.insert(entry.clone());
            entry
        };
        self.local_changed(&entry);
        Ok(entry)
    }

    fn local_changed(&self, entry: &FileEntry) {
        self.generation.send_modify(|g| *g += 1);
        tracing::info!(
            path = %entry.path,
            version = %entry.version,
            size = entry.size,
            "index: local change recorded"
        );
    }

    /// Watch the merge generation counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

fn next_local(index: &Index, path: &str, size: u64) -> FileEntry {
    let version = index
        .get(path)
        .map_or_else(Version::initial, |e| e.version.next());
    FileEntry {
        path: path.to_string(),
        version,
        size,
    }
}

//! File transfer client -- pulls a peer's index and file bytes over HTTP.
//!
//! Read-only with respect to the local index. A fetched file is staged next
//! to its destination and only replaces it when the coordinator's merge
//! commits it, so older bytes can never land over a newer indexed version.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanfolder_index::{Index, Staged};
use lanfolder_protocol::{validate_path, ProtocolError};
use rand::Rng;
use reqwest::{StatusCode, Url};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("peer answered {0}")]
    Status(StatusCode),
    #[error("cannot build url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Path(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Worth another attempt: the peer may answer next time.
    fn is_transient(&self) -> bool {
        match self {
            TransferError::Request(_) => true,
            TransferError::Status(status) => status.is_server_error(),
            _ => false,
        }
    }
}

/// A downloaded file waiting for the merge.
#[derive(Debug)]
pub struct Fetched<S> {
    /// Bytes actually received.
    pub size: u64,
    pub content: S,
}

/// The two operations a synchronization round needs from a peer.
pub trait FileTransfer: Send + Sync + 'static {
    /// Fetched content, committed or discarded by the merge.
    type Content: Staged + Send + 'static;

    /// Full index snapshot of the peer at `addr`.
    fn fetch_index(&self, addr: SocketAddr)
        -> impl Future<Output = Result<Index, TransferError>> + Send;

    /// Download `path` from the peer and stage it for the merge. Nothing is
    /// staged on failure.
    fn fetch_file(
        &self,
        addr: SocketAddr,
        path: &str,
    ) -> impl Future<Output = Result<Fetched<Self::Content>, TransferError>> + Send;
}

/// `FileTransfer` over plain HTTP GET, as served by `lanfolder-api`.
#[derive(Clone)]
pub struct HttpTransfer {
    client: reqwest::Client,
    shared_root: PathBuf,
    retries: u32,
}

impl HttpTransfer {
    pub fn new(shared_root: PathBuf, timeout: Duration, retries: u32) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            shared_root,
            retries,
        })
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, TransferError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(TransferError::Status(resp.status()));
        }
        Ok(resp)
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries && e.is_transient() => {
                    attempt += 1;
                    let delay = backoff(attempt);
                    tracing::debug!(what, attempt, ?delay, "transfer: retrying after error: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl FileTransfer for HttpTransfer {
    type Content = StagedFile;

    async fn fetch_index(&self, addr: SocketAddr) -> Result<Index, TransferError> {
        let url = base_url(addr)?
            .join("index")
            .map_err(|e| TransferError::InvalidUrl(e.to_string()))?;

        let mut index: Index = self
            .with_retry("index", || async {
                let resp = self.get(url.clone()).await?;
                Ok(resp.json::<Index>().await?)
            })
            .await?;

        let rejected = index.retain_valid_paths();
        if !rejected.is_empty() {
            tracing::warn!(
                %addr,
                count = rejected.len(),
                "transfer: dropped index entries with unsafe paths"
            );
        }
        Ok(index)
    }

    async fn fetch_file(
        &self,
        addr: SocketAddr,
        path: &str,
    ) -> Result<Fetched<StagedFile>, TransferError> {
        validate_path(path)?;
        let mut url = base_url(addr)?;
        url.path_segments_mut()
            .map_err(|()| TransferError::InvalidUrl(format!("cannot-be-a-base: {addr}")))?
            .pop_if_empty()
            .extend(path.split('/'));

        let bytes = self
            .with_retry(path, || async {
                let resp = self.get(url.clone()).await?;
                Ok(resp.bytes().await?)
            })
            .await?;

        let content = StagedFile::write(self.shared_root.join(path), &bytes).await?;
        Ok(Fetched {
            size: bytes.len() as u64,
            content,
        })
    }
}

fn base_url(addr: SocketAddr) -> Result<Url, TransferError> {
    // SocketAddr's Display brackets IPv6 hosts.
    Url::parse(&format!("http://{addr}/")).map_err(|e| TransferError::InvalidUrl(e.to_string()))
}

/// Linear backoff with up to 250ms of jitter.
fn backoff(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(200 * u64::from(attempt) + jitter)
}

/// File content written to a hidden sibling of its destination.
///
/// `commit` renames it into place; `discard`, or dropping it unused,
/// removes it.
#[derive(Debug)]
pub struct StagedFile {
    tmp: Option<PathBuf>,
    dest: PathBuf,
}

impl StagedFile {
    pub async fn write(dest: PathBuf, bytes: &[u8]) -> std::io::Result<Self> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = temp_sibling(&dest);
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(Self {
            tmp: Some(tmp),
            dest,
        })
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }
}

impl Staged for StagedFile {
    // Runs under the index write lock; a rename within one directory is a
    // single metadata operation.
    fn commit(mut self) -> std::io::Result<()> {
        let Some(tmp) = self.tmp.take() else {
            return Ok(());
        };
        if let Err(e) = std::fs::rename(&tmp, &self.dest) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }

    fn discard(mut self) {
        if let Some(tmp) = self.tmp.take() {
            let _ = std::fs::remove_file(tmp);
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            let _ = std::fs::remove_file(tmp);
        }
    }
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.part-{:08x}", rand::random::<u32>()))
}

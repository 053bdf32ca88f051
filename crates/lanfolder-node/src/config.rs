//! Configuration types for lanfolder-node.
//! Parsed from ~/.lanfolder/config.toml.

use lanfolder_protocol::{DEFAULT_PORT, FETCH_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Directory holding shared-folder/, old-files/ and default-files/.
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_identity_file")]
    pub identity_file: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            identity_file: default_identity_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    /// UDP listener and HTTP endpoint address. `[::]` binds dual-stack.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Port peers listen on. The protocol fixes this to the node's own port.
    #[serde(default = "default_port")]
    pub peer_port: u16,
    /// Broadcast / multicast hosts that ANNOUNCE and FILE-UPDATE go to.
    #[serde(default = "default_announce_targets")]
    pub announce_targets: Vec<String>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            peer_port: DEFAULT_PORT,
            announce_targets: default_announce_targets(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_fetches: usize,
    /// Extra attempts per fetch after the first, with jittered backoff.
    #[serde(default)]
    pub fetch_retries: u32,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: FETCH_TIMEOUT_SECS,
            max_concurrent_fetches: 8,
            fetch_retries: 0,
        }
    }
}

// Default value functions
fn default_root() -> String {
    "~/.lanfolder".into()
}
fn default_identity_file() -> String {
    "~/.lanfolder/uuid".into()
}
fn default_listen_addr() -> String {
    format!("[::]:{DEFAULT_PORT}")
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_announce_targets() -> Vec<String> {
    vec!["255.255.255.255".into(), "ff02::1".into()]
}
fn default_timeout() -> u64 {
    FETCH_TIMEOUT_SECS
}
fn default_concurrency() -> usize {
    8
}

impl NodeConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.network
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen_addr {:?}: {e}", self.network.listen_addr))
    }

    /// Announce targets resolved against `peer_port`.
    pub fn announce_targets(&self) -> anyhow::Result<Vec<SocketAddr>> {
        self.network
            .announce_targets
            .iter()
            .map(|host| {
                let ip: IpAddr = host
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid announce target {host:?}: {e}"))?;
                Ok(SocketAddr::new(ip, self.network.peer_port))
            })
            .collect()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.fetch_timeout_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection::default(),
            network: NetworkSection::default(),
            sync: SyncSection::default(),
        }
    }
}

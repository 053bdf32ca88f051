//! LAN Folder node -- peer discovery over UDP and index-driven file sync.
//!
//! Re-exports every module so the binary and the integration tests share
//! one set of types.

pub mod config;
pub mod coordinator;
pub mod folders;
pub mod identity;
pub mod node;
pub mod peer_registry;
pub mod transfer;
pub mod transport;

use std::path::PathBuf;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

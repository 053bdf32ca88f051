//! Node identity -- a random UUIDv4-formatted token persisted on first boot.

use std::path::Path;

use lanfolder_protocol::{PeerId, ProtocolError};
use uuid::Uuid;

/// Generate a fresh identity.
pub fn generate() -> Result<PeerId, ProtocolError> {
    PeerId::new(Uuid::new_v4().to_string())
}

/// Read the identity stored at `path`, creating it if missing.
pub fn load_or_create(path: &Path) -> anyhow::Result<PeerId> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let line = content.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            anyhow::bail!("identity file {} is empty", path.display());
        }
        return Ok(PeerId::new(line)?);
    }

    let id = generate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{id}\n"))?;
    tracing::info!(path = %path.display(), peer_id = %id, "generated node identity");
    Ok(id)
}

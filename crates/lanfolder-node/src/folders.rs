//! On-disk layout under the node root.
//!
//! ```text
//! <root>/shared-folder/   files offered to and fetched from peers
//! <root>/old-files/       leftovers from an ungraceful shutdown, by timestamp
//! <root>/default-files/   content every fresh boot starts with
//! ```

use std::path::{Path, PathBuf};

use lanfolder_index::IndexStore;
use lanfolder_protocol::{validate_path, FileEntry, Version};

pub const SHARED_FOLDER: &str = "shared-folder";
pub const OLD_FILES: &str = "old-files";
pub const DEFAULT_FILES: &str = "default-files";

#[derive(Debug, Clone)]
pub struct Folders {
    pub shared: PathBuf,
    pub old: PathBuf,
    pub defaults: PathBuf,
}

impl Folders {
    pub fn under(root: &Path) -> Self {
        Self {
            shared: root.join(SHARED_FOLDER),
            old: root.join(OLD_FILES),
            defaults: root.join(DEFAULT_FILES),
        }
    }
}

/// Create the layout and move anything left in the shared folder aside.
///
/// The index is rebuilt at boot, so files found in the shared folder have no
/// version to vouch for them.
pub fn prepare(root: &Path) -> anyhow::Result<Folders> {
    let folders = Folders::under(root);
    for dir in [&folders.shared, &folders.old, &folders.defaults] {
        std::fs::create_dir_all(dir)?;
    }

    if let Some(dest) = recover_orphans(&folders)? {
        tracing::warn!(
            dest = %dest.display(),
            "shared folder was not empty at boot, moved leftovers aside"
        );
    }
    Ok(folders)
}

fn recover_orphans(folders: &Folders) -> anyhow::Result<Option<PathBuf>> {
    let leftovers: Vec<_> = std::fs::read_dir(&folders.shared)?.collect::<Result<_, _>>()?;
    if leftovers.is_empty() {
        return Ok(None);
    }

    let stamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S%.3f").to_string();
    let dest = folders.old.join(stamp);
    std::fs::create_dir_all(&dest)?;
    for entry in leftovers {
        std::fs::rename(entry.path(), dest.join(entry.file_name()))?;
    }
    Ok(Some(dest))
}

/// Copy every file under default-files/ into the shared folder and index it
/// at the initial version. Returns the number of files seeded.
pub async fn seed_defaults(folders: &Folders, index: &IndexStore) -> anyhow::Result<usize> {
    let mut found = Vec::new();
    collect_files(&folders.defaults, &folders.defaults, &mut found)?;

    let mut entries = Vec::with_capacity(found.len());
    for (rel, src) in found {
        let dest = folders.shared.join(&rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = tokio::fs::copy(&src, &dest).await?;
        entries.push(FileEntry {
            path: rel,
            version: Version::initial(),
            size,
        });
    }

    let report = index.merge_batch(entries).await;
    Ok(report.applied.len())
}

/// Walk `dir`, collecting (relative slash path, absolute path) for regular files.
fn collect_files(base: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(base, &path, out)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let rel = path.strip_prefix(base)?;
        let Some(parts) = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
        else {
            tracing::warn!(path = %path.display(), "skipping default file with non-utf-8 name");
            continue;
        };
        let rel = parts.join("/");
        if let Err(e) = validate_path(&rel) {
            tracing::warn!(path = %path.display(), "skipping default file: {e}");
            continue;
        }
        out.push((rel, path));
    }
    Ok(())
}

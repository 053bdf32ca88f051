//! LAN Folder Index -- manifest of shared files and the newer-wins diff.
//!
//! An `Index` maps a relative path to its version and size. The node keeps
//! one authoritative copy behind an `IndexStore`; peers' indexes arrive as
//! transient snapshots and are only ever diffed against it.

use std::collections::BTreeMap;

use lanfolder_protocol::{validate_path, FileEntry, Version};
use serde::{Deserialize, Deserializer, Serialize};

pub mod store;

pub use store::{IndexStore, MergeReport, Staged};

/// Version and size recorded for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "ver")]
    pub version: Version,
    #[serde(deserialize_with = "size_from_number_or_string")]
    pub size: u64,
}

/// Path -> entry. Serialises as a flat JSON object, the body of `GET /index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index(BTreeMap<String, IndexEntry>);

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.0.get(path)
    }

    /// Record `entry`, returning what was there before.
    pub fn insert(&mut self, entry: FileEntry) -> Option<IndexEntry> {
        self.0.insert(
            entry.path,
            IndexEntry {
                version: entry.version,
                size: entry.size,
            },
        )
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = FileEntry> + '_ {
        self.0.iter().map(|(path, e)| FileEntry {
            path: path.clone(),
            version: e.version.clone(),
            size: e.size,
        })
    }

    /// Drop entries whose path could escape the shared folder or cannot be
    /// carried on the wire. Returns the rejected paths.
    pub fn retain_valid_paths(&mut self) -> Vec<String> {
        let mut rejected = Vec::new();
        self.0.retain(|path, _| {
            let ok = validate_path(path).is_ok();
            if !ok {
                rejected.push(path.clone());
            }
            ok
        });
        rejected
    }
}

impl FromIterator<FileEntry> for Index {
    fn from_iter<I: IntoIterator<Item = FileEntry>>(iter: I) -> Self {
        let mut index = Index::new();
        for entry in iter {
            index.insert(entry);
        }
        index
    }
}

/// Newer-wins: fetch when we have nothing for the path or the remote
/// version is strictly newer. Equal or older remote versions are skipped.
pub fn needs_fetch(local: Option<&IndexEntry>, remote: &Version) -> bool {
    match local {
        None => true,
        Some(local) => remote.is_newer_than(&local.version),
    }
}

/// Compare a remote snapshot against the local index and list the entries
/// worth fetching, in path order.
pub fn diff_index(local: &Index, remote: &Index) -> Vec<FileEntry> {
    remote
        .entries()
        .filter(|r| needs_fetch(local.get(&r.path), &r.version))
        .collect()
}

/// Older nodes send sizes as strings.
fn size_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, ver: &str, size: u64) -> FileEntry {
        FileEntry {
            path: path.into(),
            version: ver.parse().unwrap(),
            size,
        }
    }

    #[test]
    fn test_diff_index() {
        let local: Index = [entry("a", "1", 10), entry("b", "2", 20)].into_iter().collect();
        let remote: Index = [entry("a", "1", 10), entry("b", "3", 21), entry("c", "1", 5)]
            .into_iter()
            .collect();

        let needed: Vec<String> = diff_index(&local, &remote)
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(needed, vec!["b", "c"]);
    }

    #[test]
    fn test_diff_skips_older_remote() {
        let local: Index = [entry("a", "5", 10)].into_iter().collect();
        let remote: Index = [entry("a", "4", 10)].into_iter().collect();
        assert!(diff_index(&local, &remote).is_empty());
    }

    #[test]
    fn test_diff_uses_numeric_order() {
        let local: Index = [entry("a", "9", 1)].into_iter().collect();
        let remote: Index = [entry("a", "10", 1)].into_iter().collect();
        assert_eq!(diff_index(&local, &remote).len(), 1);
    }

    #[test]
    fn test_needs_fetch_absent_is_infinitely_stale() {
        assert!(needs_fetch(None, &"0".parse().unwrap()));
    }

    #[test]
    fn test_index_json_shape() {
        let index: Index = [entry("docs/readme.txt", "2", 100)].into_iter().collect();
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "docs/readme.txt": { "ver": "2", "size": 100 } })
        );
    }

    #[test]
    fn test_index_accepts_string_sizes() {
        let index: Index =
            serde_json::from_str(r#"{ "a.txt": { "ver": "3", "size": "42" } }"#).unwrap();
        assert_eq!(index.get("a.txt").unwrap().size, 42);
        assert!(serde_json::from_str::<Index>(r#"{ "a": { "ver": "1", "size": "x" } }"#).is_err());
    }

    #[test]
    fn test_retain_valid_paths() {
        let mut index: Index = [entry("ok/file", "1", 1), entry("../evil", "1", 1), entry("/abs", "1", 1)]
            .into_iter()
            .collect();
        let mut rejected = index.retain_valid_paths();
        rejected.sort();
        assert_eq!(rejected, vec!["../evil", "/abs"]);
        assert_eq!(index.len(), 1);
        assert!(index.contains("ok/file"));
    }
}

/**
 * Tree Snapshots (§4.C, §4.I, §6)
 *
 * DESIGN DECISION: one file per snapshot, named by tree version, framed as
 * `{magic_u32, version_u16, length_u32, bytes}` + CRC32 trailer exactly as §6
 * specifies, instead of the teacher's SQLite row-per-snapshot approach
 * WHY: a snapshot is taken rarely (every `snapshot_every` commits) and read
 * back wholesale on restart; a flat framed file is simpler to reason about
 * for corruption detection than a database row, and matches the binary
 * on-disk contract §6 mandates verbatim.
 */

use std::fs;
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;

use crate::domain::KnowledgeTree;
use crate::error::{Error, Result};

const MAGIC: u32 = 0x5343_4253; // "SCBS"
const FORMAT_VERSION: u16 = 1;

/// A point-in-time capture of the tree plus the WAL offset it was taken at,
/// so replay on restart knows exactly where to resume (§4.I).
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tree: KnowledgeTree,
    pub wal_offset: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotPayload {
    tree: KnowledgeTree,
    wal_offset: u64,
}

impl Snapshot {
    /// Serialize and write this snapshot to `dir`, named by tree version so
    /// `load_latest` can find the newest one without reading file contents.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let payload = SnapshotPayload { tree: self.tree.clone(), wal_offset: self.wal_offset };
        let bytes = serde_json::to_vec(&payload)?;

        let mut framed = Vec::with_capacity(bytes.len() + 14);
        framed.extend_from_slice(&MAGIC.to_le_bytes());
        framed.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        framed.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        framed.extend_from_slice(&bytes);

        let mut crc = Crc32::new();
        crc.update(&bytes);
        framed.extend_from_slice(&crc.finalize().to_le_bytes());

        let path = dir.join(format!("snapshot-{:020}.bin", self.tree.version));
        fs::write(&path, framed)?;
        Ok(path)
    }

    /// Load and CRC-verify a specific snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        let framed = fs::read(path)?;
        if framed.len() < 14 {
            return Err(Error::Corruption(format!("{} too short to be a snapshot", path.display())));
        }
        let magic = u32::from_le_bytes(framed[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(Error::Corruption(format!("{} has bad magic", path.display())));
        }
        let version = u16::from_le_bytes(framed[4..6].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "{} has unsupported snapshot format version {version}",
                path.display()
            )));
        }
        let length = u32::from_le_bytes(framed[6..10].try_into().unwrap()) as usize;
        let bytes_end = 10 + length;
        let bytes = framed
            .get(10..bytes_end)
            .ok_or_else(|| Error::Corruption(format!("{} truncated payload", path.display())))?;
        let trailer = framed
            .get(bytes_end..bytes_end + 4)
            .ok_or_else(|| Error::Corruption(format!("{} missing CRC trailer", path.display())))?;
        let stored_crc = u32::from_le_bytes(trailer.try_into().unwrap());

        let mut crc = Crc32::new();
        crc.update(bytes);
        if crc.finalize() != stored_crc {
            return Err(Error::Corruption(format!("{} failed CRC32 check", path.display())));
        }

        let payload: SnapshotPayload = serde_json::from_slice(bytes)?;
        Ok(Self { tree: payload.tree, wal_offset: payload.wal_offset })
    }

    /// Load the highest-versioned snapshot in `dir`, or `None` if the
    /// directory has no snapshots yet (fresh store, §4.I startup path).
    pub fn load_latest(dir: &Path) -> Result<Option<Self>> {
        if !dir.exists() {
            return Ok(None);
        }
        let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("snapshot-") && n.ends_with(".bin"))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        match candidates.pop() {
            Some(path) => Ok(Some(Self::load(&path)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_load_round_trips_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let tree = KnowledgeTree::bootstrap().unwrap();
        let snapshot = Snapshot { tree: tree.clone(), wal_offset: 42 };
        let path = snapshot.write(dir.path()).unwrap();

        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded.tree, tree);
        assert_eq!(loaded.wal_offset, 42);
    }

    #[test]
    fn load_latest_picks_the_highest_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = KnowledgeTree::bootstrap().unwrap();
        Snapshot { tree: tree.clone(), wal_offset: 0 }.write(dir.path()).unwrap();
        tree.version = 2;
        Snapshot { tree: tree.clone(), wal_offset: 5 }.write(dir.path()).unwrap();

        let latest = Snapshot::load_latest(dir.path()).unwrap().unwrap();
        assert_eq!(latest.tree.version, 2);
        assert_eq!(latest.wal_offset, 5);
    }

    #[test]
    fn load_latest_on_empty_dir_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Snapshot::load_latest(dir.path()).unwrap().is_none());
    }

    #[test]
    fn corrupted_payload_fails_crc_check() {
        let dir = tempfile::tempdir().unwrap();
        let tree = KnowledgeTree::bootstrap().unwrap();
        let path = Snapshot { tree, wal_offset: 0 }.write(dir.path()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(Snapshot::load(&path), Err(Error::Corruption(_))));
    }
}

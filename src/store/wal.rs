/**
 * Write-Ahead Log (§4.I, §6)
 *
 * DESIGN DECISION: a single append-only file of length-prefixed records,
 * read back into memory on open
 * WHY: the commit path (§4.C step 4) only ever appends; replay (§4.I) only
 * ever scans forward from an offset. A purpose-built framed format avoids
 * pulling in the teacher's SQLite dependency (`realtime_sync/persistence.rs`)
 * for a log that is never queried, only replayed in order.
 *
 * Record layout, matching §6's `{version_u64, offset_u64, mutation_json,
 * diff_json, commit_hash}`: a `u32` total record length, then the fields in
 * that order, each `Vec<u8>` field itself `u32`-length-prefixed.
 */

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// One committed mutation's WAL record.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub version: u64,
    pub offset: u64,
    pub mutation_json: Vec<u8>,
    pub diff_json: Vec<u8>,
    pub commit_hash: String,
}

impl WalEntry {
    fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.version.to_le_bytes());
        body.extend_from_slice(&self.offset.to_le_bytes());
        write_framed(&mut body, &self.mutation_json);
        write_framed(&mut body, &self.diff_json);
        write_framed(&mut body, self.commit_hash.as_bytes());

        let mut record = Vec::with_capacity(body.len() + 4);
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&body);
        record
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut cursor = 0usize;
        let version = read_u64(body, &mut cursor)?;
        let offset = read_u64(body, &mut cursor)?;
        let mutation_json = read_framed(body, &mut cursor)?;
        let diff_json = read_framed(body, &mut cursor)?;
        let commit_hash_bytes = read_framed(body, &mut cursor)?;
        let commit_hash = String::from_utf8(commit_hash_bytes)
            .map_err(|e| Error::Corruption(format!("non-UTF8 commit_hash: {e}")))?;
        Ok(Self { version, offset, mutation_json, diff_json, commit_hash })
    }
}

fn write_framed(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_le_bytes());
    out.extend_from_slice(field);
}

fn read_u64(body: &[u8], cursor: &mut usize) -> Result<u64> {
    let end = *cursor + 8;
    let bytes = body
        .get(*cursor..end)
        .ok_or_else(|| Error::Corruption("truncated WAL record".to_string()))?;
    *cursor = end;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_framed(body: &[u8], cursor: &mut usize) -> Result<Vec<u8>> {
    let len_end = *cursor + 4;
    let len_bytes = body
        .get(*cursor..len_end)
        .ok_or_else(|| Error::Corruption("truncated WAL field length".to_string()))?;
    let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    *cursor = len_end;
    let data_end = *cursor + len;
    let data = body
        .get(*cursor..data_end)
        .ok_or_else(|| Error::Corruption("truncated WAL field body".to_string()))?
        .to_vec();
    *cursor = data_end;
    Ok(data)
}

enum Backing {
    File(PathBuf),
    Memory(Mutex<Vec<WalEntry>>),
}

/// Append-only mutation log backing the Knowledge Store's commit path.
pub struct Wal {
    backing: Backing,
    /// Byte offset of the end of the file, used as the replay cursor and
    /// recorded into snapshots so replay can resume exactly where a
    /// snapshot left off.
    tail: Mutex<u64>,
}

impl Wal {
    /// Open (creating if absent) the WAL file at `path`, positioned at EOF.
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        let tail = file.metadata()?.len();
        Ok(Self { backing: Backing::File(path), tail: Mutex::new(tail) })
    }

    /// In-memory WAL for tests and ephemeral runs; `open` re-reads nothing.
    pub fn in_memory() -> Self {
        Self { backing: Backing::Memory(Mutex::new(Vec::new())), tail: Mutex::new(0) }
    }

    /// Append one entry, flushing before returning so a crash immediately
    /// after `append` never loses a committed mutation.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        match &self.backing {
            Backing::File(path) => {
                let mut file = OpenOptions::new().append(true).open(path)?;
                let encoded = entry.encode();
                file.write_all(&encoded)?;
                file.flush()?;
                file.sync_data()?;
                let mut tail = self.tail.lock().expect("wal tail lock poisoned");
                *tail += encoded.len() as u64;
            }
            Backing::Memory(entries) => {
                let mut entries = entries.lock().expect("wal memory lock poisoned");
                entries.push(entry.clone());
                let mut tail = self.tail.lock().expect("wal tail lock poisoned");
                *tail += 1;
            }
        }
        Ok(())
    }

    /// Current write position: a byte offset for a file-backed WAL, an
    /// entry count for an in-memory one. Either way it is the value a
    /// snapshot should record to resume replay from exactly this point.
    pub fn tail_offset(&self) -> u64 {
        *self.tail.lock().expect("wal tail lock poisoned")
    }

    /// Decode and return every entry whose record starts at or after
    /// `from_offset`.
    pub fn replay_from(&self, from_offset: u64) -> Result<Vec<WalEntry>> {
        match &self.backing {
            Backing::File(path) => {
                let mut file = BufReader::new(File::open(path)?);
                file.seek(SeekFrom::Start(from_offset))?;
                let mut entries = Vec::new();
                loop {
                    let mut len_buf = [0u8; 4];
                    match file.read_exact(&mut len_buf) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                        Err(e) => return Err(Error::from(e)),
                    }
                    let len = u32::from_le_bytes(len_buf) as usize;
                    let mut body = vec![0u8; len];
                    file.read_exact(&mut body)?;
                    entries.push(WalEntry::decode(&body)?);
                }
                Ok(entries)
            }
            Backing::Memory(memory) => {
                let entries = memory.lock().expect("wal memory lock poisoned");
                Ok(entries.iter().skip(from_offset as usize).cloned().collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: u64) -> WalEntry {
        WalEntry {
            version,
            offset: 0,
            mutation_json: br#"{"a":1}"#.to_vec(),
            diff_json: br#"{"b":2}"#.to_vec(),
            commit_hash: format!("hash-{version}"),
        }
    }

    #[test]
    fn append_then_replay_from_zero_returns_all_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path().join("wal.log")).unwrap();
        wal.append(&entry(1)).unwrap();
        wal.append(&entry(2)).unwrap();

        let replayed = wal.replay_from(0).unwrap();
        assert_eq!(replayed, vec![entry(1), entry(2)]);
    }

    #[test]
    fn replay_from_tail_after_first_entry_skips_it() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path().join("wal.log")).unwrap();
        wal.append(&entry(1)).unwrap();
        let offset_after_first = wal.tail_offset();
        wal.append(&entry(2)).unwrap();

        let replayed = wal.replay_from(offset_after_first).unwrap();
        assert_eq!(replayed, vec![entry(2)]);
    }

    #[test]
    fn reopening_the_file_preserves_previously_appended_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = Wal::open(path.clone()).unwrap();
            wal.append(&entry(1)).unwrap();
        }
        let wal = Wal::open(path).unwrap();
        assert_eq!(wal.replay_from(0).unwrap(), vec![entry(1)]);
    }

    #[test]
    fn in_memory_wal_replays_by_entry_count_offset() {
        let wal = Wal::in_memory();
        wal.append(&entry(1)).unwrap();
        wal.append(&entry(2)).unwrap();
        assert_eq!(wal.replay_from(1).unwrap(), vec![entry(2)]);
    }
}

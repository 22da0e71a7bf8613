//! Durable substrate: an append-only commit log replayed into memory.
//!
//! Layout of `<path>/commits.log`:
//!
//! ```text
//! header:  magic "CFL\0" | version u8
//! frame:   len u32 LE | rmp-serde(CommitFrame) | crc32 u32 LE
//! ```
//!
//! Each write transaction becomes exactly one frame, so a commit is either
//! fully present in the log or absent. A torn or corrupt final frame (crash
//! mid-write) is truncated on open. A corrupt frame followed by more data is
//! reported as corruption.

use super::keyspace::{Journal, KeySpace, Tree};
use super::{ReadTxn, Substrate, WriteTxn};
use crate::error::{Result, StoreError};
use crate::notify::Observation;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the commit log.
const LOG_MAGIC: &[u8; 4] = b"CFL\0";

/// Current commit log format version.
const LOG_VERSION: u8 = 1;

const HEADER_SIZE: usize = 5;

/// Length prefix plus trailing checksum.
const FRAME_OVERHEAD: usize = 4 + 4;

/// Largest commit body the log accepts. Longer length prefixes are corrupt.
const MAX_FRAME_BODY: usize = 1 << 30;

const LOG_FILE: &str = "commits.log";
const LOCK_FILE: &str = "LOCK";

/// File substrate configuration.
#[derive(Clone, Debug)]
pub struct FileSubstrateConfig {
    /// Directory holding the commit log and lock file.
    pub path: PathBuf,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync every N commits (0 and 1 both mean every commit).
    pub sync_interval: u64,
}

impl Default for FileSubstrateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./changefeed"),
            create_if_missing: true,
            sync_interval: 1,
        }
    }
}

/// One committed write transaction.
#[derive(Debug, Serialize, Deserialize)]
struct CommitFrame {
    seq: u64,
    entries: Vec<(String, Vec<u8>)>,
}

/// Writer side of the commit log.
pub(crate) struct CommitLog {
    file: File,
    /// Length of the valid prefix of the file.
    len: u64,
    next_seq: u64,
    writes_since_sync: u64,
    sync_interval: u64,
}

impl CommitLog {
    /// Open or create the log and replay it.
    fn open(path: &Path, sync_interval: u64) -> Result<(Tree, Self)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut tree = Tree::new();
        let mut next_seq = 1;

        let data = fs::read(path)?;
        let len = if data.len() < HEADER_SIZE && header_prefix(&data) {
            // Empty, or a crash cut the header short: nothing was committed.
            if !data.is_empty() {
                warn!(path = %path.display(), len = data.len(), "rewriting partial commit log header");
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;
            HEADER_SIZE as u64
        } else {
            let replay = replay(&data, &mut tree)?;
            next_seq = replay.last_seq + 1;

            if replay.valid_len < data.len() {
                warn!(
                    path = %path.display(),
                    valid_len = replay.valid_len,
                    file_len = data.len(),
                    "truncating torn tail of commit log"
                );
                file.set_len(replay.valid_len as u64)?;
                file.sync_all()?;
            }
            replay.valid_len as u64
        };

        file.seek(SeekFrom::Start(len))?;
        debug!(path = %path.display(), keys = tree.len(), "commit log opened");

        Ok((
            tree,
            Self {
                file,
                len,
                next_seq,
                writes_since_sync: 0,
                sync_interval: sync_interval.max(1),
            },
        ))
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.file.write_all(frame)?;
        self.file.flush()?;

        self.writes_since_sync += 1;
        if self.writes_since_sync >= self.sync_interval {
            self.file.sync_data()?;
            self.writes_since_sync = 0;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }
}

impl Journal for CommitLog {
    fn record(&mut self, staged: &Tree) -> Result<()> {
        let frame = CommitFrame {
            seq: self.next_seq,
            entries: staged
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let encoded = encode_frame(&frame)?;

        if let Err(e) = self.write_frame(&encoded) {
            // Cut off whatever part of the frame reached the file so the next
            // commit does not land behind garbage.
            let _ = self.file.set_len(self.len);
            let _ = self.file.seek(SeekFrom::Start(self.len));
            return Err(StoreError::Storage(format!("commit {} failed: {e}", frame.seq)));
        }

        self.len += encoded.len() as u64;
        self.next_seq += 1;
        Ok(())
    }
}

/// Whether `data` could be the start of a log header.
fn header_prefix(data: &[u8]) -> bool {
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(LOG_MAGIC);
    header[4] = LOG_VERSION;
    header.starts_with(data)
}

/// Length prefix for a commit body of `len` bytes.
fn frame_len_prefix(len: usize) -> Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|_| len <= MAX_FRAME_BODY)
        .ok_or_else(|| {
            StoreError::Storage(format!(
                "commit of {len} bytes exceeds the {MAX_FRAME_BODY} byte frame limit"
            ))
        })
}

fn encode_frame(frame: &CommitFrame) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(frame)?;
    let prefix = frame_len_prefix(body.len())?;
    let mut encoded = Vec::with_capacity(body.len() + FRAME_OVERHEAD);
    encoded.extend_from_slice(&prefix.to_le_bytes());
    encoded.extend_from_slice(&body);
    encoded.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(encoded)
}

struct Replay {
    valid_len: usize,
    last_seq: u64,
}

/// Apply every intact frame to `tree`.
fn replay(data: &[u8], tree: &mut Tree) -> Result<Replay> {
    if data.len() < HEADER_SIZE || &data[..4] != LOG_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid commit log magic".into()));
    }
    if data[4] != LOG_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported commit log version: {}",
            data[4]
        )));
    }

    let mut offset = HEADER_SIZE;
    let mut last_seq = 0;

    while offset < data.len() {
        let remaining = &data[offset..];
        if remaining.len() < FRAME_OVERHEAD {
            break;
        }

        let body_len = u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]])
            as usize;
        if body_len > MAX_FRAME_BODY {
            return Err(StoreError::Corruption(format!(
                "commit frame at offset {offset} declares {body_len} bytes"
            )));
        }
        let frame_len = body_len + FRAME_OVERHEAD;
        if remaining.len() < frame_len {
            // A torn write leaves one partial frame. An intact frame further
            // on means this length prefix is damaged, not the tail.
            if let Some(next) = next_intact_frame(data, offset + 1) {
                return Err(StoreError::Corruption(format!(
                    "commit frame at offset {offset} overruns the log, but an intact frame follows at {next}"
                )));
            }
            break;
        }

        let body = &remaining[4..4 + body_len];
        let crc_bytes = &remaining[4 + body_len..frame_len];
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed = crc32fast::hash(body);

        if stored != computed {
            if offset + frame_len < data.len() {
                warn!(offset, "checksum mismatch before the end of the commit log");
                return Err(StoreError::ChecksumMismatch {
                    expected: stored,
                    got: computed,
                });
            }
            break;
        }

        let frame: CommitFrame = rmp_serde::from_slice(body)
            .map_err(|e| StoreError::Corruption(format!("undecodable commit frame: {e}")))?;
        last_seq = frame.seq;
        tree.extend(frame.entries);

        offset += frame_len;
    }

    Ok(Replay {
        valid_len: offset,
        last_seq,
    })
}

/// Offset of the first decodable frame with a valid checksum at or after
/// `from`.
fn next_intact_frame(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len().saturating_sub(FRAME_OVERHEAD - 1)).find(|&offset| {
        let remaining = &data[offset..];
        let body_len =
            u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
        if body_len == 0 || body_len > MAX_FRAME_BODY || remaining.len() < body_len + FRAME_OVERHEAD
        {
            return false;
        }
        let body = &remaining[4..4 + body_len];
        let crc_bytes = &remaining[4 + body_len..body_len + FRAME_OVERHEAD];
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        stored == crc32fast::hash(body) && rmp_serde::from_slice::<CommitFrame>(body).is_ok()
    })
}

/// Substrate persisted in a commit log under a directory.
pub struct FileSubstrate {
    path: PathBuf,
    space: KeySpace<CommitLog>,

    /// Lock file for exclusive access.
    _lock_file: File,
}

impl FileSubstrate {
    /// Open an existing substrate or create a new one.
    pub fn open(config: FileSubstrateConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::NotInitialized);
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let (tree, log) = CommitLog::open(&config.path.join(LOG_FILE), config.sync_interval)?;

        Ok(Self {
            path: config.path,
            space: KeySpace::new(tree, log),
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of keys across all prefixes.
    pub fn len(&self) -> usize {
        self.space.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force pending commits to disk.
    pub fn sync(&self) -> Result<()> {
        self.space.with_journal(CommitLog::sync)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Substrate for FileSubstrate {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(self.space.begin_read()?))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>> {
        Ok(Box::new(self.space.begin_write()?))
    }

    fn observe(&self, prefix: &str) -> Result<Observation> {
        self.space.observe(prefix)
    }

    fn close(&self) {
        self.space.close();
    }
}

impl Drop for FileSubstrate {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

//! Transactional ordered key spaces the event store is built on.
//!
//! A substrate provides:
//! - Read transactions that see one consistent snapshot of the key space
//! - Write transactions that become visible atomically on commit
//! - Ordered iteration under a key prefix, starting from a seek bound
//! - Prefix observation: a coalescing signal after each matching commit
//!
//! Two substrates ship with the crate. [`MemorySubstrate`] keeps everything
//! in an ordered map. [`FileSubstrate`] does the same but first appends every
//! commit to a checksummed log file, and replays that log on open.

mod file;
mod keyspace;
mod memory;

pub use file::{FileSubstrate, FileSubstrateConfig};
pub use memory::MemorySubstrate;

use crate::error::Result;
use crate::notify::Observation;
use std::ops::Bound;

/// Entries yielded by a scan, in ascending key order.
pub type ScanIter<'a> = Box<dyn Iterator<Item = (String, Vec<u8>)> + 'a>;

/// A consistent read-only view of the key space.
pub trait ReadTxn {
    /// Value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Keys starting with `prefix`, in ascending order, beginning at `from`.
    ///
    /// `Bound::Unbounded` starts at the first key of the prefix;
    /// `Bound::Excluded(k)` seeks to `k` and skips it if present.
    fn scan<'a>(&'a self, prefix: &'a str, from: Bound<&'a str>) -> Result<ScanIter<'a>>;

    /// Greatest key starting with `prefix`.
    fn last(&self, prefix: &str) -> Result<Option<(String, Vec<u8>)>> {
        Ok(self.scan(prefix, Bound::Unbounded)?.last())
    }

    /// Number of keys starting with `prefix`.
    fn count(&self, prefix: &str) -> Result<usize> {
        Ok(self.scan(prefix, Bound::Unbounded)?.count())
    }
}

/// A pending atomic write. Dropping it without `commit` discards it.
pub trait WriteTxn {
    /// Value under `key`, including writes staged in this transaction.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Stage a write.
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Greatest key starting with `prefix`, including staged writes.
    fn last_key(&self, prefix: &str) -> Result<Option<String>>;

    /// Make every staged write visible at once and signal observers.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// An ordered, transactional, observable key space.
pub trait Substrate: Send + Sync {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>>;

    /// Start a write. Writers are serialised by the substrate.
    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>>;

    /// Register for change signals under `prefix`.
    ///
    /// Register before the first read so no later commit can be missed.
    fn observe(&self, prefix: &str) -> Result<Observation>;

    /// Refuse further transactions and disconnect all observers.
    fn close(&self);
}

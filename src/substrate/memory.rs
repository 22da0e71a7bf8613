//! Volatile substrate backed by an ordered map.

use super::keyspace::{KeySpace, Tree};
use super::{ReadTxn, Substrate, WriteTxn};
use crate::error::Result;
use crate::notify::Observation;

/// In-memory substrate. Contents are lost when it is dropped.
pub struct MemorySubstrate {
    space: KeySpace<()>,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self {
            space: KeySpace::new(Tree::new(), ()),
        }
    }

    /// Number of keys across all prefixes.
    pub fn len(&self) -> usize {
        self.space.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl Substrate for MemorySubstrate {
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

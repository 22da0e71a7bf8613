//! Ordered in-memory key space shared by both substrates.

use super::{ReadTxn, ScanIter, WriteTxn};
use crate::error::{Result, StoreError};
use crate::notify::{Notifier, Observation};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

pub(crate) type Tree = BTreeMap<String, Vec<u8>>;

/// Durability hook run under the writer lock before a commit becomes visible.
pub(crate) trait Journal: Send {
    fn record(&mut self, staged: &Tree) -> Result<()>;
}

impl Journal for () {
    fn record(&mut self, _staged: &Tree) -> Result<()> {
        Ok(())
    }
}

/// Ordered map plus writer serialisation and change notification.
pub(crate) struct KeySpace<J: Journal> {
    tree: RwLock<Tree>,
    journal: Mutex<J>,
    notifier: Arc<Notifier>,
}

impl<J: Journal> KeySpace<J> {
    pub(crate) fn new(tree: Tree, journal: J) -> Self {
        Self {
            tree: RwLock::new(tree),
            journal: Mutex::new(journal),
            notifier: Notifier::new(),
        }
    }

    pub(crate) fn begin_read(&self) -> Result<SnapshotTxn<'_>> {
        self.ensure_open()?;
        Ok(SnapshotTxn {
            tree: self.tree.read(),
        })
    }

    pub(crate) fn begin_write(&self) -> Result<StagedWrite<'_, J>> {
        self.ensure_open()?;
        let journal = self.journal.lock();
        Ok(StagedWrite {
            space: self,
            journal,
            staged: Tree::new(),
        })
    }

    pub(crate) fn observe(&self, prefix: &str) -> Result<Observation> {
        self.notifier.observe(prefix)
    }

    pub(crate) fn close(&self) {
        self.notifier.close();
    }

    /// Run `f` with the writer lock held.
    pub(crate) fn with_journal<T>(&self, f: impl FnOnce(&mut J) -> Result<T>) -> Result<T> {
        f(&mut self.journal.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.notifier.is_closed() {
            return Err(StoreError::Storage("substrate is closed".into()));
        }
        Ok(())
    }
}

/// Read transaction holding a shared lock on the tree for its lifetime.
pub(crate) struct SnapshotTxn<'a> {
    tree: RwLockReadGuard<'a, Tree>,
}

impl ReadTxn for SnapshotTxn<'_> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key).cloned())
    }

    fn scan<'a>(&'a self, prefix: &'a str, from: Bound<&'a str>) -> Result<ScanIter<'a>> {
        Ok(Box::new(
            scan_tree(&self.tree, prefix, from).map(|(k, v)| (k.clone(), v.clone())),
        ))
    }

    fn last(&self, prefix: &str) -> Result<Option<(String, Vec<u8>)>> {
        Ok(last_in(&self.tree, prefix).map(|(k, v)| (k.clone(), v.clone())))
    }

    fn count(&self, prefix: &str) -> Result<usize> {
        Ok(scan_tree(&self.tree, prefix, Bound::Unbounded).count())
    }
}

/// Write transaction holding the writer lock until commit or drop.
pub(crate) struct StagedWrite<'a, J: Journal> {
    space: &'a KeySpace<J>,
    journal: MutexGuard<'a, J>,
    staged: Tree,
}

impl<J: Journal> WriteTxn for StagedWrite<'_, J> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.staged.get(key) {
            return Ok(Some(value.clone()));
        }
        Ok(self.space.tree.read().get(key).cloned())
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.staged.insert(key.to_string(), value);
        Ok(())
    }

    fn last_key(&self, prefix: &str) -> Result<Option<String>> {
        let committed = last_in(&self.space.tree.read(), prefix).map(|(k, _)| k.clone());
        let staged = last_in(&self.staged, prefix).map(|(k, _)| k.clone());
        Ok(committed.max(staged))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let StagedWrite {
            space,
            mut journal,
            staged,
        } = *self;

        if staged.is_empty() {
            return Ok(());
        }

        journal.record(&staged)?;

        let keys: Vec<String> = staged.keys().cloned().collect();
        space.tree.write().extend(staged);
        // Release the writer before waking observers.
        drop(journal);

        space.notifier.notify(keys.iter().map(String::as_str));
        Ok(())
    }
}

fn scan_tree<'a>(
    tree: &'a Tree,
    prefix: &'a str,
    from: Bound<&'a str>,
) -> impl Iterator<Item = (&'a String, &'a Vec<u8>)> + 'a {
    let start = match from {
        Bound::Unbounded => Bound::Included(prefix),
        bound => bound,
    };
    tree.range::<str, _>((start, Bound::Unbounded))
        .skip_while(move |(k, _)| k.as_str() < prefix)
        .take_while(move |(k, _)| k.starts_with(prefix))
}

fn last_in<'a>(tree: &'a Tree, prefix: &'a str) -> Option<(&'a String, &'a Vec<u8>)> {
    match prefix_end(prefix) {
        Some(end) => tree
            .range::<str, _>((Bound::Included(prefix), Bound::Excluded(end.as_str())))
            .next_back(),
        None => scan_tree(tree, prefix, Bound::Unbounded).last(),
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_end(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    let last = chars.pop()?;
    let bumped = char::from_u32(last as u32 + 1)?;
    chars.push(bumped);
    Some(chars.into_iter().collect())
}

use std::{
    collections::{BTreeMap, VecDeque},
    ops::Bound,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::error::Result;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Values stored in the index.
///
/// Values are serialized with serde when they are written to a segment.
pub trait Value: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A key and its value.
pub type Entry<V> = (Vec<u8>, V);

/// Iterator over the entries of a key range in ascending key order.
pub type EntryIter<V> = Box<dyn Iterator<Item = Result<Entry<V>>> + Send>;

/// Opaque token returned by a commit of a [`MutableTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitToken(pub u64);

/// A single ordered and mutable key/value structure.
///
/// Key ranges are half-open `[from, to)` and `None` means the range is unbounded on that side.
/// Implementations must allow concurrent single-key writes.
pub trait MutableTree<V>: Send + Sync {
    fn name(&self) -> &str;

    /// Insert a new entry and return the value that was replaced.
    fn insert(&self, key: Vec<u8>, value: V) -> Result<Option<V>>;

    /// Remove an entry and return its value.
    fn remove(&self, key: &[u8]) -> Result<Option<V>>;

    fn contains(&self, key: &[u8]) -> Result<bool>;

    fn lookup(&self, key: &[u8]) -> Result<Option<V>>;

    /// Number of entries in the key range.
    fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64>;

    fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<EntryIter<V>>;

    fn insert_batch(&self, entries: Vec<Entry<V>>) -> Result<Vec<Option<V>>> {
        entries
            .into_iter()
            .map(|(key, value)| self.insert(key, value))
            .collect()
    }

    fn remove_batch(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<V>>> {
        keys.iter().map(|key| self.remove(key)).collect()
    }

    /// Make all previous writes durable and return a token identifying the commit point.
    fn commit(&self) -> Result<CommitToken>;
}

/// Returns true if no key can be inside `[from, to)`.
pub(crate) fn is_empty_range(from: Option<&[u8]>, to: Option<&[u8]>) -> bool {
    matches!((from, to), (Some(from), Some(to)) if from >= to)
}

fn bounds<'a>(from: Option<&'a [u8]>, to: Option<&'a [u8]>) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    (
        from.map_or(Bound::Unbounded, Bound::Included),
        to.map_or(Bound::Unbounded, Bound::Excluded),
    )
}

/// Number of entries a [`TreeRange`] copies while holding the read lock.
const RANGE_BATCH_SIZE: usize = 256;

/// In-memory [`MutableTree`] guarded by a reader-writer lock.
pub struct MemoryTree<V> {
    name: String,
    entries: Arc<RwLock<BTreeMap<Vec<u8>, V>>>,
    commits: AtomicU64,
}

impl<V> MemoryTree<V>
where
    V: Value,
{
    pub fn new<S: Into<String>>(name: S) -> MemoryTree<V> {
        MemoryTree {
            name: name.into(),
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            commits: AtomicU64::new(0),
        }
    }

    /// Returns the number of entries in the tree.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V> MutableTree<V> for MemoryTree<V>
where
    V: Value,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn insert(&self, key: Vec<u8>, value: V) -> Result<Option<V>> {
        Ok(self.entries.write().insert(key, value))
    }

    fn remove(&self, key: &[u8]) -> Result<Option<V>> {
        Ok(self.entries.write().remove(key))
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<V>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        if is_empty_range(from, to) {
            return Ok(0);
        }
        let count = self
            .entries
            .read()
            .range::<[u8], _>(bounds(from, to))
            .count();
        Ok(count.try_into()?)
    }

    fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<EntryIter<V>> {
        let result = TreeRange {
            entries: self.entries.clone(),
            next_start: from.map_or(Bound::Unbounded, |k| Bound::Included(k.to_vec())),
            end: to.map(|k| k.to_vec()),
            buffer: VecDeque::new(),
            finished: is_empty_range(from, to),
        };
        Ok(Box::new(result))
    }

    fn insert_batch(&self, entries: Vec<Entry<V>>) -> Result<Vec<Option<V>>> {
        let mut map = self.entries.write();
        let replaced = entries
            .into_iter()
            .map(|(key, value)| map.insert(key, value))
            .collect();
        Ok(replaced)
    }

    fn remove_batch(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<V>>> {
        let mut map = self.entries.write();
        Ok(keys.iter().map(|key| map.remove(key)).collect())
    }

    fn commit(&self) -> Result<CommitToken> {
        let token = CommitToken(self.commits.fetch_add(1, Ordering::SeqCst) + 1);
        debug!(tree = %self.name, commit = token.0, "committed mutable tree");
        Ok(token)
    }
}

/// Lazy range iterator over a [`MemoryTree`].
///
/// Entries are copied in batches, so the lock is never held while the caller processes an entry.
/// Each batch is consistent, but writes that happen during the scan may or may not be observed.
pub struct TreeRange<V> {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, V>>>,
    next_start: Bound<Vec<u8>>,
    end: Option<Vec<u8>>,
    buffer: VecDeque<Entry<V>>,
    finished: bool,
}

impl<V> TreeRange<V>
where
    V: Value,
{
    fn fill_buffer(&mut self) {
        let start = match &self.next_start {
            Bound::Included(k) => Bound::Included(k.as_slice()),
            Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let end = self.end.as_deref().map_or(Bound::Unbounded, Bound::Excluded);

        let entries = self.entries.read();
        self.buffer.extend(
            entries
                .range::<[u8], _>((start, end))
                .take(RANGE_BATCH_SIZE)
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        drop(entries);

        if self.buffer.len() < RANGE_BATCH_SIZE {
            self.finished = true;
        }
        // Continue after the last copied key
        if let Some((last_key, _)) = self.buffer.back() {
            self.next_start = Bound::Excluded(last_key.clone());
        }
    }
}

impl<V> Iterator for TreeRange<V>
where
    V: Value,
{
    type Item = Result<Entry<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.finished {
            self.fill_buffer();
        }
        self.buffer.pop_front().map(Ok)
    }
}

use std::sync::Arc;

use crate::{
    cache::ViewCache,
    catalog::PartitionCatalog,
    config::IndexConfig,
    descriptor::{PartitionId, ResourceMetadata},
    error::Result,
    range::PartitionedRange,
    segment::SegmentStore,
    tree::{is_empty_range, CommitToken, Entry, EntryIter, MutableTree, Value},
    view::PartitionView,
    Error,
};
use tracing::debug;

/// Resolves partitions and their views.
///
/// Shared between the index and its open ranges, so a range can still open the views of the
/// partitions it has not reached yet.
pub(crate) struct Router<V> {
    catalog: Arc<dyn PartitionCatalog>,
    views: ViewCache<V>,
}

impl<V> Router<V>
where
    V: Value,
{
    fn view_of(&self, key: &[u8]) -> Result<PartitionView<V>> {
        let partition = self.catalog.locate(key)?;
        self.views.get(&partition)
    }

    /// Separator keys that bound the partition at `ordinal`.
    fn bounds_at(&self, ordinal: usize) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let lower = self.catalog.separator_key_at(ordinal)?;
        let upper = match self.catalog.separator_key_at(ordinal + 1) {
            Ok(separator) => Some(separator),
            Err(Error::OrdinalOutOfRange(_)) => None,
            Err(e) => return Err(e),
        };
        Ok((lower, upper))
    }

    fn view_at(&self, lower: &[u8]) -> Result<PartitionView<V>> {
        let partition = self.catalog.locate(lower)?;
        self.views.get(&partition)
    }

    /// Open the range of the partition at `ordinal`, restricted to the keys the partition owns.
    ///
    /// The mutable tree holds the keys of all partitions, so without the restriction a key would
    /// be read once for every partition of the scan. The view of a partition that owns no key of
    /// the range is not opened.
    pub(crate) fn open_range(
        &self,
        ordinal: usize,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<EntryIter<V>> {
        let (lower, upper) = self.bounds_at(ordinal)?;
        let (from, to) = clamp(from, to, &lower, upper.as_deref());
        if is_empty_range(Some(from), to) {
            return Ok(Box::new(std::iter::empty()));
        }
        self.view_at(&lower)?.range(Some(from), to)
    }

    fn range_count(&self, ordinal: usize, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        let (lower, upper) = self.bounds_at(ordinal)?;
        let (from, to) = clamp(from, to, &lower, upper.as_deref());
        if is_empty_range(Some(from), to) {
            return Ok(0);
        }
        self.view_at(&lower)?.range_count(Some(from), to)
    }
}

/// Intersection of `[from, to)` and the key range `[lower, upper)` of a partition.
fn clamp<'a>(
    from: Option<&'a [u8]>,
    to: Option<&'a [u8]>,
    lower: &'a [u8],
    upper: Option<&'a [u8]>,
) -> (&'a [u8], Option<&'a [u8]>) {
    let from = match from {
        Some(from) if from > lower => from,
        _ => lower,
    };
    let to = match (to, upper) {
        (Some(to), Some(upper)) => Some(to.min(upper)),
        (Some(to), None) => Some(to),
        (None, upper) => upper,
    };
    (from, to)
}

/// An index whose keys are split into partitions by a [`PartitionCatalog`].
///
/// All writes go to a single [`MutableTree`] that is shared by all partitions.
/// Reads are routed to the partition that owns the key and see the mutable tree merged with the
/// live segments of that partition, where the tree takes precedence over the segments and newer
/// segments take precedence over older ones.
pub struct PartitionedIndex<V> {
    tree: Arc<dyn MutableTree<V>>,
    router: Arc<Router<V>>,
}

impl<V> PartitionedIndex<V>
where
    V: Value,
{
    pub fn new(
        tree: Arc<dyn MutableTree<V>>,
        catalog: Arc<dyn PartitionCatalog>,
        store: Arc<dyn SegmentStore<V>>,
        config: IndexConfig,
    ) -> PartitionedIndex<V> {
        let views = ViewCache::new(tree.clone(), store, config.view_cache_capacity);
        PartitionedIndex {
            tree,
            router: Arc::new(Router { catalog, views }),
        }
    }

    /// Name of the index as known to the catalog.
    pub fn name(&self) -> &str {
        self.router.catalog.name()
    }

    /// Insert a new entry and return the value that was replaced in the mutable tree.
    pub fn insert(&self, key: Vec<u8>, value: V) -> Result<Option<V>> {
        self.tree.insert(key, value)
    }

    /// Remove an entry from the mutable tree and return its value.
    ///
    /// Entries that only exist in a segment are not affected.
    pub fn remove(&self, key: &[u8]) -> Result<Option<V>> {
        self.tree.remove(key)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.router.view_of(key)?.contains(key)
    }

    /// Get the most recent value for the key.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<V>> {
        self.router.view_of(key)?.lookup(key)
    }

    /// Approximate number of entries in the key range `[from, to)`.
    ///
    /// Each source of each partition is counted on its own, so a key that exists in the mutable
    /// tree and in a segment is counted more than once. The result is an upper bound of the
    /// number of distinct keys. If `to` belongs to a partition before the one of `from`, the
    /// count is 0.
    pub fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        let (from_ordinal, to_ordinal) = match self.span(from, to)? {
            Some(span) => span,
            None => return Ok(0),
        };
        let mut count: u64 = 0;
        for ordinal in from_ordinal..=to_ordinal {
            count = count.saturating_add(self.router.range_count(ordinal, from, to)?);
        }
        Ok(count)
    }

    /// All entries in the key range `[from, to)` in ascending key order.
    ///
    /// `None` leaves the range unbounded on that side. If `to` belongs to a partition before
    /// the one of `from`, the range is empty.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<PartitionedRange<V>> {
        match self.span(from, to)? {
            Some((from_ordinal, to_ordinal)) => {
                PartitionedRange::new(self.router.clone(), from, to, from_ordinal, to_ordinal)
            }
            None => Ok(PartitionedRange::empty(self.router.clone())),
        }
    }

    pub fn insert_batch(&self, entries: Vec<Entry<V>>) -> Result<Vec<Option<V>>> {
        self.tree.insert_batch(entries)
    }

    pub fn remove_batch(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<V>>> {
        self.tree.remove_batch(keys)
    }

    /// Batched membership tests are not supported by a partitioned index.
    pub fn contains_batch(&self, _keys: &[Vec<u8>]) -> Result<Vec<bool>> {
        Err(Error::NotImplemented("contains_batch"))
    }

    /// Batched lookups are not supported by a partitioned index.
    pub fn lookup_batch(&self, _keys: &[Vec<u8>]) -> Result<Vec<Option<V>>> {
        Err(Error::NotImplemented("lookup_batch"))
    }

    /// Commit the mutable tree.
    pub fn commit(&self) -> Result<CommitToken> {
        self.tree.commit()
    }

    /// The resources that are read for the partition that owns the key, most recent first.
    pub fn resources(&self, key: &[u8]) -> Result<Vec<ResourceMetadata>> {
        let partition = self.router.catalog.locate(key)?;
        let mut result = Vec::with_capacity(partition.live_count() + 1);
        result.push(ResourceMetadata::MutableTree {
            name: self.tree.name().to_string(),
        });
        result.extend(
            partition
                .live_segments()
                .map(|s| ResourceMetadata::Segment(s.locator().clone())),
        );
        Ok(result)
    }

    /// Remove the cached view of a partition, e.g. after its live segments changed.
    ///
    /// Readers that still use the view can finish, its segments are closed afterwards.
    pub fn invalidate(&self, partition: PartitionId) -> bool {
        self.router.views.invalidate(partition)
    }

    /// Release all cached views.
    pub fn close_views(&self) {
        self.router.views.clear();
    }

    /// Number of partitions with a cached view.
    pub fn cached_views(&self) -> usize {
        self.router.views.len()
    }

    /// Ordinals of the first and last partition of a key range.
    fn span(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<Option<(usize, usize)>> {
        let catalog = &self.router.catalog;
        let from_ordinal = match from {
            Some(from) => catalog.ordinal_of(from)?,
            None => 0,
        };
        let to_ordinal = match to {
            Some(to) => catalog.ordinal_of(to)?,
            None => catalog
                .partition_count()
                .checked_sub(1)
                .ok_or_else(|| Error::EmptyCatalog(catalog.name().to_string()))?,
        };
        if to_ordinal < from_ordinal {
            debug!(index = %catalog.name(), from_ordinal, to_ordinal, "range keys are out of order");
            Ok(None)
        } else {
            Ok(Some((from_ordinal, to_ordinal)))
        }
    }
}

impl<V> Drop for PartitionedIndex<V> {
    fn drop(&mut self) {
        debug!(index = %self.router.catalog.name(), "closing partitioned index");
        self.router.views.clear();
    }
}

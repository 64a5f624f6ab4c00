use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::Arc,
};

use crate::{
    descriptor::{PartitionDescriptor, PartitionId, SegmentLocator},
    error::Result,
    segment::{Segment, SegmentStore},
    tree::{Entry, EntryIter, MutableTree, Value},
};
use tracing::debug;

/// A source of a [`FusedView`].
enum Source<V> {
    Tree(Arc<dyn MutableTree<V>>),
    Segment(Segment<V>),
}

impl<V> Source<V>
where
    V: Value,
{
    fn contains(&self, key: &[u8]) -> Result<bool> {
        match self {
            Source::Tree(tree) => tree.contains(key),
            Source::Segment(segment) => segment.contains(key),
        }
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<V>> {
        match self {
            Source::Tree(tree) => tree.lookup(key),
            Source::Segment(segment) => segment.lookup(key),
        }
    }

    fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        match self {
            Source::Tree(tree) => tree.range_count(from, to),
            Source::Segment(segment) => segment.range_count(from, to),
        }
    }

    fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<EntryIter<V>> {
        match self {
            Source::Tree(tree) => tree.range(from, to),
            Source::Segment(segment) => Ok(Box::new(segment.range(from, to)?)),
        }
    }
}

/// Read-only view that merges the mutable tree with the live segments of one partition.
///
/// The sources are ordered by recency: the mutable tree first, then the segments from the most
/// recently flushed to the oldest one. When a key exists in more than one source, the value of
/// the first source wins.
///
/// The view owns the segment handles it opened and closes all of them when it is dropped.
pub struct FusedView<V> {
    partition: PartitionId,
    sources: Vec<Source<V>>,
    live: Vec<SegmentLocator>,
}

impl<V> FusedView<V>
where
    V: Value,
{
    /// Open all live segments of the partition and create the view.
    pub(crate) fn open(
        partition: &PartitionDescriptor,
        tree: &Arc<dyn MutableTree<V>>,
        store: &dyn SegmentStore<V>,
    ) -> Result<FusedView<V>> {
        let live = partition.live_locators();
        let mut sources = Vec::with_capacity(live.len() + 1);
        sources.push(Source::Tree(tree.clone()));
        for locator in live.iter() {
            // On error, the segments opened so far are closed when `sources` is dropped
            sources.push(Source::Segment(store.open(locator)?));
        }
        debug!(partition = %partition.id(), segments = live.len(), "opened fused view");
        Ok(FusedView {
            partition: partition.id(),
            sources,
            live,
        })
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The segments of this view, most recent first.
    pub fn segments(&self) -> &[SegmentLocator] {
        &self.live
    }

    /// Returns true if the view was built from the same live segments the partition has now.
    pub(crate) fn is_current(&self, partition: &PartitionDescriptor) -> bool {
        partition
            .live_segments()
            .map(|s| s.locator())
            .eq(self.live.iter())
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        for source in self.sources.iter() {
            if source.contains(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn lookup(&self, key: &[u8]) -> Result<Option<V>> {
        for source in self.sources.iter() {
            if let Some(value) = source.lookup(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Sum of the range counts of all sources.
    ///
    /// Keys that exist in more than one source are counted more than once,
    /// so this is an upper bound of the number of distinct keys in the range.
    pub fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        let mut count: u64 = 0;
        for source in self.sources.iter() {
            count = count.saturating_add(source.range_count(from, to)?);
        }
        Ok(count)
    }
}

impl<V> Drop for FusedView<V> {
    fn drop(&mut self) {
        for source in self.sources.iter() {
            if let Source::Segment(segment) = source {
                segment.close();
            }
        }
        debug!(partition = %self.partition, segments = self.live.len(), "closed fused view");
    }
}

/// The current smallest entry of one source of a [`FusedRange`].
struct Head<V> {
    key: Vec<u8>,
    source: usize,
    value: V,
}

impl<V> PartialEq for Head<V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl<V> Eq for Head<V> {}

impl<V> PartialOrd for Head<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V> Ord for Head<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        // For equal keys, the more recent source comes first
        self.key
            .cmp(&other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Iterator over a key range of a [`FusedView`].
///
/// This is a k-way merge of the ranges of all sources that emits each key once,
/// with the value from the most recent source. The view (and its segments) is kept open
/// as long as the iterator exists.
pub struct FusedRange<V> {
    _view: Arc<FusedView<V>>,
    sources: Vec<EntryIter<V>>,
    heads: BinaryHeap<Reverse<Head<V>>>,
    failed: bool,
}

impl<V> FusedRange<V>
where
    V: Value,
{
    pub(crate) fn new(
        view: Arc<FusedView<V>>,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<FusedRange<V>> {
        let mut sources = Vec::with_capacity(view.sources.len());
        for source in view.sources.iter() {
            sources.push(source.range(from, to)?);
        }
        let mut result = FusedRange {
            heads: BinaryHeap::with_capacity(sources.len()),
            _view: view,
            sources,
            failed: false,
        };
        for source in 0..result.sources.len() {
            result.advance(source)?;
        }
        Ok(result)
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(entry) = self.sources[source].next() {
            let (key, value) = entry?;
            self.heads.push(Reverse(Head { key, source, value }));
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<Entry<V>>> {
        let head = match self.heads.pop() {
            Some(Reverse(head)) => head,
            None => return Ok(None),
        };
        self.advance(head.source)?;

        // Skip the shadowed versions of the same key in older sources
        while self
            .heads
            .peek()
            .map_or(false, |Reverse(next)| next.key == head.key)
        {
            if let Some(Reverse(shadowed)) = self.heads.pop() {
                self.advance(shadowed.source)?;
            }
        }

        Ok(Some((head.key, head.value)))
    }
}

impl<V> Iterator for FusedRange<V>
where
    V: Value,
{
    type Item = Result<Entry<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// The read view of one partition.
///
/// A partition without live segments is read directly from the mutable tree.
pub enum PartitionView<V> {
    Tree(Arc<dyn MutableTree<V>>),
    Fused(Arc<FusedView<V>>),
}

impl<V> Clone for PartitionView<V> {
    fn clone(&self) -> Self {
        match self {
            PartitionView::Tree(tree) => PartitionView::Tree(tree.clone()),
            PartitionView::Fused(view) => PartitionView::Fused(view.clone()),
        }
    }
}

impl<V> PartitionView<V>
where
    V: Value,
{
    /// Number of segments that are merged with the mutable tree.
    pub fn segment_count(&self) -> usize {
        match self {
            PartitionView::Tree(_) => 0,
            PartitionView::Fused(view) => view.segments().len(),
        }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        match self {
            PartitionView::Tree(tree) => tree.contains(key),
            PartitionView::Fused(view) => view.contains(key),
        }
    }

    pub fn lookup(&self, key: &[u8]) -> Result<Option<V>> {
        match self {
            PartitionView::Tree(tree) => tree.lookup(key),
            PartitionView::Fused(view) => view.lookup(key),
        }
    }

    pub fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        match self {
            PartitionView::Tree(tree) => tree.range_count(from, to),
            PartitionView::Fused(view) => view.range_count(from, to),
        }
    }

    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<EntryIter<V>> {
        match self {
            PartitionView::Tree(tree) => tree.range(from, to),
            PartitionView::Fused(view) => Ok(Box::new(FusedRange::new(view.clone(), from, to)?)),
        }
    }
}

const DEFAULT_VIEW_CACHE_CAPACITY: usize = 64;

/// Configuration of a [`PartitionedIndex`](crate::PartitionedIndex).
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub(crate) view_cache_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            view_cache_capacity: DEFAULT_VIEW_CACHE_CAPACITY,
        }
    }
}

impl IndexConfig {
    /// Set the number of fused partition views that are kept open.
    ///
    /// The cache may temporarily hold more views when all eviction candidates are in use by a reader.
    pub fn view_cache_capacity(mut self, capacity: usize) -> Self {
        self.view_cache_capacity = capacity.max(1);
        self
    }
}

/// Configuration of a [`DirectorySegmentStore`](crate::DirectorySegmentStore).
#[derive(Debug, Clone, Default)]
pub struct SegmentStoreConfig {
    pub(crate) max_open_segments: Option<usize>,
}

impl SegmentStoreConfig {
    /// Limit the number of segment handles that can be open at the same time.
    pub fn max_open_segments(mut self, limit: usize) -> Self {
        self.max_open_segments = Some(limit);
        self
    }
}

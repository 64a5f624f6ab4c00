//! Read and write routing for a B+-tree index that is split into key range partitions.
//!
//! Writes always go to a single [`MutableTree`]. Each partition additionally owns a stack of
//! immutable, memory-mapped segments. Reads are routed through the [`PartitionCatalog`] to the
//! partition that owns a key and see a [`FusedView`] that merges the mutable tree with the live
//! segments of that partition.
//!
//! ```
//! use std::sync::Arc;
//! use partitioned_btree_index::{
//!     DirectorySegmentStore, IndexConfig, MemoryTree, MetadataIndex, PartitionDescriptor,
//!     PartitionId, PartitionedIndex, SegmentStoreConfig,
//! };
//!
//! let catalog = MetadataIndex::with_partitions(
//!     "example",
//!     vec![
//!         (b"A".to_vec(), PartitionDescriptor::new(PartitionId(0))),
//!         (b"M".to_vec(), PartitionDescriptor::new(PartitionId(1))),
//!     ],
//! )
//! .unwrap();
//! let store = DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap();
//! let index: PartitionedIndex<u64> = PartitionedIndex::new(
//!     Arc::new(MemoryTree::<u64>::new("example")),
//!     Arc::new(catalog),
//!     Arc::new(store),
//!     IndexConfig::default(),
//! );
//!
//! index.insert(b"B".to_vec(), 1).unwrap();
//! index.insert(b"N".to_vec(), 2).unwrap();
//! assert_eq!(Some(2), index.lookup(b"N").unwrap());
//! assert_eq!(2, index.range(None, None).unwrap().count());
//! ```

mod cache;
mod catalog;
mod config;
mod descriptor;
mod error;
mod index;
mod range;
mod segment;
mod tree;
mod view;

pub use cache::ViewCache;
pub use catalog::{CatalogEntry, MetadataIndex, PartitionCatalog};
pub use config::{IndexConfig, SegmentStoreConfig};
pub use descriptor::{
    PartitionDescriptor, PartitionId, ResourceMetadata, SegmentDescriptor, SegmentLocator,
    SegmentState,
};
pub use error::{Error, Result};
pub use index::PartitionedIndex;
pub use range::PartitionedRange;
pub use segment::{DirectorySegmentStore, Segment, SegmentRange, SegmentStore, SegmentWriter};
pub use tree::{CommitToken, Entry, EntryIter, MemoryTree, MutableTree, TreeRange, Value};
pub use view::{FusedRange, FusedView, PartitionView};

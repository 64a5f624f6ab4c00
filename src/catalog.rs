use crate::{
    descriptor::{PartitionDescriptor, PartitionId},
    error::Result,
    Error,
};
use parking_lot::RwLock;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

/// Ordered directory of the partitions of one index.
///
/// Partition `i` owns the key range `[separator_key_at(i), separator_key_at(i + 1))`,
/// the last partition is unbounded.
pub trait PartitionCatalog: Send + Sync {
    /// Name of the partitioned index.
    fn name(&self) -> &str;

    fn partition_count(&self) -> usize;

    /// The partition that owns the key.
    fn locate(&self, key: &[u8]) -> Result<PartitionDescriptor>;

    /// Ordinal of the partition that owns the key.
    fn ordinal_of(&self, key: &[u8]) -> Result<usize>;

    /// The smallest key that is routed to the partition at the given ordinal.
    fn separator_key_at(&self, ordinal: usize) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub separator: Vec<u8>,
    pub partition: PartitionDescriptor,
}

/// In-memory [`PartitionCatalog`] that supports adding, updating and splitting partitions.
///
/// Changes to the live segments of a partition are published with [`MetadataIndex::update_partition`].
pub struct MetadataIndex {
    name: String,
    entries: RwLock<Vec<CatalogEntry>>,
}

impl MetadataIndex {
    pub fn new<S: Into<String>>(name: S) -> MetadataIndex {
        MetadataIndex {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Create a catalog from a list of separator keys and their partitions in any order.
    pub fn with_partitions<S, I>(name: S, partitions: I) -> Result<MetadataIndex>
    where
        S: Into<String>,
        I: IntoIterator<Item = (Vec<u8>, PartitionDescriptor)>,
    {
        let result = MetadataIndex::new(name);
        for (separator, partition) in partitions {
            result.add_partition(separator, partition)?;
        }
        Ok(result)
    }

    /// Add a new partition that starts at the separator key.
    pub fn add_partition(&self, separator: Vec<u8>, partition: PartitionDescriptor) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.partition.id() == partition.id()) {
            return Err(Error::DuplicatePartition(partition.id()));
        }
        match entries.binary_search_by(|e| e.separator.as_slice().cmp(separator.as_slice())) {
            Ok(_) => Err(Error::DuplicateSeparator),
            Err(i) => {
                debug!(index = %self.name, partition = %partition.id(), ordinal = i, "added partition");
                entries.insert(
                    i,
                    CatalogEntry {
                        separator,
                        partition,
                    },
                );
                Ok(())
            }
        }
    }

    /// Replace the descriptor of an existing partition with the same id.
    pub fn update_partition(&self, partition: PartitionDescriptor) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.partition.id() == partition.id())
            .ok_or(Error::UnknownPartition(partition.id()))?;
        debug!(index = %self.name, partition = %partition.id(), live = partition.live_count(), "updated partition");
        entry.partition = partition;
        Ok(())
    }

    /// Split an existing partition at the given key.
    ///
    /// The new partition owns all keys starting at `separator` that were owned by `id` before.
    /// It starts with the same segments as the partition it was split from, since these segments
    /// can contain keys of both partitions.
    pub fn split_partition(
        &self,
        id: PartitionId,
        separator: Vec<u8>,
        new_id: PartitionId,
    ) -> Result<PartitionDescriptor> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.partition.id() == new_id) {
            return Err(Error::DuplicatePartition(new_id));
        }
        let ordinal = entries
            .iter()
            .position(|e| e.partition.id() == id)
            .ok_or(Error::UnknownPartition(id))?;

        let inside_lower = entries[ordinal].separator < separator;
        let inside_upper = entries
            .get(ordinal + 1)
            .map_or(true, |next| separator < next.separator);
        if !inside_lower || !inside_upper {
            return Err(Error::InvalidSplit(id));
        }

        let partition =
            PartitionDescriptor::with_segments(new_id, entries[ordinal].partition.segments().to_vec());
        entries.insert(
            ordinal + 1,
            CatalogEntry {
                separator,
                partition: partition.clone(),
            },
        );
        debug!(index = %self.name, partition = %id, new_partition = %new_id, "split partition");
        Ok(partition)
    }

    /// Returns the current descriptor of a partition.
    pub fn partition(&self, id: PartitionId) -> Result<PartitionDescriptor> {
        self.entries
            .read()
            .iter()
            .find(|e| e.partition.id() == id)
            .map(|e| e.partition.clone())
            .ok_or(Error::UnknownPartition(id))
    }

    /// Snapshot of all entries in separator key order.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.entries.read().clone()
    }

    fn search(&self, entries: &[CatalogEntry], key: &[u8]) -> Result<usize> {
        if entries.is_empty() {
            return Err(Error::EmptyCatalog(self.name.clone()));
        }
        // Number of partitions with a separator less than or equal to the key
        let not_greater = entries.partition_point(|e| e.separator.as_slice() <= key);
        if not_greater == 0 {
            Err(Error::KeyBeforeFirstPartition(self.name.clone()))
        } else {
            Ok(not_greater - 1)
        }
    }
}

impl PartitionCatalog for MetadataIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn partition_count(&self) -> usize {
        self.entries.read().len()
    }

    fn locate(&self, key: &[u8]) -> Result<PartitionDescriptor> {
        let entries = self.entries.read();
        let ordinal = self.search(&entries, key)?;
        Ok(entries[ordinal].partition.clone())
    }

    fn ordinal_of(&self, key: &[u8]) -> Result<usize> {
        let entries = self.entries.read();
        self.search(&entries, key)
    }

    fn separator_key_at(&self, ordinal: usize) -> Result<Vec<u8>> {
        self.entries
            .read()
            .get(ordinal)
            .map(|e| e.separator.clone())
            .ok_or(Error::OrdinalOutOfRange(ordinal))
    }
}

#[cfg(test)]
mod tests;

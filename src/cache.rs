use std::sync::Arc;

use crate::{
    descriptor::{PartitionDescriptor, PartitionId},
    error::Result,
    segment::SegmentStore,
    tree::{MutableTree, Value},
    view::{FusedView, PartitionView},
};
use linked_hash_map::LinkedHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

/// Holds the view of one partition.
///
/// The view is built while holding the slot lock, so concurrent readers of the same partition
/// wait for a single construction instead of opening the same segments again.
struct Slot<V> {
    view: Mutex<Option<Arc<FusedView<V>>>>,
}

impl<V> Slot<V> {
    fn new() -> Slot<V> {
        Slot {
            view: Mutex::new(None),
        }
    }

    /// Neither under construction nor used by any reader.
    fn is_idle(&self) -> bool {
        match self.view.try_lock() {
            Some(view) => view.as_ref().map_or(true, |v| Arc::strong_count(v) == 1),
            None => false,
        }
    }
}

/// Bounded cache of the fused views of the partitions of one index.
///
/// Views are reference counted. Removing a view from the cache never closes its segments while
/// a reader still uses it, the segments are closed when the last reference is dropped.
/// When the cache grows beyond its capacity, the least recently used views that are not in use
/// are evicted.
pub struct ViewCache<V> {
    tree: Arc<dyn MutableTree<V>>,
    store: Arc<dyn SegmentStore<V>>,
    capacity: usize,
    slots: RwLock<LinkedHashMap<PartitionId, Arc<Slot<V>>>>,
}

impl<V> ViewCache<V> {
    /// Remove the view of a partition from the cache.
    ///
    /// Returns true if there was an entry for the partition.
    pub fn invalidate(&self, partition: PartitionId) -> bool {
        let removed = self.slots.write().remove(&partition);
        if removed.is_some() {
            debug!(partition = %partition, "invalidated view");
            true
        } else {
            false
        }
    }

    /// Remove all views from the cache.
    pub fn clear(&self) {
        let removed: Vec<Arc<Slot<V>>> = {
            let mut slots = self.slots.write();
            let removed: Vec<_> = slots.values().cloned().collect();
            slots.clear();
            removed
        };
        if !removed.is_empty() {
            debug!(views = removed.len(), "cleared view cache");
        }
    }

    /// Number of partitions with an entry in the cache.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, partition: PartitionId) -> Arc<Slot<V>> {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_refresh(&partition) {
            return slot.clone();
        }
        let slot = Arc::new(Slot::new());
        slots.insert(partition, slot.clone());
        slot
    }
}

impl<V> ViewCache<V>
where
    V: Value,
{
    pub fn new(
        tree: Arc<dyn MutableTree<V>>,
        store: Arc<dyn SegmentStore<V>>,
        capacity: usize,
    ) -> ViewCache<V> {
        ViewCache {
            tree,
            store,
            capacity: capacity.max(1),
            slots: RwLock::new(LinkedHashMap::new()),
        }
    }

    /// Returns the view for the current state of the partition.
    ///
    /// A cached view is only returned if it was built from the same live segments the
    /// descriptor lists, otherwise it is replaced by a new view.
    pub fn get(&self, partition: &PartitionDescriptor) -> Result<PartitionView<V>> {
        if partition.live_count() == 0 {
            // The mutable tree is the view, a cached view would be stale
            let stale = self.slots.read().contains_key(&partition.id());
            if stale {
                self.invalidate(partition.id());
            }
            return Ok(PartitionView::Tree(self.tree.clone()));
        }

        let slot = self.slot(partition.id());
        let mut view = slot.view.lock();
        if let Some(cached) = view.as_ref() {
            if cached.is_current(partition) {
                trace!(partition = %partition.id(), "view cache hit");
                return Ok(PartitionView::Fused(cached.clone()));
            }
            debug!(partition = %partition.id(), "live segments changed, rebuilding view");
        }

        let fused = Arc::new(FusedView::open(
            partition,
            &self.tree,
            self.store.as_ref(),
        )?);
        // A replaced view is closed when its last reader is done
        *view = Some(fused.clone());
        drop(view);

        self.evict_idle();
        Ok(PartitionView::Fused(fused))
    }

    fn evict_idle(&self) {
        let mut evicted = Vec::new();
        {
            let mut slots = self.slots.write();
            if slots.len() <= self.capacity {
                return;
            }
            let excess = slots.len() - self.capacity;
            // Slots that are referenced elsewhere are about to be used by a reader
            let idle: Vec<PartitionId> = slots
                .iter()
                .filter(|(_, slot)| Arc::strong_count(slot) == 1 && slot.is_idle())
                .map(|(id, _)| *id)
                .take(excess)
                .collect();
            for id in idle {
                if let Some(slot) = slots.remove(&id) {
                    evicted.push((id, slot));
                }
            }
            if slots.len() > self.capacity {
                warn!(
                    views = slots.len(),
                    capacity = self.capacity,
                    "view cache exceeds its capacity, remaining views are in use"
                );
            }
        }
        // The evicted views are closed outside of the lock
        for (id, slot) in evicted {
            debug!(partition = %id, "evicted view");
            drop(slot);
        }
    }
}

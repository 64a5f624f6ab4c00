use std::sync::Arc;

use partitioned_btree_index::{
    DirectorySegmentStore, IndexConfig, MemoryTree, MetadataIndex, PartitionDescriptor,
    PartitionId, PartitionedIndex, SegmentLocator, SegmentStoreConfig,
};
use rayon::prelude::*;

fn key(i: u32) -> Vec<u8> {
    format!("k{:06}", i).into_bytes()
}

struct Setup {
    catalog: Arc<MetadataIndex>,
    store: Arc<DirectorySegmentStore>,
    index: PartitionedIndex<u32>,
}

/// A single partition with three segments, each holding every third key of `0..3000`.
fn setup() -> Setup {
    let store = Arc::new(DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap());
    let mut partition = PartitionDescriptor::new(PartitionId(0));
    for s in 0..3 {
        let locator = SegmentLocator::new(format!("segment-{}", s));
        let entries = (0..3000).filter(|i| i % 3 == s).map(|i| (key(i), i));
        store.write_segment(&locator, entries).unwrap();
        partition = partition.flushed(locator);
    }
    let catalog = Arc::new(
        MetadataIndex::with_partitions("concurrent", vec![(Vec::new(), partition)]).unwrap(),
    );
    let index = PartitionedIndex::new(
        Arc::new(MemoryTree::<u32>::new("tree")),
        catalog.clone(),
        store.clone(),
        IndexConfig::default(),
    );
    Setup {
        catalog,
        store,
        index,
    }
}

#[test]
fn segments_are_opened_once_for_concurrent_readers() {
    let s = setup();
    (0..3000_u32).into_par_iter().for_each(|i| {
        assert_eq!(Some(i), s.index.lookup(&key(i)).unwrap());
    });
    assert_eq!(3, s.store.opened_total());
    assert_eq!(1, s.index.cached_views());
}

#[test]
fn concurrent_reads_and_writes() {
    let s = setup();
    (0..6000_u32).into_par_iter().for_each(|i| {
        if i % 2 == 0 {
            s.index.insert(key(3000 + i), i).unwrap();
        } else {
            // Existing keys are never affected by the writes
            let existing = i % 3000;
            assert_eq!(Some(existing), s.index.lookup(&key(existing)).unwrap());
        }
    });
    assert_eq!(6000, s.index.range(None, None).unwrap().count());
    assert_eq!(3, s.store.opened_total());
}

#[test]
fn concurrent_scans() {
    let s = setup();
    let counts: Vec<usize> = (0..16)
        .into_par_iter()
        .map(|i: u32| {
            let from = key(i * 100);
            s.index
                .range(Some(&from), None)
                .unwrap()
                .map(|e| e.unwrap())
                .count()
        })
        .collect();
    for (i, count) in counts.into_iter().enumerate() {
        assert_eq!(3000 - i * 100, count);
    }
    assert_eq!(3, s.store.opened_total());
}

#[test]
fn scan_continues_while_segments_are_retired() {
    let s = setup();
    let mut range = s.index.range(None, None).unwrap();
    assert_eq!(true, range.advance().unwrap());
    assert_eq!(&0, range.value().unwrap());

    // Retire one segment and drop all cached views while the scan is still running
    let partition = s
        .catalog
        .partition(PartitionId(0))
        .unwrap()
        .compacted(&[SegmentLocator::new("segment-0")], None);
    s.catalog.update_partition(partition).unwrap();
    s.index.close_views();
    assert_eq!(3, s.store.open_handles());

    // New readers do not see the retired segment
    assert_eq!(None, s.index.lookup(&key(3)).unwrap());
    assert_eq!(Some(4), s.index.lookup(&key(4)).unwrap());

    // The running scan still reads the view it started with
    let rest: Vec<u32> = range.map(|e| e.unwrap().1).collect();
    assert_eq!((1..3000).collect::<Vec<u32>>(), rest);

    // Only the new view is still open
    assert_eq!(2, s.store.open_handles());
}

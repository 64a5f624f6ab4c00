use super::*;
use crate::descriptor::SegmentLocator;

fn catalog() -> MetadataIndex {
    // Intentionally not sorted
    MetadataIndex::with_partitions(
        "test",
        vec![
            (b"M".to_vec(), PartitionDescriptor::new(PartitionId(2))),
            (b"A".to_vec(), PartitionDescriptor::new(PartitionId(1))),
            (b"T".to_vec(), PartitionDescriptor::new(PartitionId(3))),
        ],
    )
    .unwrap()
}

#[test]
fn entries_are_sorted() {
    let c = catalog();
    assert_eq!("test", c.name());
    assert_eq!(3, c.partition_count());
    assert_eq!(b"A".to_vec(), c.separator_key_at(0).unwrap());
    assert_eq!(b"M".to_vec(), c.separator_key_at(1).unwrap());
    assert_eq!(b"T".to_vec(), c.separator_key_at(2).unwrap());
    assert!(matches!(
        c.separator_key_at(3),
        Err(Error::OrdinalOutOfRange(3))
    ));

    let ids: Vec<_> = c.entries().into_iter().map(|e| e.partition.id()).collect();
    assert_eq!(vec![PartitionId(1), PartitionId(2), PartitionId(3)], ids);
}

#[test]
fn locate_greatest_separator_not_greater_than_key() {
    let c = catalog();
    assert_eq!(0, c.ordinal_of(b"A").unwrap());
    assert_eq!(0, c.ordinal_of(b"B").unwrap());
    assert_eq!(0, c.ordinal_of(b"LZZZ").unwrap());
    assert_eq!(1, c.ordinal_of(b"M").unwrap());
    assert_eq!(1, c.ordinal_of(b"M\0").unwrap());
    assert_eq!(2, c.ordinal_of(b"T").unwrap());
    assert_eq!(2, c.ordinal_of(b"ZZZ").unwrap());

    assert_eq!(PartitionId(1), c.locate(b"C").unwrap().id());
    assert_eq!(PartitionId(2), c.locate(b"N").unwrap().id());
    assert_eq!(PartitionId(3), c.locate(b"Z").unwrap().id());
}

#[test]
fn keys_outside_of_partitions() {
    let c = catalog();
    assert!(matches!(
        c.ordinal_of(b"0"),
        Err(Error::KeyBeforeFirstPartition(_))
    ));
    assert!(matches!(
        c.locate(b""),
        Err(Error::KeyBeforeFirstPartition(_))
    ));

    let empty = MetadataIndex::new("empty");
    assert_eq!(0, empty.partition_count());
    assert!(matches!(empty.locate(b"A"), Err(Error::EmptyCatalog(_))));
}

#[test]
fn empty_separator_owns_all_keys() {
    let c = MetadataIndex::with_partitions(
        "test",
        vec![(Vec::new(), PartitionDescriptor::new(PartitionId(0)))],
    )
    .unwrap();
    assert_eq!(0, c.ordinal_of(b"").unwrap());
    assert_eq!(0, c.ordinal_of(b"anything").unwrap());
}

#[test]
fn duplicates_are_rejected() {
    let c = catalog();
    assert!(matches!(
        c.add_partition(b"M".to_vec(), PartitionDescriptor::new(PartitionId(10))),
        Err(Error::DuplicateSeparator)
    ));
    assert!(matches!(
        c.add_partition(b"X".to_vec(), PartitionDescriptor::new(PartitionId(2))),
        Err(Error::DuplicatePartition(PartitionId(2)))
    ));
    assert_eq!(3, c.partition_count());
}

#[test]
fn update_partition() {
    let c = catalog();
    let p = c
        .partition(PartitionId(2))
        .unwrap()
        .flushed(SegmentLocator::new("s1"));
    c.update_partition(p).unwrap();
    assert_eq!(1, c.locate(b"N").unwrap().live_count());

    assert!(matches!(
        c.update_partition(PartitionDescriptor::new(PartitionId(42))),
        Err(Error::UnknownPartition(PartitionId(42)))
    ));
    assert!(matches!(
        c.partition(PartitionId(42)),
        Err(Error::UnknownPartition(PartitionId(42)))
    ));
}

#[test]
fn split_partition() {
    let c = catalog();
    c.update_partition(
        c.partition(PartitionId(2))
            .unwrap()
            .flushed(SegmentLocator::new("s1")),
    )
    .unwrap();

    let new_partition = c
        .split_partition(PartitionId(2), b"P".to_vec(), PartitionId(4))
        .unwrap();
    assert_eq!(PartitionId(4), new_partition.id());
    // The new partition shares the segments of its parent
    assert_eq!(1, new_partition.live_count());

    assert_eq!(4, c.partition_count());
    assert_eq!(PartitionId(2), c.locate(b"O").unwrap().id());
    assert_eq!(PartitionId(4), c.locate(b"P").unwrap().id());
    assert_eq!(PartitionId(4), c.locate(b"S").unwrap().id());
    assert_eq!(PartitionId(3), c.locate(b"T").unwrap().id());

    // Split keys must be strictly inside the partition
    assert!(matches!(
        c.split_partition(PartitionId(2), b"M".to_vec(), PartitionId(5)),
        Err(Error::InvalidSplit(PartitionId(2)))
    ));
    assert!(matches!(
        c.split_partition(PartitionId(2), b"Q".to_vec(), PartitionId(5)),
        Err(Error::InvalidSplit(PartitionId(2)))
    ));
    assert!(matches!(
        c.split_partition(PartitionId(2), b"N".to_vec(), PartitionId(4)),
        Err(Error::DuplicatePartition(PartitionId(4)))
    ));
    // The last partition is unbounded
    c.split_partition(PartitionId(3), b"X".to_vec(), PartitionId(5))
        .unwrap();
    assert_eq!(PartitionId(5), c.locate(b"Y").unwrap().id());
}

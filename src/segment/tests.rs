use super::*;
use crate::config::SegmentStoreConfig;

fn key(i: u32) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}

fn sparse_segment(store: &DirectorySegmentStore, name: &str) -> SegmentLocator {
    let locator = SegmentLocator::new(name);
    let entries = (0..2000).step_by(10).map(|i| (key(i), format!("value {}", i)));
    assert_eq!(200, store.write_segment(&locator, entries).unwrap());
    locator
}

#[test]
fn write_and_lookup() {
    let store = DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap();
    let locator = sparse_segment(&store, "seg-1");

    let s: Segment<String> = store.open(&locator).unwrap();
    assert_eq!(200, s.len());
    assert_eq!(false, s.is_empty());
    assert_eq!(&locator, s.locator());

    for i in (0..2000).step_by(10) {
        assert_eq!(true, s.contains(&key(i)).unwrap());
        assert_eq!(Some(format!("value {}", i)), s.lookup(&key(i)).unwrap());
    }
    assert_eq!(false, s.contains(&key(5)).unwrap());
    assert_eq!(None, s.lookup(&key(5)).unwrap());
    assert_eq!(None, s.lookup(&key(5000)).unwrap());
    assert_eq!(None, s.lookup(b"").unwrap());
}

#[test]
fn range_and_count() {
    let store = DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap();
    let locator = sparse_segment(&store, "seg-1");
    let s: Segment<String> = store.open(&locator).unwrap();

    let result: Result<Vec<_>> = s.range(Some(&key(40)), Some(&key(1200))).unwrap().collect();
    let result = result.unwrap();
    assert_eq!(116, result.len());
    assert_eq!((key(40), "value 40".to_string()), result[0]);
    assert_eq!((key(1190), "value 1190".to_string()), result[115]);
    assert_eq!(116, s.range_count(Some(&key(40)), Some(&key(1200))).unwrap());

    // Bounds that are not part of the segment
    assert_eq!(116, s.range_count(Some(&key(31)), Some(&key(1191))).unwrap());

    assert_eq!(200, s.range(None, None).unwrap().count());
    assert_eq!(200, s.range_count(None, None).unwrap());
    assert_eq!(4, s.range_count(None, Some(&key(40))).unwrap());
    assert_eq!(196, s.range_count(Some(&key(40)), None).unwrap());

    // Empty and inverted ranges
    assert_eq!(0, s.range_count(Some(&key(40)), Some(&key(40))).unwrap());
    assert_eq!(0, s.range_count(Some(&key(400)), Some(&key(40))).unwrap());
    assert_eq!(0, s.range(Some(&key(400)), Some(&key(40))).unwrap().count());
}

#[test]
fn empty_segment() {
    let store = DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap();
    let locator = SegmentLocator::new("empty");
    assert_eq!(0, store.write_segment::<u64, _>(&locator, vec![]).unwrap());

    let s: Segment<u64> = store.open(&locator).unwrap();
    assert_eq!(true, s.is_empty());
    assert_eq!(None, s.lookup(b"a").unwrap());
    assert_eq!(0, s.range(None, None).unwrap().count());
}

#[test]
fn unsorted_input_is_rejected() {
    let store = DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap();
    let mut writer = store
        .create_segment::<u64>(&SegmentLocator::new("unsorted"))
        .unwrap();
    writer.push(b"b", &1).unwrap();
    assert!(matches!(
        writer.push(b"a", &2),
        Err(Error::UnsortedSegmentInput)
    ));
    // Duplicate keys are not allowed either
    assert!(matches!(
        writer.push(b"b", &2),
        Err(Error::UnsortedSegmentInput)
    ));
}

#[test]
fn missing_and_corrupt_segments() {
    let store = DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap();

    let missing: Result<Segment<u64>> = store.open(&SegmentLocator::new("missing"));
    assert!(matches!(missing, Err(Error::SegmentOpen { .. })));

    let garbage = SegmentLocator::new("garbage");
    std::fs::write(store.path_of(&garbage), vec![42; 64]).unwrap();
    let corrupt: Result<Segment<u64>> = store.open(&garbage);
    assert!(matches!(corrupt, Err(Error::CorruptSegment { .. })));

    // Failed opens do not leak handles
    assert_eq!(0, store.open_handles());
    assert_eq!(0, store.opened_total());
}

#[test]
fn handles_are_released() {
    let store = DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap();
    let locator = sparse_segment(&store, "seg-1");

    let s1: Segment<String> = store.open(&locator).unwrap();
    let s2: Segment<String> = store.open(&locator).unwrap();
    assert_eq!(2, store.open_handles());
    assert_eq!(2, store.opened_total());

    s1.close();
    assert_eq!(true, s1.is_closed());
    assert_eq!(1, store.open_handles());
    // Closing twice has no effect
    s1.close();
    assert_eq!(1, store.open_handles());
    drop(s1);
    assert_eq!(1, store.open_handles());

    drop(s2);
    assert_eq!(0, store.open_handles());
    assert_eq!(2, store.opened_total());
}

#[test]
fn reads_after_close_fail() {
    let store = DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap();
    let locator = sparse_segment(&store, "seg-1");
    let s: Segment<String> = store.open(&locator).unwrap();

    let mut it = s.range(None, None).unwrap();
    assert_eq!(true, it.next().unwrap().is_ok());

    s.close();
    assert!(matches!(s.lookup(&key(10)), Err(Error::SegmentClosed(_))));
    assert!(matches!(it.next(), Some(Err(Error::SegmentClosed(_)))));
    // The iterator stops after the error
    assert_eq!(true, it.next().is_none());
}

#[test]
fn open_handle_limit() {
    let store =
        DirectorySegmentStore::temporary(SegmentStoreConfig::default().max_open_segments(2))
            .unwrap();
    let locator = sparse_segment(&store, "seg-1");

    let s1: Segment<String> = store.open(&locator).unwrap();
    let _s2: Segment<String> = store.open(&locator).unwrap();
    let s3: Result<Segment<String>> = store.open(&locator);
    assert!(matches!(s3, Err(Error::TooManyOpenSegments { limit: 2 })));

    drop(s1);
    let s3: Result<Segment<String>> = store.open(&locator);
    assert_eq!(true, s3.is_ok());
}

#[test]
fn persistent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let locator = SegmentLocator::new("persistent");
    {
        let store =
            DirectorySegmentStore::with_directory(dir.path().join("segments"), SegmentStoreConfig::default())
                .unwrap();
        store
            .write_segment(&locator, vec![(b"a".to_vec(), 1u64), (b"b".to_vec(), 2u64)])
            .unwrap();
    }
    let store =
        DirectorySegmentStore::with_directory(dir.path().join("segments"), SegmentStoreConfig::default())
            .unwrap();
    let s: Segment<u64> = store.open(&locator).unwrap();
    assert_eq!(Some(2), s.lookup(b"b").unwrap());
}

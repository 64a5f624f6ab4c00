#![no_main]
use std::{collections::BTreeMap, sync::Arc};

use fake::{Fake, StringFaker};
use libfuzzer_sys::fuzz_target;
use partitioned_btree_index::{
    DirectorySegmentStore, IndexConfig, MemoryTree, MetadataIndex, PartitionDescriptor,
    PartitionId, PartitionedIndex, Result, SegmentLocator, SegmentStoreConfig,
};
use rand::{Rng, SeedableRng};

const ASCII: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fuzz_target!(|seed: u64| {
    let mut rng = rand::rngs::SmallRng::seed_from_u64(seed);
    let id_faker = StringFaker::with(Vec::from(ASCII), 1..8);
    let name_faker = fake::faker::name::en::Name();

    // Random separators, the empty one makes sure every key has a partition
    let mut separators: Vec<Vec<u8>> = vec![Vec::new()];
    for _ in 0..rng.gen_range(0..8) {
        let separator: String = id_faker.fake_with_rng(&mut rng);
        separators.push(separator.into_bytes());
    }
    separators.sort();
    separators.dedup();

    // Each partition gets a segment with random older versions of its keys
    let store = Arc::new(DirectorySegmentStore::temporary(SegmentStoreConfig::default()).unwrap());
    let mut model: BTreeMap<Vec<u8>, String> = BTreeMap::new();
    let mut partitions = Vec::new();
    for (ordinal, separator) in separators.iter().enumerate() {
        let upper = separators.get(ordinal + 1);
        let mut entries = BTreeMap::new();
        for _ in 0..rng.gen_range(0..200) {
            let key: String = id_faker.fake_with_rng(&mut rng);
            let key = key.into_bytes();
            if &key >= separator && upper.map_or(true, |u| &key < u) {
                let value: String = name_faker.fake_with_rng(&mut rng);
                entries.insert(key, value);
            }
        }
        model.extend(entries.clone());

        let locator = SegmentLocator::new(format!("segment-{}", ordinal));
        store.write_segment(&locator, entries).unwrap();
        partitions.push((
            separator.clone(),
            PartitionDescriptor::new(PartitionId(ordinal as u32)).flushed(locator),
        ));
    }

    let catalog = MetadataIndex::with_partitions("fuzz", partitions).unwrap();
    let index = PartitionedIndex::new(
        Arc::new(MemoryTree::<String>::new("fuzz")),
        Arc::new(catalog),
        store,
        IndexConfig::default().view_cache_capacity(2),
    );

    // Newer versions in the tree
    for _ in 0..rng.gen_range(0..500) {
        let key: String = id_faker.fake_with_rng(&mut rng);
        let value: String = name_faker.fake_with_rng(&mut rng);
        index.insert(key.clone().into_bytes(), value.clone()).unwrap();
        model.insert(key.into_bytes(), value);
    }

    for _ in 0..20 {
        let a: String = id_faker.fake_with_rng(&mut rng);
        let b: String = id_faker.fake_with_rng(&mut rng);
        let (from, to) = if a <= b { (a, b) } else { (b, a) };

        let found: Vec<(Vec<u8>, String)> = index
            .range(Some(from.as_bytes()), Some(to.as_bytes()))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let expected: Vec<(Vec<u8>, String)> = model
            .range(from.clone().into_bytes()..to.clone().into_bytes())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        assert_eq!(expected, found);

        let count = index
            .range_count(Some(from.as_bytes()), Some(to.as_bytes()))
            .unwrap();
        assert!(count >= expected.len() as u64);

        assert_eq!(
            model.get(from.as_bytes()),
            index.lookup(from.as_bytes()).unwrap().as_ref()
        );
    }

    let all: Vec<(Vec<u8>, String)> = index
        .range(None, None)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(model.into_iter().collect::<Vec<_>>(), all);
});

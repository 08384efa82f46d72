use cbtree::{BTree, BTreeOptions, BlockSpace, BlockStore, StoreOptions};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Op {
    Put(String, Vec<u8>),
    Remove(String),
}

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-f]{1,12}"
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key_strategy(), prop::collection::vec(any::<u8>(), 0..48))
            .prop_map(|(k, v)| Op::Put(k, v)),
        1 => key_strategy().prop_map(Op::Remove),
    ]
}

fn block_size_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(256u32), Just(512), Just(1024)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn file_backed_tree_matches_btreemap(
        block_size in block_size_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..400),
        lower in key_strategy(),
        upper in key_strategy(),
    ) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("prop.cbt");
        let options = StoreOptions::default().block_size(block_size);
        let mut reference = BTreeMap::new();
        {
            let store: Arc<dyn BlockStore> =
                Arc::new(BlockSpace::open(&path, options.clone()).expect("create store"));
            let tree = BTree::<String, Vec<u8>>::open(store, BTreeOptions::default()).expect("open tree");
            for op in ops {
                match op {
                    Op::Put(key, value) => {
                        tree.put(key.clone(), value.clone()).expect("put");
                        reference.insert(key, value);
                    }
                    Op::Remove(key) => {
                        tree.remove(&key).expect("remove");
                        reference.remove(&key);
                    }
                }
            }
            tree.flush().expect("flush");
        }

        let store: Arc<dyn BlockStore> =
            Arc::new(BlockSpace::open(&path, options).expect("reopen store"));
        let tree = BTree::<String, Vec<u8>>::open(store, BTreeOptions::default()).expect("reopen tree");
        let actual: Vec<(String, Vec<u8>)> =
            tree.scan_all().collect::<cbtree::Result<_>>().expect("scan");
        let expected: Vec<(String, Vec<u8>)> =
            reference.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        prop_assert_eq!(&actual, &expected);

        let ranged: Vec<String> = tree
            .scan_between(lower.clone(), upper.clone())
            .map(|item| item.map(|(k, _)| k))
            .collect::<cbtree::Result<_>>()
            .expect("bounded scan");
        let expected_range: Vec<String> = reference
            .keys()
            .filter(|k| **k >= lower && **k < upper)
            .cloned()
            .collect();
        prop_assert_eq!(ranged, expected_range);
        prop_assert_eq!(tree.is_empty(), reference.is_empty());
    }
}

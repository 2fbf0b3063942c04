//! Model-based tests: every operation is mirrored against a `BTreeMap` and
//! the full set of structural invariants is re-checked after each step.

use std::collections::BTreeMap;

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rbtree::{Node, NodeId, RbTree};

#[derive(Debug, PartialEq)]
struct Item {
    key: u64,
    weight: u64,
}

impl Node for Item {
    type Key = u64;
    type Aggregate = u64;

    fn key(&self) -> u64 {
        self.key
    }

    fn aggregate(&self, left: Option<u64>, right: Option<u64>) -> u64 {
        self.weight.max(left.unwrap_or(0)).max(right.unwrap_or(0))
    }
}

#[derive(Debug, Clone)]
enum Op {
    Insert { key: u64, weight: u64 },
    Remove { pick: usize },
    Update { pick: usize, weight: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        // keys are drawn from a small domain so that removals and updates
        // actually hit existing nodes
        (0u64..512, 0u64..1024).prop_map(|(key, weight)| Op::Insert { key, weight }),
        any::<usize>().prop_map(|pick| Op::Remove { pick }),
        (any::<usize>(), 0u64..1024).prop_map(|(pick, weight)| Op::Update { pick, weight }),
    ]
}

fn nth_key(model: &BTreeMap<u64, u64>, pick: usize) -> Option<u64> {
    if model.is_empty() {
        return None;
    }
    model.keys().nth(pick % model.len()).copied()
}

proptest! {
    #[test]
    fn random_ops_match_btreemap(ops in proptest::collection::vec(op_strategy(), 1..256)) {
        let mut tree: RbTree<Item> = RbTree::new();
        let mut model: BTreeMap<u64, u64> = BTreeMap::new();
        let mut handles: BTreeMap<u64, NodeId> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert { key, weight } => {
                    if model.contains_key(&key) {
                        continue;
                    }
                    let id = tree.insert(Item { key, weight });
                    model.insert(key, weight);
                    handles.insert(key, id);
                }
                Op::Remove { pick } => {
                    let Some(key) = nth_key(&model, pick) else { continue };
                    let id = handles.remove(&key).unwrap();
                    let item = tree.remove(id);
                    prop_assert_eq!(item.key, key);
                    model.remove(&key);
                }
                Op::Update { pick, weight } => {
                    let Some(key) = nth_key(&model, pick) else { continue };
                    tree.with_mut(handles[&key], |item| item.weight = weight);
                    model.insert(key, weight);
                }
            }

            tree.assert_invariants();
            prop_assert_eq!(tree.len(), model.len());
            prop_assert!(
                tree.iter()
                    .map(|(_, item)| (item.key, item.weight))
                    .eq(model.iter().map(|(&key, &weight)| (key, weight)))
            );
            if let Some(root) = tree.root() {
                prop_assert_eq!(
                    tree.aggregate(root),
                    model.values().copied().max().unwrap()
                );
            }
        }
    }

    #[test]
    fn upper_bound_matches_btreemap(
        keys in proptest::collection::btree_set(0u64..10_000, 1..128),
        probes in proptest::collection::vec(0u64..10_500, 1..64),
    ) {
        let mut tree: RbTree<Item> = RbTree::new();
        let model: BTreeMap<u64, u64> = keys.iter().map(|&key| (key, 0)).collect();
        for &key in &keys {
            tree.insert(Item { key, weight: 0 });
        }

        for probe in probes {
            let expected = model.range(..=probe).next_back().map(|(&key, _)| key);
            let found = tree.upper_bound(probe).map(|id| tree.get(id).key);
            prop_assert_eq!(found, expected);
        }
    }
}

#[test]
fn shuffled_bulk_insert_stays_sorted() {
    let mut keys: Vec<u64> = (0..1_000).collect();
    keys.shuffle(&mut rand::rng());

    let mut tree: RbTree<Item> = RbTree::new();
    for &key in &keys {
        tree.insert(Item { key, weight: key });
    }

    tree.assert_invariants();
    assert_eq!(tree.len(), 1_000);
    assert!(tree.iter().map(|(_, item)| item.key).eq(0..1_000));
    assert_eq!(tree.aggregate(tree.root().unwrap()), 999);
}

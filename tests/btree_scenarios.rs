//! End-to-end scenarios driving `Tree` purely through its public API,
//! mirroring the sequences from `spec.md` §8. Internal node/leaf layout
//! isn't exposed outside the crate, so these check the invariants that
//! are observable from outside: final key set, ascending order via
//! `iter`, and round-trip `search` results after each insert/delete.

use bptree_db::{Key, Tree};
use uuid::Uuid;

fn scratch_path() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("bptree-db-scenario-tests");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("scenario_{}.db", Uuid::new_v4()))
}

fn open(node_size: u32, pool_size: usize) -> Tree {
    Tree::open(&scratch_path(), node_size, pool_size).unwrap()
}

fn ordered_keys(tree: &Tree) -> Vec<i64> {
    tree.iter().unwrap().map(|(k, _)| k.main).collect()
}

/// Scenario 1: insert 1..=6 in ascending order, B = 3.
#[test]
fn scenario_ascending_inserts_b3() {
    let tree = open(3, 32);
    for k in 1..=6i64 {
        tree.insert(Key::from(k), k).unwrap();
    }
    assert_eq!(ordered_keys(&tree), (1..=6).collect::<Vec<_>>());
    for k in 1..=6i64 {
        assert_eq!(tree.search(Key::from(k)).unwrap(), Some(k));
    }
}

/// Scenario 2: insert 10 down to 1 in descending order, B = 3.
#[test]
fn scenario_descending_inserts_b3() {
    let tree = open(3, 32);
    for k in (1..=10i64).rev() {
        tree.insert(Key::from(k), k).unwrap();
    }
    assert_eq!(ordered_keys(&tree), (1..=10).collect::<Vec<_>>());
    for k in 1..=10i64 {
        assert_eq!(tree.search(Key::from(k)).unwrap(), Some(k));
    }
}

/// Scenario 3: insert 1..=5, delete 5, 4, 3, B = 3. Remaining: {1, 2}.
#[test]
fn scenario_insert_then_delete_tail_b3() {
    let tree = open(3, 32);
    for k in 1..=5i64 {
        tree.insert(Key::from(k), k).unwrap();
    }
    for k in [5, 4, 3] {
        tree.delete(Key::from(k)).unwrap();
    }
    assert_eq!(ordered_keys(&tree), vec![1, 2]);
    assert_eq!(tree.search(Key::from(3)).unwrap(), None);
    assert_eq!(tree.search(Key::from(1)).unwrap(), Some(1));
}

/// Scenario 4: insert 1..=5, delete 5, 4, 3, 2 — collapses to a single
/// leaf root containing {1}.
#[test]
fn scenario_delete_down_to_single_leaf_root_b3() {
    let tree = open(3, 32);
    for k in 1..=5i64 {
        tree.insert(Key::from(k), k).unwrap();
    }
    for k in [5, 4, 3, 2] {
        tree.delete(Key::from(k)).unwrap();
    }
    assert_eq!(ordered_keys(&tree), vec![1]);
    assert_eq!(tree.search(Key::from(1)).unwrap(), Some(1));
}

/// Scenario 5: insert 1..=8, delete 4. Remaining: {1,2,3,5,6,7,8}.
#[test]
fn scenario_insert_eight_delete_middle_b3() {
    let tree = open(3, 32);
    for k in 1..=8i64 {
        tree.insert(Key::from(k), k).unwrap();
    }
    tree.delete(Key::from(4)).unwrap();
    assert_eq!(ordered_keys(&tree), vec![1, 2, 3, 5, 6, 7, 8]);
    assert_eq!(tree.search(Key::from(4)).unwrap(), None);
}

/// Scenario 6: B = 7, insert 1..=13.
#[test]
fn scenario_wider_branching_factor() {
    let tree = open(7, 32);
    for k in 1..=13i64 {
        tree.insert(Key::from(k), k).unwrap();
    }
    assert_eq!(ordered_keys(&tree), (1..=13).collect::<Vec<_>>());
    for k in 1..=13i64 {
        assert_eq!(tree.search(Key::from(k)).unwrap(), Some(k));
    }
}

/// Buffer pool scenario: a pool much smaller than the working set still
/// produces a correct tree — every `fetch_page`/`new_page` that misses
/// the cache must be able to evict and write back cleanly between
/// operations. The pool still needs enough frames to hold one
/// operation's own root-to-leaf path plus its split siblings at once
/// (the header page alone occupies one for the tree's whole lifetime),
/// so this picks a pool far smaller than the ~100+ pages the tree grows
/// to but large enough for that per-operation pin footprint at B = 4.
#[test]
fn scenario_small_pool_forces_eviction_under_tree_growth() {
    let tree = open(4, 16);
    let mut keys: Vec<i64> = (0..300).collect();
    for &k in &keys {
        tree.insert(Key::from(k), k * 3).unwrap();
    }
    assert_eq!(ordered_keys(&tree), keys.clone());

    keys.reverse();
    for &k in keys.iter().step_by(2) {
        tree.delete(Key::from(k)).unwrap();
    }
    let remaining = ordered_keys(&tree);
    let expected: Vec<i64> = (0..300).filter(|k| k % 2 != 0).collect();
    assert_eq!(remaining, expected);
    for k in expected {
        assert_eq!(tree.search(Key::from(k)).unwrap(), Some(k * 3));
    }
}

/// Reopening after `close` persists the full key set through the disk
/// manager, independent of in-memory buffer pool state.
#[test]
fn scenario_close_and_reopen_preserves_all_data() {
    let path = scratch_path();
    let keys: Vec<i64> = (0..150).collect();
    {
        let tree = Tree::open(&path, 5, 16).unwrap();
        for &k in &keys {
            tree.insert(Key::from(k), k + 1).unwrap();
        }
        tree.close().unwrap();
    }
    let tree = Tree::open(&path, 5, 16).unwrap();
    assert_eq!(ordered_keys(&tree), keys.clone());
    for &k in &keys {
        assert_eq!(tree.search(Key::from(k)).unwrap(), Some(k + 1));
    }
}

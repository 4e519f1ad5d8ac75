use crate::math::{Coord, CoordBBox};

use super::{MaskTree, Node, Tree, DIM, SIZE};

#[test]
fn sparse_fill_uses_tiles_for_covered_leaves() {
    let mut tree = MaskTree::default();
    tree.sparse_fill(
        CoordBBox::new(Coord::new(0, 0, 0), Coord::new(15, 7, 9)),
        true,
        true,
    );
    assert_eq!(tree.active_tile_count(), 2);
    assert_eq!(tree.leaf_count(), 2);
    assert_eq!(tree.active_voxel_count(), 16 * 8 * 10);
    assert!(tree.is_value_on(Coord::new(3, 3, 9)));
    assert!(!tree.is_value_on(Coord::new(3, 3, 10)));
}

#[test]
fn topology_union_keeps_existing_values() {
    let mut a: Tree<f32> = Tree::new(3.0);
    a.set_value_on(Coord::new(1, 1, 1), -1.0);

    let mut b = MaskTree::default();
    b.set_value_on(Coord::new(2, 1, 1), true);
    b.add_tile(Coord::new(8, 0, 0), true, true);

    a.topology_union(&b);
    assert_eq!(a.get_value(Coord::new(1, 1, 1)), -1.0);
    assert!(a.is_value_on(Coord::new(2, 1, 1)));
    assert_eq!(a.get_value(Coord::new(2, 1, 1)), 3.0);
    assert!(a.is_value_on(Coord::new(12, 4, 4)));
    assert_eq!(a.active_voxel_count(), 2 + SIZE as u64);
}

#[test]
fn topology_difference_turns_off_masked_voxels() {
    let mut a = MaskTree::default();
    a.sparse_fill(CoordBBox::cube(Coord::ZERO, 2 * DIM), true, true);

    let mut off = MaskTree::default();
    off.add_tile(Coord::ZERO, true, true);
    off.set_value_on(Coord::new(9, 0, 0), true);

    a.topology_difference(&off);
    assert!(!a.is_value_on(Coord::new(0, 0, 0)));
    assert!(!a.is_value_on(Coord::new(9, 0, 0)));
    assert!(a.is_value_on(Coord::new(10, 0, 0)));
    assert_eq!(a.active_voxel_count(), (8 * SIZE - SIZE - 1) as u64);
}

#[test]
fn prune_inactive_keeps_inactive_tiles() {
    let mut tree: Tree<f32> = Tree::new(2.0);
    tree.set_value_off(Coord::new(0, 0, 0), -1.0);
    tree.set_value_on(Coord::new(8, 0, 0), 0.5);
    tree.prune_inactive();
    assert_eq!(tree.leaf_count(), 1);
    assert!(matches!(
        tree.nodes().next(),
        Some((_, Node::Tile { value, active: false })) if *value == 2.0
    ));
}

#[test]
fn prune_level_set_preserves_inside_sign() {
    let mut tree: Tree<f32> = Tree::new(0.3);
    let leaf = tree.touch_leaf(Coord::new(-8, 0, 0));
    leaf.values_mut().fill(-0.3);
    tree.add_tile(Coord::new(16, 0, 0), -0.1, false);
    tree.set_value_on(Coord::new(8, 0, 0), 0.1);

    tree.prune_level_set();
    assert_eq!(tree.leaf_count(), 1);
    assert_eq!(tree.get_value(Coord::new(-4, 2, 2)), -0.3);
    assert_eq!(tree.get_value(Coord::new(20, 0, 0)), -0.3);
}

#[test]
fn modify_inactive_values_reaches_tiles_and_voxels() {
    let mut tree: Tree<f32> = Tree::new(1.0);
    tree.add_tile(Coord::new(8, 0, 0), 1.0, false);
    tree.set_value_on(Coord::new(0, 0, 0), 0.25);
    tree.set_value_off(Coord::new(0, 0, 1), 1.0);

    tree.modify_inactive_values(true, |coord, value| {
        if coord.x >= 8 || coord.z == 1 {
            *value = -*value;
        }
    });
    assert_eq!(tree.get_value(Coord::new(8, 0, 0)), -1.0);
    assert_eq!(tree.get_value(Coord::new(0, 0, 1)), -1.0);
    assert_eq!(tree.get_value(Coord::new(0, 0, 0)), 0.25);
}

#[test]
fn modify_active_values_skips_inactive_data() {
    let mut tree: Tree<f32> = Tree::new(0.0);
    tree.add_tile(Coord::new(8, 0, 0), 0.5, true);
    tree.add_tile(Coord::new(16, 0, 0), 0.5, false);
    tree.set_value_on(Coord::new(1, 0, 0), 0.5);
    tree.set_value_off(Coord::new(2, 0, 0), 0.5);

    tree.modify_active_values(false, |_, value| *value *= 4.0);
    assert_eq!(tree.get_value(Coord::new(8, 0, 0)), 2.0);
    assert_eq!(tree.get_value(Coord::new(1, 0, 0)), 2.0);
    assert_eq!(tree.get_value(Coord::new(16, 0, 0)), 0.5);
    assert_eq!(tree.get_value(Coord::new(2, 0, 0)), 0.5);
}

#[test]
fn steal_leaf_empties_the_slot() {
    let mut tree: Tree<u32> = Tree::new(0);
    tree.set_value_on(Coord::new(3, 4, 5), 7);
    let leaf = tree.steal_leaf(Coord::new(0, 0, 0)).expect("leaf exists");
    assert_eq!(leaf.origin(), Coord::ZERO);
    assert!(tree.is_empty());
    assert!(tree.steal_leaf(Coord::new(0, 0, 0)).is_none());
}

#[test]
fn voxelize_active_tiles_creates_dense_leaves() {
    let mut tree: Tree<f32> = Tree::new(0.0);
    tree.add_tile(Coord::ZERO, 0.5, true);
    tree.voxelize_active_tiles();
    let leaf = tree.probe_leaf(Coord::ZERO).expect("voxelized leaf");
    assert!(leaf.mask().is_all_on());
    assert_eq!(leaf.get_value(100), 0.5);
    assert_eq!(
        tree.eval_active_bounding_box(),
        CoordBBox::cube(Coord::ZERO, DIM)
    );
}

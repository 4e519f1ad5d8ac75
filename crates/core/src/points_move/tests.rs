use glam::DVec3;

use crate::attributes::{AttributeInfo, AttributeStorage, AttributeType, AttributeValue};
use crate::error::PointsError;
use crate::math::{Coord, Transform};
use crate::points::{AttributeThresholdFilter, NullFilter, PointCloud, PointDataGrid, PointLeaf};

use super::*;

fn id_info() -> AttributeInfo {
    AttributeInfo {
        name: "id".to_string(),
        data_type: AttributeType::Int,
        stride: 1,
        default: AttributeValue::Int(-1),
    }
}

fn grid_with_ids(positions: &[DVec3], voxel_size: f64) -> PointDataGrid {
    let ids = (0..positions.len() as i32).collect();
    let cloud = PointCloud::new(positions.to_vec()).with_attribute(id_info(), AttributeStorage::Int(ids));
    PointDataGrid::from_cloud(&cloud, Transform::linear(voxel_size)).expect("grid")
}

fn scattered(count: usize, extent: f64) -> Vec<DVec3> {
    let mut state = 0x2545_f491_u64;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 * extent - extent
    };
    (0..count).map(|_| DVec3::new(next(), next(), next())).collect()
}

fn ids(grid: &PointDataGrid) -> Vec<i32> {
    match grid.attribute_values("id").expect("ids") {
        AttributeStorage::Int(values) => values,
        other => panic!("unexpected id storage {other:?}"),
    }
}

fn positions_by_id(grid: &PointDataGrid) -> Vec<DVec3> {
    let mut pairs: Vec<(i32, DVec3)> = ids(grid).into_iter().zip(grid.world_positions()).collect();
    pairs.sort_by_key(|(id, _)| *id);
    pairs.into_iter().map(|(_, p)| p).collect()
}

#[test]
fn null_deformer_keeps_every_leaf_static() {
    let positions = scattered(300, 4.0);
    let mut grid = grid_with_ids(&positions, 0.25);
    let before = grid.clone();
    let report = move_points(&mut grid, &NullDeformer, &NullFilter, true).expect("move");

    assert_eq!(report.static_leaves, before.leaf_count());
    assert_eq!(report.moved_leaves, 0);
    assert_eq!(report.point_count, 300);
    assert_eq!(ids(&grid), ids(&before));
    for (a, b) in grid.world_positions().iter().zip(before.world_positions()) {
        assert!((*a - b).length() < 1.0e-6);
    }
}

#[test]
fn null_deformer_keeps_points_on_a_voxel_face() {
    let mut grid = grid_with_ids(&[DVec3::new(0.499_999_99, 0.0, 0.0)], 1.0);
    let face = crate::tree::coord_to_offset(Coord::new(1, 0, 0));
    let count_at = |grid: &PointDataGrid, offset: usize| {
        grid.tree()
            .probe_leaf(Coord::ZERO)
            .map(|leaf| leaf.voxel_range(offset).len())
    };
    assert_eq!(count_at(&grid, face), Some(1));

    for _ in 0..2 {
        let report = move_points(&mut grid, &NullDeformer, &NullFilter, true).expect("move");
        assert_eq!(report.static_leaves, 1);
        assert_eq!(report.moved_leaves, 0);
        assert_eq!(count_at(&grid, face), Some(1));
        assert_eq!(count_at(&grid, 0), Some(0));
    }
}

#[test]
fn offset_move_transports_attributes() {
    let positions = scattered(500, 3.0);
    let mut grid = grid_with_ids(&positions, 0.1);
    let offset = DVec3::new(0.75, -0.3, 1.6);
    let report = move_points(&mut grid, &OffsetDeformer::world(offset), &NullFilter, true)
        .expect("move");
    assert_eq!(report.point_count, positions.len());

    for (moved, original) in positions_by_id(&grid).iter().zip(&positions) {
        assert!((*moved - (*original + offset)).length() < 1.0e-5);
    }
    for leaf in grid.tree().leaves() {
        for (_, index) in leaf.iter_points() {
            assert!(leaf.position(index).abs().max_element() <= 0.5 + 1.0e-6);
        }
    }
}

#[test]
fn filter_deletes_rejected_points() {
    let positions = scattered(200, 2.0);
    let mut values = Vec::new();
    for i in 0..positions.len() {
        values.push(if i % 3 == 0 { 1.0 } else { 0.0 });
    }
    let cloud = PointCloud::new(positions.clone())
        .with_attribute(id_info(), AttributeStorage::Int((0..200).collect()))
        .with_attribute(
            AttributeInfo {
                name: "keep".to_string(),
                data_type: AttributeType::Float,
                stride: 1,
                default: AttributeValue::Float(0.0),
            },
            AttributeStorage::Float(values),
        );
    let mut grid = PointDataGrid::from_cloud(&cloud, Transform::linear(0.5)).expect("grid");
    let filter = AttributeThresholdFilter::new("keep", 0.5);
    let report = move_points(&mut grid, &NullDeformer, &filter, false).expect("move");

    let kept = (0..200).filter(|i| i % 3 == 0).count();
    assert_eq!(report.point_count, kept);
    assert_eq!(grid.point_count(), kept);
    assert!(ids(&grid).iter().all(|id| id % 3 == 0));
}

#[test]
fn threaded_and_serial_moves_agree() {
    let positions = scattered(2000, 6.0);
    let deformer = FnDeformer(|p: &mut DVec3, _: PointRef| {
        *p = DVec3::new(p.y, -p.x, p.z * 0.5);
    });
    let run = |threaded: bool| {
        let mut grid = grid_with_ids(&positions, 0.2);
        move_points(&mut grid, &deformer, &NullFilter, threaded).expect("move");
        grid
    };
    let first = run(true);
    assert_eq!(ids(&first), ids(&run(true)));
    assert_eq!(ids(&first), ids(&run(false)));
    assert_eq!(first.leaf_count(), run(false).leaf_count());
}

#[test]
fn incoming_points_precede_local_points_in_a_voxel() {
    let mut grid = grid_with_ids(&[DVec3::ZERO, DVec3::new(9.0, 0.0, 0.0)], 1.0);
    let deformer = FnDeformer(|p: &mut DVec3, _: PointRef| {
        if p.x > 8.0 {
            p.x -= 9.0;
        }
    });
    let report = move_points(&mut grid, &deformer, &NullFilter, true).expect("move");
    assert_eq!(grid.leaf_count(), 1);
    assert_eq!(report.static_leaves, 0);
    let leaf = grid.tree().probe_leaf(Coord::ZERO).expect("leaf");
    assert_eq!(leaf.voxel_range(0), 0..2);
    assert_eq!(ids(&grid), vec![1, 0]);
}

#[test]
fn index_space_deformer_shifts_by_voxels() {
    let mut grid = grid_with_ids(&[DVec3::new(0.1, 0.1, 0.1)], 0.5);
    move_points(
        &mut grid,
        &OffsetDeformer::index(DVec3::new(8.0, 0.0, 0.0)),
        &NullFilter,
        true,
    )
    .expect("move");
    assert!(grid.tree().probe_leaf(Coord::new(8, 0, 0)).is_some());
    let p = grid.world_positions()[0];
    assert!((p - DVec3::new(4.1, 0.1, 0.1)).length() < 1.0e-6);
}

#[test]
fn merged_points_stay_in_their_voxels() {
    let xform = Transform::linear(0.1);
    let mut a = PointDataGrid::from_positions(&[DVec3::ZERO], xform).expect("a");
    let mut b = PointDataGrid::from_positions(&[DVec3::new(10.0, 0.0, 0.0)], xform).expect("b");
    a.merge_points(&mut b, true).expect("merge");

    let report = move_points(&mut a, &NullDeformer, &NullFilter, true).expect("move");
    assert_eq!(report.static_leaves, 2);
    assert_eq!(report.point_count, 2);
    for world in [DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0)] {
        let voxel = xform.world_to_index_cell_centered(world);
        let leaf = a.tree().probe_leaf(voxel).expect("leaf");
        assert_eq!(leaf.voxel_range(crate::tree::coord_to_offset(voxel)).len(), 1);
    }
}

#[test]
fn move_into_a_new_transform_keeps_world_positions() {
    let positions = scattered(100, 1.0);
    let mut grid = grid_with_ids(&positions, 0.1);
    move_points_to(&mut grid, Transform::linear(0.35), &NullDeformer, &NullFilter, true)
        .expect("move");
    assert_eq!(grid.transform().voxel_size(), 0.35);
    for (moved, original) in positions_by_id(&grid).iter().zip(&positions) {
        assert!((*moved - *original).length() < 1.0e-5);
    }
}

#[test]
fn cached_deformer_requires_evaluation() {
    let mut grid = grid_with_ids(&[DVec3::ZERO], 1.0);
    let cache = DeformerCache::new();
    let result = move_points(&mut grid, &CachedDeformer::new(&cache), &NullFilter, true);
    assert_eq!(result, Err(PointsError::EmptyCache));

    let leaf: &PointLeaf = grid.tree().leaves().next().expect("leaf");
    let mut cache = DeformerCache::new();
    cache
        .evaluate(&grid, &NullDeformer, &NullFilter, false)
        .expect("evaluate");
    let mut deformer = CachedDeformer::new(&cache);
    assert_eq!(
        deformer.reset(leaf, 4),
        Err(PointsError::CacheIndexOutOfRange { index: 4, len: 1 })
    );
}

#[test]
fn cached_deformer_replays_positions() {
    let positions = scattered(400, 2.0);
    let offset = DVec3::new(-1.25, 0.5, 0.0);
    let mut direct = grid_with_ids(&positions, 0.2);
    let mut cached = direct.clone();

    let mut cache = DeformerCache::new();
    cache
        .evaluate(&cached, &OffsetDeformer::world(offset), &NullFilter, true)
        .expect("evaluate");
    assert!(cache.leaves.iter().all(|leaf| leaf.map_data.is_empty()));

    move_points(&mut direct, &OffsetDeformer::world(offset), &NullFilter, true).expect("direct");
    move_points(&mut cached, &CachedDeformer::new(&cache), &NullFilter, true).expect("cached");
    assert_eq!(ids(&direct), ids(&cached));
    for (a, b) in direct.world_positions().iter().zip(cached.world_positions()) {
        assert!((*a - b).length() < 1.0e-6);
    }
}

#[test]
fn filtered_cache_uses_sparse_storage() {
    let grid = grid_with_ids(&scattered(50, 1.0), 0.5);
    let filter = crate::points::FnFilter(|_: &PointLeaf, index: usize| index % 2 == 0);
    let mut cache = DeformerCache::new();
    cache
        .evaluate(&grid, &NullDeformer, &filter, true)
        .expect("evaluate");
    let leaf = cache.leaves.iter().find(|leaf| !leaf.map_data.is_empty()).expect("sparse leaf");
    assert!(leaf.vec_data.is_empty());
    assert!(leaf.total_size >= leaf.map_data.len());
}

#[test]
fn invalid_target_transform_is_rejected() {
    let mut grid = grid_with_ids(&[DVec3::ZERO], 1.0);
    assert!(matches!(
        move_points_to(&mut grid, Transform::linear(-1.0), &NullDeformer, &NullFilter, true),
        Err(PointsError::InvalidSettings(_))
    ));
}

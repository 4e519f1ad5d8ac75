use glam::DVec3;

use crate::attributes::{AttributeInfo, AttributeStorage, AttributeType, AttributeValue};
use crate::math::{Coord, Transform};

use super::*;

fn float_info(name: &str, default: f32) -> AttributeInfo {
    AttributeInfo {
        name: name.to_string(),
        data_type: AttributeType::Float,
        stride: 1,
        default: AttributeValue::Float(default),
    }
}

fn int_info(name: &str) -> AttributeInfo {
    AttributeInfo {
        name: name.to_string(),
        data_type: AttributeType::Int,
        stride: 1,
        default: AttributeValue::Int(0),
    }
}

#[test]
fn positions_are_stored_voxel_local() {
    let xform = Transform::linear(0.5);
    let points = [
        DVec3::new(0.1, 0.2, 0.2),
        DVec3::new(4.26, -1.0, 0.0),
        DVec3::new(0.2, 0.0, 0.0),
    ];
    let grid = PointDataGrid::from_positions(&points, xform).expect("grid");
    assert_eq!(grid.point_count(), 3);
    assert_eq!(grid.leaf_count(), 2);

    let leaf = grid.tree().probe_leaf(Coord::ZERO).expect("origin leaf");
    assert_eq!(leaf.point_count(), 2);
    let offset = crate::tree::coord_to_offset(Coord::ZERO);
    assert_eq!(leaf.voxel_range(offset), 0..2);
    for (_, index) in leaf.iter_points() {
        let p = leaf.position(index);
        assert!(p.abs().max_element() <= 0.5);
    }

    let mut world = grid.world_positions();
    world.sort_by(|a, b| a.x.total_cmp(&b.x));
    for (got, want) in world.iter().zip([points[0], points[2], points[1]]) {
        assert!((*got - want).length() < 1.0e-6);
    }
}

#[test]
fn points_sharing_a_voxel_keep_input_order() {
    let cloud = PointCloud::new(vec![DVec3::splat(0.1), DVec3::splat(-0.1), DVec3::splat(0.05)])
        .with_attribute(int_info("id"), AttributeStorage::Int(vec![10, 11, 12]));
    let grid = PointDataGrid::from_cloud(&cloud, Transform::linear(1.0)).expect("grid");
    assert_eq!(
        grid.attribute_values("id").expect("ids"),
        AttributeStorage::Int(vec![10, 11, 12])
    );
}

#[test]
fn cloud_validation_rejects_bad_columns() {
    let short = PointCloud::new(vec![DVec3::ZERO; 3])
        .with_attribute(float_info("pscale", 1.0), AttributeStorage::Float(vec![1.0]));
    assert!(matches!(
        PointDataGrid::from_cloud(&short, Transform::linear(1.0)),
        Err(PointsError::LengthMismatch { .. })
    ));

    let duplicate = PointCloud::new(vec![DVec3::ZERO])
        .with_attribute(float_info("P", 1.0), AttributeStorage::Float(vec![1.0]));
    assert!(PointDataGrid::from_cloud(&duplicate, Transform::linear(1.0)).is_err());

    assert!(PointDataGrid::from_positions(&[DVec3::ZERO], Transform::linear(0.0)).is_err());
}

#[test]
fn append_and_set_attribute_values() {
    let positions: Vec<DVec3> = (0..20).map(|i| DVec3::new(i as f64 * 3.0, 0.0, 0.0)).collect();
    let mut grid = PointDataGrid::from_positions(&positions, Transform::linear(1.0)).expect("grid");
    grid.append_attribute(float_info("pscale", 0.25)).expect("append");
    assert_eq!(
        grid.attribute_values("pscale").expect("defaults"),
        AttributeStorage::Float(vec![0.25; 20])
    );

    let values: Vec<f32> = (0..20).map(|i| i as f32).collect();
    grid.set_attribute_values("pscale", AttributeStorage::Float(values.clone()))
        .expect("set");
    assert_eq!(
        grid.attribute_values("pscale").expect("values"),
        AttributeStorage::Float(values)
    );
    assert!(matches!(
        grid.set_attribute_values("missing", AttributeStorage::Float(vec![])),
        Err(PointsError::MissingAttribute { .. })
    ));
    assert!(grid
        .set_attribute_values("pscale", AttributeStorage::Float(vec![1.0]))
        .is_err());
}

#[test]
fn merge_moves_points_and_empties_other() {
    let xform = Transform::linear(0.1);
    let mut a = PointDataGrid::from_positions(&[DVec3::ZERO], xform).expect("a");
    let mut b = PointDataGrid::from_positions(&[DVec3::new(10.0, 0.0, 0.0)], xform).expect("b");

    assert_eq!(a.merge_points(&mut b, true).expect("merge"), 1);
    assert!(b.tree().is_empty());
    let far = xform.world_to_index_cell_centered(DVec3::new(10.0, 0.0, 0.0));
    assert_eq!(a.tree().probe_leaf(far).map(PointLeaf::point_count), Some(1));
    assert_eq!(a.tree().probe_leaf(Coord::ZERO).map(PointLeaf::point_count), Some(1));
}

#[test]
fn merge_unions_attributes_and_orders_shared_voxels() {
    let xform = Transform::linear(0.1);
    let mut a = PointDataGrid::from_positions(&[DVec3::ZERO], xform).expect("a");
    let cloud = PointCloud::new(vec![DVec3::ZERO])
        .with_attribute(int_info("group"), AttributeStorage::Int(vec![1]));
    let mut b = PointDataGrid::from_cloud(&cloud, xform).expect("b");

    a.merge_points(&mut b, false).expect("merge");
    assert!(a.descriptor().find("group").is_some());
    let leaf = a.tree().leaves().next().expect("merged leaf");
    assert_eq!(leaf.point_count(), 2);
    assert_eq!(
        a.attribute_values("group").expect("group"),
        AttributeStorage::Int(vec![0, 1])
    );
}

#[test]
fn merging_an_empty_grid_still_unions_attributes() {
    let xform = Transform::linear(0.1);
    let mut a = PointDataGrid::from_positions(&[DVec3::ZERO], xform).expect("a");
    let cloud = PointCloud::new(Vec::new())
        .with_attribute(int_info("id"), AttributeStorage::Int(Vec::new()));
    let mut b = PointDataGrid::from_cloud(&cloud, xform).expect("b");

    assert_eq!(a.merge_points(&mut b, true).expect("merge"), 0);
    assert!(a.descriptor().find("id").is_some());
    assert_eq!(a.attribute_values("id").expect("id"), AttributeStorage::Int(vec![0]));
}

#[test]
fn merge_of_three_grids_keeps_every_attribute() {
    let positions = [
        DVec3::new(1.0, 1.0, 1.0),
        DVec3::new(1.0, 3.0, 1.0),
        DVec3::new(2.0, 5.0, 1.0),
        DVec3::new(5.0, 1.0, 1.0),
        DVec3::new(5.0, 5.0, 1.0),
    ];
    let xform = Transform::linear(1.0);
    let build = |names: &[&str]| {
        let mut grid = PointDataGrid::from_positions(&positions, xform).expect("grid");
        for name in names {
            grid.append_attribute(float_info(name, 0.0)).expect("append");
        }
        grid
    };
    let mut a = build(&["a1", "a2", "a5"]);
    let mut b = build(&["a3", "a5", "a1"]);
    let mut c = build(&["a4", "a2", "a3"]);

    a.merge_points(&mut b, true).expect("merge b");
    a.merge_points(&mut c, true).expect("merge c");
    assert_eq!(a.point_count(), 15);
    assert!(b.tree().is_empty() && c.tree().is_empty());
    for name in ["a1", "a2", "a3", "a4", "a5"] {
        assert!(a.descriptor().find(name).is_some(), "missing {name}");
    }
}

#[test]
fn merge_rebins_points_from_a_different_transform() {
    let mut a = PointDataGrid::from_positions(&[DVec3::ZERO], Transform::linear(1.0)).expect("a");
    let mut b =
        PointDataGrid::from_positions(&[DVec3::new(20.0, 0.0, 0.0)], Transform::linear(10.0))
            .expect("b");
    a.merge_points(&mut b, true).expect("merge");
    assert_eq!(a.point_count(), 2);
    assert!(a.tree().probe_leaf(Coord::new(20, 0, 0)).is_some());
}

#[test]
fn threshold_filter_and_min_max() {
    let positions: Vec<DVec3> = (0..4).map(|i| DVec3::new(i as f64 * 10.0, 0.0, 0.0)).collect();
    let cloud = PointCloud::new(positions).with_attribute(
        float_info("pscale", 1.0),
        AttributeStorage::Float(vec![0.5, 2.0, 1.5, 4.0]),
    );
    let grid = PointDataGrid::from_cloud(&cloud, Transform::linear(1.0)).expect("grid");

    let all = eval_min_max(&grid, "pscale", &NullFilter, true)
        .expect("eval")
        .expect("some points");
    assert_eq!((all.min, all.max), (0.5, 4.0));
    assert_eq!(all.max_tree.get_value(Coord::new(8, 0, 0)), 2.0);
    assert!(all.max_tree.is_value_on(Coord::new(8, 0, 0)));

    let filter = AttributeThresholdFilter::new("pscale", 1.0);
    let big = eval_min_max(&grid, "pscale", &filter, false)
        .expect("eval")
        .expect("filtered points");
    assert_eq!((big.min, big.max), (1.5, 4.0));
    assert!(!big.min_tree.is_value_on(Coord::ZERO));

    let none = eval_min_max(&grid, "pscale", &AttributeThresholdFilter::new("pscale", 10.0), true)
        .expect("eval");
    assert!(none.is_none());
    assert!(matches!(
        eval_min_max(&grid, "missing", &NullFilter, true),
        Err(PointsError::MissingAttribute { .. })
    ));
}

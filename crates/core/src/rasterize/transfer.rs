use crate::attributes::{AttributeArray, AttributeType, AttributeValue};
use crate::math::Transform;
use crate::parallel;
use crate::points::{PointDataGrid, PointLeaf};
use crate::tree::{AnyGrid, Grid, LeafNode, Tree, TreeValue};

/// Attribute carried onto the surface, resolved against the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TransferAttribute {
    pub name: String,
    pub index: usize,
    pub data_type: AttributeType,
}

/// Builds one grid per attribute holding, at every active voxel of
/// `closest`, the value of the point recorded there.
pub(crate) fn transfer_attributes(
    points: &PointDataGrid,
    attributes: &[TransferAttribute],
    closest: &Tree<i64>,
    transform: Transform,
    threaded: bool,
) -> Vec<AnyGrid> {
    let point_leaves = points.tree().leaf_list();
    let grids = parallel::map_indexed(attributes.len(), threaded, |i| {
        let attribute = &attributes[i];
        let leaves = point_leaves.as_slice();
        let index = attribute.index;
        match attribute.data_type {
            AttributeType::Float => AnyGrid::Float(named(
                gather(leaves, closest, index, threaded, |value| match value {
                    AttributeValue::Float(v) => Some(v),
                    _ => None,
                }),
                transform,
                &attribute.name,
            )),
            AttributeType::Int => AnyGrid::Int(named(
                gather(leaves, closest, index, threaded, |value| match value {
                    AttributeValue::Int(v) => Some(v),
                    _ => None,
                }),
                transform,
                &attribute.name,
            )),
            AttributeType::Vec2 => AnyGrid::Vec2(named(
                gather(leaves, closest, index, threaded, |value| match value {
                    AttributeValue::Vec2(v) => Some(v),
                    _ => None,
                }),
                transform,
                &attribute.name,
            )),
            AttributeType::Vec3 => AnyGrid::Vec3(named(
                gather(leaves, closest, index, threaded, |value| match value {
                    AttributeValue::Vec3(v) => Some(v),
                    _ => None,
                }),
                transform,
                &attribute.name,
            )),
            AttributeType::Vec4 => AnyGrid::Vec4(named(
                gather(leaves, closest, index, threaded, |value| match value {
                    AttributeValue::Vec4(v) => Some(v),
                    _ => None,
                }),
                transform,
                &attribute.name,
            )),
        }
    });
    tracing::debug!(grids = grids.len(), "transferred closest point attributes");
    grids
}

fn named<T: TreeValue>(tree: Tree<T>, transform: Transform, name: &str) -> Grid<T> {
    Grid::new(tree, transform).with_name(name)
}

fn gather<T, R>(
    leaves: &[&PointLeaf],
    closest: &Tree<i64>,
    attribute: usize,
    threaded: bool,
    read: R,
) -> Tree<T>
where
    T: TreeValue,
    R: Fn(AttributeValue) -> Option<T> + Sync + Send,
{
    let id_leaves: Vec<&LeafNode<i64>> = closest.leaves().collect();
    let built = parallel::map_indexed(id_leaves.len(), threaded, |i| {
        let ids = id_leaves[i];
        let mut node = LeafNode::with_mask(ids.origin(), T::default(), *ids.mask());
        // consecutive voxels usually share a point leaf
        let mut current: Option<(usize, &AttributeArray)> = None;
        for offset in ids.mask().iter_on() {
            let id = ids.get_value(offset) as u64;
            let leaf_index = (id >> 32) as usize;
            let point = (id as u32) as usize;
            let array = match current {
                Some((cached, array)) if cached == leaf_index => array,
                _ => {
                    let Some(array) = leaves
                        .get(leaf_index)
                        .and_then(|leaf| leaf.attributes().get(attribute))
                    else {
                        debug_assert!(false, "closest point id names a missing leaf");
                        continue;
                    };
                    current = Some((leaf_index, array));
                    array
                }
            };
            if let Some(value) = read(array.get(point)) {
                node.set_value_only(offset, value);
            }
        }
        node
    });

    let mut tree = Tree::new(T::default());
    for node in built {
        tree.add_leaf(Box::new(node));
    }
    tree
}

#[cfg(test)]
mod tests {
    use glam::DVec3;

    use super::*;
    use crate::attributes::{AttributeInfo, AttributeStorage};
    use crate::math::Coord;
    use crate::points::PointCloud;
    use crate::tree::coord_to_offset;

    #[test]
    fn ids_decode_into_leaf_and_point() {
        let cloud = PointCloud::new(vec![DVec3::ZERO, DVec3::new(0.2, 0.0, 0.0), DVec3::new(20.0, 0.0, 0.0)])
            .with_attribute(
                AttributeInfo {
                    name: "id".to_string(),
                    data_type: AttributeType::Int,
                    stride: 1,
                    default: AttributeValue::Int(0),
                },
                AttributeStorage::Int(vec![10, 11, 12]),
            );
        let points = PointDataGrid::from_cloud(&cloud, Transform::linear(1.0)).expect("points");
        let index = points.descriptor().find("id").expect("id");

        let mut closest = Tree::new(0i64);
        closest.set_value_on(Coord::new(1, 0, 0), 1);
        closest.set_value_on(Coord::new(2, 0, 0), 1i64 << 32);
        closest.set_value_on(Coord::new(3, 0, 0), 0);

        let grids = transfer_attributes(
            &points,
            &[TransferAttribute {
                name: "id".to_string(),
                index,
                data_type: AttributeType::Int,
            }],
            &closest,
            Transform::linear(0.5),
            false,
        );
        let grid = grids[0].as_int().expect("int grid");
        assert_eq!(grid.name, "id");
        assert_eq!(grid.voxel_size(), 0.5);
        assert_eq!(grid.tree.get_value(Coord::new(1, 0, 0)), 11);
        assert_eq!(grid.tree.get_value(Coord::new(2, 0, 0)), 12);
        assert_eq!(grid.tree.get_value(Coord::new(3, 0, 0)), 10);
        assert_eq!(grid.tree.active_voxel_count(), 3);
        let leaf = grid.tree.probe_leaf(Coord::ZERO).expect("leaf");
        assert!(!leaf.is_value_on(coord_to_offset(Coord::new(4, 0, 0))));
    }
}

use crate::attributes::AttributeType;
use crate::error::{PointsError, PointsResult};
use crate::parallel;
use crate::tree::Tree;

use super::{PointDataGrid, PointFilter};

/// Range of a float attribute over the points that pass a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMax {
    pub min: f32,
    pub max: f32,
    /// Per-leaf minimum, one active tile at each contributing leaf origin.
    pub min_tree: Tree<f32>,
    /// Per-leaf maximum, laid out like `min_tree`.
    pub max_tree: Tree<f32>,
}

/// Evaluates the min and max of the float attribute `name`. Returns `None`
/// when no point passes the filter.
pub fn eval_min_max<F: PointFilter>(
    points: &PointDataGrid,
    name: &str,
    filter: &F,
    threaded: bool,
) -> PointsResult<Option<MinMax>> {
    let index = points
        .descriptor()
        .find(name)
        .ok_or_else(|| PointsError::MissingAttribute {
            name: name.to_string(),
        })?;
    if let Some(info) = points.descriptor().get(index) {
        if info.data_type != AttributeType::Float {
            return Err(PointsError::AttributeType {
                name: name.to_string(),
                expected: AttributeType::Float,
                actual: info.data_type,
            });
        }
        if info.stride != 1 {
            return Err(PointsError::StridedAttribute {
                name: name.to_string(),
            });
        }
    }

    let leaves = points.tree().leaf_list();
    let per_leaf = parallel::map_indexed(leaves.len(), threaded, |i| {
        let leaf = leaves[i];
        let array = leaf.attributes().get(index)?;
        let mut filter = filter.clone();
        filter.reset(leaf);
        let mut range: Option<(f32, f32)> = None;
        for (_, point) in leaf.iter_points_all() {
            if !filter.is_all() && !filter.valid(leaf, point) {
                continue;
            }
            let Some(value) = array.float(point) else {
                continue;
            };
            range = Some(match range {
                Some((lo, hi)) => (lo.min(value), hi.max(value)),
                None => (value, value),
            });
        }
        range.map(|(lo, hi)| (leaf.origin(), lo, hi))
    });

    let mut result: Option<MinMax> = None;
    for (origin, lo, hi) in per_leaf.into_iter().flatten() {
        let entry = result.get_or_insert_with(|| MinMax {
            min: lo,
            max: hi,
            min_tree: Tree::new(0.0),
            max_tree: Tree::new(0.0),
        });
        entry.min = entry.min.min(lo);
        entry.max = entry.max.max(hi);
        entry.min_tree.add_tile(origin, lo, true);
        entry.max_tree.add_tile(origin, hi, true);
    }
    Ok(result)
}

use glam::DVec3;

use crate::math::{Coord, CoordBBox};
use crate::parallel;
use crate::points::{PointDataGrid, PointFilter, PointLeaf};
use crate::progress::CancelGroup;
use crate::tree::{leaf_origin, Grid, LeafNode, Tree, DIM, SIZE};

use super::kernel::{LeafBuffers, TransferKernel};

/// Runs `kernel` over every surface leaf, feeding it the points of every
/// point leaf within kernel range. Returns the closest-point tree, topology
/// matched to the surface, when `closest` is requested.
pub(crate) fn rasterize_leaves<K, F>(
    points: &PointDataGrid,
    surface: &mut Grid<f32>,
    kernel: &K,
    filter: &F,
    closest: bool,
    cancel: &CancelGroup<'_>,
    threaded: bool,
) -> Option<Tree<i64>>
where
    K: TransferKernel,
    F: PointFilter,
{
    let point_leaves = points.tree().leaf_list();
    let source = *points.transform();
    let target = surface.transform;
    let range = kernel.range();

    let mut leaves: Vec<&mut LeafNode<f32>> = surface.tree.leaves_mut().collect();
    let results = parallel::map_indexed_mut(&mut leaves, threaded, |_, leaf| {
        if cancel.poll() || leaf.mask().is_all_off() {
            return None;
        }
        let origin = leaf.origin();
        let bounds = leaf.node_bounding_box();

        // surface leaf reach, mapped into the point grid's index space
        let mut reach = bounds;
        reach.expand(range);
        let world_min = target.index_to_world(reach.min.as_dvec3() - DVec3::splat(0.5));
        let world_max = target.index_to_world(reach.max.as_dvec3() + DVec3::splat(0.5));
        let point_bounds = source.world_bbox_to_index_cell_centered(world_min, world_max);
        let (values, mask) = leaf.buffers_mut();
        let mut buffers = LeafBuffers {
            origin,
            values,
            mask,
            closest: closest.then(|| vec![0; SIZE]),
        };
        let mut kernel = kernel.clone();
        kernel.initialize(&mut buffers);
        for leaf_index in nearby_leaves(&point_leaves, &point_bounds) {
            let point_leaf = point_leaves[leaf_index];
            let mut filter = filter.clone();
            filter.reset(point_leaf);
            if !kernel.start_point_leaf(point_leaf, leaf_index as u32) {
                continue;
            }
            for (offset, index) in point_leaf.iter_points() {
                if !filter.is_all() && !filter.valid(point_leaf, index) {
                    continue;
                }
                let voxel = point_leaf.voxel_coord(offset);
                kernel.rasterize_point(&mut buffers, point_leaf, voxel, index, &bounds);
            }
            if !kernel.end_point_leaf(&buffers) {
                break;
            }
        }
        kernel.finalize(&mut buffers);
        let mask = *buffers.mask;
        buffers.closest.map(|ids| (origin, mask, ids))
    });
    drop(leaves);

    if cancel.is_cancelled() {
        tracing::warn!("rasterization interrupted, surface is incomplete");
    }
    if !closest {
        return None;
    }
    let mut tree = Tree::new(0i64);
    for (origin, mask, ids) in results.into_iter().flatten() {
        let mut node = LeafNode::with_mask(origin, 0i64, mask);
        node.values_mut().copy_from_slice(&ids);
        tree.add_leaf(Box::new(node));
    }
    tree.prune_inactive();
    Some(tree)
}

/// Indices, in ascending origin order, of the point leaves overlapping
/// `bounds`.
fn nearby_leaves(leaves: &[&PointLeaf], bounds: &CoordBBox) -> Vec<usize> {
    if bounds.is_empty() || leaves.is_empty() {
        return Vec::new();
    }
    let lo = leaf_origin(bounds.min);
    let hi = leaf_origin(bounds.max);
    let span = |a: i32, b: i32| (i64::from(b) - i64::from(a)) / i64::from(DIM) + 1;
    let candidates = span(lo.x, hi.x) * span(lo.y, hi.y) * span(lo.z, hi.z);

    if candidates > leaves.len() as i64 {
        return leaves
            .iter()
            .enumerate()
            .filter(|(_, leaf)| leaf.node_bounding_box().intersects(bounds))
            .map(|(idx, _)| idx)
            .collect();
    }

    let mut found = Vec::new();
    for x in (lo.x..=hi.x).step_by(DIM as usize) {
        for y in (lo.y..=hi.y).step_by(DIM as usize) {
            for z in (lo.z..=hi.z).step_by(DIM as usize) {
                let origin = Coord::new(x, y, z);
                if let Ok(idx) = leaves.binary_search_by_key(&origin, |leaf| leaf.origin()) {
                    found.push(idx);
                }
            }
        }
    }
    found.sort_unstable();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;

    #[test]
    fn nearby_leaves_lookup_and_scan_agree() {
        let positions: Vec<DVec3> = (0..12)
            .map(|i| DVec3::new(i as f64 * 9.0, (i % 2) as f64 * 9.0, 0.0))
            .collect();
        let points = PointDataGrid::from_positions(&positions, Transform::linear(1.0)).expect("points");
        let leaves = points.tree().leaf_list();

        let small = CoordBBox::new(Coord::new(0, 0, 0), Coord::new(20, 10, 0));
        let looked_up = nearby_leaves(&leaves, &small);
        let scanned: Vec<usize> = leaves
            .iter()
            .enumerate()
            .filter(|(_, leaf)| leaf.node_bounding_box().intersects(&small))
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(looked_up, scanned);
        assert!(!looked_up.is_empty());

        let huge = CoordBBox::new(Coord::splat(-4000), Coord::splat(4000));
        assert_eq!(nearby_leaves(&leaves, &huge).len(), leaves.len());
        assert!(nearby_leaves(&leaves, &CoordBBox::empty()).is_empty());
    }
}

//! Relocates points after a deformation: every point is rebinned into the
//! voxel and leaf its new position falls in, and attribute data is copied
//! into rebuilt leaves. Leaves whose points never leave their voxels are
//! moved into the new tree untouched.

mod deformer;
mod maps;
mod relocate;

use std::collections::BTreeMap;

use glam::DVec3;

use crate::attributes::AttributeSet;
use crate::error::{PointsError, PointsResult};
use crate::math::{Coord, Transform};
use crate::parallel;
use crate::points::{PointDataGrid, PointFilter, PointLeaf, PointTree};
use crate::tree::{coord_to_offset, leaf_origin, SIZE};

pub use deformer::{
    CachedDeformer, CachedLeaf, Deformer, DeformerCache, FnDeformer, NullDeformer,
    OffsetDeformer, PointRef,
};

use maps::{LeafIndexMaps, MoveMaps};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveReport {
    /// Leaves rebuilt from copied attribute data.
    pub moved_leaves: usize,
    /// Leaves transplanted as-is.
    pub static_leaves: usize,
    pub point_count: usize,
}

/// Moves the points of `points` with `deformer`, keeping the grid transform.
/// Points rejected by `filter` are deleted.
pub fn move_points<D, F>(
    points: &mut PointDataGrid,
    deformer: &D,
    filter: &F,
    threaded: bool,
) -> PointsResult<MoveReport>
where
    D: Deformer,
    F: PointFilter,
{
    let transform = *points.transform();
    move_points_to(points, transform, deformer, filter, threaded)
}

/// Moves the points of `points` with `deformer` and rebins them into
/// `transform`, which becomes the grid transform.
pub fn move_points_to<D, F>(
    points: &mut PointDataGrid,
    transform: Transform,
    deformer: &D,
    filter: &F,
    threaded: bool,
) -> PointsResult<MoveReport>
where
    D: Deformer,
    F: PointFilter,
{
    if !transform.is_valid() {
        return Err(PointsError::InvalidSettings(format!(
            "target voxel size {} is not a positive finite value",
            transform.voxel_size()
        )));
    }
    let descriptor = points.descriptor().clone();
    let source_transform = *points.transform();
    if points.tree().is_empty() {
        points.replace_tree(PointTree::new(), transform, descriptor);
        return Ok(MoveReport::default());
    }

    let deformed = deform_leaves(points, &transform, deformer, filter, threaded)?;
    let mut sources = points.tree_mut().take_leaves();

    let histograms = target_histograms(&deformed, threaded);
    let target_origins: Vec<Coord> = histograms.iter().map(|(origin, _)| *origin).collect();
    let mut targets = parallel::map_indexed(histograms.len(), threaded, |idx| {
        let (origin, counts) = &histograms[idx];
        let total = counts.iter().map(|c| *c as usize).sum();
        PointLeaf::from_counts(
            *origin,
            counts,
            AttributeSet::new_uniform(descriptor.clone(), total),
        )
    });
    drop(histograms);
    tracing::debug!(
        source_leaves = sources.len(),
        target_leaves = targets.len(),
        "built target topology"
    );

    let source_origins: Vec<Coord> = sources.iter().map(PointLeaf::origin).collect();
    let index_maps = LeafIndexMaps::build(&source_origins, &target_origins, threaded);
    let move_maps = MoveMaps::build(&mut sources, &deformed, &index_maps, threaded);
    drop(deformed);
    tracing::debug!(
        global_moves = move_maps.global_count(),
        static_leaves = move_maps.static_count(),
        "built move maps"
    );

    relocate::relocate(
        &mut targets,
        &sources,
        &index_maps.source_indices,
        &move_maps,
        threaded,
    );

    // static leaves are only transplanted once nothing reads from them
    let mut tree = PointTree::new();
    for leaf in targets {
        tree.insert_leaf(leaf);
    }
    for (leaf, is_static) in sources.into_iter().zip(&move_maps.static_leaves) {
        if *is_static {
            tree.insert_leaf(leaf);
        }
    }

    let report = MoveReport {
        moved_leaves: tree.leaf_count() - move_maps.static_count(),
        static_leaves: move_maps.static_count(),
        point_count: tree.point_count(),
    };
    if source_transform != transform {
        tracing::debug!(
            from = source_transform.voxel_size(),
            to = transform.voxel_size(),
            "rebinned points into a new transform"
        );
    }
    points.replace_tree(tree, transform, descriptor);
    tracing::info!(
        points = report.point_count,
        moved_leaves = report.moved_leaves,
        static_leaves = report.static_leaves,
        "moved points"
    );
    Ok(report)
}

/// Index-space target position of every point, per source leaf and point
/// index. Points that are filtered out or sit in inactive voxels are `None`.
fn deform_leaves<D, F>(
    points: &PointDataGrid,
    target: &Transform,
    deformer: &D,
    filter: &F,
    threaded: bool,
) -> PointsResult<Vec<Vec<Option<DVec3>>>>
where
    D: Deformer,
    F: PointFilter,
{
    let source = *points.transform();
    let leaves = points.tree().leaf_list();
    let convert = source != *target;

    parallel::try_map_indexed(leaves.len(), threaded, |idx| {
        let leaf = leaves[idx];
        let mut deformer = deformer.clone();
        deformer.reset(leaf, idx)?;
        let mut filter = filter.clone();
        filter.reset(leaf);

        let mut out = vec![None; leaf.point_count()];
        let Some(positions) = leaf.positions() else {
            return Ok(out);
        };
        for (offset, index) in leaf.iter_points() {
            if !filter.is_all() && !filter.valid(leaf, index) {
                continue;
            }
            let voxel = leaf.voxel_coord(offset);
            let point = PointRef {
                leaf_index: idx,
                index,
                voxel,
            };
            let mut position = voxel.as_dvec3() + positions.get(index);
            if deformer.index_space() {
                deformer.apply(&mut position, point);
                if convert {
                    position = target.world_to_index(source.index_to_world(position));
                }
            } else {
                let mut world = source.index_to_world(position);
                deformer.apply(&mut world, point);
                position = target.world_to_index(world);
            }
            out[index] = Some(position);
        }
        Ok(out)
    })
}

/// Per-voxel point counts of every target leaf, in ascending origin order.
fn target_histograms(deformed: &[Vec<Option<DVec3>>], threaded: bool) -> Vec<(Coord, Vec<u32>)> {
    let partial = parallel::map_indexed(deformed.len(), threaded, |idx| {
        let mut counts: BTreeMap<Coord, Vec<u32>> = BTreeMap::new();
        for position in deformed[idx].iter().flatten() {
            let (voxel, _) = Coord::split_voxel_local(*position);
            counts
                .entry(leaf_origin(voxel))
                .or_insert_with(|| vec![0; SIZE])[coord_to_offset(voxel)] += 1;
        }
        counts
    });

    let mut merged: BTreeMap<Coord, Vec<u32>> = BTreeMap::new();
    for counts in partial {
        for (origin, leaf_counts) in counts {
            match merged.get_mut(&origin) {
                Some(existing) => {
                    for (a, b) in existing.iter_mut().zip(leaf_counts) {
                        *a += b;
                    }
                }
                None => {
                    merged.insert(origin, leaf_counts);
                }
            }
        }
    }
    merged.into_iter().collect()
}

#[cfg(test)]
mod tests;

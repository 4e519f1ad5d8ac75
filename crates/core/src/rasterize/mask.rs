use glam::DVec3;
use rayon::prelude::*;

use crate::math::{CoordBBox, Transform};
use crate::points::{PointLeaf, PointTree};
use crate::progress::CancelGroup;
use crate::tree::{Grid, GridClass, MaskTree, Tree, DIM};

use super::radius::round_to_int;

/// Voxels a surface may touch (`on`) and voxels every point's sphere is
/// guaranteed to cover (`off`).
#[derive(Debug, Default)]
pub(crate) struct SurfaceMask {
    pub on: MaskTree,
    pub off: MaskTree,
}

impl SurfaceMask {
    /// Unions two partial masks, folding the smaller tree into the larger.
    pub fn join(self, other: SurfaceMask) -> SurfaceMask {
        SurfaceMask {
            on: union_into_larger(self.on, other.on),
            off: union_into_larger(self.off, other.off),
        }
    }
}

fn union_into_larger(a: MaskTree, b: MaskTree) -> MaskTree {
    let (mut large, small) = if a.leaf_count() > b.leaf_count() {
        (a, b)
    } else {
        (b, a)
    };
    large.topology_union(&small);
    large
}

/// Distance, in surface voxels, from a point leaf that can be deactivated
/// because any sphere of radius `min_band` in that leaf covers it. Only
/// whole leaf nodes are ever deactivated, so the distance is a multiple of
/// `DIM`; it is negative when nothing can be removed.
fn interior_distance(min_band: f64) -> i32 {
    // half side of the largest cube inscribed in the sphere
    let halfside = (2.0 * min_band / 3.0_f64.sqrt()) / 2.0;
    let min = halfside.max(0.0) as i32;
    let nodes = min / DIM;
    (nodes - 1) * DIM
}

#[derive(Debug, Clone, Copy)]
enum MaskDistance<'a> {
    Fixed {
        activate: i32,
        deactivate: i32,
    },
    Variable {
        min_tree: Option<&'a Tree<f32>>,
        max_tree: &'a Tree<f32>,
        min_scale: f64,
        max_scale: f64,
        halfband: f64,
    },
}

/// Conservative surface topology derived from point leaf bounds alone.
pub(crate) struct SurfaceMaskBuilder<'a> {
    points: &'a Transform,
    surface: &'a Transform,
    clip: CoordBBox,
    distance: MaskDistance<'a>,
}

impl<'a> SurfaceMaskBuilder<'a> {
    /// Uniform radius: `min_band` and `max_band` are surface index-space
    /// distances. `clip` is in point index space.
    pub fn fixed(
        points: &'a Transform,
        surface: &'a Transform,
        min_band: f64,
        max_band: f64,
        clip: Option<CoordBBox>,
    ) -> Self {
        let mut builder = Self {
            points,
            surface,
            clip: CoordBBox::inf(),
            distance: MaskDistance::Fixed {
                activate: round_to_int(max_band),
                deactivate: interior_distance(min_band),
            },
        };
        if let Some(clip) = clip {
            builder.clip = builder.to_surface_bounds(clip);
        }
        builder
    }

    /// Per-leaf radii read from `max_tree` (and `min_tree` when interior
    /// deactivation is wanted) at each point leaf origin.
    #[allow(clippy::too_many_arguments)]
    pub fn variable(
        points: &'a Transform,
        surface: &'a Transform,
        min_tree: Option<&'a Tree<f32>>,
        max_tree: &'a Tree<f32>,
        min_scale: f64,
        max_scale: f64,
        halfband: f64,
        clip: Option<CoordBBox>,
    ) -> Self {
        let mut builder = Self {
            points,
            surface,
            clip: CoordBBox::inf(),
            distance: MaskDistance::Variable {
                min_tree,
                max_tree,
                min_scale,
                max_scale,
                halfband,
            },
        };
        if let Some(clip) = clip {
            builder.clip = builder.to_surface_bounds(clip);
        }
        builder
    }

    pub fn build(&self, tree: &PointTree, cancel: &CancelGroup<'_>, threaded: bool) -> SurfaceMask {
        let leaves = tree.leaf_list();
        let visit = |mut mask: SurfaceMask, leaf: &&PointLeaf| {
            if !cancel.poll() {
                self.visit(&mut mask, leaf);
            }
            mask
        };
        let mask = if threaded {
            leaves
                .par_iter()
                .fold(SurfaceMask::default, visit)
                .reduce(SurfaceMask::default, SurfaceMask::join)
        } else {
            leaves.iter().fold(SurfaceMask::default(), visit)
        };
        tracing::debug!(
            point_leaves = leaves.len(),
            on_leaves = mask.on.leaf_count(),
            on_tiles = mask.on.active_tile_count(),
            off_tiles = mask.off.active_tile_count(),
            "built surface mask"
        );
        mask
    }

    fn visit(&self, mask: &mut SurfaceMask, leaf: &PointLeaf) {
        match self.distance {
            MaskDistance::Fixed {
                activate,
                deactivate,
            } => {
                self.activate(mask, leaf, activate);
                if deactivate >= 0 {
                    self.deactivate(mask, leaf, deactivate);
                }
            }
            MaskDistance::Variable {
                min_tree,
                max_tree,
                min_scale,
                max_scale,
                halfband,
            } => {
                let max = f64::from(max_tree.get_value(leaf.origin()));
                self.activate(mask, leaf, round_to_int(max * max_scale + halfband));
                if let Some(min_tree) = min_tree {
                    let min = f64::from(min_tree.get_value(leaf.origin()));
                    let distance = interior_distance((min * min_scale - halfband).max(0.0));
                    if distance >= 0 {
                        self.deactivate(mask, leaf, distance);
                    }
                }
            }
        }
    }

    fn activate(&self, mask: &mut SurfaceMask, leaf: &PointLeaf, distance: i32) {
        let mut bounds = self.to_surface_bounds(leaf.active_bounding_box());
        if bounds.is_empty() {
            return;
        }
        bounds.expand(distance);
        bounds.intersect(&self.clip);
        mask.on.sparse_fill(bounds, true, true);
    }

    fn deactivate(&self, mask: &mut SurfaceMask, leaf: &PointLeaf, distance: i32) {
        debug_assert_eq!(distance % DIM, 0, "interior distance must be leaf aligned");
        let mut bounds = self.to_surface_bounds(leaf.node_bounding_box());
        bounds.expand(distance);
        mask.off.sparse_fill(bounds, true, true);
    }

    /// Maps point index-space voxel bounds, taken at their outer faces, to
    /// the surface voxels whose centers they contain.
    fn to_surface_bounds(&self, bounds: CoordBBox) -> CoordBBox {
        if bounds.is_empty() {
            return bounds;
        }
        let min = self.points.index_to_world(bounds.min.as_dvec3() - DVec3::splat(0.5));
        let max = self.points.index_to_world(bounds.max.as_dvec3() + DVec3::splat(0.5));
        self.surface.world_bbox_to_index_cell_centered(min, max)
    }
}

/// Creates the level-set grid the kernels write into: active where `on`
/// survives `off`, `-background` where `off` covers inactive space.
pub(crate) fn init_sdf_from_masks(
    transform: Transform,
    background: f32,
    mask: SurfaceMask,
    threaded: bool,
) -> Grid<f32> {
    let SurfaceMask { mut on, off } = mask;
    let mut tree = Tree::new(background);
    if !off.is_empty() {
        on.topology_difference(&off);
        on.prune_inactive();
        tree.topology_union(&on);
        tree.modify_inactive_values(threaded, |coord, value| {
            if off.is_value_on(coord) {
                *value = -*value;
            }
        });
    } else {
        tree.topology_union(&on);
    }
    drop(on);
    drop(off);
    tree.voxelize_active_tiles();

    let mut grid = Grid::new(tree, transform).with_name("surface");
    grid.class = GridClass::LevelSet;
    grid
}

use glam::DVec3;
use rustc_hash::FxHashMap;

use crate::error::{PointsError, PointsResult};
use crate::math::Coord;
use crate::parallel;
use crate::points::{PointDataGrid, PointFilter, PointLeaf};

/// The point a deformer is asked to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointRef {
    /// Position of the leaf in ascending origin order.
    pub leaf_index: usize,
    pub index: usize,
    pub voxel: Coord,
}

/// Computes new point positions. Every leaf task works on its own clone and
/// calls [`Deformer::reset`] before visiting that leaf's points.
pub trait Deformer: Clone + Send + Sync {
    /// Positions are handed to [`Deformer::apply`] in index space of the
    /// source grid when `true`, in world space otherwise.
    fn index_space(&self) -> bool {
        false
    }

    fn reset(&mut self, _leaf: &PointLeaf, _leaf_index: usize) -> PointsResult<()> {
        Ok(())
    }

    fn apply(&self, position: &mut DVec3, point: PointRef);
}

/// Leaves positions untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDeformer;

impl Deformer for NullDeformer {
    fn index_space(&self) -> bool {
        true
    }

    fn apply(&self, _position: &mut DVec3, _point: PointRef) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetDeformer {
    pub offset: DVec3,
    pub index_space: bool,
}

impl OffsetDeformer {
    pub fn world(offset: DVec3) -> Self {
        Self {
            offset,
            index_space: false,
        }
    }

    pub fn index(offset: DVec3) -> Self {
        Self {
            offset,
            index_space: true,
        }
    }
}

impl Deformer for OffsetDeformer {
    fn index_space(&self) -> bool {
        self.index_space
    }

    fn apply(&self, position: &mut DVec3, _point: PointRef) {
        *position += self.offset;
    }
}

/// World-space deformer backed by a closure.
#[derive(Clone)]
pub struct FnDeformer<F>(pub F);

impl<F> Deformer for FnDeformer<F>
where
    F: Fn(&mut DVec3, PointRef) + Clone + Send + Sync,
{
    fn apply(&self, position: &mut DVec3, point: PointRef) {
        (self.0)(position, point)
    }
}

/// World positions of one leaf. Dense when every point was evaluated,
/// keyed by point index otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedLeaf {
    pub vec_data: Vec<DVec3>,
    pub map_data: FxHashMap<u32, DVec3>,
    pub total_size: usize,
}

impl CachedLeaf {
    fn clear(&mut self) {
        self.vec_data.clear();
        self.map_data.clear();
        self.total_size = 0;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeformerCache {
    pub leaves: Vec<CachedLeaf>,
}

impl DeformerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `deformer` over the points of `grid` accepted by `filter` and
    /// stores the resulting world positions per leaf.
    pub fn evaluate<D, F>(
        &mut self,
        grid: &PointDataGrid,
        deformer: &D,
        filter: &F,
        threaded: bool,
    ) -> PointsResult<()>
    where
        D: Deformer,
        F: PointFilter,
    {
        let leaves = grid.tree().leaf_list();
        self.leaves.resize_with(leaves.len(), CachedLeaf::default);
        let transform = *grid.transform();

        parallel::try_for_each_indexed_mut(&mut self.leaves, threaded, |idx, cache| {
            cache.clear();
            let leaf = leaves[idx];
            let total = leaf.point_count();
            if total == 0 {
                return Ok(());
            }
            let mut deformer = deformer.clone();
            deformer.reset(leaf, idx)?;
            let mut filter = filter.clone();
            filter.reset(leaf);
            let Some(positions) = leaf.positions() else {
                return Ok(());
            };

            let on_count: usize = leaf
                .mask()
                .iter_on()
                .map(|offset| leaf.voxel_range(offset).len())
                .sum();
            let use_vector = filter.is_all() && on_count == total;
            if use_vector {
                cache.vec_data.resize(total, DVec3::ZERO);
            }

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
                    position = transform.index_to_world(position);
                } else {
                    position = transform.index_to_world(position);
                    deformer.apply(&mut position, point);
                }
                if use_vector {
                    cache.vec_data[index] = position;
                } else {
                    cache.map_data.insert(index as u32, position);
                }
            }
            if !cache.map_data.is_empty() {
                cache.total_size = total;
            }
            Ok(())
        })?;

        tracing::debug!(leaves = self.leaves.len(), "cached deformed positions");
        Ok(())
    }
}

/// Replays positions stored in a [`DeformerCache`]. Points missing from the
/// cache keep their position.
#[derive(Debug, Clone)]
pub struct CachedDeformer<'a> {
    cache: &'a DeformerCache,
    leaf: Option<&'a CachedLeaf>,
}

impl<'a> CachedDeformer<'a> {
    pub fn new(cache: &'a DeformerCache) -> Self {
        Self { cache, leaf: None }
    }
}

impl Deformer for CachedDeformer<'_> {
    fn reset(&mut self, _leaf: &PointLeaf, leaf_index: usize) -> PointsResult<()> {
        let len = self.cache.leaves.len();
        if len == 0 {
            return Err(PointsError::EmptyCache);
        }
        let leaf = self
            .cache
            .leaves
            .get(leaf_index)
            .ok_or(PointsError::CacheIndexOutOfRange {
                index: leaf_index,
                len,
            })?;
        self.leaf = Some(leaf);
        Ok(())
    }

    fn apply(&self, position: &mut DVec3, point: PointRef) {
        let Some(leaf) = self.leaf else {
            return;
        };
        let cached = if leaf.map_data.is_empty() {
            leaf.vec_data.get(point.index)
        } else {
            leaf.map_data.get(&(point.index as u32))
        };
        if let Some(cached) = cached {
            *position = *cached;
        }
    }
}

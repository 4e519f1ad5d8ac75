use glam::DVec3;
use rustc_hash::FxHashMap;

use crate::attributes::AttributeArray;
use crate::math::Coord;
use crate::paged_array::{PagedArray, ValueBuffer};
use crate::parallel;
use crate::points::PointLeaf;
use crate::tree::{coord_to_offset, leaf_origin};

/// Leaf index used when a target leaf has no source leaf at its origin.
pub(crate) const NO_SOURCE: u32 = u32::MAX;

/// Origin lookups between the source and target leaf orders.
#[derive(Debug, Clone, Default)]
pub(crate) struct LeafIndexMaps {
    pub target_leaf_map: FxHashMap<Coord, u32>,
    /// Source leaf index per target leaf, [`NO_SOURCE`] when absent.
    pub source_indices: Vec<u32>,
}

fn origin_map(origins: &[Coord]) -> FxHashMap<Coord, u32> {
    let mut map = FxHashMap::default();
    map.reserve(origins.len());
    for (idx, origin) in origins.iter().enumerate() {
        map.insert(*origin, idx as u32);
    }
    map
}

impl LeafIndexMaps {
    pub fn build(source: &[Coord], target: &[Coord], threaded: bool) -> Self {
        let (source_map, target_leaf_map) =
            parallel::join(threaded, || origin_map(source), || origin_map(target));
        let source_indices = parallel::map_indexed(target.len(), threaded, |idx| {
            source_map.get(&target[idx]).copied().unwrap_or(NO_SOURCE)
        });
        Self {
            target_leaf_map,
            source_indices,
        }
    }
}

/// A point leaving its source leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GlobalMove {
    pub source_leaf: u32,
    pub target_offset: u32,
    pub source_index: u32,
}

/// A point staying inside the leaf it came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LocalMove {
    pub target_offset: u32,
    pub source_index: u32,
}

pub(crate) struct MoveMaps {
    /// Incoming cross-leaf moves per target leaf, sorted by
    /// (source leaf, source index) once built.
    pub global: Vec<Vec<GlobalMove>>,
    pub local: Vec<Vec<LocalMove>>,
    /// Per source leaf: no point changed voxel, left or entered the leaf.
    pub static_leaves: Vec<bool>,
}

impl MoveMaps {
    /// Records where every deformed point goes and writes its new in-voxel
    /// residual into the source position column. `targets[leaf][index]` is
    /// the index-space target position, `None` for deleted points.
    pub fn build(
        sources: &mut [PointLeaf],
        targets: &[Vec<Option<DVec3>>],
        maps: &LeafIndexMaps,
        threaded: bool,
    ) -> Self {
        let target_count = maps.source_indices.len();
        let mut global_pages: Vec<PagedArray<GlobalMove>> =
            (0..target_count).map(|_| PagedArray::new()).collect();

        let per_source = parallel::map_indexed_mut(sources, threaded, |idx, leaf| {
            let origin = leaf.origin();
            let local_target = maps.target_leaf_map.get(&origin).copied();
            let mut local = Vec::new();
            let mut buffers: FxHashMap<u32, ValueBuffer<'_, GlobalMove, 10>> =
                FxHashMap::default();
            let mut residuals = Vec::with_capacity(leaf.point_count());
            let mut is_static = true;

            for (offset, index) in leaf.iter_points() {
                let Some(position) = targets[idx].get(index).copied().flatten() else {
                    is_static = false;
                    continue;
                };
                let (voxel, residual) = Coord::split_voxel_local(position);
                residuals.push((index, residual));

                let target_offset = coord_to_offset(voxel) as u32;
                let target_origin = leaf_origin(voxel);
                if target_origin == origin {
                    local.push(LocalMove {
                        target_offset,
                        source_index: index as u32,
                    });
                    is_static &= voxel == leaf.voxel_coord(offset);
                } else {
                    let Some(&target) = maps.target_leaf_map.get(&target_origin) else {
                        debug_assert!(false, "target topology is missing leaf {target_origin:?}");
                        continue;
                    };
                    buffers
                        .entry(target)
                        .or_insert_with(|| global_pages[target as usize].buffer())
                        .push(GlobalMove {
                            source_leaf: idx as u32,
                            target_offset,
                            source_index: index as u32,
                        });
                    is_static = false;
                }
            }
            // flush staged records before the pages are read
            drop(buffers);

            let position_index = leaf.attributes().descriptor().position_index();
            if let Some(array) = position_index
                .and_then(|p| leaf.attributes_mut().get_mut(p))
                .and_then(AttributeArray::vec3_mut)
            {
                for (index, residual) in residuals {
                    array[index] = residual;
                }
            }
            (is_static, local_target.map(|target| (target, local)))
        });

        let mut local = vec![Vec::new(); target_count];
        let mut static_leaves = Vec::with_capacity(per_source.len());
        for (is_static, moves) in per_source {
            static_leaves.push(is_static);
            if let Some((target, moves)) = moves {
                local[target as usize] = moves;
            }
        }

        let global: Vec<Vec<GlobalMove>> =
            parallel::map_indexed_mut(&mut global_pages, threaded, |_, pages| {
                pages.sort_by(|a, b| {
                    (a.source_leaf, a.source_index).cmp(&(b.source_leaf, b.source_index))
                });
                pages.to_vec()
            });

        // a provisionally static leaf stops being static once anything moves in
        for (idx, leaf) in sources.iter().enumerate() {
            if !static_leaves[idx] {
                continue;
            }
            let Some(&target) = maps.target_leaf_map.get(&leaf.origin()) else {
                continue;
            };
            if global[target as usize].is_empty() {
                local[target as usize].clear();
            } else {
                static_leaves[idx] = false;
            }
        }

        Self {
            global,
            local,
            static_leaves,
        }
    }

    pub fn static_count(&self) -> usize {
        self.static_leaves.iter().filter(|s| **s).count()
    }

    pub fn global_count(&self) -> usize {
        self.global.iter().map(Vec::len).sum()
    }
}

use std::sync::Arc;

use crate::attributes::{AttributeDescriptor, AttributeSet};
use crate::error::PointsResult;
use crate::parallel;
use crate::points_move::{move_points_to, NullDeformer};
use crate::tree::SIZE;

use super::{NullFilter, PointDataGrid, PointLeaf};

impl PointDataGrid {
    /// Moves every point of `other` into `self`, leaving `other` empty.
    ///
    /// The descriptors are unioned, so columns missing on either side are
    /// filled with their defaults. Within a shared voxel the points of `self`
    /// come first. When the transforms differ, `other` is first rebinned into
    /// the transform of `self`.
    pub fn merge_points(&mut self, other: &mut PointDataGrid, threaded: bool) -> PointsResult<usize> {
        let incoming = other.point_count();
        let descriptor = Arc::new(self.descriptor().union(other.descriptor())?);
        for leaf in self.tree.leaves_mut() {
            leaf.attributes_mut().widen(descriptor.clone());
        }
        if incoming == 0 {
            other.tree.take_leaves();
            self.descriptor = descriptor;
            return Ok(0);
        }
        if other.transform() != self.transform() {
            move_points_to(other, *self.transform(), &NullDeformer, &NullFilter, threaded)?;
        }

        let mut pairs = Vec::new();
        for mut leaf in other.tree.take_leaves() {
            leaf.attributes_mut().widen(descriptor.clone());
            match self.tree.steal_leaf(leaf.origin()) {
                Some(existing) => pairs.push((existing, leaf)),
                None => {
                    self.tree.insert_leaf(leaf);
                }
            }
        }
        tracing::debug!(
            shared_leaves = pairs.len(),
            points = incoming,
            "merging point leaves"
        );

        let merged = parallel::map_indexed(pairs.len(), threaded, |i| {
            let (a, b) = &pairs[i];
            merge_leaf(a, b, &descriptor)
        });
        for leaf in merged {
            self.tree.insert_leaf(leaf);
        }

        self.descriptor = descriptor;

        tracing::info!(
            merged = incoming,
            total = self.point_count(),
            "merged point data grids"
        );
        Ok(incoming)
    }
}

/// Interleaves two leaves voxel by voxel, `a` before `b`.
fn merge_leaf(a: &PointLeaf, b: &PointLeaf, descriptor: &Arc<AttributeDescriptor>) -> PointLeaf {
    let total = a.point_count() + b.point_count();
    let mut counts = vec![0u32; SIZE];
    let mut from_a = Vec::with_capacity(a.point_count());
    let mut from_b = Vec::with_capacity(b.point_count());
    let mut next = 0usize;
    for (offset, count) in counts.iter_mut().enumerate() {
        for index in a.voxel_range(offset) {
            from_a.push((index as usize, next));
            next += 1;
        }
        for index in b.voxel_range(offset) {
            from_b.push((index as usize, next));
            next += 1;
        }
        *count = (a.voxel_range(offset).len() + b.voxel_range(offset).len()) as u32;
    }

    let mut attributes = AttributeSet::new_uniform(descriptor.clone(), total);
    let sources = a.attributes().arrays().iter().zip(b.attributes().arrays());
    for (target, (source_a, source_b)) in attributes.arrays_mut().iter_mut().zip(sources) {
        target.copy_values(source_a, from_a.iter().copied());
        target.copy_values(source_b, from_b.iter().copied());
    }
    PointLeaf::from_counts(a.origin(), &counts, attributes)
}

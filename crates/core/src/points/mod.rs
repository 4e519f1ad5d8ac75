//! Point data stored in a sparse tree: each leaf keeps a cumulative
//! per-voxel offset table plus the attribute columns of the points that
//! live inside it. Positions are stored voxel-local in `[-0.5, 0.5)`.

mod filter;
mod merge;
mod minmax;

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use glam::DVec3;

use crate::attributes::{
    AttributeArray, AttributeDescriptor, AttributeInfo, AttributeSet, AttributeStorage,
    AttributeType, POSITION,
};
use crate::error::{PointsError, PointsResult};
use crate::math::{Coord, CoordBBox, Transform};
use crate::parallel;
use crate::tree::{coord_to_offset, leaf_origin, LeafNode, ValueMask, SIZE};

pub use filter::{AttributeThresholdFilter, FnFilter, NullFilter, PointFilter};
pub use minmax::{eval_min_max, MinMax};

#[derive(Debug, Clone, PartialEq)]
pub struct PointLeaf {
    // values are cumulative end offsets, the mask marks occupied voxels
    node: LeafNode<u32>,
    attributes: AttributeSet,
}

impl PointLeaf {
    /// Builds a leaf from per-voxel point counts. `attributes` must already
    /// hold the points in voxel order.
    pub fn from_counts(origin: Coord, counts: &[u32], attributes: AttributeSet) -> Self {
        debug_assert_eq!(counts.len(), SIZE, "point leaf counts must cover every voxel");
        let mut mask = ValueMask::default();
        let mut node = LeafNode::with_mask(origin, 0u32, ValueMask::default());
        let mut end = 0u32;
        for (offset, count) in counts.iter().enumerate() {
            end += count;
            node.set_value_only(offset, end);
            if *count > 0 {
                mask.set_on(offset);
            }
        }
        *node.mask_mut() = mask;
        debug_assert_eq!(
            end as usize,
            attributes.len(),
            "point leaf offsets disagree with its attribute length"
        );
        Self { node, attributes }
    }

    pub fn origin(&self) -> Coord {
        self.node.origin()
    }

    pub fn offsets(&self) -> &[u32] {
        self.node.values()
    }

    pub fn mask(&self) -> &ValueMask {
        self.node.mask()
    }

    pub fn point_count(&self) -> usize {
        self.node.values().last().copied().unwrap_or(0) as usize
    }

    pub fn voxel_range(&self, offset: usize) -> Range<u32> {
        let start = if offset == 0 {
            0
        } else {
            self.node.get_value(offset - 1)
        };
        start..self.node.get_value(offset)
    }

    pub fn voxel_coord(&self, offset: usize) -> Coord {
        self.node.offset_to_global_coord(offset)
    }

    /// `(voxel offset, point index)` for the points of active voxels.
    pub fn iter_points(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.node.mask().iter_on().flat_map(move |offset| {
            self.voxel_range(offset)
                .map(move |index| (offset, index as usize))
        })
    }

    /// Every point in storage order, active voxel or not.
    pub fn iter_points_all(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..SIZE).flat_map(move |offset| {
            self.voxel_range(offset)
                .map(move |index| (offset, index as usize))
        })
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeSet {
        &mut self.attributes
    }

    pub fn positions(&self) -> Option<PositionHandle<'_>> {
        let index = self.attributes.descriptor().position_index()?;
        let array = self.attributes.get(index)?;
        (array.data_type() == AttributeType::Vec3).then_some(PositionHandle { array })
    }

    /// Voxel-local position of `index`, zero when the leaf has no position
    /// column.
    pub fn position(&self, index: usize) -> DVec3 {
        self.positions()
            .map(|handle| handle.get(index))
            .unwrap_or(DVec3::ZERO)
    }

    pub fn node_bounding_box(&self) -> CoordBBox {
        self.node.node_bounding_box()
    }

    pub fn active_bounding_box(&self) -> CoordBBox {
        self.node.active_bounding_box()
    }
}

/// Read access to the voxel-local positions of one leaf.
#[derive(Debug, Clone, Copy)]
pub struct PositionHandle<'a> {
    array: &'a AttributeArray,
}

impl PositionHandle<'_> {
    pub fn get(&self, index: usize) -> DVec3 {
        let p = self.array.vec3(index).unwrap_or([0.0; 3]);
        DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointTree {
    leaves: BTreeMap<Coord, PointLeaf>,
}

impl PointTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Leaves in ascending origin order.
    pub fn leaves(&self) -> impl Iterator<Item = &PointLeaf> {
        self.leaves.values()
    }

    pub fn leaves_mut(&mut self) -> impl Iterator<Item = &mut PointLeaf> {
        self.leaves.values_mut()
    }

    pub fn leaf_list(&self) -> Vec<&PointLeaf> {
        self.leaves.values().collect()
    }

    pub fn probe_leaf(&self, c: Coord) -> Option<&PointLeaf> {
        self.leaves.get(&leaf_origin(c))
    }

    pub fn probe_leaf_mut(&mut self, c: Coord) -> Option<&mut PointLeaf> {
        self.leaves.get_mut(&leaf_origin(c))
    }

    pub fn insert_leaf(&mut self, leaf: PointLeaf) -> Option<PointLeaf> {
        self.leaves.insert(leaf.origin(), leaf)
    }

    pub fn steal_leaf(&mut self, c: Coord) -> Option<PointLeaf> {
        self.leaves.remove(&leaf_origin(c))
    }

    pub fn take_leaves(&mut self) -> Vec<PointLeaf> {
        std::mem::take(&mut self.leaves).into_values().collect()
    }

    pub fn point_count(&self) -> usize {
        self.leaves.values().map(PointLeaf::point_count).sum()
    }

    pub fn eval_leaf_bounding_box(&self) -> CoordBBox {
        let mut bbox = CoordBBox::empty();
        for leaf in self.leaves.values() {
            bbox.union(&leaf.node_bounding_box());
        }
        bbox
    }

    pub fn eval_active_bounding_box(&self) -> CoordBBox {
        let mut bbox = CoordBBox::empty();
        for leaf in self.leaves.values() {
            bbox.union(&leaf.active_bounding_box());
        }
        bbox
    }
}

/// Positions plus named columns used to build a [`PointDataGrid`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub positions: Vec<DVec3>,
    pub attributes: Vec<(AttributeInfo, AttributeStorage)>,
}

impl PointCloud {
    pub fn new(positions: Vec<DVec3>) -> Self {
        Self {
            positions,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, info: AttributeInfo, values: AttributeStorage) -> Self {
        self.attributes.push((info, values));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointDataGrid {
    name: String,
    tree: PointTree,
    transform: Transform,
    descriptor: Arc<AttributeDescriptor>,
}

impl PointDataGrid {
    pub fn empty(transform: Transform) -> Self {
        Self {
            name: String::new(),
            tree: PointTree::new(),
            transform,
            descriptor: Arc::new(AttributeDescriptor::with_position()),
        }
    }

    pub fn from_positions(positions: &[DVec3], transform: Transform) -> PointsResult<Self> {
        Self::from_cloud(&PointCloud::new(positions.to_vec()), transform)
    }

    /// Buckets points into leaves and voxels. Points sharing a voxel keep
    /// their input order.
    pub fn from_cloud(cloud: &PointCloud, transform: Transform) -> PointsResult<Self> {
        if !transform.is_valid() {
            return Err(PointsError::InvalidSettings(format!(
                "voxel size {} is not a positive finite value",
                transform.voxel_size()
            )));
        }
        if let Some(index) = cloud.positions.iter().position(|p| !p.is_finite()) {
            return Err(PointsError::InvalidSettings(format!(
                "point {index} has a non-finite position"
            )));
        }

        let count = cloud.positions.len();
        let mut descriptor = AttributeDescriptor::with_position();
        for (info, values) in &cloud.attributes {
            if values.data_type() != info.data_type {
                return Err(PointsError::AttributeType {
                    name: info.name.clone(),
                    expected: info.data_type,
                    actual: values.data_type(),
                });
            }
            descriptor = descriptor.with_attribute(info.clone())?;
            if values.len() != count * info.stride {
                return Err(PointsError::LengthMismatch {
                    name: info.name.clone(),
                    expected: count * info.stride,
                    actual: values.len(),
                });
            }
        }
        let descriptor = Arc::new(descriptor);

        let placed: Vec<(Coord, [f32; 3])> = parallel::map_indexed(count, true, |i| {
            Coord::split_voxel_local(transform.world_to_index(cloud.positions[i]))
        });

        let mut buckets: BTreeMap<Coord, Vec<usize>> = BTreeMap::new();
        for (i, (voxel, _)) in placed.iter().enumerate() {
            buckets.entry(leaf_origin(*voxel)).or_default().push(i);
        }
        let buckets: Vec<(Coord, Vec<usize>)> = buckets.into_iter().collect();

        let leaves = parallel::try_map_indexed(buckets.len(), true, |b| {
            let (origin, indices) = &buckets[b];
            let mut order: Vec<(usize, usize)> = indices
                .iter()
                .map(|&i| (coord_to_offset(placed[i].0), i))
                .collect();
            // stable: points sharing a voxel stay in input order
            order.sort_by_key(|(offset, _)| *offset);

            let mut counts = vec![0u32; SIZE];
            for (offset, _) in &order {
                counts[*offset] += 1;
            }
            let sorted: Vec<usize> = order.iter().map(|(_, i)| *i).collect();

            let mut arrays = Vec::with_capacity(descriptor.len());
            arrays.push(AttributeArray::from_storage(
                AttributeStorage::Vec3(sorted.iter().map(|&i| placed[i].1).collect()),
                1,
            )?);
            for (info, values) in &cloud.attributes {
                arrays.push(AttributeArray::from_storage(
                    values.gather(info.stride, &sorted),
                    info.stride,
                )?);
            }
            let attributes = AttributeSet::from_arrays(descriptor.clone(), arrays)?;
            Ok::<_, PointsError>(PointLeaf::from_counts(*origin, &counts, attributes))
        })?;

        let mut tree = PointTree::new();
        for leaf in leaves {
            tree.insert_leaf(leaf);
        }
        tracing::debug!(
            points = count,
            leaves = tree.leaf_count(),
            "built point data grid"
        );
        Ok(Self {
            name: String::new(),
            tree,
            transform,
            descriptor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn tree(&self) -> &PointTree {
        &self.tree
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn descriptor(&self) -> &Arc<AttributeDescriptor> {
        &self.descriptor
    }

    pub fn point_count(&self) -> usize {
        self.tree.point_count()
    }

    pub fn leaf_count(&self) -> usize {
        self.tree.leaf_count()
    }

    pub(crate) fn tree_mut(&mut self) -> &mut PointTree {
        &mut self.tree
    }

    /// Installs a rebuilt tree. Every leaf must share `descriptor`.
    pub(crate) fn replace_tree(
        &mut self,
        tree: PointTree,
        transform: Transform,
        descriptor: Arc<AttributeDescriptor>,
    ) {
        self.tree = tree;
        self.transform = transform;
        self.descriptor = descriptor;
    }

    /// Adds a column filled with `info.default` on every leaf.
    pub fn append_attribute(&mut self, info: AttributeInfo) -> PointsResult<()> {
        let descriptor = Arc::new(self.descriptor.with_attribute(info)?);
        for leaf in self.tree.leaves_mut() {
            leaf.attributes.widen(descriptor.clone());
        }
        self.descriptor = descriptor;
        Ok(())
    }

    /// Overwrites a column with `values` given in traversal order.
    pub fn set_attribute_values(&mut self, name: &str, values: AttributeStorage) -> PointsResult<()> {
        if name == POSITION {
            return Err(PointsError::Unsupported(
                "positions are stored voxel-local, rebuild the grid to change them".to_string(),
            ));
        }
        let index = self
            .descriptor
            .find(name)
            .ok_or_else(|| PointsError::MissingAttribute {
                name: name.to_string(),
            })?;
        let info = self
            .descriptor
            .get(index)
            .ok_or_else(|| PointsError::MissingAttribute {
                name: name.to_string(),
            })?;
        if values.data_type() != info.data_type {
            return Err(PointsError::AttributeType {
                name: name.to_string(),
                expected: info.data_type,
                actual: values.data_type(),
            });
        }
        let stride = info.stride;
        let expected = self.point_count() * stride;
        if values.len() != expected {
            return Err(PointsError::LengthMismatch {
                name: name.to_string(),
                expected,
                actual: values.len(),
            });
        }

        let mut cursor = 0;
        for leaf in self.tree.leaves_mut() {
            let end = cursor + leaf.point_count() * stride;
            let array = AttributeArray::from_storage(values.slice(cursor..end), stride)?;
            leaf.attributes.replace(index, array)?;
            cursor = end;
        }
        Ok(())
    }

    /// Concatenated column values in traversal order.
    pub fn attribute_values(&self, name: &str) -> PointsResult<AttributeStorage> {
        let info = self
            .descriptor
            .find(name)
            .and_then(|index| self.descriptor.get(index))
            .ok_or_else(|| PointsError::MissingAttribute {
                name: name.to_string(),
            })?;
        let mut out = AttributeStorage::empty(info.data_type);
        for leaf in self.tree.leaves() {
            if let Some(array) = leaf.attributes.find(name) {
                out.append(&array.to_expanded_storage());
            }
        }
        Ok(out)
    }

    /// World-space positions in traversal order.
    pub fn world_positions(&self) -> Vec<DVec3> {
        let mut out = Vec::with_capacity(self.point_count());
        for leaf in self.tree.leaves() {
            let Some(positions) = leaf.positions() else {
                continue;
            };
            for (offset, index) in leaf.iter_points_all() {
                let ijk = leaf.voxel_coord(offset).as_dvec3() + positions.get(index);
                out.push(self.transform.index_to_world(ijk));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests;

//! Sparse voxel tree: a single level of leaf-sized nodes keyed by origin.
//! Each slot is either a dense [`LeafNode`] or a constant tile.

mod grid;
mod leaf;

use std::collections::BTreeMap;
use std::fmt;

pub use grid::{AnyGrid, Grid, GridClass};
pub use leaf::{
    coord_to_offset, leaf_origin, offset_to_local_coord, LeafNode, OnIter, ValueMask, DIM,
    LOG2DIM, SIZE,
};

use crate::math::{Coord, CoordBBox};
use crate::parallel;

pub trait TreeValue: Copy + Default + PartialEq + Send + Sync + fmt::Debug + 'static {}

impl<T> TreeValue for T where T: Copy + Default + PartialEq + Send + Sync + fmt::Debug + 'static {}

#[derive(Debug, Clone, PartialEq)]
pub enum Node<T> {
    Leaf(Box<LeafNode<T>>),
    Tile { value: T, active: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree<T> {
    background: T,
    nodes: BTreeMap<Coord, Node<T>>,
}

pub type MaskTree = Tree<bool>;

impl<T: TreeValue> Default for Tree<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: TreeValue> Tree<T> {
    pub fn new(background: T) -> Self {
        Self {
            background,
            nodes: BTreeMap::new(),
        }
    }

    pub fn background(&self) -> T {
        self.background
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    pub fn active_tile_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|node| matches!(node, Node::Tile { active: true, .. }))
            .count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&Coord, &Node<T>)> {
        self.nodes.iter()
    }

    /// Leaves in ascending origin order.
    pub fn leaves(&self) -> impl Iterator<Item = &LeafNode<T>> {
        self.nodes.values().filter_map(|node| match node {
            Node::Leaf(leaf) => Some(leaf.as_ref()),
            Node::Tile { .. } => None,
        })
    }

    pub fn leaves_mut(&mut self) -> impl Iterator<Item = &mut LeafNode<T>> {
        self.nodes.values_mut().filter_map(|node| match node {
            Node::Leaf(leaf) => Some(leaf.as_mut()),
            Node::Tile { .. } => None,
        })
    }

    pub fn probe_leaf(&self, c: Coord) -> Option<&LeafNode<T>> {
        match self.nodes.get(&leaf_origin(c)) {
            Some(Node::Leaf(leaf)) => Some(leaf.as_ref()),
            _ => None,
        }
    }

    pub fn probe_leaf_mut(&mut self, c: Coord) -> Option<&mut LeafNode<T>> {
        match self.nodes.get_mut(&leaf_origin(c)) {
            Some(Node::Leaf(leaf)) => Some(leaf.as_mut()),
            _ => None,
        }
    }

    /// Returns the leaf containing `c`, densifying a tile or creating an
    /// inactive background leaf when needed.
    pub fn touch_leaf(&mut self, c: Coord) -> &mut LeafNode<T> {
        let origin = leaf_origin(c);
        let background = self.background;
        let node = self.nodes.entry(origin).or_insert(Node::Tile {
            value: background,
            active: false,
        });
        if let Node::Tile { value, active } = *node {
            *node = Node::Leaf(Box::new(LeafNode::new(origin, value, active)));
        }
        match node {
            Node::Leaf(leaf) => leaf.as_mut(),
            Node::Tile { .. } => unreachable!("tile was replaced by a leaf"),
        }
    }

    /// Inserts `leaf`, replacing whatever occupied its slot.
    pub fn add_leaf(&mut self, leaf: Box<LeafNode<T>>) -> Option<Node<T>> {
        self.nodes.insert(leaf.origin(), Node::Leaf(leaf))
    }

    pub fn add_tile(&mut self, origin: Coord, value: T, active: bool) -> Option<Node<T>> {
        self.nodes
            .insert(leaf_origin(origin), Node::Tile { value, active })
    }

    /// Takes ownership of the leaf containing `c`. The slot is emptied.
    pub fn steal_leaf(&mut self, c: Coord) -> Option<Box<LeafNode<T>>> {
        let origin = leaf_origin(c);
        if !matches!(self.nodes.get(&origin), Some(Node::Leaf(_))) {
            return None;
        }
        match self.nodes.remove(&origin) {
            Some(Node::Leaf(leaf)) => Some(leaf),
            _ => None,
        }
    }

    pub fn probe_value(&self, c: Coord) -> (T, bool) {
        match self.nodes.get(&leaf_origin(c)) {
            Some(Node::Leaf(leaf)) => {
                let offset = coord_to_offset(c);
                (leaf.get_value(offset), leaf.is_value_on(offset))
            }
            Some(Node::Tile { value, active }) => (*value, *active),
            None => (self.background, false),
        }
    }

    pub fn get_value(&self, c: Coord) -> T {
        self.probe_value(c).0
    }

    pub fn is_value_on(&self, c: Coord) -> bool {
        self.probe_value(c).1
    }

    pub fn set_value_on(&mut self, c: Coord, value: T) {
        self.touch_leaf(c).set_value_on(coord_to_offset(c), value);
    }

    pub fn set_value_off(&mut self, c: Coord, value: T) {
        self.touch_leaf(c).set_value_off(coord_to_offset(c), value);
    }

    pub fn set_active_state(&mut self, c: Coord, on: bool) {
        if self.is_value_on(c) == on {
            return;
        }
        self.touch_leaf(c).set_active_state(coord_to_offset(c), on);
    }

    /// Sets every voxel of `bbox`. Leaf regions fully covered become tiles,
    /// partially covered regions are written voxel by voxel.
    pub fn sparse_fill(&mut self, bbox: CoordBBox, value: T, active: bool) {
        if bbox.is_empty() {
            return;
        }
        let lo = leaf_origin(bbox.min);
        let hi = leaf_origin(bbox.max);
        for x in (lo.x..=hi.x).step_by(DIM as usize) {
            for y in (lo.y..=hi.y).step_by(DIM as usize) {
                for z in (lo.z..=hi.z).step_by(DIM as usize) {
                    let origin = Coord::new(x, y, z);
                    let node_box = CoordBBox::cube(origin, DIM);
                    if bbox.contains_bbox(&node_box) {
                        self.nodes.insert(origin, Node::Tile { value, active });
                        continue;
                    }
                    let mut clip = node_box;
                    clip.intersect(&bbox);
                    let leaf = self.touch_leaf(origin);
                    clip.for_each_coord(|c| {
                        let offset = coord_to_offset(c);
                        leaf.set_value_only(offset, value);
                        leaf.set_active_state(offset, active);
                    });
                }
            }
        }
    }

    /// Activates every voxel active in `other` without changing values held
    /// by `self`. Inactive tiles of `other` become inactive background tiles
    /// in empty slots of `self`.
    pub fn topology_union<U: TreeValue>(&mut self, other: &Tree<U>) {
        let background = self.background;
        for (origin, node) in &other.nodes {
            match node {
                Node::Leaf(other_leaf) => {
                    if matches!(self.nodes.get(origin), Some(Node::Tile { active: true, .. })) {
                        continue;
                    }
                    self.touch_leaf(*origin)
                        .mask_mut()
                        .union_with(other_leaf.mask());
                }
                Node::Tile { active: true, .. } => match self.nodes.get_mut(origin) {
                    Some(Node::Leaf(leaf)) => leaf.mask_mut().fill(true),
                    Some(Node::Tile { active, .. }) => *active = true,
                    None => {
                        self.nodes.insert(
                            *origin,
                            Node::Tile {
                                value: background,
                                active: true,
                            },
                        );
                    }
                },
                Node::Tile { active: false, .. } => {
                    self.nodes.entry(*origin).or_insert(Node::Tile {
                        value: background,
                        active: false,
                    });
                }
            }
        }
    }

    /// Deactivates every voxel of `self` that is active in `other`.
    pub fn topology_difference<U: TreeValue>(&mut self, other: &Tree<U>) {
        for (origin, node) in &other.nodes {
            match node {
                Node::Leaf(other_leaf) => match self.nodes.get_mut(origin) {
                    Some(Node::Leaf(leaf)) => leaf.mask_mut().difference_with(other_leaf.mask()),
                    Some(node) => {
                        if let Node::Tile {
                            value,
                            active: true,
                        } = *node
                        {
                            let mut leaf = LeafNode::new(*origin, value, true);
                            leaf.mask_mut().difference_with(other_leaf.mask());
                            *node = Node::Leaf(Box::new(leaf));
                        }
                    }
                    None => {}
                },
                Node::Tile { active: true, .. } => match self.nodes.get_mut(origin) {
                    Some(Node::Leaf(leaf)) => leaf.mask_mut().fill(false),
                    Some(Node::Tile { active, .. }) => *active = false,
                    None => {}
                },
                Node::Tile { active: false, .. } => {}
            }
        }
    }

    /// Applies `f` to every inactive value stored in the tree: inactive
    /// voxels of leaves and inactive tiles (addressed by tile origin).
    pub fn modify_inactive_values<F>(&mut self, threaded: bool, f: F)
    where
        F: Fn(Coord, &mut T) + Sync + Send,
    {
        let mut nodes: Vec<(&Coord, &mut Node<T>)> = self.nodes.iter_mut().collect();
        parallel::for_each_indexed_mut(&mut nodes, threaded, |_, (origin, node)| match node {
            Node::Leaf(leaf) => {
                let (values, mask) = leaf.buffers_mut();
                for (offset, value) in values.iter_mut().enumerate() {
                    if !mask.is_on(offset) {
                        f(**origin + offset_to_local_coord(offset), value);
                    }
                }
            }
            Node::Tile {
                value,
                active: false,
            } => f(**origin, value),
            Node::Tile { active: true, .. } => {}
        });
    }

    /// Applies `f` to every active value: active voxels of leaves and active
    /// tiles (addressed by tile origin).
    pub fn modify_active_values<F>(&mut self, threaded: bool, f: F)
    where
        F: Fn(Coord, &mut T) + Sync + Send,
    {
        let mut nodes: Vec<(&Coord, &mut Node<T>)> = self.nodes.iter_mut().collect();
        parallel::for_each_indexed_mut(&mut nodes, threaded, |_, (origin, node)| match node {
            Node::Leaf(leaf) => {
                let (values, mask) = leaf.buffers_mut();
                for offset in mask.iter_on() {
                    f(**origin + offset_to_local_coord(offset), &mut values[offset]);
                }
            }
            Node::Tile {
                value,
                active: true,
            } => f(**origin, value),
            Node::Tile { active: false, .. } => {}
        });
    }

    /// Replaces every active tile with a fully active leaf of the tile value.
    pub fn voxelize_active_tiles(&mut self) {
        for (origin, node) in self.nodes.iter_mut() {
            if let Node::Tile {
                value,
                active: true,
            } = *node
            {
                *node = Node::Leaf(Box::new(LeafNode::new(*origin, value, true)));
            }
        }
    }

    /// Collapses leaves with no active voxels into inactive background tiles.
    pub fn prune_inactive(&mut self) {
        let background = self.background;
        for node in self.nodes.values_mut() {
            if let Node::Leaf(leaf) = node {
                if leaf.mask().is_all_off() {
                    *node = Node::Tile {
                        value: background,
                        active: false,
                    };
                }
            }
        }
    }

    pub fn active_voxel_count(&self) -> u64 {
        self.nodes
            .values()
            .map(|node| match node {
                Node::Leaf(leaf) => leaf.active_count() as u64,
                Node::Tile { active: true, .. } => SIZE as u64,
                Node::Tile { active: false, .. } => 0,
            })
            .sum()
    }

    /// Union of the node bounds of every leaf and active tile.
    pub fn eval_leaf_bounding_box(&self) -> CoordBBox {
        let mut bbox = CoordBBox::empty();
        for (origin, node) in &self.nodes {
            if matches!(node, Node::Leaf(_) | Node::Tile { active: true, .. }) {
                bbox.union(&CoordBBox::cube(*origin, DIM));
            }
        }
        bbox
    }

    pub fn eval_active_bounding_box(&self) -> CoordBBox {
        let mut bbox = CoordBBox::empty();
        for (origin, node) in &self.nodes {
            match node {
                Node::Leaf(leaf) => bbox.union(&leaf.active_bounding_box()),
                Node::Tile { active: true, .. } => bbox.union(&CoordBBox::cube(*origin, DIM)),
                Node::Tile { active: false, .. } => {}
            }
        }
        bbox
    }

    /// Visits active voxels in ascending leaf order. Active tiles are reported
    /// voxel by voxel.
    pub fn for_each_active_voxel(&self, mut f: impl FnMut(Coord, T)) {
        for (origin, node) in &self.nodes {
            match node {
                Node::Leaf(leaf) => {
                    for offset in leaf.mask().iter_on() {
                        f(leaf.offset_to_global_coord(offset), leaf.get_value(offset));
                    }
                }
                Node::Tile {
                    value,
                    active: true,
                } => CoordBBox::cube(*origin, DIM).for_each_coord(|c| f(c, *value)),
                Node::Tile { active: false, .. } => {}
            }
        }
    }
}

impl Tree<f32> {
    /// Collapses inactive level-set leaves into tiles carrying the outside or
    /// inside background, chosen by the sign of the leaf's first value, and
    /// snaps inactive tile values to the signed background.
    pub fn prune_level_set(&mut self) {
        let outside = self.background.abs();
        for node in self.nodes.values_mut() {
            match node {
                Node::Leaf(leaf) => {
                    if leaf.mask().is_all_off() {
                        let inside = leaf.get_value(0) < 0.0;
                        *node = Node::Tile {
                            value: if inside { -outside } else { outside },
                            active: false,
                        };
                    }
                }
                Node::Tile {
                    value,
                    active: false,
                } => *value = if *value < 0.0 { -outside } else { outside },
                Node::Tile { active: true, .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests;

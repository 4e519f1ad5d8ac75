use serde::{Deserialize, Serialize};

use crate::attributes::AttributeType;
use crate::math::Transform;

use super::{Tree, TreeValue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridClass {
    #[default]
    Unknown,
    LevelSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    pub name: String,
    pub tree: Tree<T>,
    pub transform: Transform,
    pub class: GridClass,
}

impl<T: TreeValue> Grid<T> {
    pub fn new(tree: Tree<T>, transform: Transform) -> Self {
        Self {
            name: String::new(),
            tree,
            transform,
            class: GridClass::Unknown,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn background(&self) -> T {
        self.tree.background()
    }

    pub fn voxel_size(&self) -> f64 {
        self.transform.voxel_size()
    }
}

/// Output grid of a rasterization pass, typed by the source attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyGrid {
    Float(Grid<f32>),
    Int(Grid<i32>),
    Vec2(Grid<[f32; 2]>),
    Vec3(Grid<[f32; 3]>),
    Vec4(Grid<[f32; 4]>),
}

impl AnyGrid {
    pub fn name(&self) -> &str {
        match self {
            AnyGrid::Float(grid) => &grid.name,
            AnyGrid::Int(grid) => &grid.name,
            AnyGrid::Vec2(grid) => &grid.name,
            AnyGrid::Vec3(grid) => &grid.name,
            AnyGrid::Vec4(grid) => &grid.name,
        }
    }

    pub fn class(&self) -> GridClass {
        match self {
            AnyGrid::Float(grid) => grid.class,
            AnyGrid::Int(grid) => grid.class,
            AnyGrid::Vec2(grid) => grid.class,
            AnyGrid::Vec3(grid) => grid.class,
            AnyGrid::Vec4(grid) => grid.class,
        }
    }

    pub fn value_type(&self) -> AttributeType {
        match self {
            AnyGrid::Float(_) => AttributeType::Float,
            AnyGrid::Int(_) => AttributeType::Int,
            AnyGrid::Vec2(_) => AttributeType::Vec2,
            AnyGrid::Vec3(_) => AttributeType::Vec3,
            AnyGrid::Vec4(_) => AttributeType::Vec4,
        }
    }

    pub fn active_voxel_count(&self) -> u64 {
        match self {
            AnyGrid::Float(grid) => grid.tree.active_voxel_count(),
            AnyGrid::Int(grid) => grid.tree.active_voxel_count(),
            AnyGrid::Vec2(grid) => grid.tree.active_voxel_count(),
            AnyGrid::Vec3(grid) => grid.tree.active_voxel_count(),
            AnyGrid::Vec4(grid) => grid.tree.active_voxel_count(),
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            AnyGrid::Float(grid) => grid.tree.leaf_count(),
            AnyGrid::Int(grid) => grid.tree.leaf_count(),
            AnyGrid::Vec2(grid) => grid.tree.leaf_count(),
            AnyGrid::Vec3(grid) => grid.tree.leaf_count(),
            AnyGrid::Vec4(grid) => grid.tree.leaf_count(),
        }
    }

    pub fn as_float(&self) -> Option<&Grid<f32>> {
        match self {
            AnyGrid::Float(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&Grid<i32>> {
        match self {
            AnyGrid::Int(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<&Grid<[f32; 3]>> {
        match self {
            AnyGrid::Vec3(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn into_float(self) -> Option<Grid<f32>> {
        match self {
            AnyGrid::Float(grid) => Some(grid),
            _ => None,
        }
    }
}

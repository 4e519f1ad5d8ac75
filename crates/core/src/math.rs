use std::ops::{Add, AddAssign, Sub};

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Integer voxel coordinate. Ordered lexicographically by (x, y, z).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    pub const ZERO: Coord = Coord { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: i32) -> Self {
        Self { x: v, y: v, z: v }
    }

    /// Rounds half up on every axis, `floor(v + 0.5)`.
    pub fn round(v: DVec3) -> Self {
        Self::floor(v + DVec3::splat(0.5))
    }

    /// Voxel containing the index-space position `v` and the f32 offset from
    /// its center. The stored offset stays in `[-0.5, 0.5)`: a component that
    /// narrows up to `0.5` belongs to the next voxel.
    pub fn split_voxel_local(v: DVec3) -> (Self, [f32; 3]) {
        let mut voxel = Self::round(v);
        let local = v - voxel.as_dvec3();
        let mut out = [local.x as f32, local.y as f32, local.z as f32];
        for (axis, component) in out.iter_mut().enumerate() {
            if *component >= 0.5 {
                *component = -0.5;
                match axis {
                    0 => voxel.x += 1,
                    1 => voxel.y += 1,
                    _ => voxel.z += 1,
                }
            }
        }
        (voxel, out)
    }

    pub fn floor(v: DVec3) -> Self {
        Self::new(v.x.floor() as i32, v.y.floor() as i32, v.z.floor() as i32)
    }

    pub fn as_dvec3(self) -> DVec3 {
        DVec3::new(self.x as f64, self.y as f64, self.z as f64)
    }

    /// Clears the low bits of every component so the result is a multiple of
    /// `dim`, which must be a power of two.
    pub fn align_down(self, dim: i32) -> Self {
        let mask = !(dim - 1);
        Self::new(self.x & mask, self.y & mask, self.z & mask)
    }

    pub fn min(self, other: Coord) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(self, other: Coord) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    fn saturating_add(self, other: Coord) -> Self {
        Self::new(
            self.x.saturating_add(other.x),
            self.y.saturating_add(other.y),
            self.z.saturating_add(other.z),
        )
    }

    fn saturating_sub(self, other: Coord) -> Self {
        Self::new(
            self.x.saturating_sub(other.x),
            self.y.saturating_sub(other.y),
            self.z.saturating_sub(other.z),
        )
    }
}

impl Add for Coord {
    type Output = Coord;

    fn add(self, rhs: Coord) -> Coord {
        Coord::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Coord {
    fn add_assign(&mut self, rhs: Coord) {
        *self = *self + rhs;
    }
}

impl Sub for Coord {
    type Output = Coord;

    fn sub(self, rhs: Coord) -> Coord {
        Coord::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Inclusive integer bounding box. Empty when any `min` component exceeds
/// the matching `max` component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordBBox {
    pub min: Coord,
    pub max: Coord,
}

impl Default for CoordBBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl CoordBBox {
    pub const fn new(min: Coord, max: Coord) -> Self {
        Self { min, max }
    }

    pub const fn empty() -> Self {
        Self {
            min: Coord::splat(i32::MAX),
            max: Coord::splat(i32::MIN),
        }
    }

    pub const fn inf() -> Self {
        Self {
            min: Coord::splat(i32::MIN),
            max: Coord::splat(i32::MAX),
        }
    }

    /// Cube of `dim` voxels per side starting at `origin`.
    pub fn cube(origin: Coord, dim: i32) -> Self {
        Self::new(origin, origin + Coord::splat(dim - 1))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn expand(&mut self, dist: i32) {
        self.expand_vec(Coord::splat(dist));
    }

    pub fn expand_vec(&mut self, dist: Coord) {
        if self.is_empty() {
            return;
        }
        self.min = self.min.saturating_sub(dist);
        self.max = self.max.saturating_add(dist);
    }

    pub fn expand_to_include(&mut self, c: Coord) {
        self.min = self.min.min(c);
        self.max = self.max.max(c);
    }

    pub fn union(&mut self, other: &CoordBBox) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn intersect(&mut self, other: &CoordBBox) {
        self.min = self.min.max(other.min);
        self.max = self.max.min(other.max);
    }

    pub fn intersects(&self, other: &CoordBBox) -> bool {
        !(self.max.x < other.min.x
            || self.max.y < other.min.y
            || self.max.z < other.min.z
            || self.min.x > other.max.x
            || self.min.y > other.max.y
            || self.min.z > other.max.z)
    }

    pub fn contains(&self, c: Coord) -> bool {
        c.x >= self.min.x
            && c.y >= self.min.y
            && c.z >= self.min.z
            && c.x <= self.max.x
            && c.y <= self.max.y
            && c.z <= self.max.z
    }

    pub fn contains_bbox(&self, other: &CoordBBox) -> bool {
        self.contains(other.min) && self.contains(other.max)
    }

    pub fn translate(&mut self, offset: Coord) {
        self.min += offset;
        self.max += offset;
    }

    pub fn volume(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let d = self.max - self.min;
        (d.x as u64 + 1) * (d.y as u64 + 1) * (d.z as u64 + 1)
    }

    /// Visits every coordinate in x-major order.
    pub fn for_each_coord(&self, mut f: impl FnMut(Coord)) {
        if self.is_empty() {
            return;
        }
        for x in self.min.x..=self.max.x {
            for y in self.min.y..=self.max.y {
                for z in self.min.z..=self.max.z {
                    f(Coord::new(x, y, z));
                }
            }
        }
    }
}

/// Linear index/world mapping: uniform voxel size plus translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    voxel_size: f64,
    #[serde(default)]
    translation: DVec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::linear(1.0)
    }
}

impl Transform {
    pub fn linear(voxel_size: f64) -> Self {
        Self {
            voxel_size,
            translation: DVec3::ZERO,
        }
    }

    pub fn with_translation(mut self, translation: DVec3) -> Self {
        self.translation = translation;
        self
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    pub fn translation(&self) -> DVec3 {
        self.translation
    }

    pub fn is_valid(&self) -> bool {
        self.voxel_size.is_finite() && self.voxel_size > 0.0 && self.translation.is_finite()
    }

    pub fn index_to_world(&self, ijk: DVec3) -> DVec3 {
        ijk * self.voxel_size + self.translation
    }

    pub fn world_to_index(&self, world: DVec3) -> DVec3 {
        (world - self.translation) / self.voxel_size
    }

    pub fn world_to_index_cell_centered(&self, world: DVec3) -> Coord {
        Coord::round(self.world_to_index(world))
    }

    pub fn world_bbox_to_index_cell_centered(&self, min: DVec3, max: DVec3) -> CoordBBox {
        let a = self.world_to_index_cell_centered(min);
        let b = self.world_to_index_cell_centered(max);
        CoordBBox::new(a.min(b), a.max(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_is_floor_of_half_up() {
        assert_eq!(Coord::round(DVec3::new(0.5, -0.5, 1.49)), Coord::new(1, 0, 1));
        assert_eq!(Coord::round(DVec3::new(-0.51, -1.5, 2.5)), Coord::new(-1, -1, 3));
    }

    #[test]
    fn voxel_local_offset_stays_below_half() {
        let (voxel, local) = Coord::split_voxel_local(DVec3::new(0.499_999_99, -0.25, 2.0));
        assert_eq!(voxel, Coord::new(1, 0, 2));
        assert_eq!(local, [-0.5, -0.25, 0.0]);
        let again = voxel.as_dvec3() + DVec3::new(local[0] as f64, local[1] as f64, local[2] as f64);
        assert_eq!(Coord::round(again), voxel);

        let (voxel, local) = Coord::split_voxel_local(DVec3::new(-0.5, 0.3, 0.0));
        assert_eq!(voxel, Coord::ZERO);
        assert_eq!(local[0], -0.5);
        assert_eq!(local[1], 0.3);
    }

    #[test]
    fn align_down_handles_negative_coords() {
        assert_eq!(Coord::new(-1, 7, 9).align_down(8), Coord::new(-8, 0, 8));
    }

    #[test]
    fn bbox_expand_keeps_empty_boxes_empty() {
        let mut bbox = CoordBBox::empty();
        bbox.expand(3);
        assert!(bbox.is_empty());

        let mut bbox = CoordBBox::cube(Coord::ZERO, 8);
        bbox.expand(2);
        assert_eq!(bbox.min, Coord::splat(-2));
        assert_eq!(bbox.max, Coord::splat(9));
        assert_eq!(bbox.volume(), 12 * 12 * 12);
    }

    #[test]
    fn transform_round_trips_index_space() {
        let xform = Transform::linear(0.1).with_translation(DVec3::new(1.0, 0.0, -2.0));
        let world = DVec3::new(0.35, 4.0, -1.0);
        let back = xform.index_to_world(xform.world_to_index(world));
        assert!((back - world).length() < 1.0e-12);
        assert_eq!(
            xform.world_to_index_cell_centered(DVec3::new(1.0, 0.0, -2.0)),
            Coord::ZERO
        );
    }
}

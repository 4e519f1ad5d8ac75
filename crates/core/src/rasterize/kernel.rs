use glam::DVec3;

use crate::math::{Coord, CoordBBox, Transform};
use crate::points::PointLeaf;
use crate::tree::{coord_to_offset, offset_to_local_coord, ValueMask, SIZE};

use super::radius::{FixedBandRadius, PointRadius};

/// Working buffers of one surface leaf during rasterization.
pub(crate) struct LeafBuffers<'a> {
    pub origin: Coord,
    pub values: &'a mut [f32],
    pub mask: &'a mut ValueMask,
    /// Closest point per voxel: point leaf index in the upper 32 bits,
    /// point index in the lower.
    pub closest: Option<Vec<i64>>,
}

/// Per-leaf transfer state machine driven by `rasterize_leaves`:
/// `initialize`, then for every point leaf near the surface leaf
/// `start_point_leaf`, `rasterize_point` per point and `end_point_leaf`,
/// then `finalize`.
pub(crate) trait TransferKernel: Clone + Send + Sync {
    /// Maximum reach of a point, in surface voxels.
    fn range(&self) -> i32;

    fn initialize(&mut self, _buffers: &mut LeafBuffers<'_>) {}

    fn start_point_leaf(&mut self, leaf: &PointLeaf, leaf_index: u32) -> bool;

    fn rasterize_point(
        &mut self,
        buffers: &mut LeafBuffers<'_>,
        leaf: &PointLeaf,
        voxel: Coord,
        index: usize,
        bounds: &CoordBBox,
    );

    /// Returns `false` once the remaining point leaves cannot change the
    /// surface leaf.
    fn end_point_leaf(&mut self, _buffers: &LeafBuffers<'_>) -> bool {
        true
    }

    fn finalize(&mut self, buffers: &mut LeafBuffers<'_>);
}

/// State shared by the signed distance kernels.
#[derive(Debug, Clone)]
pub(crate) struct SdfTransfer {
    pub position: usize,
    pub radius: PointRadius,
    pub width: i32,
    pub source: Transform,
    pub target: Transform,
    pub background: f32,
    /// Surface voxel size.
    pub dx: f64,
    leaf_bits: u64,
}

impl SdfTransfer {
    pub fn new(
        position: usize,
        radius: PointRadius,
        width: i32,
        source: Transform,
        target: Transform,
        background: f32,
    ) -> Self {
        Self {
            position,
            radius,
            width,
            source,
            target,
            background,
            dx: target.voxel_size(),
            leaf_bits: 0,
        }
    }

    fn start(&mut self, leaf_index: u32) {
        self.leaf_bits = u64::from(leaf_index) << 32;
    }

    fn closest_id(&self, index: usize) -> i64 {
        (self.leaf_bits | index as u64) as i64
    }

    fn world_position(&self, leaf: &PointLeaf, voxel: Coord, index: usize) -> DVec3 {
        let local = leaf
            .attributes()
            .get(self.position)
            .and_then(|array| array.vec3(index))
            .map(|p| DVec3::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2])))
            .unwrap_or(DVec3::ZERO);
        self.source.index_to_world(voxel.as_dvec3() + local)
    }
}

fn search_box(center: DVec3, reach: f64, bounds: &CoordBBox) -> CoordBBox {
    let mut bbox = CoordBBox::new(
        Coord::round(center - DVec3::splat(reach)),
        Coord::round(center + DVec3::splat(reach)),
    );
    bbox.intersect(bounds);
    bbox
}

/// Stamps one sphere per point and keeps the smallest signed distance per
/// voxel. Voxels deep inside a sphere are resolved to `-background` and
/// switched off.
#[derive(Debug, Clone)]
pub(crate) struct SphericalTransfer {
    sdf: SdfTransfer,
    halfband: f64,
    fixed: Option<FixedBandRadius>,
}

impl SphericalTransfer {
    pub fn new(sdf: SdfTransfer, halfband: f64) -> Self {
        let fixed = match sdf.radius {
            PointRadius::Fixed(radius) => Some(FixedBandRadius::new(radius, halfband)),
            PointRadius::Varying { .. } => None,
        };
        Self {
            sdf,
            halfband,
            fixed,
        }
    }

    fn band(&self, leaf: &PointLeaf, index: usize) -> FixedBandRadius {
        self.fixed
            .unwrap_or_else(|| FixedBandRadius::new(self.sdf.radius.eval(leaf, index), self.halfband))
    }
}

impl TransferKernel for SphericalTransfer {
    fn range(&self) -> i32 {
        self.sdf.width
    }

    fn start_point_leaf(&mut self, _leaf: &PointLeaf, leaf_index: u32) -> bool {
        self.sdf.start(leaf_index);
        true
    }

    fn rasterize_point(
        &mut self,
        buffers: &mut LeafBuffers<'_>,
        leaf: &PointLeaf,
        voxel: Coord,
        index: usize,
        bounds: &CoordBBox,
    ) {
        let p = self
            .sdf
            .target
            .world_to_index(self.sdf.world_position(leaf, voxel, index));
        let band = self.band(leaf, index);
        let bbox = search_box(p, band.max, bounds);
        if bbox.is_empty() {
            return;
        }

        // a zero inner radius must not catch a point sitting exactly on a
        // voxel center
        let min2 = if band.min_sq == 0.0 { -1.0 } else { band.min_sq };
        let max2 = band.max_sq;
        let background = self.sdf.background;
        let id = self.sdf.closest_id(index);

        for x in bbox.min.x..=bbox.max.x {
            let x2 = (f64::from(x) - p.x).powi(2);
            for y in bbox.min.y..=bbox.max.y {
                let x2y2 = x2 + (f64::from(y) - p.y).powi(2);
                for z in bbox.min.z..=bbox.max.z {
                    let offset = coord_to_offset(Coord::new(x, y, z));
                    if !buffers.mask.is_on(offset) {
                        continue;
                    }
                    let d2 = x2y2 + (f64::from(z) - p.z).powi(2);
                    if d2 >= max2 {
                        continue;
                    }
                    if d2 <= min2 {
                        buffers.values[offset] = -background;
                        buffers.mask.set_off(offset);
                        continue;
                    }
                    let distance = (self.sdf.dx * (d2.sqrt() - band.radius)) as f32;
                    if distance < buffers.values[offset] {
                        buffers.values[offset] = distance;
                        if let Some(closest) = buffers.closest.as_mut() {
                            closest[offset] = id;
                        }
                    }
                }
            }
        }
    }

    fn end_point_leaf(&mut self, buffers: &LeafBuffers<'_>) -> bool {
        !buffers.mask.is_all_off()
    }

    fn finalize(&mut self, buffers: &mut LeafBuffers<'_>) {
        // untouched voxels in the corners of the activated boxes
        let background = self.sdf.background;
        for offset in 0..SIZE {
            if buffers.mask.is_on(offset) && buffers.values[offset] == background {
                buffers.mask.set_off(offset);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct WeightedSample {
    weight: f64,
    position: DVec3,
    radius: f64,
}

/// Averages the world positions and radii of every point within the search
/// radius, weighted by `(1 - (d/R)^2)^3`, and measures the distance to the
/// averaged sphere.
#[derive(Debug, Clone)]
pub(crate) struct AveragePositionTransfer {
    sdf: SdfTransfer,
    search: f64,
    search_sq: f64,
    samples: Vec<WeightedSample>,
    distances: Vec<f32>,
}

impl AveragePositionTransfer {
    /// `search` is the index-space search radius.
    pub fn new(sdf: SdfTransfer, search: f64) -> Self {
        Self {
            sdf,
            search,
            search_sq: search * search,
            samples: Vec::new(),
            distances: Vec::new(),
        }
    }
}

impl TransferKernel for AveragePositionTransfer {
    fn range(&self) -> i32 {
        self.sdf.width
    }

    fn initialize(&mut self, buffers: &mut LeafBuffers<'_>) {
        self.samples.clear();
        self.samples.resize(SIZE, WeightedSample::default());
        self.distances.clear();
        if buffers.closest.is_some() {
            self.distances.resize(SIZE, f32::MAX);
        }
    }

    fn start_point_leaf(&mut self, _leaf: &PointLeaf, leaf_index: u32) -> bool {
        self.sdf.start(leaf_index);
        true
    }

    fn rasterize_point(
        &mut self,
        buffers: &mut LeafBuffers<'_>,
        leaf: &PointLeaf,
        voxel: Coord,
        index: usize,
        bounds: &CoordBBox,
    ) {
        let world = self.sdf.world_position(leaf, voxel, index);
        let p = self.sdf.target.world_to_index(world);
        let bbox = search_box(p, self.search, bounds);
        if bbox.is_empty() {
            return;
        }

        let radius = self.sdf.radius.eval(leaf, index);
        let inv_sq = 1.0 / self.search_sq;
        let id = self.sdf.closest_id(index);

        for x in bbox.min.x..=bbox.max.x {
            let x2 = (f64::from(x) - p.x).powi(2);
            for y in bbox.min.y..=bbox.max.y {
                let x2y2 = x2 + (f64::from(y) - p.y).powi(2);
                for z in bbox.min.z..=bbox.max.z {
                    let d2 = x2y2 + (f64::from(z) - p.z).powi(2);
                    if d2 >= self.search_sq {
                        continue;
                    }
                    let offset = coord_to_offset(Coord::new(x, y, z));
                    if !buffers.mask.is_on(offset) {
                        continue;
                    }

                    if let Some(closest) = buffers.closest.as_mut() {
                        let distance = (d2.sqrt() - radius) as f32;
                        if distance < self.distances[offset] {
                            self.distances[offset] = distance;
                            closest[offset] = id;
                        }
                    }

                    let weight = (1.0 - d2 * inv_sq).powi(3);
                    let sample = &mut self.samples[offset];
                    sample.weight += weight;
                    sample.position += world * weight;
                    sample.radius += radius * weight;
                }
            }
        }
    }

    fn finalize(&mut self, buffers: &mut LeafBuffers<'_>) {
        let background = self.sdf.background;
        for offset in 0..SIZE {
            if !buffers.mask.is_on(offset) {
                continue;
            }
            let sample = self.samples[offset];
            // no point reached this voxel, so it lies outside
            if sample.weight == 0.0 {
                buffers.mask.set_off(offset);
                buffers.values[offset] = background;
                continue;
            }
            let voxel = buffers.origin + offset_to_local_coord(offset);
            let center = self.sdf.target.index_to_world(voxel.as_dvec3());
            let inv = 1.0 / sample.weight;
            let position = sample.position * inv;
            let radius = sample.radius * inv * self.sdf.dx;
            let mut value = ((center - position).length() - radius) as f32;
            if value.abs() >= background {
                value = background.copysign(value);
                buffers.mask.set_off(offset);
            }
            buffers.values[offset] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::PointDataGrid;

    fn leaf_buffers<'a>(values: &'a mut [f32], mask: &'a mut ValueMask) -> LeafBuffers<'a> {
        LeafBuffers {
            origin: Coord::ZERO,
            values,
            mask,
            closest: Some(vec![-1; SIZE]),
        }
    }

    fn spherical(radius: f64) -> (PointDataGrid, SphericalTransfer) {
        let points = PointDataGrid::from_positions(&[DVec3::new(4.0, 4.0, 4.0)], Transform::linear(1.0))
            .expect("points");
        let position = points.descriptor().position_index().expect("position");
        let sdf = SdfTransfer::new(
            position,
            PointRadius::Fixed(radius),
            5,
            *points.transform(),
            *points.transform(),
            3.0,
        );
        (points, SphericalTransfer::new(sdf, 3.0))
    }

    #[test]
    fn spherical_keeps_the_minimum_distance() {
        let (points, mut kernel) = spherical(1.0);
        let leaf = points.tree().leaves().next().expect("leaf");
        let mut values = vec![3.0f32; SIZE];
        let mut mask = ValueMask::filled(true);
        let mut buffers = leaf_buffers(&mut values, &mut mask);
        let bounds = CoordBBox::cube(Coord::ZERO, 8);

        kernel.initialize(&mut buffers);
        assert!(kernel.start_point_leaf(leaf, 7));
        for (offset, index) in leaf.iter_points() {
            kernel.rasterize_point(&mut buffers, leaf, leaf.voxel_coord(offset), index, &bounds);
        }
        assert!(kernel.end_point_leaf(&buffers));
        kernel.finalize(&mut buffers);

        let at = |c: Coord| coord_to_offset(c);
        // center voxel is inside the sphere but within the band
        assert!((buffers.values[at(Coord::new(4, 4, 4))] + 1.0).abs() < 1.0e-6);
        assert!((buffers.values[at(Coord::new(6, 4, 4))] - 1.0).abs() < 1.0e-6);
        assert!(buffers.mask.is_on(at(Coord::new(6, 4, 4))));
        // beyond radius + halfband
        assert!(!buffers.mask.is_on(at(Coord::new(0, 0, 0))));
        let closest = buffers.closest.as_ref().expect("closest");
        assert_eq!(closest[at(Coord::new(6, 4, 4))], 7i64 << 32);
    }

    #[test]
    fn spherical_resolves_deep_interior_voxels() {
        let (points, mut kernel) = spherical(5.0);
        let leaf = points.tree().leaves().next().expect("leaf");
        let mut values = vec![3.0f32; SIZE];
        let mut mask = ValueMask::filled(true);
        let mut buffers = leaf_buffers(&mut values, &mut mask);
        let bounds = CoordBBox::cube(Coord::ZERO, 8);

        kernel.start_point_leaf(leaf, 0);
        kernel.rasterize_point(&mut buffers, leaf, Coord::new(4, 4, 4), 0, &bounds);
        let center = coord_to_offset(Coord::new(4, 4, 4));
        assert!(!buffers.mask.is_on(center));
        assert_eq!(buffers.values[center], -3.0);
        // within the inner radius of 2 voxels
        assert!(!buffers.mask.is_on(coord_to_offset(Coord::new(5, 4, 4))));
        assert!(buffers.mask.is_on(coord_to_offset(Coord::new(7, 4, 4))));
    }

    #[test]
    fn averaged_kernel_recovers_a_single_sphere() {
        let points = PointDataGrid::from_positions(&[DVec3::new(4.0, 4.0, 4.0)], Transform::linear(1.0))
            .expect("points");
        let position = points.descriptor().position_index().expect("position");
        let sdf = SdfTransfer::new(
            position,
            PointRadius::Fixed(1.0),
            3,
            *points.transform(),
            *points.transform(),
            3.0,
        );
        let mut kernel = AveragePositionTransfer::new(sdf, 3.0);
        let leaf = points.tree().leaves().next().expect("leaf");
        let mut values = vec![3.0f32; SIZE];
        let mut mask = ValueMask::filled(true);
        let mut buffers = leaf_buffers(&mut values, &mut mask);
        let bounds = CoordBBox::cube(Coord::ZERO, 8);

        kernel.initialize(&mut buffers);
        kernel.start_point_leaf(leaf, 2);
        kernel.rasterize_point(&mut buffers, leaf, Coord::new(4, 4, 4), 0, &bounds);
        kernel.finalize(&mut buffers);

        let at = |c: Coord| coord_to_offset(c);
        assert!((buffers.values[at(Coord::new(6, 4, 4))] - 1.0).abs() < 1.0e-6);
        assert!(buffers.values[at(Coord::new(4, 4, 5))].abs() < 1.0e-6);
        // outside the search radius: no weight
        assert!(!buffers.mask.is_on(at(Coord::new(0, 0, 0))));
        assert_eq!(buffers.values[at(Coord::new(0, 0, 0))], 3.0);
        let closest = buffers.closest.as_ref().expect("closest");
        assert_eq!(closest[at(Coord::new(5, 4, 4))], 2i64 << 32);
    }
}

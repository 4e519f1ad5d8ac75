//! Narrow-band signed distance surfaces from point data. Topology is first
//! estimated per point leaf from conservative radius bounds, then filled by a
//! transfer kernel visiting every point near each surface leaf. Requested
//! attributes are copied from the closest contributing point.

mod driver;
mod kernel;
mod mask;
mod radius;
mod settings;
mod transfer;

use crate::attributes::AttributeType;
use crate::error::{PointsError, PointsResult};
use crate::math::Transform;
use crate::points::{eval_min_max, MinMax, NullFilter, PointDataGrid, PointFilter};
use crate::progress::{CancelGroup, Interrupter};
use crate::tree::{AnyGrid, Grid, Tree};

pub use settings::{RasterizeSettings, SurfaceKind, LEVEL_SET_HALF_WIDTH};

use kernel::{AveragePositionTransfer, SdfTransfer, SphericalTransfer, TransferKernel};
use mask::{init_sdf_from_masks, SurfaceMaskBuilder};
use radius::{round_to_int, FixedBandRadius, PointRadius};
use transfer::{transfer_attributes, TransferAttribute};

/// Rasterizes `points` into a level set. The surface grid comes first,
/// followed by one grid per transferred attribute in request order. An
/// interrupted pass returns whatever has been written so far.
pub fn rasterize_sdf<F: PointFilter>(
    points: &PointDataGrid,
    settings: &RasterizeSettings,
    filter: &F,
    interrupter: Option<&dyn Interrupter>,
) -> PointsResult<Vec<AnyGrid>> {
    settings.validate()?;
    let plan = SurfacePlan::new(points, settings)?;
    let cancel = CancelGroup::new(interrupter);
    match settings.kind {
        SurfaceKind::Spheres => {
            rasterize_sphere_surface(points, settings, &plan, filter, &cancel, interrupter)
        }
        SurfaceKind::SmoothSpheres { search_radius } => rasterize_smooth_surface(
            points,
            settings,
            &plan,
            search_radius,
            filter,
            &cancel,
            interrupter,
        ),
        SurfaceKind::Ellipsoids => Err(PointsError::Unsupported(
            "ellipsoid rasterization".to_string(),
        )),
    }
}

/// Union of spheres with world radius `radius` around every point.
pub fn rasterize_spheres(points: &PointDataGrid, radius: f64, halfband: f64) -> PointsResult<Grid<f32>> {
    let settings = RasterizeSettings::spheres(radius).with_halfband(halfband);
    first_surface(rasterize_sdf(points, &settings, &NullFilter, None)?)
}

/// Smoothed union of spheres: positions and radii averaged over
/// `search_radius`.
pub fn rasterize_smooth_spheres(
    points: &PointDataGrid,
    radius: f64,
    search_radius: f64,
    halfband: f64,
) -> PointsResult<Grid<f32>> {
    let settings = RasterizeSettings::smooth_spheres(radius, search_radius).with_halfband(halfband);
    first_surface(rasterize_sdf(points, &settings, &NullFilter, None)?)
}

fn first_surface(grids: Vec<AnyGrid>) -> PointsResult<Grid<f32>> {
    grids
        .into_iter()
        .next()
        .and_then(AnyGrid::into_float)
        .ok_or_else(|| PointsError::Unsupported("rasterization produced no surface".to_string()))
}

/// Everything resolved from the descriptor before work starts.
struct SurfacePlan {
    transform: Transform,
    voxel_size: f64,
    background: f32,
    position: usize,
    radius: Option<usize>,
    attributes: Vec<TransferAttribute>,
}

impl SurfacePlan {
    fn new(points: &PointDataGrid, settings: &RasterizeSettings) -> PointsResult<Self> {
        let descriptor = points.descriptor();
        let position = descriptor
            .position_index()
            .filter(|index| {
                descriptor
                    .get(*index)
                    .is_some_and(|info| info.data_type == AttributeType::Vec3)
            })
            .ok_or_else(|| PointsError::MissingAttribute {
                name: crate::attributes::POSITION.to_string(),
            })?;

        let radius = match &settings.radius {
            Some(name) => {
                let index = descriptor
                    .find(name)
                    .ok_or_else(|| PointsError::MissingAttribute { name: name.clone() })?;
                if let Some(info) = descriptor.get(index) {
                    if info.data_type != AttributeType::Float {
                        return Err(PointsError::AttributeType {
                            name: name.clone(),
                            expected: AttributeType::Float,
                            actual: info.data_type,
                        });
                    }
                    if info.stride != 1 {
                        return Err(PointsError::StridedAttribute { name: name.clone() });
                    }
                }
                Some(index)
            }
            None => None,
        };

        let mut attributes = Vec::new();
        for name in &settings.attributes {
            let Some(index) = descriptor.find(name) else {
                tracing::warn!(attribute = %name, "skipping unknown attribute for surface transfer");
                continue;
            };
            let Some(info) = descriptor.get(index) else {
                continue;
            };
            if info.stride != 1 {
                return Err(PointsError::StridedAttribute { name: name.clone() });
            }
            attributes.push(TransferAttribute {
                name: name.clone(),
                index,
                data_type: info.data_type,
            });
        }

        let transform = settings.transform.unwrap_or(*points.transform());
        let voxel_size = transform.voxel_size();
        Ok(Self {
            transform,
            voxel_size,
            background: (voxel_size * settings.halfband) as f32,
            position,
            radius,
            attributes,
        })
    }

    /// Radius range of the named attribute, empty trees when no point passes
    /// the filter.
    fn radius_range<F: PointFilter>(
        &self,
        points: &PointDataGrid,
        settings: &RasterizeSettings,
        filter: &F,
    ) -> PointsResult<MinMax> {
        let name = settings.radius.as_deref().unwrap_or_default();
        Ok(eval_min_max(points, name, filter, settings.threaded)?.unwrap_or(MinMax {
            min: 0.0,
            max: 0.0,
            min_tree: Tree::new(0.0),
            max_tree: Tree::new(0.0),
        }))
    }
}

fn rasterize_sphere_surface<F: PointFilter>(
    points: &PointDataGrid,
    settings: &RasterizeSettings,
    plan: &SurfacePlan,
    filter: &F,
    cancel: &CancelGroup<'_>,
    interrupter: Option<&dyn Interrupter>,
) -> PointsResult<Vec<AnyGrid>> {
    let threaded = settings.threaded;
    let halfband = settings.halfband;
    let vs = plan.voxel_size;

    if let Some(interrupter) = interrupter {
        interrupter.start("building sphere surface topology");
    }
    let (mut surface, radius, width) = match plan.radius {
        None => {
            let band = FixedBandRadius::new(settings.radius_scale / vs, halfband);
            let builder =
                SurfaceMaskBuilder::fixed(points.transform(), &plan.transform, band.min, band.max, None);
            let mask = builder.build(points.tree(), cancel, threaded);
            let surface = init_sdf_from_masks(plan.transform, plan.background, mask, threaded);
            (surface, PointRadius::Fixed(band.radius), band.max.ceil() as i32)
        }
        Some(index) => {
            let range = plan.radius_range(points, settings, filter)?;
            let scale = settings.radius_scale / vs;
            let builder = SurfaceMaskBuilder::variable(
                points.transform(),
                &plan.transform,
                Some(&range.min_tree),
                &range.max_tree,
                scale,
                scale,
                halfband,
                None,
            );
            let mask = builder.build(points.tree(), cancel, threaded);
            let surface = init_sdf_from_masks(plan.transform, plan.background, mask, threaded);
            let width = (f64::from(range.max) * scale + halfband).ceil() as i32;
            (surface, PointRadius::Varying { index, scale }, width)
        }
    };
    if let Some(interrupter) = interrupter {
        interrupter.end();
    }

    let kernel = SphericalTransfer::new(
        SdfTransfer::new(
            plan.position,
            radius,
            width,
            *points.transform(),
            plan.transform,
            plan.background,
        ),
        halfband,
    );
    let mut grids = run_kernel(
        points,
        settings,
        plan,
        &mut surface,
        &kernel,
        filter,
        cancel,
        interrupter,
        "rasterizing spheres",
    );
    surface.tree.prune_level_set();
    log_surface(&surface, "spheres");
    grids.insert(0, AnyGrid::Float(surface));
    Ok(grids)
}

fn rasterize_smooth_surface<F: PointFilter>(
    points: &PointDataGrid,
    settings: &RasterizeSettings,
    plan: &SurfacePlan,
    search_radius: f64,
    filter: &F,
    cancel: &CancelGroup<'_>,
    interrupter: Option<&dyn Interrupter>,
) -> PointsResult<Vec<AnyGrid>> {
    let threaded = settings.threaded;
    let halfband = settings.halfband;
    let vs = plan.voxel_size;
    let index_search = search_radius / vs;
    let width = index_search.ceil() as i32;
    // the averaged surface can sit anywhere up to the search radius from a
    // point, even where that exceeds the point radius
    let max_activation = search_radius.max(settings.radius_scale) / vs;
    // positions are only ever averaged between points, so activation stops
    // at the point bounds expanded by the largest radius
    let mut clip = points.tree().eval_leaf_bounding_box();

    if let Some(interrupter) = interrupter {
        interrupter.start("building smooth surface topology");
    }
    let (mut surface, radius) = match plan.radius {
        None => {
            let band = FixedBandRadius::new(max_activation, halfband);
            clip.expand((halfband + f64::from(round_to_int(settings.radius_scale / vs))) as i32);
            let builder =
                SurfaceMaskBuilder::fixed(points.transform(), &plan.transform, 0.0, band.max, Some(clip));
            let mask = builder.build(points.tree(), cancel, threaded);
            let surface = init_sdf_from_masks(plan.transform, plan.background, mask, threaded);
            (surface, PointRadius::Fixed(settings.radius_scale / vs))
        }
        Some(index) => {
            let mut range = plan.radius_range(points, settings, filter)?;
            if search_radius > settings.radius_scale && f64::from(range.min) < search_radius {
                // the mask scales radii by radius_scale / vs, the search
                // radius must not be
                let widened = (search_radius / settings.radius_scale) as f32;
                let search = search_radius as f32;
                range.max_tree.modify_active_values(threaded, |_, r| {
                    if *r < search {
                        *r = widened;
                    }
                });
            }
            let scale = settings.radius_scale / vs;
            clip.expand((halfband + f64::from(round_to_int(f64::from(range.max) * scale))) as i32);
            let builder = SurfaceMaskBuilder::variable(
                points.transform(),
                &plan.transform,
                None,
                &range.max_tree,
                1.0,
                scale,
                halfband,
                Some(clip),
            );
            let mask = builder.build(points.tree(), cancel, threaded);
            let surface = init_sdf_from_masks(plan.transform, plan.background, mask, threaded);
            (surface, PointRadius::Varying { index, scale })
        }
    };
    if let Some(interrupter) = interrupter {
        interrupter.end();
    }

    let kernel = AveragePositionTransfer::new(
        SdfTransfer::new(
            plan.position,
            radius,
            width,
            *points.transform(),
            plan.transform,
            plan.background,
        ),
        index_search,
    );
    let mut grids = run_kernel(
        points,
        settings,
        plan,
        &mut surface,
        &kernel,
        filter,
        cancel,
        interrupter,
        "rasterizing smooth spheres",
    );
    surface.tree.prune_inactive();
    log_surface(&surface, "smooth spheres");
    grids.insert(0, AnyGrid::Float(surface));
    Ok(grids)
}

#[allow(clippy::too_many_arguments)]
fn run_kernel<K: TransferKernel, F: PointFilter>(
    points: &PointDataGrid,
    settings: &RasterizeSettings,
    plan: &SurfacePlan,
    surface: &mut Grid<f32>,
    kernel: &K,
    filter: &F,
    cancel: &CancelGroup<'_>,
    interrupter: Option<&dyn Interrupter>,
    stage: &str,
) -> Vec<AnyGrid> {
    if let Some(interrupter) = interrupter {
        interrupter.start(stage);
    }
    tracing::debug!(
        surface_leaves = surface.tree.leaf_count(),
        range = kernel.range(),
        "rasterizing points"
    );
    let closest = driver::rasterize_leaves(
        points,
        surface,
        kernel,
        filter,
        !plan.attributes.is_empty(),
        cancel,
        settings.threaded,
    );
    if let Some(interrupter) = interrupter {
        interrupter.end();
    }
    match closest {
        Some(closest) => transfer_attributes(
            points,
            &plan.attributes,
            &closest,
            plan.transform,
            settings.threaded,
        ),
        None => Vec::new(),
    }
}

fn log_surface(surface: &Grid<f32>, kind: &str) {
    tracing::info!(
        kind,
        leaves = surface.tree.leaf_count(),
        active_voxels = surface.tree.active_voxel_count(),
        background = surface.background(),
        "rasterized surface"
    );
}

use std::path::{Path, PathBuf};
use std::process;

use glam::DVec3;
use pointgrid_core::{
    move_points, move_points_to, rasterize_sdf, AnyGrid, AttributeInfo, AttributeStorage,
    AttributeThresholdFilter, AttributeType, AttributeValue, GridClass, NullFilter,
    OffsetDeformer, PointCloud, PointDataGrid, RasterizeSettings, Transform,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Deserialize)]
pub(crate) struct HeadlessPlan {
    #[serde(default = "default_voxel_size")]
    voxel_size: f64,
    #[serde(default)]
    pub(crate) log_level: Option<String>,
    #[serde(default)]
    points: Vec<[f64; 3]>,
    #[serde(default)]
    scatter: Option<ScatterSettings>,
    #[serde(default)]
    attributes: Vec<PlanAttribute>,
    #[serde(default)]
    steps: Vec<PlanStep>,
}

/// Uniform random points in `[-extent, extent]^3`.
#[derive(Debug, Clone, Copy, Deserialize)]
struct ScatterSettings {
    count: usize,
    #[serde(default = "default_extent")]
    extent: f64,
    #[serde(default)]
    seed: u64,
}

/// Float column: explicit per-point `values`, or `value` for every point.
#[derive(Debug, Deserialize)]
struct PlanAttribute {
    name: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    value: Option<f32>,
}

/// Keeps points whose float attribute is at least `threshold`.
#[derive(Debug, Clone, Deserialize)]
struct PlanFilter {
    attribute: String,
    threshold: f32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PlanStep {
    Move {
        offset: [f64; 3],
        #[serde(default)]
        index_space: bool,
        /// Rebins into a grid of this voxel size.
        #[serde(default)]
        voxel_size: Option<f64>,
        #[serde(default)]
        filter: Option<PlanFilter>,
        #[serde(default = "default_threaded")]
        threaded: bool,
    },
    Rasterize {
        #[serde(default)]
        settings: RasterizeSettings,
        #[serde(default)]
        filter: Option<PlanFilter>,
    },
}

#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct RunSummary {
    points: usize,
    leaves: usize,
    steps: Vec<StepSummary>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "step", rename_all = "snake_case")]
enum StepSummary {
    Move {
        points: usize,
        leaves: usize,
        moved_leaves: usize,
        static_leaves: usize,
    },
    Rasterize {
        grids: Vec<GridSummary>,
    },
}

#[derive(Debug, Serialize, PartialEq)]
struct GridSummary {
    name: String,
    class: GridClass,
    value_type: AttributeType,
    leaves: usize,
    active_voxels: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<f32>,
}

struct HeadlessArgs {
    plan_path: Option<PathBuf>,
    log_level: Option<LevelFilter>,
    print: bool,
}

/// Parses the command line, runs the plan and prints the summary when asked.
pub(crate) fn run(args: &[String]) -> Result<(), String> {
    let parsed = parse_headless_args(args)?;
    let plan = match &parsed.plan_path {
        Some(path) => load_headless_plan(path)?,
        None => default_headless_plan(),
    };
    let level = match parsed.log_level {
        Some(level) => level,
        None => plan
            .log_level
            .as_deref()
            .map(parse_level)
            .transpose()?
            .unwrap_or(LevelFilter::INFO),
    };
    crate::logging::setup_tracing(level);

    let summary = run_plan(&plan)?;
    if parsed.print {
        let json = serde_json::to_string_pretty(&summary).map_err(|err| err.to_string())?;
        println!("{json}");
    }
    tracing::info!(steps = summary.steps.len(), "headless: completed");
    Ok(())
}

fn parse_headless_args(args: &[String]) -> Result<HeadlessArgs, String> {
    let mut plan_path = None;
    let mut log_level = None;
    let mut print = false;
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--plan" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--plan requires a path".to_string())?;
                plan_path = Some(PathBuf::from(value));
            }
            "--log-level" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--log-level requires a level".to_string())?;
                log_level = Some(parse_level(value)?);
            }
            "--print" => {
                print = true;
            }
            "--help" | "-h" => {
                print_headless_help();
                process::exit(0);
            }
            other => return Err(format!("unknown argument {other}")),
        }
    }

    Ok(HeadlessArgs {
        plan_path,
        log_level,
        print,
    })
}

fn print_headless_help() {
    println!(
        "Options:\n  --plan <path>\n  --log-level <error|warn|info|debug|trace>\n  --print"
    );
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level {value}"))
}

fn load_headless_plan(path: &Path) -> Result<HeadlessPlan, String> {
    let data = std::fs::read(path).map_err(|err| err.to_string())?;
    serde_json::from_slice(&data).map_err(|err| err.to_string())
}

fn default_headless_plan() -> HeadlessPlan {
    HeadlessPlan {
        voxel_size: 0.1,
        log_level: None,
        points: Vec::new(),
        scatter: Some(ScatterSettings {
            count: 2000,
            extent: 1.0,
            seed: 7,
        }),
        attributes: Vec::new(),
        steps: vec![
            PlanStep::Move {
                offset: [0.25, 0.0, 0.0],
                index_space: false,
                voxel_size: None,
                filter: None,
                threaded: true,
            },
            PlanStep::Rasterize {
                settings: RasterizeSettings::spheres(0.05),
                filter: None,
            },
        ],
    }
}

pub(crate) fn run_plan(plan: &HeadlessPlan) -> Result<RunSummary, String> {
    let transform = Transform::linear(plan.voxel_size);
    let mut points = build_points(plan, transform)?;
    tracing::info!(
        points = points.point_count(),
        leaves = points.leaf_count(),
        "headless: built point grid"
    );

    let mut steps = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        let summary = match step {
            PlanStep::Move {
                offset,
                index_space,
                voxel_size,
                filter,
                threaded,
            } => {
                let offset = DVec3::from_array(*offset);
                let deformer = if *index_space {
                    OffsetDeformer::index(offset)
                } else {
                    OffsetDeformer::world(offset)
                };
                let report = match (voxel_size, filter) {
                    (Some(size), Some(filter)) => move_points_to(
                        &mut points,
                        Transform::linear(*size),
                        &deformer,
                        &threshold(filter),
                        *threaded,
                    ),
                    (Some(size), None) => move_points_to(
                        &mut points,
                        Transform::linear(*size),
                        &deformer,
                        &NullFilter,
                        *threaded,
                    ),
                    (None, Some(filter)) => {
                        move_points(&mut points, &deformer, &threshold(filter), *threaded)
                    }
                    (None, None) => move_points(&mut points, &deformer, &NullFilter, *threaded),
                }
                .map_err(|err| err.to_string())?;
                StepSummary::Move {
                    points: report.point_count,
                    leaves: points.leaf_count(),
                    moved_leaves: report.moved_leaves,
                    static_leaves: report.static_leaves,
                }
            }
            PlanStep::Rasterize { settings, filter } => {
                let grids = match filter {
                    Some(filter) => rasterize_sdf(&points, settings, &threshold(filter), None),
                    None => rasterize_sdf(&points, settings, &NullFilter, None),
                }
                .map_err(|err| err.to_string())?;
                StepSummary::Rasterize {
                    grids: grids.iter().map(summarize_grid).collect(),
                }
            }
        };
        tracing::debug!(?summary, "headless: step finished");
        steps.push(summary);
    }

    Ok(RunSummary {
        points: points.point_count(),
        leaves: points.leaf_count(),
        steps,
    })
}

fn threshold(filter: &PlanFilter) -> AttributeThresholdFilter {
    AttributeThresholdFilter::new(filter.attribute.clone(), filter.threshold)
}

fn build_points(plan: &HeadlessPlan, transform: Transform) -> Result<PointDataGrid, String> {
    let mut positions: Vec<DVec3> = plan.points.iter().map(|p| DVec3::from_array(*p)).collect();
    if let Some(scatter) = plan.scatter {
        positions.extend(scatter_points(scatter));
    }
    let count = positions.len();

    let mut cloud = PointCloud::new(positions);
    for attribute in &plan.attributes {
        let values = match (attribute.values.is_empty(), attribute.value) {
            (false, _) => attribute.values.clone(),
            (true, Some(value)) => vec![value; count],
            (true, None) => {
                return Err(format!(
                    "attribute {} needs either values or value",
                    attribute.name
                ))
            }
        };
        cloud = cloud.with_attribute(
            AttributeInfo {
                name: attribute.name.clone(),
                data_type: AttributeType::Float,
                stride: 1,
                default: AttributeValue::Float(attribute.value.unwrap_or_default()),
            },
            AttributeStorage::Float(values),
        );
    }
    PointDataGrid::from_cloud(&cloud, transform).map_err(|err| err.to_string())
}

/// 64-bit LCG, so a seed always scatters the same cloud.
fn scatter_points(settings: ScatterSettings) -> Vec<DVec3> {
    let mut state = settings.seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..settings.count)
        .map(|_| {
            let unit = DVec3::new(next(), next(), next());
            (unit * 2.0 - DVec3::ONE) * settings.extent
        })
        .collect()
}

fn summarize_grid(grid: &AnyGrid) -> GridSummary {
    GridSummary {
        name: grid.name().to_string(),
        class: grid.class(),
        value_type: grid.value_type(),
        leaves: grid.leaf_count(),
        active_voxels: grid.active_voxel_count(),
        background: grid.as_float().map(|grid| grid.background()),
    }
}

fn default_voxel_size() -> f64 {
    0.1
}

fn default_extent() -> f64 {
    1.0
}

fn default_threaded() -> bool {
    true
}

pub mod attributes;
mod error;
pub mod math;
mod paged_array;
mod parallel;
pub mod points;
pub mod points_move;
pub mod progress;
pub mod rasterize;
pub mod tree;

pub use attributes::{
    AttributeArray, AttributeDescriptor, AttributeInfo, AttributeSet, AttributeStorage,
    AttributeType, AttributeValue, POSITION,
};
pub use error::{PointsError, PointsResult};
pub use math::{Coord, CoordBBox, Transform};
pub use paged_array::PagedArray;
pub use points::{
    eval_min_max, AttributeThresholdFilter, FnFilter, MinMax, NullFilter, PointCloud,
    PointDataGrid, PointFilter, PointLeaf, PointTree,
};
pub use points_move::{
    move_points, move_points_to, CachedDeformer, Deformer, DeformerCache, FnDeformer,
    MoveReport, NullDeformer, OffsetDeformer,
};
pub use progress::{
    CallbackInterrupter, FlagInterrupter, Interrupter, NullInterrupter, ProgressEvent,
    ProgressSink,
};
pub use rasterize::{
    rasterize_sdf, rasterize_smooth_spheres, rasterize_spheres, RasterizeSettings, SurfaceKind,
    LEVEL_SET_HALF_WIDTH,
};
pub use tree::{AnyGrid, Grid, GridClass, MaskTree, Tree};

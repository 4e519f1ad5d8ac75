use serde::{Deserialize, Serialize};

use crate::error::{PointsError, PointsResult};
use crate::math::Transform;

/// Default narrow-band half width, in voxels.
pub const LEVEL_SET_HALF_WIDTH: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceKind {
    /// Union of spheres, one per point.
    #[default]
    Spheres,
    /// Zhu-Bridson style averaging of neighbouring positions and radii
    /// within `search_radius` (world units).
    SmoothSpheres { search_radius: f64 },
    Ellipsoids,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterizeSettings {
    pub kind: SurfaceKind,
    /// Per-point float radius attribute. Every point uses `radius_scale`
    /// as its world radius when unset.
    pub radius: Option<String>,
    pub radius_scale: f64,
    /// Half width of the narrow band, in voxels of the output grid.
    pub halfband: f64,
    /// Attributes carried onto the surface from the closest point.
    pub attributes: Vec<String>,
    /// Output transform. Defaults to the transform of the points.
    pub transform: Option<Transform>,
    pub threaded: bool,
}

impl Default for RasterizeSettings {
    fn default() -> Self {
        Self {
            kind: SurfaceKind::Spheres,
            radius: None,
            radius_scale: 1.0,
            halfband: LEVEL_SET_HALF_WIDTH,
            attributes: Vec::new(),
            transform: None,
            threaded: true,
        }
    }
}

impl RasterizeSettings {
    pub fn spheres(radius_scale: f64) -> Self {
        Self {
            radius_scale,
            ..Self::default()
        }
    }

    pub fn smooth_spheres(radius_scale: f64, search_radius: f64) -> Self {
        Self {
            kind: SurfaceKind::SmoothSpheres { search_radius },
            radius_scale,
            ..Self::default()
        }
    }

    pub fn with_radius_attribute(mut self, name: impl Into<String>) -> Self {
        self.radius = Some(name.into());
        self
    }

    pub fn with_halfband(mut self, halfband: f64) -> Self {
        self.halfband = halfband;
        self
    }

    pub fn with_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_threading(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub(crate) fn validate(&self) -> PointsResult<()> {
        if !(self.halfband.is_finite() && self.halfband > 0.0) {
            return Err(PointsError::InvalidSettings(format!(
                "halfband must be positive, got {}",
                self.halfband
            )));
        }
        if !(self.radius_scale.is_finite() && self.radius_scale > 0.0) {
            return Err(PointsError::InvalidSettings(format!(
                "radius scale must be positive, got {}",
                self.radius_scale
            )));
        }
        if let Some(transform) = &self.transform {
            if !transform.is_valid() {
                return Err(PointsError::InvalidSettings(format!(
                    "output voxel size {} is not a positive finite value",
                    transform.voxel_size()
                )));
            }
        }
        match self.kind {
            SurfaceKind::Spheres => Ok(()),
            SurfaceKind::SmoothSpheres { search_radius } => {
                if search_radius.is_finite() && search_radius > 0.0 {
                    Ok(())
                } else {
                    Err(PointsError::InvalidSettings(format!(
                        "search radius must be positive, got {search_radius}"
                    )))
                }
            }
            SurfaceKind::Ellipsoids => Err(PointsError::Unsupported(
                "ellipsoid rasterization".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: RasterizeSettings =
            serde_json::from_str(r#"{ "radius": "pscale", "attributes": ["id"] }"#)
                .expect("parse");
        assert_eq!(settings.kind, SurfaceKind::Spheres);
        assert_eq!(settings.radius.as_deref(), Some("pscale"));
        assert_eq!(settings.halfband, LEVEL_SET_HALF_WIDTH);
        assert_eq!(settings.radius_scale, 1.0);
        assert!(settings.threaded);
    }

    #[test]
    fn smooth_kind_round_trips_through_json() {
        let settings = RasterizeSettings::smooth_spheres(0.5, 1.5).with_halfband(2.0);
        let text = serde_json::to_string(&settings).expect("serialize");
        assert!(text.contains("smooth_spheres"));
        let back: RasterizeSettings = serde_json::from_str(&text).expect("parse");
        assert_eq!(back, settings);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(RasterizeSettings::spheres(1.0).with_halfband(0.0).validate().is_err());
        assert!(RasterizeSettings::spheres(-1.0).validate().is_err());
        assert!(RasterizeSettings::smooth_spheres(1.0, 0.0).validate().is_err());
        assert!(RasterizeSettings::spheres(1.0)
            .with_transform(Transform::linear(0.0))
            .validate()
            .is_err());
        let ellipsoids = RasterizeSettings {
            kind: SurfaceKind::Ellipsoids,
            ..RasterizeSettings::default()
        };
        assert!(matches!(
            ellipsoids.validate(),
            Err(PointsError::Unsupported(_))
        ));
    }
}

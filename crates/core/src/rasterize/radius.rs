use crate::points::PointLeaf;

/// Index-space sphere radius widened by the narrow band on both sides. The
/// inner radius is clamped to zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FixedBandRadius {
    pub radius: f64,
    pub min: f64,
    pub max: f64,
    pub min_sq: f64,
    pub max_sq: f64,
}

impl FixedBandRadius {
    pub fn new(radius: f64, halfband: f64) -> Self {
        let min = (radius - halfband).max(0.0);
        let max = radius + halfband;
        Self {
            radius,
            min,
            max,
            min_sq: min * min,
            max_sq: max * max,
        }
    }
}

/// Where a kernel reads the index-space radius of a point from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PointRadius {
    Fixed(f64),
    /// Float attribute at `index`, multiplied by `scale`.
    Varying { index: usize, scale: f64 },
}

impl PointRadius {
    pub fn eval(&self, leaf: &PointLeaf, point: usize) -> f64 {
        match *self {
            PointRadius::Fixed(radius) => radius,
            PointRadius::Varying { index, scale } => {
                let value = leaf
                    .attributes()
                    .get(index)
                    .and_then(|array| array.float(point))
                    .unwrap_or(0.0);
                f64::from(value) * scale
            }
        }
    }
}

/// Floor of `value + 0.5`, the rounding used for every band distance.
pub(crate) fn round_to_int(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_clamps_the_inner_radius() {
        let band = FixedBandRadius::new(2.0, 3.0);
        assert_eq!(band.min, 0.0);
        assert_eq!(band.min_sq, 0.0);
        assert_eq!(band.max, 5.0);
        assert_eq!(band.max_sq, 25.0);

        let wide = FixedBandRadius::new(10.0, 3.0);
        assert_eq!(wide.min, 7.0);
        assert_eq!(wide.min_sq, 49.0);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_to_int(2.5), 3);
        assert_eq!(round_to_int(2.49), 2);
        assert_eq!(round_to_int(-2.5), -2);
    }
}

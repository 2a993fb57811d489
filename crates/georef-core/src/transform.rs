use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::{GeorefError, Result, Stage};
use crate::polynomial::rmse;
use crate::{ControlPoint, Direction, PolynomialModel};

/// A fitted two-way mapping between pixel and map space.
///
/// Implementations are pure: the same inputs always produce bit-identical
/// outputs, which the resampler relies on for deterministic output.
pub trait GeoTransform: Send + Sync {
    /// Map coordinates `(X, Y)` to pixel coordinates `(x, y)`.
    fn to_pixel(&self, map: &[Point2<f64>]) -> Vec<Point2<f64>>;

    /// Pixel coordinates `(x, y)` to map coordinates `(X, Y)`.
    fn to_map(&self, pixel: &[Point2<f64>]) -> Vec<Point2<f64>>;

    fn apply(&self, direction: Direction, inputs: &[Point2<f64>]) -> Vec<Point2<f64>> {
        match direction {
            Direction::Forward => self.to_pixel(inputs),
            Direction::Backward => self.to_map(inputs),
        }
    }
}

impl GeoTransform for PolynomialModel {
    fn to_pixel(&self, map: &[Point2<f64>]) -> Vec<Point2<f64>> {
        self.evaluate_coords(Direction::Forward, map)
    }

    fn to_map(&self, pixel: &[Point2<f64>]) -> Vec<Point2<f64>> {
        self.evaluate_coords(Direction::Backward, pixel)
    }
}

/// Per-axis RMSE of one direction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rmse {
    pub x: f64,
    pub y: f64,
}

impl Rmse {
    /// Combined planimetric error `sqrt(x² + y²)`.
    pub fn total(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Accuracy of a transform on held-out check points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub gcp_count: usize,
    pub icp_count: usize,
    /// Map → pixel error, in pixels.
    pub forward: Rmse,
    /// Pixel → map error, in map units.
    pub backward: Rmse,
}

impl AccuracyReport {
    /// Evaluate both directions of `transform` on `icps`.
    pub fn compute(
        transform: &dyn GeoTransform,
        gcp_count: usize,
        icps: &[ControlPoint],
    ) -> Result<Self> {
        if icps.is_empty() {
            return Err(GeorefError::insufficient(Stage::Fit, "ICPs", 1, 0));
        }
        Ok(Self {
            gcp_count,
            icp_count: icps.len(),
            forward: direction_rmse(transform, icps, Direction::Forward)?,
            backward: direction_rmse(transform, icps, Direction::Backward)?,
        })
    }
}

fn direction_rmse(
    transform: &dyn GeoTransform,
    points: &[ControlPoint],
    direction: Direction,
) -> Result<Rmse> {
    let inputs: Vec<Point2<f64>> = points.iter().map(|p| direction.input_of(p)).collect();
    let predicted = transform.apply(direction, &inputs);
    let (pa, pb): (Vec<f64>, Vec<f64>) = predicted.iter().map(|p| (p.x, p.y)).unzip();
    let (aa, ab): (Vec<f64>, Vec<f64>) = points
        .iter()
        .map(|p| {
            let o = direction.output_of(p);
            (o.x, o.y)
        })
        .unzip();
    let (x, y) = rmse(&pa, &pb, &aa, &ab)?;
    Ok(Rmse { x, y })
}

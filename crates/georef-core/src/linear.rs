//! Affine and conformal (Helmert) transforms.
//!
//! Both are solved as stacked two-row-per-point least-squares systems:
//!
//! ```text
//! affine:     [X  Y  0  0  1  0] [a b c d tx ty]ᵀ = x
//!             [0  0  X  Y  0  1]                  = y
//! conformal:  [X -Y  1  0]       [a b tx ty]ᵀ     = x
//!             [Y  X  0  1]                        = y
//! ```
//!
//! Inputs and outputs are centered on their centroids before solving, which
//! keeps the system well conditioned for large map coordinates without
//! breaking the conformal (rotation + uniform scale) structure.

use nalgebra::{DMatrix, DVector, Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::{GeorefError, Result, Stage};
use crate::polynomial::LeastSquares;
use crate::{ControlPoint, Direction, GeoTransform};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearKind {
    /// Six parameters: independent scale, shear and rotation per axis.
    Affine,
    /// Four parameters: rotation, uniform scale and translation.
    Conformal,
}

impl LinearKind {
    pub fn num_params(self) -> usize {
        match self {
            LinearKind::Affine => 6,
            LinearKind::Conformal => 4,
        }
    }

    pub fn min_points(self) -> usize {
        self.num_params() / 2
    }
}

/// `p' = M p + t`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearMap {
    pub matrix: Matrix2<f64>,
    pub translation: Vector2<f64>,
}

impl LinearMap {
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::from(self.matrix * p.coords + self.translation)
    }

    /// Uniform scale factor (meaningful for conformal maps).
    pub fn scale(&self) -> f64 {
        self.matrix[(0, 0)].hypot(self.matrix[(1, 0)])
    }

    /// Rotation angle in radians (meaningful for conformal maps).
    pub fn rotation(&self) -> f64 {
        self.matrix[(1, 0)].atan2(self.matrix[(0, 0)])
    }
}

/// Forward (map → pixel) and backward (pixel → map) linear maps fitted on the
/// same GCPs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub kind: LinearKind,
    pub forward: LinearMap,
    pub backward: LinearMap,
}

impl LinearModel {
    pub fn fit(gcps: &[ControlPoint], kind: LinearKind) -> Result<Self> {
        if gcps.len() < kind.min_points() {
            return Err(GeorefError::insufficient(
                Stage::Fit,
                "GCPs",
                kind.min_points(),
                gcps.len(),
            ));
        }
        let map: Vec<Point2<f64>> = gcps.iter().map(|p| p.map).collect();
        let pixel: Vec<Point2<f64>> = gcps.iter().map(|p| p.pixel).collect();
        Ok(Self {
            kind,
            forward: fit_map(&map, &pixel, kind)?,
            backward: fit_map(&pixel, &map, kind)?,
        })
    }

    pub fn affine(gcps: &[ControlPoint]) -> Result<Self> {
        Self::fit(gcps, LinearKind::Affine)
    }

    pub fn conformal(gcps: &[ControlPoint]) -> Result<Self> {
        Self::fit(gcps, LinearKind::Conformal)
    }

    pub fn map(&self, direction: Direction) -> &LinearMap {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }
}

impl GeoTransform for LinearModel {
    fn to_pixel(&self, map: &[Point2<f64>]) -> Vec<Point2<f64>> {
        map.iter().map(|&p| self.forward.apply(p)).collect()
    }

    fn to_map(&self, pixel: &[Point2<f64>]) -> Vec<Point2<f64>> {
        pixel.iter().map(|&p| self.backward.apply(p)).collect()
    }
}

fn centroid(pts: &[Point2<f64>]) -> Vector2<f64> {
    let sum = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords);
    sum / pts.len() as f64
}

fn fit_map(src: &[Point2<f64>], dst: &[Point2<f64>], kind: LinearKind) -> Result<LinearMap> {
    let n = src.len();
    let cs = centroid(src);
    let cd = centroid(dst);

    let mut a = DMatrix::<f64>::zeros(2 * n, kind.num_params());
    let mut b = DVector::<f64>::zeros(2 * n);

    for k in 0..n {
        let s = src[k].coords - cs;
        let d = dst[k].coords - cd;
        let (r0, r1) = (2 * k, 2 * k + 1);
        match kind {
            LinearKind::Affine => {
                a[(r0, 0)] = s.x;
                a[(r0, 1)] = s.y;
                a[(r0, 4)] = 1.0;

                a[(r1, 2)] = s.x;
                a[(r1, 3)] = s.y;
                a[(r1, 5)] = 1.0;
            }
            LinearKind::Conformal => {
                a[(r0, 0)] = s.x;
                a[(r0, 1)] = -s.y;
                a[(r0, 2)] = 1.0;

                a[(r1, 0)] = s.y;
                a[(r1, 1)] = s.x;
                a[(r1, 3)] = 1.0;
            }
        }
        b[r0] = d.x;
        b[r1] = d.y;
    }

    let p = LeastSquares::new(a).solve(&b)?;

    // Centered solution: d = M (s - cs) + t_c  =>  t = cd + t_c - M cs
    let (matrix, t_c) = match kind {
        LinearKind::Affine => (
            Matrix2::new(p[0], p[1], p[2], p[3]),
            Vector2::new(p[4], p[5]),
        ),
        LinearKind::Conformal => (
            Matrix2::new(p[0], -p[1], p[1], p[0]),
            Vector2::new(p[2], p[3]),
        ),
    };
    Ok(LinearMap {
        matrix,
        translation: cd + t_c - matrix * cs,
    })
}

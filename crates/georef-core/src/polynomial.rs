//! Bivariate polynomial transforms fitted by least squares in normalized
//! coordinates.
//!
//! Terms are `x^i * y^j` with `i + j <= degree`, enumerated with `i` in the
//! outer loop and `j` in the inner loop:
//!
//! ```text
//! degree 1: 1, y, x
//! degree 2: 1, y, y², x, xy, x²
//! ```
//!
//! One fit produces two coefficient sets. The *forward* set is solved from a
//! design matrix of normalized map coordinates `(X, Y)` against normalized
//! pixel coordinates `(x, y)`; the *backward* set is the reverse. Coefficients
//! are only meaningful together with the [`NormalizationFactors`] and degree
//! they were fitted with, so [`PolynomialModel`] keeps all three together.

use log::debug;
use nalgebra::{DMatrix, DVector, Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::{GeorefError, Result, Stage};
use crate::{ControlPoint, Direction, NormalizationFactors};

/// Number of monomials of total degree `<= degree`.
#[inline]
pub fn num_terms(degree: u32) -> usize {
    let d = degree as usize;
    (d + 1) * (d + 2) / 2
}

/// `(i, j)` exponent pairs in coefficient order.
pub fn term_exponents(degree: u32) -> Vec<(u32, u32)> {
    let mut out = Vec::with_capacity(num_terms(degree));
    for i in 0..=degree {
        for j in 0..=(degree - i) {
            out.push((i, j));
        }
    }
    out
}

#[inline]
fn fill_powers(v: f64, out: &mut [f64]) {
    let mut acc = 1.0;
    for p in out.iter_mut() {
        *p = acc;
        acc *= v;
    }
}

/// Build the `N x num_terms(degree)` design matrix for the given inputs.
pub fn design_matrix(xs: &[f64], ys: &[f64], degree: u32) -> Result<DMatrix<f64>> {
    if xs.len() != ys.len() {
        return Err(GeorefError::DimensionMismatch {
            stage: Stage::Fit,
            expected: xs.len(),
            got: ys.len(),
        });
    }
    let d = degree as usize;
    let mut a = DMatrix::<f64>::zeros(xs.len(), num_terms(degree));
    let mut xp = vec![0.0; d + 1];
    let mut yp = vec![0.0; d + 1];

    for (row, (&x, &y)) in xs.iter().zip(ys).enumerate() {
        fill_powers(x, &mut xp);
        fill_powers(y, &mut yp);
        let mut col = 0;
        for i in 0..=d {
            for j in 0..=(d - i) {
                a[(row, col)] = xp[i] * yp[j];
                col += 1;
            }
        }
    }
    Ok(a)
}

/// Minimum-norm least-squares solution of `A c = b`.
///
/// Singular values below `max_sv * max(rows, cols) * EPSILON` are treated as
/// zero, so rank-deficient and underdetermined systems still produce a
/// solution.
pub(crate) struct LeastSquares {
    svd: nalgebra::SVD<f64, nalgebra::Dyn, nalgebra::Dyn>,
    eps: f64,
}

impl LeastSquares {
    pub(crate) fn new(a: DMatrix<f64>) -> Self {
        let dim = a.nrows().max(a.ncols()) as f64;
        let svd = a.svd(true, true);
        let max_sv = svd.singular_values.max();
        Self {
            svd,
            eps: max_sv * dim * f64::EPSILON,
        }
    }

    pub(crate) fn solve(&self, b: &DVector<f64>) -> Result<DVector<f64>> {
        self.svd
            .solve(b, self.eps)
            .map_err(GeorefError::LeastSquares)
    }

    /// Numerical rank at the solve tolerance.
    pub(crate) fn rank(&self) -> usize {
        self.svd.rank(self.eps.max(f64::MIN_POSITIVE))
    }
}

/// Coefficients for the two output axes of one direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSet {
    /// First output axis (`x` for forward, `X` for backward).
    pub a: Vec<f64>,
    /// Second output axis (`y` for forward, `Y` for backward).
    pub b: Vec<f64>,
}

impl CoefficientSet {
    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }
}

/// A fitted forward/backward polynomial pair with its normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialModel {
    degree: u32,
    normalization: NormalizationFactors,
    forward: CoefficientSet,
    backward: CoefficientSet,
}

impl PolynomialModel {
    /// Fit both directions to `gcps`.
    ///
    /// Fails if `gcps` is empty or a channel is constant. Having fewer GCPs
    /// than terms is not an error: the minimum-norm solution is returned.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(gcps), fields(n = gcps.len()))
    )]
    pub fn fit(gcps: &[ControlPoint], degree: u32) -> Result<Self> {
        if gcps.is_empty() {
            return Err(GeorefError::insufficient(Stage::Fit, "GCPs", 1, 0));
        }
        let normalization = NormalizationFactors::from_points(gcps)?;
        Self::fit_with_factors(gcps, degree, normalization)
    }

    /// Fit using externally supplied normalization factors.
    pub fn fit_with_factors(
        gcps: &[ControlPoint],
        degree: u32,
        normalization: NormalizationFactors,
    ) -> Result<Self> {
        if gcps.is_empty() {
            return Err(GeorefError::insufficient(Stage::Fit, "GCPs", 1, 0));
        }
        normalization.validate()?;
        let forward = fit_direction(gcps, degree, &normalization, Direction::Forward)?;
        let backward = fit_direction(gcps, degree, &normalization, Direction::Backward)?;
        Ok(Self {
            degree,
            normalization,
            forward,
            backward,
        })
    }

    /// Reassemble a model from persisted parts, checking coefficient lengths
    /// and that every normalization channel is usable.
    pub fn from_parts(
        degree: u32,
        normalization: NormalizationFactors,
        forward: CoefficientSet,
        backward: CoefficientSet,
    ) -> Result<Self> {
        normalization.validate()?;
        let expected = num_terms(degree);
        for len in [forward.a.len(), forward.b.len(), backward.a.len(), backward.b.len()] {
            if len != expected {
                return Err(GeorefError::DimensionMismatch {
                    stage: Stage::Fit,
                    expected,
                    got: len,
                });
            }
        }
        Ok(Self {
            degree,
            normalization,
            forward,
            backward,
        })
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    pub fn normalization(&self) -> &NormalizationFactors {
        &self.normalization
    }

    pub fn coefficients(&self, direction: Direction) -> &CoefficientSet {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    /// Evaluate `direction` on the matching input channels of `points`.
    ///
    /// Returns the two output channels as separate vectors.
    pub fn evaluate(&self, points: &[ControlPoint], direction: Direction) -> (Vec<f64>, Vec<f64>) {
        let inputs: Vec<Point2<f64>> = points.iter().map(|p| direction.input_of(p)).collect();
        self.evaluate_coords(direction, &inputs)
            .into_iter()
            .map(|p| (p.x, p.y))
            .unzip()
    }

    /// Evaluate `direction` on raw input coordinates.
    pub fn evaluate_coords(&self, direction: Direction, inputs: &[Point2<f64>]) -> Vec<Point2<f64>> {
        let (in_a, in_b) = direction.inputs();
        let (out_a, out_b) = direction.outputs();
        let n_in_a = self.normalization.axis(in_a);
        let n_in_b = self.normalization.axis(in_b);
        let n_out_a = self.normalization.axis(out_a);
        let n_out_b = self.normalization.axis(out_b);
        let coeffs = self.coefficients(direction);

        let d = self.degree as usize;
        let mut xp = vec![0.0; d + 1];
        let mut yp = vec![0.0; d + 1];

        inputs
            .iter()
            .map(|p| {
                fill_powers(n_in_a.apply(p.x), &mut xp);
                fill_powers(n_in_b.apply(p.y), &mut yp);
                let mut u = 0.0;
                let mut v = 0.0;
                let mut idx = 0;
                for i in 0..=d {
                    for j in 0..=(d - i) {
                        let t = xp[i] * yp[j];
                        u += coeffs.a[idx] * t;
                        v += coeffs.b[idx] * t;
                        idx += 1;
                    }
                }
                Point2::new(n_out_a.invert(u), n_out_b.invert(v))
            })
            .collect()
    }

    /// Evaluate one point.
    pub fn predict(&self, direction: Direction, input: Point2<f64>) -> Point2<f64> {
        self.evaluate_coords(direction, std::slice::from_ref(&input))[0]
    }

    /// Observed minus predicted output for every point.
    pub fn residuals(&self, points: &[ControlPoint], direction: Direction) -> Vec<Vector2<f64>> {
        let inputs: Vec<Point2<f64>> = points.iter().map(|p| direction.input_of(p)).collect();
        self.evaluate_coords(direction, &inputs)
            .iter()
            .zip(points)
            .map(|(pred, p)| direction.output_of(p) - *pred)
            .collect()
    }
}

fn fit_direction(
    gcps: &[ControlPoint],
    degree: u32,
    normalization: &NormalizationFactors,
    direction: Direction,
) -> Result<CoefficientSet> {
    let (in_a, in_b) = direction.inputs();
    let (out_a, out_b) = direction.outputs();

    let xs: Vec<f64> = gcps.iter().map(|p| normalization.apply(in_a, p.channel(in_a))).collect();
    let ys: Vec<f64> = gcps.iter().map(|p| normalization.apply(in_b, p.channel(in_b))).collect();
    let ta = DVector::from_iterator(
        gcps.len(),
        gcps.iter().map(|p| normalization.apply(out_a, p.channel(out_a))),
    );
    let tb = DVector::from_iterator(
        gcps.len(),
        gcps.iter().map(|p| normalization.apply(out_b, p.channel(out_b))),
    );

    let lsq = LeastSquares::new(design_matrix(&xs, &ys, degree)?);
    let terms = num_terms(degree);
    let rank = lsq.rank();
    if rank < terms {
        debug!(
            "{direction:?} fit is rank deficient (rank {rank} < {terms} terms, {} points); using minimum-norm solution",
            gcps.len()
        );
    }

    Ok(CoefficientSet {
        a: lsq.solve(&ta)?.as_slice().to_vec(),
        b: lsq.solve(&tb)?.as_slice().to_vec(),
    })
}

/// Root-mean-square error of one axis.
pub fn rmse_axis(predicted: &[f64], actual: &[f64]) -> Result<f64> {
    if predicted.len() != actual.len() {
        return Err(GeorefError::DimensionMismatch {
            stage: Stage::Fit,
            expected: predicted.len(),
            got: actual.len(),
        });
    }
    if predicted.is_empty() {
        return Err(GeorefError::insufficient(Stage::Fit, "points", 1, 0));
    }
    let sum: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a) * (p - a))
        .sum();
    Ok((sum / predicted.len() as f64).sqrt())
}

/// Independent RMSE for two axes.
pub fn rmse(
    predicted_a: &[f64],
    predicted_b: &[f64],
    actual_a: &[f64],
    actual_b: &[f64],
) -> Result<(f64, f64)> {
    Ok((rmse_axis(predicted_a, actual_a)?, rmse_axis(predicted_b, actual_b)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    // x = 0.5 + 0.02 X - 0.01 Y + 1e-4 X Y,   y = 3 - 0.015 X + 0.03 Y + 2e-4 X²
    fn quadratic_gcps() -> Vec<ControlPoint> {
        let mut out = Vec::new();
        for r in 0..5 {
            for c in 0..5 {
                let mx = 1000.0 + 40.0 * c as f64 + 3.0 * r as f64;
                let my = 2000.0 + 35.0 * r as f64 - 2.0 * c as f64;
                let (lx, ly) = (mx - 1000.0, my - 2000.0);
                let x = 0.5 + 0.02 * lx - 0.01 * ly + 1e-4 * lx * ly;
                let y = 3.0 - 0.015 * lx + 0.03 * ly + 2e-4 * lx * lx;
                out.push(ControlPoint::new(x, y, mx, my));
            }
        }
        out
    }

    #[test]
    fn term_count_and_order() {
        assert_eq!(num_terms(0), 1);
        assert_eq!(num_terms(1), 3);
        assert_eq!(num_terms(3), 10);
        assert_eq!(
            term_exponents(2),
            vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (2, 0)]
        );
    }

    #[test]
    fn design_matrix_follows_term_order() {
        let a = design_matrix(&[2.0, -1.0], &[3.0, 0.5], 2).expect("matrix");
        assert_eq!(a.shape(), (2, 6));
        let row0: Vec<f64> = a.row(0).iter().copied().collect();
        assert_eq!(row0, vec![1.0, 3.0, 9.0, 2.0, 6.0, 4.0]);
        let row1: Vec<f64> = a.row(1).iter().copied().collect();
        assert_eq!(row1, vec![1.0, 0.5, 0.25, -1.0, -0.5, 1.0]);
    }

    #[test]
    fn design_matrix_rejects_mismatched_inputs() {
        let err = design_matrix(&[1.0, 2.0, 3.0], &[1.0, 2.0], 1).unwrap_err();
        assert!(matches!(
            err,
            GeorefError::DimensionMismatch {
                stage: Stage::Fit,
                expected: 3,
                got: 2,
            }
        ));
    }

    #[test]
    fn degree_zero_is_a_constant_column() {
        let a = design_matrix(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], 0).expect("matrix");
        assert_eq!(a.shape(), (3, 1));
        assert!(a.iter().all(|&v| v == 1.0));

        let gcps = quadratic_gcps();
        let model = PolynomialModel::fit(&gcps, 0).expect("fit");
        let mean_x = gcps.iter().map(|p| p.pixel.x).sum::<f64>() / gcps.len() as f64;
        let mean_y = gcps.iter().map(|p| p.pixel.y).sum::<f64>() / gcps.len() as f64;
        let (px, py) = model.evaluate(&gcps, Direction::Forward);
        for (u, v) in px.iter().zip(&py) {
            assert_relative_eq!(*u, mean_x, epsilon = 1e-9);
            assert_relative_eq!(*v, mean_y, epsilon = 1e-9);
        }
    }

    #[test]
    fn forward_fit_reproduces_training_points() {
        let gcps = quadratic_gcps();
        let model = PolynomialModel::fit(&gcps, 2).expect("fit");
        assert_eq!(model.coefficients(Direction::Forward).len(), 6);

        let (px, py) = model.evaluate(&gcps, Direction::Forward);
        for (i, p) in gcps.iter().enumerate() {
            assert_abs_diff_eq!(px[i], p.pixel.x, epsilon = 1e-8);
            assert_abs_diff_eq!(py[i], p.pixel.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn backward_reads_pixels_and_predicts_map() {
        let gcps: Vec<ControlPoint> = (0..4)
            .flat_map(|r| (0..4).map(move |c| (r as f64, c as f64)))
            .map(|(r, c)| {
                let (x, y) = (c * 100.0, r * 80.0);
                ControlPoint::new(x, y, 350_000.0 + 0.5 * x + 0.1 * y, 5_000_000.0 - 0.5 * y)
            })
            .collect();
        let model = PolynomialModel::fit(&gcps, 1).expect("fit");
        let q = model.predict(Direction::Backward, Point2::new(150.0, 40.0));
        assert_abs_diff_eq!(q.x, 350_079.0, epsilon = 1e-6);
        assert_abs_diff_eq!(q.y, 4_999_980.0, epsilon = 1e-6);

        let back = model.predict(Direction::Forward, q);
        assert_abs_diff_eq!(back.x, 150.0, epsilon = 1e-6);
        assert_abs_diff_eq!(back.y, 40.0, epsilon = 1e-6);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let gcps = quadratic_gcps();
        let model = PolynomialModel::fit(&gcps, 3).expect("fit");
        let first = model.evaluate(&gcps, Direction::Backward);
        let second = model.evaluate(&gcps, Direction::Backward);
        assert_eq!(first, second);
    }

    #[test]
    fn underdetermined_fit_returns_minimum_norm_solution() {
        let gcps = vec![
            ControlPoint::new(0.0, 0.0, 10.0, 20.0),
            ControlPoint::new(10.0, 0.0, 20.0, 21.0),
            ControlPoint::new(0.0, 10.0, 11.0, 30.0),
        ];
        let model = PolynomialModel::fit(&gcps, 2).expect("underdetermined fit");
        let (px, py) = model.evaluate(&gcps, Direction::Forward);
        for (i, p) in gcps.iter().enumerate() {
            assert_abs_diff_eq!(px[i], p.pixel.x, epsilon = 1e-8);
            assert_abs_diff_eq!(py[i], p.pixel.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn empty_gcp_set_is_rejected() {
        let err = PolynomialModel::fit(&[], 1).unwrap_err();
        assert!(matches!(err, GeorefError::InsufficientData { .. }));
    }

    #[test]
    fn from_parts_checks_lengths() {
        let model = PolynomialModel::fit(&quadratic_gcps(), 1).expect("fit");
        let mut short = model.coefficients(Direction::Forward).clone();
        short.b.pop();
        let err = PolynomialModel::from_parts(
            1,
            *model.normalization(),
            short,
            model.coefficients(Direction::Backward).clone(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GeorefError::DimensionMismatch {
                expected: 3,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn from_parts_rejects_zero_std() {
        let model = PolynomialModel::fit(&quadratic_gcps(), 1).expect("fit");
        let mut factors = model.normalization().to_array();
        factors[7] = 0.0;
        let err = PolynomialModel::from_parts(
            1,
            NormalizationFactors::from_array(factors),
            model.coefficients(Direction::Forward).clone(),
            model.coefficients(Direction::Backward).clone(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GeorefError::DegenerateAxis {
                channel: crate::Channel::MapY
            }
        ));
    }

    #[test]
    fn rmse_matches_hand_computation() {
        let (a, b) = rmse(&[1.0, 2.0, 3.0], &[0.0; 3], &[1.0, 2.0, 5.0], &[0.0; 3]).expect("rmse");
        assert_relative_eq!(a, (4.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(a, 1.1547, epsilon = 1e-4);
        assert_eq!(b, 0.0);

        assert!(rmse_axis(&[1.0], &[1.0, 2.0]).is_err());
        assert!(rmse_axis(&[], &[]).is_err());
    }

    #[test]
    fn residuals_are_observed_minus_predicted() {
        let gcps = quadratic_gcps();
        let model = PolynomialModel::fit(&gcps, 1).expect("fit");
        let res = model.residuals(&gcps, Direction::Forward);
        let (px, _) = model.evaluate(&gcps, Direction::Forward);
        for (i, p) in gcps.iter().enumerate() {
            assert_relative_eq!(res[i].x, p.pixel.x - px[i], epsilon = 1e-12);
        }
    }
}

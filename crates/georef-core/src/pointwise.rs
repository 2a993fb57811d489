//! Pointwise correction: interpolate the residuals a fitted model leaves at
//! the GCPs and add them back at ICPs or grid points.
//!
//! Two interpolators are provided:
//!
//! - **Multiquadratic**: exact interpolation with the plain Euclidean distance
//!   kernel. Weights come from a dense `N x N` solve (`O(N³)` time, `O(N²)`
//!   memory), so it is meant for up to a few hundred GCPs.
//! - **Local distance weighted (LDW)**: inverse-distance average of the
//!   nearest GCP in each quadrant around the query, falling back to the four
//!   nearest GCPs overall when a quadrant is empty.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::{GeorefError, Result, Stage};
use crate::{ControlPoint, Direction, GeoTransform, PolynomialModel};

/// Added to LDW distances so a query on top of a GCP stays finite.
pub const LDW_EPSILON: f64 = 1e-10;

const MQ_LARGE_SYSTEM: usize = 500;

/// Norm used for LDW neighbour distances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormOrder {
    L1,
    #[default]
    L2,
    Inf,
}

impl NormOrder {
    #[inline]
    pub fn distance(self, a: Point2<f64>, b: Point2<f64>) -> f64 {
        let d = a - b;
        match self {
            NormOrder::L1 => d.x.abs() + d.y.abs(),
            NormOrder::L2 => d.x.hypot(d.y),
            NormOrder::Inf => d.x.abs().max(d.y.abs()),
        }
    }
}

/// Pairwise Euclidean distances, `rows.len() x cols.len()`.
pub fn distance_matrix(rows: &[Point2<f64>], cols: &[Point2<f64>]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| {
        NormOrder::L2.distance(rows[i], cols[j])
    })
}

fn check_inputs(anchors: &[Point2<f64>], residuals: &[Vector2<f64>]) -> Result<()> {
    if anchors.len() != residuals.len() {
        return Err(GeorefError::DimensionMismatch {
            stage: Stage::Correction,
            expected: anchors.len(),
            got: residuals.len(),
        });
    }
    if anchors.is_empty() {
        return Err(GeorefError::insufficient(Stage::Correction, "GCPs", 1, 0));
    }
    Ok(())
}

/// Solved multiquadratic interpolant for two residual channels.
#[derive(Clone, Debug)]
pub struct Multiquadratic {
    centers: Vec<Point2<f64>>,
    weights_x: DVector<f64>,
    weights_y: DVector<f64>,
}

impl Multiquadratic {
    /// Solve `D w = r` per channel, `D` being the GCP distance matrix.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(n = centers.len()))
    )]
    pub fn fit(centers: &[Point2<f64>], residuals: &[Vector2<f64>]) -> Result<Self> {
        check_inputs(centers, residuals)?;
        let n = centers.len();
        if n > MQ_LARGE_SYSTEM {
            warn!("multiquadratic over {n} GCPs: dense {n}x{n} solve");
        }

        let d = distance_matrix(centers, centers);
        for i in 0..n {
            for j in (i + 1)..n {
                if d[(i, j)] == 0.0 {
                    debug!("GCPs {i} and {j} coincide");
                    return Err(GeorefError::SingularMatrix { size: n });
                }
            }
        }

        let lu = d.lu();
        let rx = DVector::from_iterator(n, residuals.iter().map(|r| r.x));
        let ry = DVector::from_iterator(n, residuals.iter().map(|r| r.y));
        let weights_x = lu.solve(&rx).ok_or(GeorefError::SingularMatrix { size: n })?;
        let weights_y = lu.solve(&ry).ok_or(GeorefError::SingularMatrix { size: n })?;
        if weights_x.iter().chain(weights_y.iter()).any(|w| !w.is_finite()) {
            return Err(GeorefError::SingularMatrix { size: n });
        }

        Ok(Self {
            centers: centers.to_vec(),
            weights_x,
            weights_y,
        })
    }

    pub fn interpolate(&self, queries: &[Point2<f64>]) -> Vec<Vector2<f64>> {
        let dq = distance_matrix(queries, &self.centers);
        let ix = &dq * &self.weights_x;
        let iy = &dq * &self.weights_y;
        ix.iter().zip(iy.iter()).map(|(&x, &y)| Vector2::new(x, y)).collect()
    }
}

/// Interpolate `residuals` (anchored at `gcp_coords`) at `queries`.
pub fn multiquadratic(
    gcp_coords: &[Point2<f64>],
    residuals: &[Vector2<f64>],
    queries: &[Point2<f64>],
) -> Result<Vec<Vector2<f64>>> {
    Ok(Multiquadratic::fit(gcp_coords, residuals)?.interpolate(queries))
}

/// Indices of the GCPs used for an LDW estimate at `query`.
///
/// One nearest GCP per quadrant (boundaries belong to the `>=` side). If any
/// quadrant is empty, the four globally nearest GCPs are used instead.
pub fn select_neighbours(coords: &[Point2<f64>], query: Point2<f64>, norm: NormOrder) -> Vec<usize> {
    let mut best: [Option<(usize, f64)>; 4] = [None; 4];
    for (i, &p) in coords.iter().enumerate() {
        let quadrant = match (p.x >= query.x, p.y >= query.y) {
            (true, true) => 0,
            (false, true) => 1,
            (false, false) => 2,
            (true, false) => 3,
        };
        let dist = norm.distance(p, query);
        match best[quadrant] {
            Some((_, d)) if d <= dist => {}
            _ => best[quadrant] = Some((i, dist)),
        }
    }

    if best.iter().all(Option::is_some) {
        return best.iter().flatten().map(|&(i, _)| i).collect();
    }

    let mut order: Vec<(usize, f64)> = coords
        .iter()
        .enumerate()
        .map(|(i, &p)| (i, norm.distance(p, query)))
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));
    order.into_iter().take(4).map(|(i, _)| i).collect()
}

fn ldw_at(
    coords: &[Point2<f64>],
    residuals: &[Vector2<f64>],
    query: Point2<f64>,
    norm: NormOrder,
) -> Vector2<f64> {
    let mut acc = Vector2::zeros();
    let mut wsum = 0.0;
    for i in select_neighbours(coords, query, norm) {
        let w = 1.0 / (norm.distance(coords[i], query) + LDW_EPSILON);
        acc += residuals[i] * w;
        wsum += w;
    }
    acc / wsum
}

/// LDW estimate of the residual at one query point.
pub fn local_distance_weighted(
    gcp_coords: &[Point2<f64>],
    residuals: &[Vector2<f64>],
    query: Point2<f64>,
    norm: NormOrder,
) -> Result<Vector2<f64>> {
    check_inputs(gcp_coords, residuals)?;
    Ok(ldw_at(gcp_coords, residuals, query, norm))
}

/// Interpolation scheme for [`PointwiseCorrector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PointwiseMethod {
    Multiquadratic,
    LocalDistanceWeighted {
        #[serde(default)]
        norm: NormOrder,
    },
}

#[derive(Clone, Debug)]
enum Field {
    Multiquadratic(Multiquadratic),
    Ldw {
        norm: NormOrder,
        anchors: Vec<Point2<f64>>,
        residuals: Vec<Vector2<f64>>,
    },
}

/// Residual field of one direction, ready to be evaluated anywhere.
#[derive(Clone, Debug)]
pub struct PointwiseCorrector {
    method: PointwiseMethod,
    field: Field,
}

impl PointwiseCorrector {
    pub fn new(
        method: PointwiseMethod,
        anchors: Vec<Point2<f64>>,
        residuals: Vec<Vector2<f64>>,
    ) -> Result<Self> {
        check_inputs(&anchors, &residuals)?;
        let field = match method {
            PointwiseMethod::Multiquadratic => {
                Field::Multiquadratic(Multiquadratic::fit(&anchors, &residuals)?)
            }
            PointwiseMethod::LocalDistanceWeighted { norm } => Field::Ldw {
                norm,
                anchors,
                residuals,
            },
        };
        Ok(Self { method, field })
    }

    /// Residuals of `model` at `gcps`, anchored at the input coordinates of
    /// `direction` (map coordinates for forward, pixel coordinates for
    /// backward).
    pub fn from_model(
        model: &PolynomialModel,
        gcps: &[ControlPoint],
        direction: Direction,
        method: PointwiseMethod,
    ) -> Result<Self> {
        let anchors = gcps.iter().map(|p| direction.input_of(p)).collect();
        Self::new(method, anchors, model.residuals(gcps, direction))
    }

    pub fn method(&self) -> PointwiseMethod {
        self.method
    }

    pub fn corrections(&self, queries: &[Point2<f64>]) -> Vec<Vector2<f64>> {
        match &self.field {
            Field::Multiquadratic(mq) => mq.interpolate(queries),
            Field::Ldw {
                norm,
                anchors,
                residuals,
            } => queries
                .iter()
                .map(|&q| ldw_at(anchors, residuals, q, *norm))
                .collect(),
        }
    }
}

/// Polynomial model plus interpolated residual correction in both directions.
#[derive(Clone, Debug)]
pub struct CorrectedModel {
    model: PolynomialModel,
    forward: PointwiseCorrector,
    backward: PointwiseCorrector,
}

impl CorrectedModel {
    pub fn new(model: PolynomialModel, gcps: &[ControlPoint], method: PointwiseMethod) -> Result<Self> {
        let forward = PointwiseCorrector::from_model(&model, gcps, Direction::Forward, method)?;
        let backward = PointwiseCorrector::from_model(&model, gcps, Direction::Backward, method)?;
        Ok(Self {
            model,
            forward,
            backward,
        })
    }

    pub fn model(&self) -> &PolynomialModel {
        &self.model
    }

    pub fn corrector(&self, direction: Direction) -> &PointwiseCorrector {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    fn corrected(&self, direction: Direction, inputs: &[Point2<f64>]) -> Vec<Point2<f64>> {
        let base = self.model.evaluate_coords(direction, inputs);
        let delta = self.corrector(direction).corrections(inputs);
        base.into_iter().zip(delta).map(|(p, d)| p + d).collect()
    }
}

impl GeoTransform for CorrectedModel {
    fn to_pixel(&self, map: &[Point2<f64>]) -> Vec<Point2<f64>> {
        self.corrected(Direction::Forward, map)
    }

    fn to_map(&self, pixel: &[Point2<f64>]) -> Vec<Point2<f64>> {
        self.corrected(Direction::Backward, pixel)
    }
}

//! Half-plane splitting of control points for piecewise regression.
//!
//! A point's region is the concatenation of one sign bit per split line, in
//! definition order (first line is the most significant bit; a set bit means
//! the point lies on side B). No polygon clipping is done: lines are assumed
//! to span the whole image and not cross each other. Crossing lines still
//! produce a well-defined, if less meaningful, region id.

use log::{debug, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::{GeorefError, Result, Stage};
use crate::{AccuracyReport, ControlPoint, PolynomialModel};

/// Upper bound on split lines, keeps `2^N` region ids enumerable.
pub const MAX_SPLIT_LINES: usize = 16;

/// Minimum GCPs for a region to be fitted.
pub const MIN_REGION_GCPS: usize = 2;
/// Minimum ICPs for a region to be assessed.
pub const MIN_REGION_ICPS: usize = 1;

/// A directed line segment in pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitLine {
    pub start: Point2<f64>,
    pub end: Point2<f64>,
}

impl SplitLine {
    pub fn new(start: Point2<f64>, end: Point2<f64>) -> Self {
        Self { start, end }
    }

    pub fn side(&self, p: Point2<f64>) -> Side {
        if side_of_line(p, self.start, self.end) >= 0.0 {
            Side::A
        } else {
            Side::B
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Cross product `>= 0`, points on the line included.
    A,
    /// Cross product `< 0`.
    B,
}

/// Signed cross product `(x2-x1)(py-y1) - (y2-y1)(px-x1)`.
///
/// Positive when `p` is counter-clockwise of `start -> end` in a y-up frame:
/// for the line `(0,0) -> (10,0)`, `(5,5)` is positive and `(5,-5)` negative.
///
/// This is the negation of the `(px-x1)(y2-y1) - (py-y1)(x2-x1)` form, so for
/// points off the line [`Side::A`] and [`Side::B`] are swapped relative to
/// that convention. Points on the line are side A under both.
#[inline]
pub fn side_of_line(p: Point2<f64>, start: Point2<f64>, end: Point2<f64>) -> f64 {
    (end.x - start.x) * (p.y - start.y) - (end.y - start.y) * (p.x - start.x)
}

/// Region id of `p` for the ordered `lines`.
pub fn assign_region(p: Point2<f64>, lines: &[SplitLine]) -> u32 {
    lines.iter().fold(0u32, |id, line| {
        let bit = u32::from(line.side(p) == Side::B);
        (id << 1) | bit
    })
}

/// GCPs and ICPs that fall in one region.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionPoints {
    pub gcps: Vec<ControlPoint>,
    pub icps: Vec<ControlPoint>,
}

impl RegionPoints {
    pub fn is_sufficient(&self) -> bool {
        self.gcps.len() >= MIN_REGION_GCPS && self.icps.len() >= MIN_REGION_ICPS
    }
}

/// Route GCPs and ICPs into `2^lines.len()` regions by pixel position.
///
/// The returned vector is indexed by region id.
pub fn partition(
    gcps: &[ControlPoint],
    icps: &[ControlPoint],
    lines: &[SplitLine],
) -> Result<Vec<RegionPoints>> {
    if lines.len() > MAX_SPLIT_LINES {
        return Err(GeorefError::invalid(
            Stage::Partition,
            format!("{} split lines (max {MAX_SPLIT_LINES})", lines.len()),
        ));
    }
    if let Some(line) = lines.iter().find(|l| l.start == l.end) {
        return Err(GeorefError::invalid(
            Stage::Partition,
            format!("zero-length split line at ({}, {})", line.start.x, line.start.y),
        ));
    }

    let mut regions = vec![RegionPoints::default(); 1usize << lines.len()];
    for p in gcps {
        regions[assign_region(p.pixel, lines) as usize].gcps.push(*p);
    }
    for p in icps {
        regions[assign_region(p.pixel, lines) as usize].icps.push(*p);
    }
    Ok(regions)
}

/// Result of fitting one region.
#[derive(Debug)]
pub enum RegionOutcome {
    Fitted {
        model: PolynomialModel,
        accuracy: AccuracyReport,
    },
    /// Fewer than [`MIN_REGION_GCPS`] GCPs or [`MIN_REGION_ICPS`] ICPs.
    InsufficientData,
    /// The fit itself failed (e.g. a constant channel inside the region).
    Failed(GeorefError),
}

#[derive(Debug)]
pub struct RegionReport {
    pub region: u32,
    pub gcp_count: usize,
    pub icp_count: usize,
    pub outcome: RegionOutcome,
}

impl RegionReport {
    pub fn model(&self) -> Option<&PolynomialModel> {
        match &self.outcome {
            RegionOutcome::Fitted { model, .. } => Some(model),
            _ => None,
        }
    }

    pub fn accuracy(&self) -> Option<&AccuracyReport> {
        match &self.outcome {
            RegionOutcome::Fitted { accuracy, .. } => Some(accuracy),
            _ => None,
        }
    }
}

/// Fit an independent polynomial per region and assess it on that region's
/// ICPs.
///
/// A region that cannot be fitted does not abort the others; its report
/// carries the reason.
pub fn piecewise_regression(
    gcps: &[ControlPoint],
    icps: &[ControlPoint],
    lines: &[SplitLine],
    degree: u32,
) -> Result<Vec<RegionReport>> {
    let regions = partition(gcps, icps, lines)?;
    let reports = regions
        .into_iter()
        .enumerate()
        .map(|(id, pts)| {
            let region = id as u32;
            let outcome = if !pts.is_sufficient() {
                debug!(
                    "region {region}: {} GCPs, {} ICPs, not fitted",
                    pts.gcps.len(),
                    pts.icps.len()
                );
                RegionOutcome::InsufficientData
            } else {
                match PolynomialModel::fit(&pts.gcps, degree).and_then(|model| {
                    let accuracy = AccuracyReport::compute(&model, pts.gcps.len(), &pts.icps)?;
                    Ok((model, accuracy))
                }) {
                    Ok((model, accuracy)) => RegionOutcome::Fitted { model, accuracy },
                    Err(e) => {
                        warn!("region {region}: {e}");
                        RegionOutcome::Failed(e)
                    }
                }
            };
            RegionReport {
                region,
                gcp_count: pts.gcps.len(),
                icp_count: pts.icps.len(),
                outcome,
            }
        })
        .collect();
    Ok(reports)
}

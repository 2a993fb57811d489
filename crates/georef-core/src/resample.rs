//! Chunked resampling of a source raster onto a regular map-space grid.
//!
//! The output grid is north-up: row 0 sits at the maximum Y of the ground
//! extent, column 0 at its minimum X. Each chunk of rows is mapped into source
//! pixel space with one batched [`GeoTransform::to_pixel`] call and sampled
//! bilinearly. Chunks run strictly in row order; cancellation is observed only
//! between chunks.

use std::ops::Range;

use log::{debug, info};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::{GeorefError, Result, Stage};
use crate::image::{sample_bilinear_u8, RasterImage, RasterView};
use crate::{ControlPoint, GeoTransform};

pub const DEFAULT_CHUNK_ROWS: usize = 500;

/// Largest output raster accepted, in samples (`cols * rows * channels`):
/// 4 GiB of 8-bit data, e.g. a 37800 x 37800 RGB mosaic.
pub const MAX_OUTPUT_SAMPLES: u64 = 1 << 32;

/// How the ground extent of the output grid is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsStrategy {
    /// Bounding box of the GCP map coordinates.
    #[default]
    GcpExtent,
    /// Bounding box of the four source image corners mapped with `to_map`.
    ImageCorners,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleParams {
    /// Grid spacing in map units (GSD), `> 0`.
    pub step: f64,
    /// Rows per batch, `>= 1`.
    pub chunk_rows: usize,
    pub bounds: BoundsStrategy,
}

impl Default for ResampleParams {
    fn default() -> Self {
        Self {
            step: 1.0,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            bounds: BoundsStrategy::default(),
        }
    }
}

impl ResampleParams {
    pub fn with_step(step: f64) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(GeorefError::invalid(
                Stage::Resample,
                format!("step must be > 0, got {}", self.step),
            ));
        }
        if self.chunk_rows == 0 {
            return Err(GeorefError::invalid(Stage::Resample, "chunk_rows must be >= 1"));
        }
        Ok(())
    }
}

/// Axis-aligned map-space rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundExtent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl GroundExtent {
    pub fn from_points(points: impl IntoIterator<Item = Point2<f64>>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Self {
                    min_x: p.x,
                    min_y: p.y,
                    max_x: p.x,
                    max_y: p.y,
                },
                Some(e) => Self {
                    min_x: e.min_x.min(p.x),
                    min_y: e.min_y.min(p.y),
                    max_x: e.max_x.max(p.x),
                    max_y: e.max_y.max(p.y),
                },
            })
        })
    }

    pub fn from_gcps(gcps: &[ControlPoint]) -> Result<Self> {
        Self::from_points(gcps.iter().map(|p| p.map))
            .ok_or_else(|| GeorefError::insufficient(Stage::Resample, "GCPs", 1, 0))
    }

    pub fn from_image_corners(transform: &dyn GeoTransform, width: usize, height: usize) -> Result<Self> {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(0.0, h),
            Point2::new(w, h),
        ];
        let mapped = transform.to_map(&corners);
        if mapped.len() != corners.len() {
            return Err(GeorefError::DimensionMismatch {
                stage: Stage::Resample,
                expected: corners.len(),
                got: mapped.len(),
            });
        }
        Self::from_points(mapped).ok_or_else(|| GeorefError::invalid(Stage::Resample, "no image corners"))
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Regular output grid: `cols = ceil(width / step)`, `rows = ceil(height / step)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundGrid {
    /// Map X of column 0.
    pub origin_x: f64,
    /// Map Y of row 0 (the top row).
    pub origin_y: f64,
    pub step: f64,
    pub cols: usize,
    pub rows: usize,
}

impl GroundGrid {
    pub fn new(extent: &GroundExtent, step: f64) -> Result<Self> {
        let count = |span: f64, axis: &str| -> Result<usize> {
            let n = (span / step).ceil();
            if !n.is_finite() || n < 1.0 {
                return Err(GeorefError::invalid(
                    Stage::Resample,
                    format!("ground extent along {axis} is empty or not finite ({span})"),
                ));
            }
            Ok(n as usize)
        };
        Ok(Self {
            origin_x: extent.min_x,
            origin_y: extent.max_y,
            step,
            cols: count(extent.width(), "X")?,
            rows: count(extent.height(), "Y")?,
        })
    }

    #[inline]
    pub fn coord(&self, col: usize, row: usize) -> Point2<f64> {
        Point2::new(
            self.origin_x + col as f64 * self.step,
            self.origin_y - row as f64 * self.step,
        )
    }

    /// Flattened map coordinates of `rows`, row-major.
    pub fn row_coords(&self, rows: Range<usize>) -> Vec<Point2<f64>> {
        let mut out = Vec::with_capacity(rows.len() * self.cols);
        for r in rows {
            out.extend((0..self.cols).map(|c| self.coord(c, r)));
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResampledImage {
    pub image: RasterImage,
    pub grid: GroundGrid,
}

/// Terminal result of a resample run that did not fail.
#[derive(Clone, Debug, PartialEq)]
pub enum ResampleOutcome {
    Completed(ResampledImage),
    Cancelled,
}

impl ResampleOutcome {
    pub fn into_image(self) -> Option<ResampledImage> {
        match self {
            ResampleOutcome::Completed(img) => Some(img),
            ResampleOutcome::Cancelled => None,
        }
    }
}

/// Validate inputs and compute the output grid without sampling anything.
pub fn plan_grid(
    src: &RasterView<'_>,
    transform: &dyn GeoTransform,
    gcps: &[ControlPoint],
    params: &ResampleParams,
) -> Result<GroundGrid> {
    src.validate()?;
    params.validate()?;
    let extent = match params.bounds {
        BoundsStrategy::GcpExtent => GroundExtent::from_gcps(gcps)?,
        BoundsStrategy::ImageCorners => GroundExtent::from_image_corners(transform, src.width, src.height)?,
    };
    let grid = GroundGrid::new(&extent, params.step)?;
    let samples = (grid.cols as u64)
        .checked_mul(grid.rows as u64)
        .and_then(|n| n.checked_mul(src.channels as u64));
    match samples {
        Some(n) if n <= MAX_OUTPUT_SAMPLES && usize::try_from(n).is_ok() => Ok(grid),
        _ => Err(GeorefError::invalid(
            Stage::Resample,
            format!(
                "output grid {}x{}x{} exceeds {MAX_OUTPUT_SAMPLES} samples (step {} too small?)",
                grid.cols, grid.rows, src.channels, params.step
            ),
        )),
    }
}

/// Resample `src` onto a map-space grid using `transform.to_pixel`.
///
/// `progress` receives the completed percentage after every chunk. `cancel`
/// is polled before the first chunk and after each chunk; once it returns
/// `true` no further progress is reported and [`ResampleOutcome::Cancelled`]
/// is returned. Output larger than [`MAX_OUTPUT_SAMPLES`] is rejected up
/// front.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip_all,
        fields(width = src.width, height = src.height, step = params.step)
    )
)]
pub fn resample(
    src: &RasterView<'_>,
    transform: &dyn GeoTransform,
    gcps: &[ControlPoint],
    params: &ResampleParams,
    progress: &mut dyn FnMut(f64),
    cancel: &dyn Fn() -> bool,
) -> Result<ResampleOutcome> {
    let grid = plan_grid(src, transform, gcps, params)?;
    info!(
        "resampling {}x{} source onto {}x{} grid (step {}, {} rows per chunk)",
        src.width, src.height, grid.cols, grid.rows, grid.step, params.chunk_rows
    );

    // Polled here and after every chunk.
    if cancel() {
        info!("resample cancelled before the first chunk");
        return Ok(ResampleOutcome::Cancelled);
    }
    let channels = src.channels;
    let mut out = RasterImage::zeros(grid.cols, grid.rows, channels)?;
    let row_len = grid.cols * channels;
    let (max_x, max_y) = ((src.width - 1) as f64, (src.height - 1) as f64);

    let mut start = 0;
    while start < grid.rows {
        let end = (start + params.chunk_rows).min(grid.rows);

        let coords = grid.row_coords(start..end);
        let pixels = transform.to_pixel(&coords);
        if pixels.len() != coords.len() {
            return Err(GeorefError::DimensionMismatch {
                stage: Stage::Resample,
                expected: coords.len(),
                got: pixels.len(),
            });
        }

        let chunk = &mut out.data[start * row_len..end * row_len];
        let mut valid = 0usize;
        for (dst, p) in chunk.chunks_exact_mut(channels).zip(&pixels) {
            if p.x >= 0.0 && p.x < max_x && p.y >= 0.0 && p.y < max_y {
                for (c, v) in dst.iter_mut().enumerate() {
                    *v = sample_bilinear_u8(src, p.x, p.y, c);
                }
                valid += 1;
            }
        }
        debug!("rows {start}..{end}: {valid}/{} samples inside source", pixels.len());

        if cancel() {
            info!("resample cancelled after row {end}");
            return Ok(ResampleOutcome::Cancelled);
        }
        progress(100.0 * end as f64 / grid.rows as f64);
        start = end;
    }

    Ok(ResampleOutcome::Completed(ResampledImage { image: out, grid }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// map (X, Y) = (x, 100 - y): unit scale, north-up, exact in floating point.
    struct Flip;

    impl GeoTransform for Flip {
        fn to_pixel(&self, map: &[Point2<f64>]) -> Vec<Point2<f64>> {
            map.iter().map(|p| Point2::new(p.x, 100.0 - p.y)).collect()
        }

        fn to_map(&self, pixel: &[Point2<f64>]) -> Vec<Point2<f64>> {
            pixel.iter().map(|p| Point2::new(p.x, 100.0 - p.y)).collect()
        }
    }

    fn flip_model() -> (Flip, Vec<ControlPoint>) {
        let gcps = [(0.0, 0.0), (9.0, 0.0), (0.0, 9.0), (9.0, 9.0)]
            .iter()
            .map(|&(x, y)| ControlPoint::new(x, y, x, 100.0 - y))
            .collect();
        (Flip, gcps)
    }

    fn gradient(w: usize, h: usize) -> RasterImage {
        let data = (0..h).flat_map(|y| (0..w).map(move |x| (10 * x + y) as u8)).collect();
        RasterImage::new(w, h, 1, data).expect("image")
    }

    #[test]
    fn grid_follows_arange_counts() {
        let extent = GroundExtent {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 10.0,
            max_y: 4.5,
        };
        let grid = GroundGrid::new(&extent, 2.0).expect("grid");
        assert_eq!((grid.cols, grid.rows), (5, 3));
        assert_eq!(grid.coord(0, 0), Point2::new(0.0, 4.5));
        assert_eq!(grid.coord(4, 2), Point2::new(8.0, 0.5));
        assert_eq!(grid.row_coords(1..3).len(), 10);
    }

    #[test]
    fn tiny_step_is_rejected_before_allocation() {
        let (model, gcps) = flip_model();
        let img = gradient(10, 10);
        let params = ResampleParams::with_step(1e-7);
        let err = plan_grid(&img.view(), &model, &gcps, &params).unwrap_err();
        assert!(matches!(
            err,
            GeorefError::InvalidParameter {
                stage: Stage::Resample,
                ..
            }
        ));

        let mut events = 0;
        let res = resample(
            &img.view(),
            &model,
            &gcps,
            &params,
            &mut |_: f64| events += 1,
            &|| true,
        );
        assert!(matches!(res, Err(GeorefError::InvalidParameter { .. })));
        assert_eq!(events, 0);
    }

    #[test]
    fn rejects_bad_params() {
        let (model, gcps) = flip_model();
        let img = gradient(10, 10);
        let mut sink = |_: f64| {};
        for params in [
            ResampleParams::with_step(0.0),
            ResampleParams::with_step(-1.0),
            ResampleParams {
                chunk_rows: 0,
                ..ResampleParams::default()
            },
        ] {
            let err = resample(&img.view(), &model, &gcps, &params, &mut sink, &|| false).unwrap_err();
            assert!(matches!(err, GeorefError::InvalidParameter { .. }));
        }
        let err = resample(&img.view(), &model, &[], &ResampleParams::default(), &mut sink, &|| false)
            .unwrap_err();
        assert!(matches!(err, GeorefError::InsufficientData { .. }));
    }

    #[test]
    fn identity_like_model_copies_the_interior() {
        let (model, gcps) = flip_model();
        let img = gradient(10, 10);
        let params = ResampleParams {
            step: 1.0,
            chunk_rows: 4,
            bounds: BoundsStrategy::GcpExtent,
        };
        let mut events = Vec::new();
        let outcome = resample(&img.view(), &model, &gcps, &params, &mut |p: f64| events.push(p), &|| false)
            .expect("resample");
        let out = outcome.into_image().expect("completed").image;
        assert_eq!((out.width, out.height), (9, 9));

        // Grid row r is map Y = 100 - r, i.e. source row r.
        for r in 0..9 {
            for c in 0..9 {
                assert_eq!(out.get(c, r, 0), img.get(c, r, 0), "at ({c}, {r})");
            }
        }
        assert_eq!(events.len(), 3);
        assert_abs_diff_eq!(events[2], 100.0);
        assert!(events.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn out_of_bounds_samples_are_zero() {
        let (model, gcps) = flip_model();
        let img = RasterImage::new(4, 4, 3, vec![200; 48]).expect("image");
        let out = resample(
            &img.view(),
            &model,
            &gcps,
            &ResampleParams::default(),
            &mut |_: f64| {},
            &|| false,
        )
        .expect("resample")
        .into_image()
        .expect("completed")
        .image;
        assert_eq!(out.channels, 3);
        assert_eq!(out.get(0, 0, 2), 200);
        // Pixel (3, 0) is on the last source column and is masked out.
        assert_eq!(out.get(3, 0, 0), 0);
        assert_eq!(out.get(8, 8, 1), 0);
    }

    #[test]
    fn image_corner_bounds_cover_the_source() {
        let (model, gcps) = flip_model();
        let img = gradient(20, 10);
        let params = ResampleParams {
            bounds: BoundsStrategy::ImageCorners,
            ..ResampleParams::with_step(2.0)
        };
        let grid = plan_grid(&img.view(), &model, &gcps, &params).expect("grid");
        assert_eq!((grid.cols, grid.rows), (10, 5));
        assert_abs_diff_eq!(grid.origin_x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(grid.origin_y, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn cancellation_after_first_chunk_stops_progress() {
        use std::cell::Cell;

        let (model, gcps) = flip_model();
        let img = gradient(10, 10);
        let params = ResampleParams {
            chunk_rows: 2,
            ..ResampleParams::default()
        };
        let polls = Cell::new(0);
        let cancel = || {
            polls.set(polls.get() + 1);
            polls.get() > 2
        };
        let mut events = Vec::new();
        let outcome = resample(&img.view(), &model, &gcps, &params, &mut |p: f64| events.push(p), &cancel)
            .expect("resample");
        assert_eq!(outcome, ResampleOutcome::Cancelled);
        assert_eq!(events.len(), 1);
    }
}

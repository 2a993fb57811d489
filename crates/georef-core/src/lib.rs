//! Transform fitting and grid resampling for image-to-map georeferencing.
//!
//! Given ground control points (pixel ↔ map pairs) this crate fits
//! polynomial, affine and conformal models in both directions, measures
//! their accuracy on independent check points, optionally corrects the
//! residuals pointwise (multiquadratic or local distance weighted), and
//! resamples a raster onto a regular north-up map grid.
//!
//! It works on plain buffers ([`RasterImage`]) and point lists; image codecs
//! and the command line live in the `georef` facade crate.
//!
//! ```
//! use georef_core::{AccuracyReport, ControlPoint, GeoTransform, PolynomialModel};
//! use nalgebra::Point2;
//!
//! let gcps: Vec<ControlPoint> = [(0.0, 0.0), (100.0, 0.0), (0.0, 80.0), (100.0, 80.0)]
//!     .iter()
//!     .map(|&(x, y)| ControlPoint::new(x, y, 5000.0 + 0.5 * x, 9000.0 - 0.5 * y))
//!     .collect();
//! let model = PolynomialModel::fit(&gcps, 1)?;
//! let map = model.to_map(&[Point2::new(50.0, 40.0)]);
//! assert!((map[0].x - 5025.0).abs() < 1e-9);
//!
//! let icps = [ControlPoint::new(20.0, 10.0, 5010.0, 8995.0)];
//! let report = AccuracyReport::compute(&model, gcps.len(), &icps)?;
//! assert!(report.backward.total() < 1e-9);
//! # Ok::<(), georef_core::GeorefError>(())
//! ```

mod error;
mod image;
mod io;
mod linear;
mod logger;
mod normalize;
mod partition;
mod point;
mod pointwise;
mod polynomial;
mod resample;
mod session;
mod task;
mod transform;

pub use error::{GeorefError, Result, Stage};
pub use image::{sample_bilinear, sample_bilinear_u8, RasterImage, RasterView};
pub use io::{
    GeorefConfig, GeorefIoError, GeorefReport, ModelKind, OutputInfo, PointRecord, PointTable,
    RegionSummary,
};
pub use linear::{LinearKind, LinearMap, LinearModel};
pub use normalize::{AxisStats, NormalizationFactors};
pub use partition::{
    assign_region, partition, piecewise_regression, side_of_line, RegionOutcome, RegionPoints,
    RegionReport, Side, SplitLine, MAX_SPLIT_LINES, MIN_REGION_GCPS, MIN_REGION_ICPS,
};
pub use point::{Channel, ControlPoint, Direction};
pub use pointwise::{
    distance_matrix, local_distance_weighted, multiquadratic, select_neighbours, CorrectedModel,
    Multiquadratic, NormOrder, PointwiseCorrector, PointwiseMethod, LDW_EPSILON,
};
pub use polynomial::{
    design_matrix, num_terms, rmse, rmse_axis, term_exponents, CoefficientSet, PolynomialModel,
};
pub use resample::{
    plan_grid, resample, BoundsStrategy, GroundExtent, GroundGrid, ResampleOutcome,
    ResampleParams, ResampledImage, DEFAULT_CHUNK_ROWS, MAX_OUTPUT_SAMPLES,
};
pub use session::{Session, SessionBundle};
pub use task::{CancelToken, Progress, ResampleJob, ResampleState, ResampleTask};
pub use transform::{AccuracyReport, GeoTransform, Rmse};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_ENV};

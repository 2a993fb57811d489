//! High-level facade for the `georef` workspace.
//!
//! This crate provides:
//! - re-exports of the transform and resampling engine in [`core`]
//! - (feature `image`) conversion between `image::DynamicImage` and
//!   [`core::RasterImage`], plus world-file output for resampled rasters
//! - (feature `cli`) the `georef` command line tool
//!
//! ## Quickstart
//!
//! ```no_run
//! use georef::{raster, PointTable, ResampleParams, ResampleTask, Session};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let table = PointTable::load("points.txt")?;
//! let mut session = Session::from_table(&table);
//! session.fit(2)?;
//! println!("{:?}", session.assess()?);
//!
//! let source = raster::load_raster("scan.png")?;
//! let mut task = ResampleTask::spawn(session.resample_job(source, ResampleParams::with_step(0.5))?);
//! for pct in task.progress() {
//!     eprintln!("{pct:5.1}%");
//! }
//! if let Some(out) = task.result()?.into_image() {
//!     raster::save_raster(&out.image, "map.png")?;
//!     raster::write_world_file(&out.grid, "map.pgw")?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `georef::core`: points, models, pointwise correction, resampling, sessions.
//! - `georef::raster` (feature `image`): codec glue for [`core::RasterImage`].

pub use georef_core as core;

pub use georef_core::{
    AccuracyReport, ControlPoint, CorrectedModel, Direction, GeoTransform, GeorefConfig,
    GeorefError, GeorefReport, LinearModel, PointTable, PointwiseMethod, PolynomialModel,
    RasterImage, ResampleOutcome, ResampleParams, ResampleTask, Session, SessionBundle, SplitLine,
};

#[cfg(feature = "image")]
pub mod raster;

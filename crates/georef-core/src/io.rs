//! Point tables, JSON configuration and report helpers.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::linear::LinearKind;
use crate::partition::{RegionOutcome, RegionReport, SplitLine};
use crate::pointwise::PointwiseMethod;
use crate::resample::{BoundsStrategy, ResampleParams, DEFAULT_CHUNK_ROWS};
use crate::{AccuracyReport, ControlPoint};

#[derive(thiserror::Error, Debug)]
pub enum GeorefIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// One row of a point table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: String,
    pub point: ControlPoint,
    /// Held out for validation instead of fitting.
    #[serde(default)]
    pub icp: bool,
}

/// Whitespace-separated point list, one record per line:
///
/// ```text
/// # id  x      y      X          Y           [Z]    [icp]
/// 1     120.5  88.0   512034.2   4201933.7   312.0
/// 2     910.0  75.25  512301.9   4201940.1   305.5  icp
/// ```
///
/// `#` starts a comment. A `Z` of `-` means no elevation. The optional seventh
/// column marks an ICP when it is `1`, `true`, `yes` or `icp`
/// (case-insensitive).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointTable {
    pub records: Vec<PointRecord>,
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "icp" => Some(true),
        "0" | "false" | "no" | "gcp" => Some(false),
        _ => None,
    }
}

impl FromStr for PointTable {
    type Err = GeorefIoError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut records = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let cols: Vec<&str> = content.split_whitespace().collect();
            if !(5..=7).contains(&cols.len()) {
                return Err(GeorefIoError::Parse {
                    line,
                    message: format!("expected 5 to 7 columns, found {}", cols.len()),
                });
            }
            let num = |i: usize| -> Result<f64, GeorefIoError> {
                cols[i].parse::<f64>().map_err(|e| GeorefIoError::Parse {
                    line,
                    message: format!("column {}: {e} ({:?})", i + 1, cols[i]),
                })
            };

            let mut point = ControlPoint::new(num(1)?, num(2)?, num(3)?, num(4)?);
            if cols.len() >= 6 && cols[5] != "-" {
                point = point.with_elevation(num(5)?);
            }
            let icp = match cols.get(6) {
                Some(flag) => parse_flag(flag).ok_or_else(|| GeorefIoError::Parse {
                    line,
                    message: format!("unrecognised ICP flag {flag:?}"),
                })?,
                None => false,
            };
            records.push(PointRecord {
                id: cols[0].to_string(),
                point,
                icp,
            });
        }
        Ok(Self { records })
    }
}

impl PointTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GeorefIoError> {
        fs::read_to_string(path)?.parse()
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), GeorefIoError> {
        fs::write(path, self.to_text())?;
        Ok(())
    }

    /// Text form accepted by [`PointTable::from_str`].
    pub fn to_text(&self) -> String {
        let mut out = String::from("# id x y X Y Z icp\n");
        for r in &self.records {
            let p = &r.point;
            let _ = writeln!(
                out,
                "{} {} {} {} {} {} {}",
                r.id,
                p.pixel.x,
                p.pixel.y,
                p.map.x,
                p.map.y,
                p.elevation.map_or_else(|| "-".to_string(), |z| z.to_string()),
                u8::from(r.icp)
            );
        }
        out
    }

    /// `(gcps, icps)` in file order.
    pub fn split(&self) -> (Vec<ControlPoint>, Vec<ControlPoint>) {
        let (icps, gcps): (Vec<&PointRecord>, Vec<&PointRecord>) =
            self.records.iter().partition(|r| r.icp);
        (
            gcps.into_iter().map(|r| r.point).collect(),
            icps.into_iter().map(|r| r.point).collect(),
        )
    }
}

fn default_degree() -> u32 {
    1
}

fn default_step() -> f64 {
    1.0
}

fn default_chunk_rows() -> usize {
    DEFAULT_CHUNK_ROWS
}

/// Transform family fitted from a config.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Bivariate polynomial of the configured degree.
    #[default]
    Polynomial,
    Affine,
    Conformal,
}

impl ModelKind {
    /// The linear family, or `None` for the polynomial.
    pub fn linear(self) -> Option<LinearKind> {
        match self {
            ModelKind::Polynomial => None,
            ModelKind::Affine => Some(LinearKind::Affine),
            ModelKind::Conformal => Some(LinearKind::Conformal),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ModelKind::Polynomial => "polynomial",
            ModelKind::Affine => "affine",
            ModelKind::Conformal => "conformal",
        })
    }
}

/// Configuration for the `georef` command line tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeorefConfig {
    pub points_path: String,
    #[serde(default)]
    pub image_path: Option<String>,
    /// Transform family; `degree` and `correction` apply to the polynomial
    /// only.
    #[serde(default)]
    pub model: ModelKind,
    #[serde(default = "default_degree")]
    pub degree: u32,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
    #[serde(default)]
    pub bounds: BoundsStrategy,
    #[serde(default)]
    pub correction: Option<PointwiseMethod>,
    #[serde(default)]
    pub split_lines: Vec<SplitLine>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default)]
    pub session_path: Option<String>,
}

impl GeorefConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, GeorefIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), GeorefIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn resample_params(&self) -> ResampleParams {
        ResampleParams {
            step: self.step,
            chunk_rows: self.chunk_rows,
            bounds: self.bounds,
        }
    }

    /// Resolve the report path.
    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("georef_report.json"))
    }
}

/// Summary of one split-line region, as written to reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub region: u32,
    pub gcp_count: usize,
    pub icp_count: usize,
    #[serde(default)]
    pub accuracy: Option<AccuracyReport>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<&RegionReport> for RegionSummary {
    fn from(r: &RegionReport) -> Self {
        let error = match &r.outcome {
            RegionOutcome::Fitted { .. } => None,
            RegionOutcome::InsufficientData => Some("insufficient data".to_string()),
            RegionOutcome::Failed(e) => Some(e.to_string()),
        };
        Self {
            region: r.region,
            gcp_count: r.gcp_count,
            icp_count: r.icp_count,
            accuracy: r.accuracy().copied(),
            error,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeorefReport {
    pub config_path: String,
    #[serde(default)]
    pub model: ModelKind,
    pub degree: u32,
    pub gcp_count: usize,
    pub icp_count: usize,
    #[serde(default)]
    pub accuracy: Option<AccuracyReport>,
    #[serde(default)]
    pub corrected_accuracy: Option<AccuracyReport>,
    #[serde(default)]
    pub regions: Vec<RegionSummary>,
    #[serde(default)]
    pub output: Option<OutputInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Where and how the resampled raster was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputInfo {
    pub path: String,
    pub width: usize,
    pub height: usize,
    pub origin_x: f64,
    pub origin_y: f64,
    pub step: f64,
}

impl GeorefReport {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, GeorefIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), GeorefIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

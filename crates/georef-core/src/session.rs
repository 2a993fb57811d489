//! Explicit session state: the point sets and the current fitted model.
//!
//! The model is held behind an `Arc` and replaced wholesale by each fit.
//! Anything that must outlive a refit (a background resample, say) takes a
//! [`Session::snapshot`] first.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{GeorefError, Result, Stage};
use crate::image::RasterImage;
use crate::io::{GeorefIoError, PointTable};
use crate::partition::{piecewise_regression, RegionReport, SplitLine};
use crate::pointwise::{CorrectedModel, PointwiseMethod};
use crate::resample::ResampleParams;
use crate::task::ResampleJob;
use crate::{
    AccuracyReport, CoefficientSet, ControlPoint, Direction, GeoTransform, NormalizationFactors,
    PolynomialModel,
};

/// Persisted form of a fitted polynomial: coefficients only travel together
/// with their normalization and degree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionBundle {
    pub degree: u32,
    /// `[mean_x, std_x, mean_y, std_y, mean_X, std_X, mean_Y, std_Y]`.
    pub normalization: [f64; 8],
    /// Map → pixel.
    pub forward: CoefficientSet,
    /// Pixel → map.
    pub backward: CoefficientSet,
}

impl SessionBundle {
    pub fn from_model(model: &PolynomialModel) -> Self {
        Self {
            degree: model.degree(),
            normalization: model.normalization().to_array(),
            forward: model.coefficients(Direction::Forward).clone(),
            backward: model.coefficients(Direction::Backward).clone(),
        }
    }

    /// Rebuild the model, checking coefficient lengths against the degree and
    /// rejecting zero or non-finite normalization factors.
    pub fn into_model(self) -> Result<PolynomialModel> {
        PolynomialModel::from_parts(
            self.degree,
            NormalizationFactors::from_array(self.normalization),
            self.forward,
            self.backward,
        )
    }

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

#[derive(Clone, Debug, Default)]
pub struct Session {
    gcps: Vec<ControlPoint>,
    icps: Vec<ControlPoint>,
    model: Option<Arc<PolynomialModel>>,
}

impl Session {
    pub fn new(gcps: Vec<ControlPoint>, icps: Vec<ControlPoint>) -> Self {
        Self {
            gcps,
            icps,
            model: None,
        }
    }

    pub fn from_table(table: &PointTable) -> Self {
        let (gcps, icps) = table.split();
        Self::new(gcps, icps)
    }

    pub fn gcps(&self) -> &[ControlPoint] {
        &self.gcps
    }

    pub fn icps(&self) -> &[ControlPoint] {
        &self.icps
    }

    /// Replace both point sets. The current model no longer matches them and
    /// is dropped.
    pub fn set_points(&mut self, gcps: Vec<ControlPoint>, icps: Vec<ControlPoint>) {
        self.gcps = gcps;
        self.icps = icps;
        self.model = None;
    }

    pub fn model(&self) -> Option<&PolynomialModel> {
        self.model.as_deref()
    }

    /// Shared handle to the current model; unaffected by later fits.
    pub fn snapshot(&self) -> Option<Arc<PolynomialModel>> {
        self.model.clone()
    }

    /// Install `model` as current, returning the previous one.
    pub fn replace_model(&mut self, model: PolynomialModel) -> Option<Arc<PolynomialModel>> {
        self.model.replace(Arc::new(model))
    }

    fn current(&self) -> Result<&Arc<PolynomialModel>> {
        self.model
            .as_ref()
            .ok_or_else(|| GeorefError::invalid(Stage::Fit, "session has no fitted model"))
    }

    /// Fit a new model on the session GCPs and make it current.
    pub fn fit(&mut self, degree: u32) -> Result<Arc<PolynomialModel>> {
        let model = PolynomialModel::fit(&self.gcps, degree)?;
        info!("fitted degree {degree} polynomial on {} GCPs", self.gcps.len());
        self.replace_model(model);
        self.current().cloned()
    }

    /// ICP accuracy of the current model.
    pub fn assess(&self) -> Result<AccuracyReport> {
        let model: &PolynomialModel = self.current()?;
        AccuracyReport::compute(model, self.gcps.len(), &self.icps)
    }

    /// Current model plus pointwise correction of its GCP residuals.
    pub fn corrected(&self, method: PointwiseMethod) -> Result<CorrectedModel> {
        let model: &PolynomialModel = self.current()?;
        CorrectedModel::new(model.clone(), &self.gcps, method)
    }

    pub fn split(&self, lines: &[SplitLine], degree: u32) -> Result<Vec<RegionReport>> {
        piecewise_regression(&self.gcps, &self.icps, lines, degree)
    }

    /// Background resample job over a snapshot of the current model.
    pub fn resample_job(&self, source: RasterImage, params: ResampleParams) -> Result<ResampleJob> {
        let transform: Arc<dyn GeoTransform> = self.current()?.clone();
        Ok(ResampleJob {
            source,
            transform,
            gcps: self.gcps.clone(),
            params,
        })
    }

    pub fn bundle(&self) -> Option<SessionBundle> {
        self.model().map(SessionBundle::from_model)
    }

    /// Replace the current model with a persisted one.
    pub fn restore(&mut self, bundle: SessionBundle) -> Result<()> {
        let model = bundle.into_model()?;
        self.replace_model(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> (Vec<ControlPoint>, Vec<ControlPoint>) {
        let f = |x: f64, y: f64| ControlPoint::new(x, y, 3.0 * x + 0.01 * x * y, 7.0 - 2.0 * y);
        let gcps = (0..5)
            .flat_map(|i| (0..5).map(move |j| f(20.0 * i as f64, 15.0 * j as f64)))
            .collect();
        (gcps, vec![f(33.0, 41.0), f(71.0, 12.0)])
    }

    #[test]
    fn fit_replaces_model_and_keeps_snapshots() {
        let (gcps, icps) = points();
        let mut session = Session::new(gcps, icps);
        assert!(session.assess().is_err());

        let first = session.fit(1).expect("fit");
        let snap = session.snapshot().expect("model");
        assert!(Arc::ptr_eq(&first, &snap));

        session.fit(2).expect("refit");
        assert_eq!(snap.degree(), 1);
        assert_eq!(session.model().map(|m| m.degree()), Some(2));
        let report = session.assess().expect("assess");
        assert!(report.backward.total() < 1e-8);
    }

    #[test]
    fn set_points_drops_model() {
        let (gcps, icps) = points();
        let mut session = Session::new(gcps.clone(), icps.clone());
        session.fit(1).expect("fit");
        session.set_points(gcps, icps);
        assert!(session.model().is_none());
    }

    #[test]
    fn bundle_round_trips_bit_exact() {
        let (gcps, icps) = points();
        let mut session = Session::new(gcps, icps);
        session.fit(2).expect("fit");
        let bundle = session.bundle().expect("bundle");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        bundle.write_json(&path).expect("write");
        let loaded = SessionBundle::load_json(&path).expect("load");
        assert_eq!(loaded, bundle);

        let mut other = Session::default();
        other.restore(loaded).expect("restore");
        assert_eq!(other.model(), session.model());
    }

    #[test]
    fn bundle_with_wrong_lengths_is_rejected() {
        let (gcps, icps) = points();
        let mut session = Session::new(gcps, icps);
        session.fit(1).expect("fit");
        let mut bundle = session.bundle().expect("bundle");
        bundle.degree = 2;
        assert!(matches!(
            bundle.into_model(),
            Err(GeorefError::DimensionMismatch { expected: 6, got: 3, .. })
        ));
    }

    #[test]
    fn bundle_with_zero_std_is_rejected() {
        let (gcps, icps) = points();
        let mut session = Session::new(gcps, icps);
        session.fit(1).expect("fit");
        let mut bundle = session.bundle().expect("bundle");
        bundle.normalization[5] = 0.0;
        bundle.normalization[7] = 0.0;
        assert!(matches!(
            bundle.clone().into_model(),
            Err(GeorefError::DegenerateAxis {
                channel: crate::Channel::MapX
            })
        ));

        let before = session.snapshot().expect("model");
        assert!(session.restore(bundle).is_err());
        let after = session.snapshot().expect("model");
        assert!(Arc::ptr_eq(&before, &after));
    }
}

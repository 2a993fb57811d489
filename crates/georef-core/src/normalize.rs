//! Per-channel mean/std normalization.
//!
//! Factors are always derived from the GCP set a model is fitted on. ICPs and
//! grid points are normalized with those same factors, never their own.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{GeorefError, Result, Stage};
use crate::{Channel, ControlPoint};

// Relative to max(1, |mean|). Catches constant channels whose std is not an
// exact zero because of rounding in the mean.
const DEGENERATE_STD_REL: f64 = 1e-12;

/// Population mean and standard deviation of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisStats {
    pub mean: f64,
    pub std: f64,
}

impl AxisStats {
    /// Identity factors (`mean = 0`, `std = 1`).
    pub const UNIT: AxisStats = AxisStats { mean: 0.0, std: 1.0 };

    /// Fit `channel` over `points` (divides by N, not N-1).
    pub fn fit(points: &[ControlPoint], channel: Channel) -> Result<Self> {
        Self::from_values(points.iter().map(|p| p.channel(channel)), channel)
    }

    pub fn from_values<I>(values: I, channel: Channel) -> Result<Self>
    where
        I: IntoIterator<Item = f64>,
        I::IntoIter: Clone,
    {
        let values = values.into_iter();
        let mut n = 0usize;
        let mut sum = 0.0;
        for v in values.clone() {
            sum += v;
            n += 1;
        }
        if n == 0 {
            return Err(GeorefError::insufficient(Stage::Normalization, "points", 1, 0));
        }
        let mean = sum / n as f64;

        let mut var = 0.0;
        for v in values {
            let d = v - mean;
            var += d * d;
        }
        let std = (var / n as f64).sqrt();

        if !std.is_finite() || std <= DEGENERATE_STD_REL * mean.abs().max(1.0) {
            return Err(GeorefError::DegenerateAxis { channel });
        }
        Ok(Self { mean, std })
    }

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }

    #[inline]
    pub fn invert(&self, value: f64) -> f64 {
        value * self.std + self.mean
    }
}

/// Normalization factors for the four channels, computed once per fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationFactors {
    pub x: AxisStats,
    pub y: AxisStats,
    pub map_x: AxisStats,
    pub map_y: AxisStats,
}

impl NormalizationFactors {
    /// Fit all four channels; fails on the first degenerate one.
    pub fn from_points(points: &[ControlPoint]) -> Result<Self> {
        Ok(Self {
            x: AxisStats::fit(points, Channel::PixelX)?,
            y: AxisStats::fit(points, Channel::PixelY)?,
            map_x: AxisStats::fit(points, Channel::MapX)?,
            map_y: AxisStats::fit(points, Channel::MapY)?,
        })
    }

    /// Like [`from_points`](Self::from_points), but a degenerate channel keeps
    /// its mean and gets `std = 1` instead of failing.
    pub fn from_points_lenient(points: &[ControlPoint]) -> Result<Self> {
        let fit = |channel: Channel| match AxisStats::fit(points, channel) {
            Ok(stats) => Ok(stats),
            Err(GeorefError::DegenerateAxis { .. }) => {
                let mean = points.iter().map(|p| p.channel(channel)).sum::<f64>()
                    / points.len() as f64;
                warn!("channel {channel} is constant, substituting std=1");
                Ok(AxisStats { mean, std: 1.0 })
            }
            Err(e) => Err(e),
        };
        Ok(Self {
            x: fit(Channel::PixelX)?,
            y: fit(Channel::PixelY)?,
            map_x: fit(Channel::MapX)?,
            map_y: fit(Channel::MapY)?,
        })
    }

    /// Every channel needs a finite mean and a finite, positive std.
    pub fn validate(&self) -> Result<()> {
        for channel in Channel::ALL {
            let AxisStats { mean, std } = self.axis(channel);
            if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
                return Err(GeorefError::DegenerateAxis { channel });
            }
        }
        Ok(())
    }

    pub fn axis(&self, channel: Channel) -> AxisStats {
        match channel {
            Channel::PixelX => self.x,
            Channel::PixelY => self.y,
            Channel::MapX => self.map_x,
            Channel::MapY => self.map_y,
        }
    }

    #[inline]
    pub fn apply(&self, channel: Channel, value: f64) -> f64 {
        self.axis(channel).apply(value)
    }

    #[inline]
    pub fn invert(&self, channel: Channel, value: f64) -> f64 {
        self.axis(channel).invert(value)
    }

    /// `[x_mean, x_std, y_mean, y_std, X_mean, X_std, Y_mean, Y_std]`.
    pub fn to_array(&self) -> [f64; 8] {
        [
            self.x.mean,
            self.x.std,
            self.y.mean,
            self.y.std,
            self.map_x.mean,
            self.map_x.std,
            self.map_y.mean,
            self.map_y.std,
        ]
    }

    pub fn from_array(v: [f64; 8]) -> Self {
        Self {
            x: AxisStats { mean: v[0], std: v[1] },
            y: AxisStats { mean: v[2], std: v[3] },
            map_x: AxisStats { mean: v[4], std: v[5] },
            map_y: AxisStats { mean: v[6], std: v[7] },
        }
    }
}

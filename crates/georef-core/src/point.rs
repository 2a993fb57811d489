use std::fmt;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// A pixel ↔ map correspondence.
///
/// GCPs and ICPs share this type; which set a point belongs to is decided by
/// the caller and passed in as two separate slices.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Image coordinates `(x, y)`: column, row.
    pub pixel: Point2<f64>,
    /// Ground coordinates `(X, Y)`.
    pub map: Point2<f64>,
    /// Elevation `Z`. Carried through, never used by the transforms.
    #[serde(default)]
    pub elevation: Option<f64>,
}

impl ControlPoint {
    pub fn new(x: f64, y: f64, map_x: f64, map_y: f64) -> Self {
        Self {
            pixel: Point2::new(x, y),
            map: Point2::new(map_x, map_y),
            elevation: None,
        }
    }

    pub fn with_elevation(mut self, z: f64) -> Self {
        self.elevation = Some(z);
        self
    }

    #[inline]
    pub fn channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::PixelX => self.pixel.x,
            Channel::PixelY => self.pixel.y,
            Channel::MapX => self.map.x,
            Channel::MapY => self.map.y,
        }
    }
}

/// One of the four coordinate channels of a [`ControlPoint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    PixelX,
    PixelY,
    MapX,
    MapY,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::PixelX,
        Channel::PixelY,
        Channel::MapX,
        Channel::MapY,
    ];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::PixelX => "x",
            Channel::PixelY => "y",
            Channel::MapX => "X",
            Channel::MapY => "Y",
        };
        f.write_str(name)
    }
}

/// Which of the two fitted coefficient sets to use.
///
/// `Forward` reads map coordinates and predicts pixel coordinates;
/// `Backward` reads pixel coordinates and predicts map coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Channels read as model input.
    pub fn inputs(self) -> (Channel, Channel) {
        match self {
            Direction::Forward => (Channel::MapX, Channel::MapY),
            Direction::Backward => (Channel::PixelX, Channel::PixelY),
        }
    }

    /// Channels produced as model output.
    pub fn outputs(self) -> (Channel, Channel) {
        match self {
            Direction::Forward => (Channel::PixelX, Channel::PixelY),
            Direction::Backward => (Channel::MapX, Channel::MapY),
        }
    }

    /// Input coordinates of `p` for this direction.
    #[inline]
    pub fn input_of(self, p: &ControlPoint) -> Point2<f64> {
        match self {
            Direction::Forward => p.map,
            Direction::Backward => p.pixel,
        }
    }

    /// Expected output coordinates of `p` for this direction.
    #[inline]
    pub fn output_of(self, p: &ControlPoint) -> Point2<f64> {
        match self {
            Direction::Forward => p.pixel,
            Direction::Backward => p.map,
        }
    }
}

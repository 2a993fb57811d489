use crate::error::{GeorefError, Result};

/// Borrowed 8-bit raster, row-major with interleaved channels
/// (`len = width * height * channels`).
#[derive(Clone, Copy, Debug)]
pub struct RasterView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RasterImage {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

fn validate(width: usize, height: usize, channels: usize, len: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(GeorefError::InvalidImage(format!(
            "empty raster ({width}x{height})"
        )));
    }
    if channels != 1 && channels != 3 {
        return Err(GeorefError::InvalidImage(format!(
            "{channels} channels, expected 1 or 3"
        )));
    }
    let expected = width * height * channels;
    if len != expected {
        return Err(GeorefError::InvalidImage(format!(
            "buffer holds {len} samples, {width}x{height}x{channels} needs {expected}"
        )));
    }
    Ok(())
}

impl<'a> RasterView<'a> {
    pub fn new(width: usize, height: usize, channels: usize, data: &'a [u8]) -> Result<Self> {
        validate(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn validate(&self) -> Result<()> {
        validate(self.width, self.height, self.channels, self.data.len())
    }
}

impl RasterImage {
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        validate(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Zero-filled raster. A size that overflows or cannot be allocated is an
    /// error rather than an abort.
    pub fn zeros(width: usize, height: usize, channels: usize) -> Result<Self> {
        let len = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| {
                GeorefError::InvalidImage(format!("{width}x{height}x{channels} overflows"))
            })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            GeorefError::InvalidImage(format!("cannot allocate {width}x{height}x{channels}: {e}"))
        })?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn view(&self) -> RasterView<'_> {
        RasterView {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> u8 {
        self.data[(y * self.width + x) * self.channels + c]
    }
}

#[inline]
fn get_sample(src: &RasterView<'_>, x: i64, y: i64, c: usize) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i64 || y >= src.height as i64 {
        return 0;
    }
    src.data[(y as usize * src.width + x as usize) * src.channels + c]
}

/// Bilinear sample of channel `c` at `(x, y)`; corners outside the raster
/// read as 0.
#[inline]
pub fn sample_bilinear(src: &RasterView<'_>, x: f64, y: f64, c: usize) -> f64 {
    let xf = x.floor();
    let yf = y.floor();
    let (x0, y0) = (xf as i64, yf as i64);
    let fx = x - xf;
    let fy = y - yf;

    let p00 = get_sample(src, x0, y0, c) as f64;
    let p10 = get_sample(src, x0 + 1, y0, c) as f64;
    let p01 = get_sample(src, x0, y0 + 1, c) as f64;
    let p11 = get_sample(src, x0 + 1, y0 + 1, c) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &RasterView<'_>, x: f64, y: f64, c: usize) -> u8 {
    sample_bilinear(src, x, y, c).clamp(0.0, 255.0) as u8
}

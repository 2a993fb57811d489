//! Conversion between `image` types and [`RasterImage`], and world files for
//! resampled output.

use std::fs;
use std::path::Path;

use ::image::{DynamicImage, GrayImage, RgbImage};

use crate::core::{GroundGrid, RasterImage};

/// Errors produced by the raster helpers.
#[derive(thiserror::Error, Debug)]
pub enum RasterError {
    #[error("raster {width}x{height}x{channels} does not match its buffer")]
    InvalidBuffer {
        width: usize,
        height: usize,
        channels: usize,
    },
    #[error("raster dimensions {width}x{height} exceed the image codec limits")]
    TooLarge { width: usize, height: usize },
    #[error(transparent)]
    Image(#[from] ::image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] crate::GeorefError),
}

/// Grayscale images become one channel, everything else three (RGB).
/// Alpha is dropped and samples are reduced to 8 bits.
pub fn to_raster(img: &DynamicImage) -> RasterImage {
    let (width, height) = (img.width() as usize, img.height() as usize);
    if img.color().has_color() {
        RasterImage {
            width,
            height,
            channels: 3,
            data: img.to_rgb8().into_raw(),
        }
    } else {
        RasterImage {
            width,
            height,
            channels: 1,
            data: img.to_luma8().into_raw(),
        }
    }
}

pub fn from_raster(raster: &RasterImage) -> Result<DynamicImage, RasterError> {
    let invalid = || RasterError::InvalidBuffer {
        width: raster.width,
        height: raster.height,
        channels: raster.channels,
    };
    let (w, h) = match (u32::try_from(raster.width), u32::try_from(raster.height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(RasterError::TooLarge {
                width: raster.width,
                height: raster.height,
            })
        }
    };
    let data = raster.data.clone();
    match raster.channels {
        1 => GrayImage::from_raw(w, h, data)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(invalid),
        3 => RgbImage::from_raw(w, h, data)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

pub fn load_raster(path: impl AsRef<Path>) -> Result<RasterImage, RasterError> {
    let img = ::image::open(path)?;
    Ok(to_raster(&img))
}

/// Save with the format implied by the file extension.
pub fn save_raster(raster: &RasterImage, path: impl AsRef<Path>) -> Result<(), RasterError> {
    from_raster(raster)?.save(path)?;
    Ok(())
}

/// Six-line world file (`.pgw`, `.tfw`, ...) locating pixel centers of a
/// north-up resampled grid.
pub fn world_file_text(grid: &GroundGrid) -> String {
    format!(
        "{}\n0.0\n0.0\n{}\n{}\n{}\n",
        grid.step, -grid.step, grid.origin_x, grid.origin_y
    )
}

pub fn write_world_file(grid: &GroundGrid, path: impl AsRef<Path>) -> Result<(), RasterError> {
    fs::write(path, world_file_text(grid))?;
    Ok(())
}

/// Sidecar world-file extension for an image path (`map.png` → `pgw`).
pub fn world_file_extension(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let mut chars = ext.chars();
    match (chars.next(), chars.last()) {
        (Some(first), Some(last)) => format!("{first}{last}w"),
        _ => "wld".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_and_rgb_round_trip() {
        let gray = RasterImage::new(3, 2, 1, vec![0, 10, 20, 30, 40, 50]).expect("gray");
        let back = to_raster(&from_raster(&gray).expect("to image"));
        assert_eq!(back, gray);

        let rgb = RasterImage::new(1, 2, 3, vec![1, 2, 3, 4, 5, 6]).expect("rgb");
        let back = to_raster(&from_raster(&rgb).expect("to image"));
        assert_eq!(back, rgb);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let bad = RasterImage {
            width: 4,
            height: 4,
            channels: 3,
            data: vec![0; 5],
        };
        assert!(matches!(
            from_raster(&bad),
            Err(RasterError::InvalidBuffer { .. })
        ));
    }

    #[test]
    fn world_file_layout() {
        let grid = GroundGrid {
            origin_x: 500.0,
            origin_y: 900.0,
            step: 0.5,
            cols: 10,
            rows: 10,
        };
        assert_eq!(world_file_text(&grid), "0.5\n0.0\n0.0\n-0.5\n500\n900\n");
        assert_eq!(world_file_extension(Path::new("out/map.png")), "pgw");
        assert_eq!(world_file_extension(Path::new("map.TIF")), "tfw");
        assert_eq!(world_file_extension(Path::new("map.jpeg")), "jgw");
        assert_eq!(world_file_extension(Path::new("map")), "wld");
    }
}

//! Image file reading and resizing
//!
//! Mammograms are read either from DICOM files (native pixel data only) or
//! from 16-bit grayscale PNG exports, resized to the network input size and
//! optionally rescaled to a fixed maximum intensity.

mod dicom;
pub mod tags;

pub use dicom::{decode_pixels, read_dicom, GrayImage16};

use crate::error::{Result, TrainError};
use image::imageops::{self, FilterType};
use std::fmt;
use std::path::Path;

/// Image file format under the image folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
#[cfg_attr(feature = "json", serde(rename_all = "lowercase"))]
pub enum ImageExtension {
    Dcm,
    Png,
}

impl ImageExtension {
    /// File extension without the leading dot
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageExtension::Dcm => "dcm",
            ImageExtension::Png => "png",
        }
    }

    /// Parses an extension, ignoring case and a leading dot
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "dcm" | "dicom" => Ok(ImageExtension::Dcm),
            "png" => Ok(ImageExtension::Png),
            other => Err(TrainError::InvalidOption(format!(
                "unsupported image extension '{}'",
                other
            ))),
        }
    }

    /// Format of a file judged by its extension
    pub fn of_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_str(ext)
    }
}

impl fmt::Display for ImageExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reads an image file as 16-bit grayscale
pub fn read_image(path: &Path) -> Result<GrayImage16> {
    match ImageExtension::of_path(path)? {
        ImageExtension::Dcm => read_dicom(path),
        ImageExtension::Png => Ok(image::open(path)?.to_luma16()),
    }
}

/// Reads an image, resizes it and optionally rescales its intensities
///
/// # Arguments
///
/// * `path` - DICOM or PNG file
/// * `target_size` - Output (height, width)
/// * `target_scale` - Maximum value after rescaling; an all-zero image is left at zero
///
/// # Returns
///
/// Row-major pixel values of length `height * width`
pub fn read_resize_img(
    path: &Path,
    target_size: (u32, u32),
    target_scale: Option<f32>,
) -> Result<Vec<f32>> {
    let img = read_image(path)?;
    Ok(resize_and_scale(&img, target_size, target_scale))
}

/// Resizes with cubic interpolation and applies the intensity scale
pub fn resize_and_scale(
    img: &GrayImage16,
    target_size: (u32, u32),
    target_scale: Option<f32>,
) -> Vec<f32> {
    let (height, width) = target_size;
    let resized = if img.dimensions() == (width, height) {
        img.clone()
    } else {
        imageops::resize(img, width, height, FilterType::CatmullRom)
    };

    let mut data: Vec<f32> = resized.into_raw().into_iter().map(|v| v as f32).collect();
    if let Some(scale) = target_scale {
        let max = data.iter().copied().fold(0.0f32, f32::max);
        let max = if max > 0.0 { max } else { scale };
        let factor = scale / max;
        for v in data.iter_mut() {
            *v *= factor;
        }
    }
    data
}

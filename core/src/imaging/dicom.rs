use super::tags::{
    get_string_value, get_u16_value, BITS_ALLOCATED, BITS_STORED, COLUMNS,
    EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN, PHOTOMETRIC_INTERPRETATION,
    PIXEL_DATA, PIXEL_REPRESENTATION, ROWS, SAMPLES_PER_PIXEL,
};
use crate::error::{Result, TrainError};
use crate::types::PhotometricInterpretation;
use dicom_object::InMemDicomObject;
use image::{ImageBuffer, Luma};
use std::path::Path;

pub type GrayImage16 = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Reads the first frame of a DICOM file as 16-bit grayscale
pub fn read_dicom(path: &Path) -> Result<GrayImage16> {
    let obj = dicom_object::open_file(path)?;
    let transfer_syntax = obj.meta().transfer_syntax().to_string();
    decode_pixels(&obj, &transfer_syntax, path)
}

/// Decodes native pixel data into a grayscale image
///
/// Only uncompressed little endian data with 8 or 16 bits allocated is
/// supported. `MONOCHROME1` images are inverted so that higher values
/// always mean brighter. Signed pixels are shifted into the unsigned
/// range, preserving their order.
///
/// # Arguments
///
/// * `dcm` - Dataset holding the image pixel module
/// * `transfer_syntax` - Transfer syntax UID from the file meta group
/// * `path` - Source file, only used in error messages
pub fn decode_pixels(
    dcm: &InMemDicomObject,
    transfer_syntax: &str,
    path: &Path,
) -> Result<GrayImage16> {
    let unsupported = |reason: String| TrainError::UnsupportedPixelData {
        path: path.to_path_buf(),
        reason,
    };

    let ts = transfer_syntax.trim_end_matches('\0').trim();
    if ts != IMPLICIT_VR_LITTLE_ENDIAN && ts != EXPLICIT_VR_LITTLE_ENDIAN {
        return Err(unsupported(format!(
            "transfer syntax {} is encapsulated or big endian",
            ts
        )));
    }

    let rows = get_u16_value(dcm, ROWS)
        .ok_or_else(|| TrainError::DicomError(format!("missing Rows in {}", path.display())))?;
    let cols = get_u16_value(dcm, COLUMNS).ok_or_else(|| {
        TrainError::DicomError(format!("missing Columns in {}", path.display()))
    })?;
    let bits_allocated = get_u16_value(dcm, BITS_ALLOCATED).unwrap_or(16);
    let bits_stored = get_u16_value(dcm, BITS_STORED).unwrap_or(bits_allocated);
    let signed = get_u16_value(dcm, PIXEL_REPRESENTATION).unwrap_or(0) == 1;
    let samples = get_u16_value(dcm, SAMPLES_PER_PIXEL).unwrap_or(1);
    let photometric = get_string_value(dcm, PHOTOMETRIC_INTERPRETATION)
        .map(|s| PhotometricInterpretation::from_str(&s))
        .unwrap_or(PhotometricInterpretation::Monochrome2);

    if samples != 1 || !photometric.is_monochrome() {
        return Err(unsupported(format!(
            "expected monochrome pixels, found {} with {} samples per pixel",
            photometric, samples
        )));
    }
    if bits_allocated != 8 && bits_allocated != 16 {
        return Err(unsupported(format!("{} bits allocated", bits_allocated)));
    }

    let element = dcm.element(PIXEL_DATA)?;
    let bytes = element
        .to_bytes()
        .map_err(|e| unsupported(format!("pixel data is not native: {}", e)))?;

    let n_pixels = rows as usize * cols as usize;
    let bytes_per_pixel = bits_allocated as usize / 8;
    if bytes.len() < n_pixels * bytes_per_pixel {
        return Err(unsupported(format!(
            "pixel data holds {} bytes, expected {}",
            bytes.len(),
            n_pixels * bytes_per_pixel
        )));
    }

    // First frame only
    let mut pixels: Vec<u16> = match (bits_allocated, signed) {
        (8, false) => bytes[..n_pixels].iter().map(|&b| b as u16).collect(),
        (8, true) => bytes[..n_pixels]
            .iter()
            .map(|&b| (b as i8 as i16 + 128) as u16)
            .collect(),
        (_, false) => bytes[..n_pixels * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect(),
        (_, true) => bytes[..n_pixels * 2]
            .chunks_exact(2)
            .map(|c| (i16::from_le_bytes([c[0], c[1]]) as i32 + 32768) as u16)
            .collect(),
    };

    if photometric.is_inverted() {
        let max_value = if signed {
            u16::MAX >> (16 - bits_allocated)
        } else {
            ((1u32 << bits_stored.min(16)) - 1) as u16
        };
        for p in pixels.iter_mut() {
            *p = max_value.saturating_sub(*p);
        }
    }

    ImageBuffer::from_raw(cols as u32, rows as u32, pixels)
        .ok_or_else(|| unsupported("pixel buffer does not match image size".to_string()))
}

//! Core type definitions for mammography manifests
//!
//! - [`Laterality`]: Breast laterality (Left, Right)
//! - [`ViewPosition`]: View positions (CC, MLO, etc.)
//! - [`ViewCode`]: Crosswalk view code with the implant-displaced modifier
//! - [`PhotometricInterpretation`]: How DICOM pixel values map to intensity

mod enums;
mod view;

pub use enums::{Laterality, PhotometricInterpretation, ViewPosition};
pub use view::ViewCode;

use std::path::PathBuf;
use thiserror::Error;

/// Result type for mammotrain operations
pub type Result<T> = std::result::Result<T, TrainError>;

/// Error types for mammotrain operations
#[derive(Error, Debug)]
pub enum TrainError {
    /// DICOM reading error
    #[error("DICOM error: {0}")]
    DicomError(String),

    /// Pixel data the reader cannot decode (compressed, odd bit depth, ...)
    #[error("Unsupported pixel data in {path}: {reason}")]
    UnsupportedPixelData { path: PathBuf, reason: String },

    /// PNG decoding or encoding error
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    /// Malformed manifest row
    #[error("Malformed TSV {path}:{line}: {message}")]
    MalformedTsv {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Manifest lacks a required column
    #[error("Missing column '{column}' in {path}")]
    MissingColumn { path: PathBuf, column: String },

    /// Invalid tag or field value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Option outside its accepted range
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Stratified split cannot be performed
    #[error("Split error: {0}")]
    SplitError(String),

    /// Nothing left to train or validate on
    #[error("No samples: {0}")]
    NoSamples(String),

    /// Preloaded validation batch does not hold the expected number of samples
    #[error("Validation set holds {actual} samples, expected {expected}")]
    ValidationSizeMismatch { expected: usize, actual: usize },

    /// Image loading worker pool could not be created
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// Tensor conversion or other backend failure
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Saving or loading model weights failed
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    /// History table could not be written
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<String> for TrainError {
    fn from(s: String) -> Self {
        TrainError::InvalidValue(s)
    }
}

impl From<&str> for TrainError {
    fn from(s: &str) -> Self {
        TrainError::InvalidValue(s.to_string())
    }
}

// Convert dicom-object errors
impl From<dicom_object::ReadError> for TrainError {
    fn from(e: dicom_object::ReadError) -> Self {
        TrainError::DicomError(format!("{}", e))
    }
}

impl From<dicom_object::AccessError> for TrainError {
    fn from(e: dicom_object::AccessError) -> Self {
        TrainError::DicomError(format!("{}", e))
    }
}

impl From<dicom_core::value::ConvertValueError> for TrainError {
    fn from(e: dicom_core::value::ConvertValueError) -> Self {
        TrainError::InvalidValue(format!("{}", e))
    }
}

impl From<rayon::ThreadPoolBuildError> for TrainError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        TrainError::WorkerPool(format!("{}", e))
    }
}

impl From<burn::record::RecorderError> for TrainError {
    fn from(e: burn::record::RecorderError) -> Self {
        TrainError::CheckpointError(format!("{:?}", e))
    }
}

impl From<burn::tensor::DataError> for TrainError {
    fn from(e: burn::tensor::DataError) -> Self {
        TrainError::BackendError(format!("{:?}", e))
    }
}

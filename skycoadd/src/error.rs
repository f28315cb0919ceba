//! Error types for coaddition and source classification.
//!
//! Two families: [`ExposureError`] covers everything that can go wrong with a
//! single input exposure and only ever removes that exposure from the run;
//! [`Error`] is returned to the caller and ends the run.

use thiserror::Error;

use crate::repository::DataId;

/// Failure confined to one input exposure. The exposure is skipped and logged.
#[derive(Debug, Error)]
pub enum ExposureError {
    #[error("Required dataset '{dataset_type}' not found for {id}")]
    LoadFailure { dataset_type: String, id: DataId },

    #[error("PSF matching failed: {0}")]
    PsfMatchFailure(String),

    #[error("Exposure does not overlap the destination region")]
    NoOverlap,

    #[error("Exposure has no usable photometric calibration")]
    CalibrationMissing,
}

/// Run-level errors, propagated to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No exposures to coadd")]
    EmptyInputSet,

    #[error("Deblending was run but field '{field}' is missing from the source schema")]
    SchemaInconsistency { field: String },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Exposure geometry does not match the coadd: {0}")]
    GeometryMismatch(String),

    #[error("Dataset '{dataset_type}' not found for {id}")]
    MissingDataset { dataset_type: String, id: DataId },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Coadd run was cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

//! Skycoadd - PSF-matched coaddition of astronomical exposures.
//!
//! This library builds deep composite images of one sky patch:
//! - Double-Gaussian model PSFs and Gaussian PSF matching
//! - Resampling exposures onto the patch coordinate system
//! - Photometric rescaling and inverse-variance weighted accumulation
//! - Primary-source flagging against patch and tract boundaries
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use skycoadd::{CancelToken, CoaddConfig, CoaddTask, DataId, InMemoryRepository};
//!
//! let repository = InMemoryRepository::new();
//! // ... put "calexp" exposures ...
//!
//! let task = CoaddTask::new(CoaddConfig::default().with_desired_fwhm(1.2))?;
//! let result = task.run(&repository, &sky_info, &patch_id, &ids, &CancelToken::new())?;
//!
//! println!("{} exposures contributed", result.diagnostics.contributed.len());
//! ```

pub(crate) mod coadd;
pub(crate) mod common;
mod config;
mod error;
mod exposure;
mod geom;
pub(crate) mod preprocess;
pub(crate) mod psf;
mod repository;
pub(crate) mod source;
mod tile;
pub(crate) mod warp;
mod wcs;
mod zero_point;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Core types
// ============================================================================

pub use common::Buffer2;
pub use error::{Error, ExposureError};
pub use exposure::{Exposure, MaskPixel, MaskPlane, PhotoCalib, NO_DATA_VARIANCE};
pub use geom::{Box2D, Box2I};
pub use wcs::{SkyCoord, Wcs};

// ============================================================================
// Configuration and data access
// ============================================================================

pub use config::{CoaddConfig, PsfMatching};
pub use repository::{DataId, Dataset, InMemoryRepository, Repository};

// ============================================================================
// PSF
// ============================================================================

pub use psf::{
    double_gaussian, GaussianPsfMatcher, KernelCell, KernelDims, ModelPsf, ModelPsfCache, Psf,
    PsfMatchConfig, PsfMatchResult, PsfMatcher, FWHM_PER_SIGMA, WING_AMPLITUDE, WING_SIGMA_RATIO,
};

// ============================================================================
// Warping and preprocessing
// ============================================================================

pub use preprocess::ExposurePreprocessor;
pub use warp::{DestBox, InterpolationMethod, WarpConfig, Warper};
pub use zero_point::ZeroPointScaler;

// ============================================================================
// Coaddition
// ============================================================================

pub use coadd::{
    interpolate_edge_pixels, scale_variance, AddStats, CancelToken, CoaddAccumulator,
    CoaddDiagnostics, CoaddResult, CoaddTask,
};

// ============================================================================
// Tiles and source classification
// ============================================================================

pub use source::{
    process_coadd, propagate_psf_star_flags, ClassificationSummary, PrimaryFlagClassifier,
    ProcessCoaddResult, SourceCatalog, SourceRecord, IS_PATCH_INNER_FIELD, IS_PRIMARY_FIELD,
    IS_TRACT_INNER_FIELD, N_CHILD_FIELD, PSF_STAR_FIELD,
};
pub use tile::{NearestTractSkyMap, PatchInfo, SkyInfo, SkyMap, TractId, TractInfo};

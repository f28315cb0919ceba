//! Per-exposure pipeline: load, PSF-match, warp, rescale to the coadd zero point.
//!
//! Matching runs before warping so it can use the exposure's native PSF,
//! which resampling does not carry along. Every failure is an
//! [`ExposureError`] confined to the exposure at hand.


use std::sync::Arc;

use crate::config::{CoaddConfig, PsfMatching};
use crate::error::{Error, ExposureError};
use crate::exposure::Exposure;
use crate::psf::{ModelPsfCache, PsfMatcher};
use crate::repository::{DataId, Repository};
use crate::warp::{DestBox, Warper};
use crate::wcs::Wcs;
use crate::zero_point::ZeroPointScaler;

/// Dataset type of calibrated input exposures.
pub const CALEXP_DATASET: &str = "calexp";

/// Dataset type of input exposure PSFs.
pub const PSF_DATASET: &str = "psf";

struct PsfStage {
    matcher: Arc<dyn PsfMatcher>,
    cache: ModelPsfCache,
}

/// Preprocessing stage shared (read-only) by all exposures of one run.
pub struct ExposurePreprocessor {
    psf_stage: Option<PsfStage>,
    warper: Warper,
    scaler: ZeroPointScaler,
}

impl ExposurePreprocessor {
    /// The desired FWHM (arcsec) is converted to pixels of `tile_wcs`; the
    /// model-PSF cache lives as long as the preprocessor.
    pub fn new(
        config: &CoaddConfig,
        tile_wcs: &Wcs,
        matcher: Arc<dyn PsfMatcher>,
    ) -> Result<Self, Error> {
        let psf_stage = match config.desired_fwhm {
            PsfMatching::Disabled => {
                tracing::info!("No PSF matching will be done (desired_fwhm is disabled)");
                None
            }
            PsfMatching::Enabled { fwhm } => {
                let fwhm_pixels = fwhm / tile_wcs.pixel_scale_arcsec();
                Some(PsfStage {
                    matcher,
                    cache: ModelPsfCache::new(fwhm_pixels)?,
                })
            }
        };
        Ok(Self {
            psf_stage,
            warper: Warper::new(config.warp.clone()),
            scaler: ZeroPointScaler::new(config.coadd_zero_point)?,
        })
    }

    pub fn psf_matching_enabled(&self) -> bool {
        self.psf_stage.is_some()
    }

    /// Run-scoped model-PSF cache, when PSF matching is enabled.
    pub fn model_psf_cache(&self) -> Option<&ModelPsfCache> {
        self.psf_stage.as_ref().map(|s| &s.cache)
    }

    /// PSF-match (if enabled), warp onto `dest_wcs` within `dest`, then rescale
    /// to the coadd zero point.
    pub fn preprocess_exposure(
        &self,
        exposure: Exposure,
        dest_wcs: &Wcs,
        dest: DestBox,
    ) -> Result<Exposure, ExposureError> {
        let exposure = match &self.psf_stage {
            Some(stage) => {
                let dims = exposure
                    .psf
                    .as_ref()
                    .map(|psf| psf.dimensions())
                    .ok_or_else(|| {
                        ExposureError::PsfMatchFailure("exposure has no PSF".to_string())
                    })?;
                let target = stage
                    .cache
                    .get_or_build(dims)
                    .map_err(|e| ExposureError::PsfMatchFailure(e.to_string()))?;
                tracing::debug!("PSF-match exposure");
                stage.matcher.match_exposure(exposure, &target)?.exposure
            }
            None => exposure,
        };

        tracing::debug!("Warp exposure");
        let mut warped = self.warper.warp_exposure(dest_wcs, &exposure, dest)?;
        let factor = self.scaler.scale_exposure(&mut warped)?;
        tracing::debug!(factor, "Rescaled to coadd zero point");
        Ok(warped)
    }

    /// Fetch `calexp` (and its `psf` when matching) for `id`, then preprocess it.
    pub fn load_and_preprocess(
        &self,
        repository: &dyn Repository,
        id: &DataId,
        dest_wcs: &Wcs,
        dest: DestBox,
    ) -> Result<Exposure, ExposureError> {
        let mut exposure = repository
            .get_exposure(CALEXP_DATASET, id)
            .ok_or_else(|| ExposureError::LoadFailure {
                dataset_type: CALEXP_DATASET.to_string(),
                id: id.clone(),
            })?;

        if self.psf_matching_enabled() {
            if let Some(psf) = repository.get_psf(PSF_DATASET, id) {
                exposure.psf = Some(psf);
            } else if exposure.psf.is_none() {
                return Err(ExposureError::LoadFailure {
                    dataset_type: PSF_DATASET.to_string(),
                    id: id.clone(),
                });
            }
        }

        self.preprocess_exposure(exposure, dest_wcs, dest)
    }
}

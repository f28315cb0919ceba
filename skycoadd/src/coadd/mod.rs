//! Coaddition of the exposures covering one patch.
//!
//! Exposures are preprocessed in parallel batches, each independently of the
//! others, then folded into a single [`CoaddAccumulator`] in input order. Failed
//! exposures are skipped and reported; they never abort the run.

mod accumulator;
mod edges;
mod variance;

#[cfg(test)]
mod tests;

pub use accumulator::{AddStats, CoaddAccumulator};
pub use edges::interpolate_edge_pixels;
pub use variance::scale_variance;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::common::Buffer2;
use crate::config::CoaddConfig;
use crate::error::{Error, ExposureError};
use crate::exposure::{Exposure, PhotoCalib};
use crate::preprocess::ExposurePreprocessor;
use crate::psf::{GaussianPsfMatcher, KernelDims, PsfMatcher};
use crate::repository::{DataId, Dataset, Repository};
use crate::tile::SkyInfo;
use crate::warp::DestBox;

/// Run-level cancellation flag, shared between the caller and a running task.
///
/// Exposures already being preprocessed finish; no further exposure starts,
/// and the run returns `Error::Cancelled` without folding the batch in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Which exposures made it into the coadd.
#[derive(Debug, Default)]
pub struct CoaddDiagnostics {
    /// Exposures folded into the coadd, in input order.
    pub contributed: Vec<DataId>,
    /// Exposures left out, with the reason.
    pub skipped: Vec<(DataId, ExposureError)>,
}

#[derive(Debug)]
pub struct CoaddResult {
    pub exposure: Exposure,
    /// Per-pixel number of contributing exposures.
    pub input_count: Buffer2<u32>,
    pub diagnostics: CoaddDiagnostics,
}

/// Exposures preprocessed per batch, per rayon thread.
const BATCH_PER_THREAD: usize = 2;

/// Coadds one patch.
///
/// Exposures are preprocessed in batches of `batch_size` and each batch is
/// folded before the next starts, so at most one batch of warps is held in
/// memory at a time.
pub struct CoaddTask {
    config: CoaddConfig,
    matcher: Arc<dyn PsfMatcher>,
    batch_size: usize,
}

impl CoaddTask {
    /// Task using the bundled [`GaussianPsfMatcher`].
    pub fn new(config: CoaddConfig) -> Result<Self, Error> {
        config.validate()?;
        let matcher = Arc::new(GaussianPsfMatcher::new(config.psf_match.clone()));
        Ok(Self {
            config,
            matcher,
            batch_size: rayon::current_num_threads() * BATCH_PER_THREAD,
        })
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn PsfMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Number of exposures preprocessed concurrently before folding (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn config(&self) -> &CoaddConfig {
        &self.config
    }

    /// Coadd the calibrated exposures `ids` onto the patch in `sky_info`.
    ///
    /// Fails with `EmptyInputSet` when `ids` is empty or every exposure is
    /// skipped, and with `Cancelled` when `cancel` fires; exposures of the
    /// batch in flight finish preprocessing but are never folded.
    /// With `do_write` the warped exposures, the coadd and (when matching)
    /// its model PSF are put to `repository`.
    pub fn run(
        &self,
        repository: &dyn Repository,
        sky_info: &SkyInfo,
        patch_id: &DataId,
        ids: &[DataId],
        cancel: &CancelToken,
    ) -> Result<CoaddResult, Error> {
        if ids.is_empty() {
            return Err(Error::EmptyInputSet);
        }
        tracing::info!(patch = %patch_id, exposure_count = ids.len(), "Coadd calexps");

        let preprocessor =
            ExposurePreprocessor::new(&self.config, sky_info.wcs(), Arc::clone(&self.matcher))?;
        let dest = DestBox::Max(sky_info.bbox());

        let mut accumulator =
            CoaddAccumulator::from_config(sky_info.bbox(), sky_info.wcs().clone(), &self.config)?;
        let mut diagnostics = CoaddDiagnostics::default();
        let temp_exp_type = self.config.dataset_type("_tempExp");

        for batch in ids.chunks(self.batch_size) {
            let outcomes: Vec<Option<Result<Exposure, ExposureError>>> = batch
                .par_iter()
                .map(|id| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    tracing::debug!(exposure = %id, "Preprocess exposure");
                    Some(preprocessor.load_and_preprocess(repository, id, sky_info.wcs(), dest))
                })
                .collect();

            if cancel.is_cancelled() {
                tracing::warn!(
                    patch = %patch_id,
                    folded = diagnostics.contributed.len(),
                    "Coadd run cancelled"
                );
                return Err(Error::Cancelled);
            }

            for (id, outcome) in batch.iter().zip(outcomes) {
                let exposure = match outcome {
                    Some(Ok(exposure)) => exposure,
                    Some(Err(e)) => {
                        tracing::warn!(exposure = %id, error = %e, "Skipping exposure");
                        diagnostics.skipped.push((id.clone(), e));
                        continue;
                    }
                    None => continue,
                };

                let stats = accumulator.add_exposure(&exposure)?;
                if stats.pixels_used == 0 {
                    tracing::warn!(exposure = %id, "Skipping exposure with no usable pixels");
                    diagnostics.skipped.push((id.clone(), ExposureError::NoOverlap));
                    continue;
                }
                tracing::info!(
                    exposure = %id,
                    pixels_used = stats.pixels_used,
                    pixels_rejected = stats.pixels_rejected,
                    "Added exposure"
                );
                if self.config.do_write {
                    let temp_exp_id = id.joined(patch_id);
                    repository.put(&temp_exp_type, &temp_exp_id, Dataset::Exposure(exposure))?;
                }
                diagnostics.contributed.push(id.clone());
            }
        }

        if diagnostics.contributed.is_empty() {
            tracing::error!(
                patch = %patch_id,
                skipped = diagnostics.skipped.len(),
                "No exposure contributed to the coadd"
            );
            return Err(Error::EmptyInputSet);
        }

        let mut coadd = accumulator.get_exposure();
        if self.config.do_interpolate_edges {
            interpolate_edge_pixels(&mut coadd);
        }
        coadd.calib = Some(PhotoCalib::from_zero_point(self.config.coadd_zero_point));

        if let Some(cache) = preprocessor.model_psf_cache() {
            let size = (cache.fwhm() * self.config.coadd_kernel_size_factor).round() as usize;
            let model = cache.get_or_build(KernelDims::odd_square(size))?;
            coadd.psf = Some(model.psf().clone());
            if self.config.do_write {
                let psf_type = self.config.dataset_type("_initPsf");
                repository.put(&psf_type, patch_id, Dataset::Psf(model.psf().clone()))?;
            }
        }

        if self.config.do_write {
            repository.put(
                &self.config.dataset_type(""),
                patch_id,
                Dataset::Exposure(coadd.clone()),
            )?;
        }

        tracing::info!(
            patch = %patch_id,
            contributed = diagnostics.contributed.len(),
            skipped = diagnostics.skipped.len(),
            "Coadd complete"
        );
        Ok(CoaddResult {
            exposure: coadd,
            input_count: accumulator.input_count().clone(),
            diagnostics,
        })
    }
}

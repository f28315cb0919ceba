//! Run-scoped cache of model PSFs keyed by kernel dimensions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{double_gaussian, KernelDims, ModelPsf};
use crate::error::Error;

/// Dimension-keyed model-PSF cache for one coaddition run.
///
/// Successive exposures usually share a kernel size, so each distinct size
/// is built once and then shared. Safe for concurrent use by the parallel
/// preprocessing stage: the first caller for a size builds under the lock,
/// later callers get the cached `Arc`.
#[derive(Debug)]
pub struct ModelPsfCache {
    fwhm: f64,
    models: Mutex<HashMap<KernelDims, Arc<ModelPsf>>>,
    builds: AtomicUsize,
    hits: AtomicUsize,
}

impl ModelPsfCache {
    /// Cache for models of core FWHM `fwhm` pixels.
    pub fn new(fwhm: f64) -> Result<Self, Error> {
        if !(fwhm.is_finite() && fwhm > 0.0) {
            return Err(Error::invalid(
                "fwhm",
                format!("must be positive, got {}", fwhm),
            ));
        }
        Ok(Self {
            fwhm,
            models: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    pub fn get_or_build(&self, dims: KernelDims) -> Result<Arc<ModelPsf>, Error> {
        let mut models = self.models.lock();
        if let Some(model) = models.get(&dims) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(model));
        }

        tracing::debug!(
            fwhm = self.fwhm,
            width = dims.width,
            height = dims.height,
            "Create double Gaussian PSF model"
        );
        let model = Arc::new(double_gaussian(self.fwhm, dims)?);
        models.insert(dims, Arc::clone(&model));
        self.builds.fetch_add(1, Ordering::Relaxed);
        Ok(model)
    }

    /// Number of models constructed.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of lookups served from the cache.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

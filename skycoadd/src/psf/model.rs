//! Double-Gaussian model PSF.

use super::{gaussian_image, KernelDims, Psf};
use crate::error::Error;

/// FWHM of a Gaussian in units of its standard deviation: `2·√(2·ln 2)`.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_4;

/// Wing width relative to the core.
pub const WING_SIGMA_RATIO: f64 = 2.5;

/// Wing peak amplitude relative to the core peak.
pub const WING_AMPLITUDE: f64 = 0.1;

/// Immutable model PSF: a core + wing Gaussian with declared core FWHM.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPsf {
    fwhm: f64,
    psf: Psf,
}

impl ModelPsf {
    /// Core FWHM in pixels.
    #[inline]
    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    #[inline]
    pub fn psf(&self) -> &Psf {
        &self.psf
    }

    #[inline]
    pub fn dimensions(&self) -> KernelDims {
        self.psf.dimensions()
    }
}

/// Build the double-Gaussian model PSF.
///
/// Core sigma is `fwhm / FWHM_PER_SIGMA`; the wing has `WING_SIGMA_RATIO` times
/// that sigma and `WING_AMPLITUDE` times the core peak. The kernel sums to 1.
/// Deterministic: equal inputs give bit-identical kernels.
pub fn double_gaussian(fwhm: f64, dims: KernelDims) -> Result<ModelPsf, Error> {
    if !(fwhm.is_finite() && fwhm > 0.0) {
        return Err(Error::invalid(
            "fwhm",
            format!("must be positive, got {}", fwhm),
        ));
    }
    dims.validate()?;

    let core_sigma = fwhm / FWHM_PER_SIGMA;
    let core = gaussian_image(core_sigma, dims);
    let wing = gaussian_image(core_sigma * WING_SIGMA_RATIO, dims);

    let mut kernel = core;
    for (k, w) in kernel.pixels_mut().iter_mut().zip(wing.pixels()) {
        *k += WING_AMPLITUDE * w;
    }

    Ok(ModelPsf {
        fwhm,
        psf: Psf::from_kernel(kernel)?,
    })
}

//! Point-spread functions: kernel descriptors, the double-Gaussian model
//! builder, the run-scoped model cache and PSF matching.

mod cache;
mod matching;
mod model;


pub use cache::ModelPsfCache;
pub use matching::{GaussianPsfMatcher, KernelCell, PsfMatchConfig, PsfMatchResult, PsfMatcher};
pub use model::{double_gaussian, ModelPsf, FWHM_PER_SIGMA, WING_AMPLITUDE, WING_SIGMA_RATIO};

use crate::common::Buffer2;
use crate::error::Error;

/// Kernel dimensions in pixels; the key of the model-PSF cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelDims {
    pub width: usize,
    pub height: usize,
}

impl KernelDims {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Square kernel of side `size`, rounded up to the next odd number.
    pub fn odd_square(size: usize) -> Self {
        let side = size.max(1) | 1;
        Self::new(side, side)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid(
                "kernel dimensions",
                format!("must be positive, got {}x{}", self.width, self.height),
            ));
        }
        if self.width % 2 == 0 || self.height % 2 == 0 {
            return Err(Error::invalid(
                "kernel dimensions",
                format!("must be odd, got {}x{}", self.width, self.height),
            ));
        }
        Ok(())
    }

    /// Index of the central pixel along each axis.
    #[inline]
    pub fn center(&self) -> (usize, usize) {
        (self.width / 2, self.height / 2)
    }
}

/// PSF descriptor: a normalised kernel image centred on its middle pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Psf {
    kernel: Buffer2<f64>,
}

impl Psf {
    /// Wrap a kernel image, normalising it to unit sum.
    ///
    /// Fails with `InvalidParameter` for even or empty dimensions and for
    /// kernels whose sum is not positive and finite.
    pub fn from_kernel(kernel: Buffer2<f64>) -> Result<Self, Error> {
        KernelDims::new(kernel.width(), kernel.height()).validate()?;
        let sum: f64 = kernel.pixels().iter().sum();
        if !(sum.is_finite() && sum > 0.0) {
            return Err(Error::invalid(
                "psf kernel",
                format!("sum must be positive and finite, got {}", sum),
            ));
        }
        let inv = 1.0 / sum;
        Ok(Self {
            kernel: kernel.map(|v| v * inv),
        })
    }

    /// Single circular Gaussian of width `sigma` pixels.
    pub fn gaussian(sigma: f64, dims: KernelDims) -> Result<Self, Error> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(Error::invalid(
                "sigma",
                format!("must be positive, got {}", sigma),
            ));
        }
        dims.validate()?;
        Self::from_kernel(gaussian_image(sigma, dims))
    }

    #[inline]
    pub fn kernel(&self) -> &Buffer2<f64> {
        &self.kernel
    }

    #[inline]
    pub fn dimensions(&self) -> KernelDims {
        KernelDims::new(self.kernel.width(), self.kernel.height())
    }

    /// Gaussian-equivalent width from the second moment about the centroid.
    ///
    /// For a circular Gaussian `<r²> = 2σ²`; truncation by the kernel box
    /// biases the result low by the same amount for any two kernels of equal size.
    pub fn second_moment_sigma(&self) -> f64 {
        let k = &self.kernel;
        let (mut sx, mut sy, mut sum) = (0.0, 0.0, 0.0);
        for y in 0..k.height() {
            for x in 0..k.width() {
                let v = k[(x, y)];
                sx += v * x as f64;
                sy += v * y as f64;
                sum += v;
            }
        }
        let (cx, cy) = (sx / sum, sy / sum);
        let mut r2 = 0.0;
        for y in 0..k.height() {
            for x in 0..k.width() {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                r2 += k[(x, y)] * (dx * dx + dy * dy);
            }
        }
        (r2 / sum / 2.0).max(0.0).sqrt()
    }
}

/// Unnormalised circular Gaussian sampled at pixel centres.
pub(crate) fn gaussian_image(sigma: f64, dims: KernelDims) -> Buffer2<f64> {
    let (cx, cy) = dims.center();
    let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);
    Buffer2::from_fn(dims.width, dims.height, |x, y| {
        let dx = x as f64 - cx as f64;
        let dy = y as f64 - cy as f64;
        (-(dx * dx + dy * dy) * inv_two_sigma_sq).exp()
    })
}

//! PSF matching: drive an exposure's PSF towards a target model.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{gaussian_image, KernelDims, ModelPsf};
use crate::common::{rows_per_chunk, Buffer2};
use crate::error::{Error, ExposureError};
use crate::exposure::{Exposure, MaskPixel, MaskPlane};
use crate::geom::Box2I;

/// Matching kernels narrower than this (pixels) are replaced by a delta function.
const MIN_KERNEL_SIGMA: f64 = 1e-3;

/// Allowed excess of source over target second moment (pixels²) before the
/// match is declared a deconvolution.
const DECONVOLUTION_TOLERANCE: f64 = 1e-9;

/// Computes a matching kernel and convolves the exposure with it.
///
/// Implementations must fail with `PsfMatchFailure` rather than return a
/// poorly matched exposure; the caller skips that exposure only.
pub trait PsfMatcher: Send + Sync {
    fn match_exposure(
        &self,
        exposure: Exposure,
        target: &ModelPsf,
    ) -> Result<PsfMatchResult, ExposureError>;
}

/// PSF-matched exposure plus fit diagnostics.
#[derive(Debug)]
pub struct PsfMatchResult {
    /// Exposure convolved with the matching kernel; carries the target PSF.
    pub exposure: Exposure,
    pub matching_kernel: Buffer2<f64>,
    /// Cell partition used to judge whether the exposure has enough signal.
    pub cells: Vec<KernelCell>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelCell {
    /// Parent-coordinate extent of the cell.
    pub bbox: Box2I,
    /// `Σ value / sqrt(Σ variance)` over good pixels.
    pub snr: f64,
    pub usable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsfMatchConfig {
    /// Side of the square cells the exposure is partitioned into (pixels).
    pub cell_size: usize,
    /// Minimum cell signal-to-noise for the cell to constrain the fit.
    pub min_cell_snr: f64,
}

impl Default for PsfMatchConfig {
    fn default() -> Self {
        Self {
            cell_size: 128,
            min_cell_snr: 10.0,
        }
    }
}

impl PsfMatchConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.cell_size == 0 {
            return Err(Error::invalid("psf_match.cell_size", "must be positive"));
        }
        if !(self.min_cell_snr.is_finite() && self.min_cell_snr >= 0.0) {
            return Err(Error::invalid(
                "psf_match.min_cell_snr",
                format!("must be non-negative, got {}", self.min_cell_snr),
            ));
        }
        Ok(())
    }
}

/// Gaussian matching under the second-moment approximation.
///
/// Both PSFs are reduced to Gaussian-equivalent widths; the matching kernel
/// is the Gaussian of width `sqrt(σ_target² − σ_source²)`, sampled on the
/// target's kernel grid. Targets narrower than the source cannot be reached by
/// convolution and fail. The value plane is convolved with the kernel, the
/// variance plane with the squared kernel, and mask bits are OR-ed over the
/// kernel footprint. Pixels closer to the border than the kernel radius keep
/// their input values and gain `EDGE`.
#[derive(Debug, Clone, Default)]
pub struct GaussianPsfMatcher {
    config: PsfMatchConfig,
}

impl GaussianPsfMatcher {
    pub fn new(config: PsfMatchConfig) -> Self {
        Self { config }
    }

    fn measure_cells(&self, exposure: &Exposure) -> Vec<KernelCell> {
        let reject = MaskPlane::bits(&[
            MaskPlane::Bad,
            MaskPlane::Sat,
            MaskPlane::Edge,
            MaskPlane::NoData,
        ]);
        let size = self.config.cell_size;
        let (w, h) = (exposure.width(), exposure.height());
        let mut cells = Vec::new();

        for cy in (0..h).step_by(size) {
            for cx in (0..w).step_by(size) {
                let (cw, ch) = (size.min(w - cx), size.min(h - cy));
                let (mut flux, mut var) = (0.0f64, 0.0f64);
                for y in cy..cy + ch {
                    for x in cx..cx + cw {
                        let (v, s2, m) = (
                            exposure.image[(x, y)],
                            exposure.variance[(x, y)],
                            exposure.mask[(x, y)],
                        );
                        if m & reject == 0 && v.is_finite() && s2.is_finite() && s2 > 0.0 {
                            flux += v as f64;
                            var += s2 as f64;
                        }
                    }
                }
                let snr = if var > 0.0 { flux / var.sqrt() } else { 0.0 };
                cells.push(KernelCell {
                    bbox: Box2I::from_origin_size(
                        exposure.xy0.x + cx as i32,
                        exposure.xy0.y + cy as i32,
                        cw,
                        ch,
                    ),
                    snr,
                    usable: snr >= self.config.min_cell_snr,
                });
            }
        }
        cells
    }
}

impl PsfMatcher for GaussianPsfMatcher {
    fn match_exposure(
        &self,
        exposure: Exposure,
        target: &ModelPsf,
    ) -> Result<PsfMatchResult, ExposureError> {
        let source_psf = exposure
            .psf
            .as_ref()
            .ok_or_else(|| ExposureError::PsfMatchFailure("exposure has no PSF".to_string()))?;

        let cells = self.measure_cells(&exposure);
        if !cells.iter().any(|c| c.usable) {
            let best = cells.iter().map(|c| c.snr).fold(0.0f64, f64::max);
            return Err(ExposureError::PsfMatchFailure(format!(
                "no kernel cell reached S/N {:.1} (best {:.1})",
                self.config.min_cell_snr, best
            )));
        }

        let sigma_source = source_psf.second_moment_sigma();
        let sigma_target = target.psf().second_moment_sigma();
        let excess = sigma_target * sigma_target - sigma_source * sigma_source;
        if excess < -DECONVOLUTION_TOLERANCE {
            return Err(ExposureError::PsfMatchFailure(format!(
                "target PSF (sigma {:.3}) is narrower than exposure PSF (sigma {:.3})",
                sigma_target, sigma_source
            )));
        }

        let kernel = matching_kernel(excess.max(0.0).sqrt(), target.dimensions());
        tracing::debug!(
            sigma_source,
            sigma_target,
            usable_cells = cells.iter().filter(|c| c.usable).count(),
            total_cells = cells.len(),
            "PSF matching kernel fitted"
        );

        let mut matched = convolve_exposure(&exposure, &kernel);
        matched.psf = Some(target.psf().clone());

        Ok(PsfMatchResult {
            exposure: matched,
            matching_kernel: kernel,
            cells,
        })
    }
}

/// Unit-sum Gaussian of width `sigma`, or a delta function when `sigma` is negligible.
pub(crate) fn matching_kernel(sigma: f64, dims: KernelDims) -> Buffer2<f64> {
    if sigma < MIN_KERNEL_SIGMA {
        let (cx, cy) = dims.center();
        return Buffer2::from_fn(dims.width, dims.height, |x, y| {
            if x == cx && y == cy {
                1.0
            } else {
                0.0
            }
        });
    }
    let mut kernel = gaussian_image(sigma, dims);
    let inv: f64 = 1.0 / kernel.pixels().iter().sum::<f64>();
    kernel.pixels_mut().iter_mut().for_each(|k| *k *= inv);
    kernel
}

/// Convolve all three planes with a symmetric kernel (correlation and
/// convolution coincide).
pub(crate) fn convolve_exposure(exposure: &Exposure, kernel: &Buffer2<f64>) -> Exposure {
    let (w, h) = (exposure.width(), exposure.height());
    let (kw, kh) = (kernel.width(), kernel.height());
    let (rx, ry) = (kw / 2, kh / 2);
    let edge = MaskPlane::Edge.bit();
    if w == 0 || h == 0 {
        return exposure.clone();
    }

    let mut image = Buffer2::new_filled(w, h, 0.0f32);
    let mut variance = Buffer2::new_filled(w, h, 0.0f32);
    let mut mask: Buffer2<MaskPixel> = Buffer2::new_filled(w, h, 0);

    let rows = rows_per_chunk(h);
    image
        .pixels_mut()
        .par_chunks_mut(w * rows)
        .zip(variance.pixels_mut().par_chunks_mut(w * rows))
        .zip(mask.pixels_mut().par_chunks_mut(w * rows))
        .enumerate()
        .for_each(|(chunk_idx, ((img_out, var_out), mask_out))| {
            let y_start = chunk_idx * rows;
            for row in 0..img_out.len() / w {
                let y = y_start + row;
                for x in 0..w {
                    let out = row * w + x;
                    if x < rx || y < ry || x + rx >= w || y + ry >= h {
                        img_out[out] = exposure.image[(x, y)];
                        var_out[out] = exposure.variance[(x, y)];
                        mask_out[out] = exposure.mask[(x, y)] | edge;
                        continue;
                    }

                    let (mut value, mut var, mut bits) = (0.0f64, 0.0f64, 0);
                    for ky in 0..kh {
                        let sy = y + ky - ry;
                        for kx in 0..kw {
                            let k = kernel[(kx, ky)];
                            if k == 0.0 {
                                continue;
                            }
                            let sx = x + kx - rx;
                            value += k * exposure.image[(sx, sy)] as f64;
                            var += k * k * exposure.variance[(sx, sy)] as f64;
                            bits |= exposure.mask[(sx, sy)];
                        }
                    }
                    img_out[out] = value as f32;
                    var_out[out] = var as f32;
                    mask_out[out] = bits;
                }
            }
        });

    Exposure {
        xy0: exposure.xy0,
        image,
        mask,
        variance,
        wcs: exposure.wcs.clone(),
        psf: exposure.psf.clone(),
        calib: exposure.calib,
    }
}

//! Inverse-variance weighted accumulation of registered exposures.

use glam::IVec2;
use rayon::prelude::*;

use crate::common::{rows_per_chunk, Buffer2};
use crate::config::CoaddConfig;
use crate::error::Error;
use crate::exposure::{Exposure, MaskPixel, MaskPlane, NO_DATA_VARIANCE};
use crate::geom::Box2I;
use crate::wcs::Wcs;

/// Pixel counts from one [`CoaddAccumulator::add_exposure`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddStats {
    /// Pixels folded into the sums.
    pub pixels_used: usize,
    /// Overlapping pixels left out (masked, non-finite, or without positive variance).
    pub pixels_rejected: usize,
}

/// Running weighted sums over one destination geometry.
///
/// With `w = 1/variance` per pixel the accumulator keeps `Σ(v·w)`, `Σw` and
/// `Σ(w²·variance)` in `f64`. The finalised value is `Σ(v·w) / Σw` and the
/// variance `Σ(w²·variance) / (Σw)²`, which equals `1/Σw` for inverse-variance
/// weights. Every update is a per-pixel sum, so the result does not depend on
/// the order exposures are added in (up to floating-point rounding).
#[derive(Debug, Clone)]
pub struct CoaddAccumulator {
    bbox: Box2I,
    wcs: Wcs,
    bad_mask: MaskPixel,
    no_data_value: f32,
    weighted_sum: Buffer2<f64>,
    weight_sum: Buffer2<f64>,
    variance_sum: Buffer2<f64>,
    input_count: Buffer2<u32>,
    mask_or: Buffer2<MaskPixel>,
    exposure_count: usize,
}

impl CoaddAccumulator {
    /// Empty accumulator over `bbox` in the `wcs` frame.
    ///
    /// Pixels with any of `bad_mask` set never contribute; `NO_DATA` is always
    /// treated as bad.
    pub fn new(
        bbox: Box2I,
        wcs: Wcs,
        bad_mask: MaskPixel,
        no_data_value: f32,
    ) -> Result<Self, Error> {
        if bbox.is_empty() {
            return Err(Error::invalid(
                "coadd bbox",
                format!("must not be empty, got {:?}", bbox),
            ));
        }
        let (w, h) = (bbox.width(), bbox.height());
        Ok(Self {
            bbox,
            wcs,
            bad_mask: bad_mask | MaskPlane::NoData.bit(),
            no_data_value,
            weighted_sum: Buffer2::new_default(w, h),
            weight_sum: Buffer2::new_default(w, h),
            variance_sum: Buffer2::new_default(w, h),
            input_count: Buffer2::new_default(w, h),
            mask_or: Buffer2::new_default(w, h),
            exposure_count: 0,
        })
    }

    pub fn from_config(bbox: Box2I, wcs: Wcs, config: &CoaddConfig) -> Result<Self, Error> {
        Self::new(bbox, wcs, config.excluded_mask()?, config.no_data_value)
    }

    #[inline]
    pub fn bbox(&self) -> Box2I {
        self.bbox
    }

    #[inline]
    pub fn wcs(&self) -> &Wcs {
        &self.wcs
    }

    /// Mask bits that exclude a pixel from the sums.
    #[inline]
    pub fn bad_mask(&self) -> MaskPixel {
        self.bad_mask
    }

    /// Number of exposures that contributed at least one pixel.
    #[inline]
    pub fn exposure_count(&self) -> usize {
        self.exposure_count
    }

    /// Per-pixel number of contributing exposures.
    #[inline]
    pub fn input_count(&self) -> &Buffer2<u32> {
        &self.input_count
    }

    /// Per-pixel `Σw`.
    #[inline]
    pub fn weight_sum(&self) -> &Buffer2<f64> {
        &self.weight_sum
    }

    /// Fold one registered exposure into the sums.
    ///
    /// Only the part overlapping the accumulator box is used. Fails with
    /// `GeometryMismatch` when the exposure is on a different coordinate system.
    pub fn add_exposure(&mut self, exposure: &Exposure) -> Result<AddStats, Error> {
        if exposure.wcs != self.wcs {
            return Err(Error::GeometryMismatch(format!(
                "exposure at {:?} is not in the coadd coordinate system",
                exposure.bbox()
            )));
        }

        let mut stats = AddStats::default();
        let overlap = self.bbox.intersection(&exposure.bbox());
        if overlap.is_empty() {
            return Ok(stats);
        }

        for py in overlap.y_min..=overlap.y_max {
            let sy = (py - exposure.xy0.y) as usize;
            let dy = (py - self.bbox.y_min) as usize;
            for px in overlap.x_min..=overlap.x_max {
                let sx = (px - exposure.xy0.x) as usize;
                let dx = (px - self.bbox.x_min) as usize;

                let m = exposure.mask[(sx, sy)];
                let v = exposure.image[(sx, sy)];
                let var = exposure.variance[(sx, sy)];
                if m & self.bad_mask != 0 || !v.is_finite() || !(var.is_finite() && var > 0.0) {
                    stats.pixels_rejected += 1;
                    continue;
                }

                let var = var as f64;
                let w = 1.0 / var;
                let d = self.weight_sum.index(dx, dy);
                self.weighted_sum[d] += v as f64 * w;
                self.weight_sum[d] += w;
                self.variance_sum[d] += w * w * var;
                self.input_count[d] += 1;
                self.mask_or[d] |= m;
                stats.pixels_used += 1;
            }
        }

        if stats.pixels_used > 0 {
            self.exposure_count += 1;
        }
        tracing::trace!(
            used = stats.pixels_used,
            rejected = stats.pixels_rejected,
            "Accumulated exposure"
        );
        Ok(stats)
    }

    /// Combine a partial accumulator over the same geometry into this one.
    pub fn merge(&mut self, other: &CoaddAccumulator) -> Result<(), Error> {
        if other.bbox != self.bbox || other.wcs != self.wcs || other.bad_mask != self.bad_mask {
            return Err(Error::GeometryMismatch(format!(
                "cannot merge accumulator over {:?} into {:?}",
                other.bbox, self.bbox
            )));
        }
        add_into(&mut self.weighted_sum, &other.weighted_sum);
        add_into(&mut self.weight_sum, &other.weight_sum);
        add_into(&mut self.variance_sum, &other.variance_sum);
        let counts = self.input_count.pixels_mut().iter_mut();
        for (a, b) in counts.zip(other.input_count.pixels()) {
            *a += b;
        }
        let masks = self.mask_or.pixels_mut().iter_mut();
        for (a, b) in masks.zip(other.mask_or.pixels()) {
            *a |= b;
        }
        self.exposure_count += other.exposure_count;
        Ok(())
    }

    /// Finalise into a composite exposure without changing the sums.
    ///
    /// Pixels with zero total weight get `no_data_value`, infinite variance
    /// and `NO_DATA`. The composite carries no PSF or calibration.
    pub fn get_exposure(&self) -> Exposure {
        let (w, h) = (self.bbox.width(), self.bbox.height());
        let no_data = MaskPlane::NoData.bit();

        let mut image = Buffer2::new_filled(w, h, 0.0f32);
        let mut variance = Buffer2::new_filled(w, h, 0.0f32);
        let mut mask: Buffer2<MaskPixel> = Buffer2::new_filled(w, h, 0);

        let rows = rows_per_chunk(h);
        let chunk = w * rows;
        image
            .pixels_mut()
            .par_chunks_mut(chunk)
            .zip(variance.pixels_mut().par_chunks_mut(chunk))
            .zip(mask.pixels_mut().par_chunks_mut(chunk))
            .enumerate()
            .for_each(|(chunk_idx, ((img_out, var_out), mask_out))| {
                let offset = chunk_idx * chunk;
                for i in 0..img_out.len() {
                    let idx = offset + i;
                    let weight = self.weight_sum[idx];
                    if weight > 0.0 {
                        img_out[i] = (self.weighted_sum[idx] / weight) as f32;
                        var_out[i] = (self.variance_sum[idx] / (weight * weight)) as f32;
                        mask_out[i] = self.mask_or[idx];
                    } else {
                        img_out[i] = self.no_data_value;
                        var_out[i] = NO_DATA_VARIANCE;
                        mask_out[i] = self.mask_or[idx] | no_data;
                    }
                }
            });

        Exposure::new(
            IVec2::new(self.bbox.x_min, self.bbox.y_min),
            image,
            mask,
            variance,
            self.wcs.clone(),
        )
    }
}

fn add_into(a: &mut Buffer2<f64>, b: &Buffer2<f64>) {
    for (x, y) in a.pixels_mut().iter_mut().zip(b.pixels()) {
        *x += y;
    }
}

//! Resampling of exposures onto a destination coordinate system.
//!
//! For each destination pixel the centre is mapped destination pixel → sky →
//! source pixel and the source is sampled with a separable kernel
//! ([`InterpolationMethod`]). Values and variances are combined with the same
//! interpolation weights; mask bits of every contributing tap are OR-ed.
//!
//! A destination pixel is uncovered when any tap with nonzero weight falls
//! outside the source or on a `NO_DATA` source pixel. Uncovered pixels get a
//! NaN value, infinite variance and `NO_DATA`, so they never carry weight
//! downstream.

mod interpolation;


pub use interpolation::InterpolationMethod;

use glam::{DVec2, IVec2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::common::{rows_per_chunk, Buffer2};
use crate::error::ExposureError;
use crate::exposure::{Exposure, MaskPixel, MaskPlane, NO_DATA_VARIANCE};
use crate::geom::{Box2D, Box2I};
use crate::wcs::Wcs;
use interpolation::axis_weights;

/// Boundary samples per source edge used to bound the warped footprint.
const FOOTPRINT_SAMPLES_PER_EDGE: usize = 16;

/// Extra margin (pixels) around the projected footprint beyond the kernel radius.
const FOOTPRINT_MARGIN: i32 = 2;

/// Configuration for exposure warping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpConfig {
    /// Interpolation method to use
    pub method: InterpolationMethod,
}

/// Destination region policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestBox {
    /// Smallest box holding every covered pixel, capped at the given box.
    Max(Box2I),
    /// Exactly the given box; uncovered pixels are `NO_DATA`.
    Exact(Box2I),
}

impl DestBox {
    pub fn bbox(&self) -> Box2I {
        match *self {
            DestBox::Max(b) | DestBox::Exact(b) => b,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Warper {
    config: WarpConfig,
}

impl Warper {
    pub fn new(config: WarpConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn method(&self) -> InterpolationMethod {
        self.config.method
    }

    /// Resample `exposure` onto `dest_wcs` within `dest`.
    ///
    /// The output has no PSF (resampling does not track it) and keeps the
    /// input calibration. Fails with `NoOverlap` when no destination pixel is
    /// covered.
    pub fn warp_exposure(
        &self,
        dest_wcs: &Wcs,
        exposure: &Exposure,
        dest: DestBox,
    ) -> Result<Exposure, ExposureError> {
        let dest_bbox = dest.bbox();
        if dest_bbox.is_empty() || exposure.width() == 0 || exposure.height() == 0 {
            return Err(ExposureError::NoOverlap);
        }

        let margin = self.config.method.kernel_radius() as i32 + FOOTPRINT_MARGIN;
        let footprint = project_footprint(exposure, dest_wcs, dest_bbox.grown(margin))
            .ok_or(ExposureError::NoOverlap)?;
        let region = footprint.grown(margin).intersection(&dest_bbox);
        if region.is_empty() {
            return Err(ExposureError::NoOverlap);
        }

        let grid = match dest {
            DestBox::Max(_) => region,
            DestBox::Exact(b) => b,
        };
        let mut warped = self.resample(dest_wcs, exposure, grid, region);

        let no_data = MaskPlane::NoData.bit();
        let mut covered = Box2I::empty();
        for y in 0..warped.height() {
            for x in 0..warped.width() {
                if warped.mask[(x, y)] & no_data == 0 {
                    covered.include(grid.x_min + x as i32, grid.y_min + y as i32);
                }
            }
        }
        if covered.is_empty() {
            return Err(ExposureError::NoOverlap);
        }

        if let DestBox::Max(_) = dest {
            warped = crop(warped, covered);
        }

        tracing::debug!(
            method = ?self.config.method,
            x_min = warped.xy0.x,
            y_min = warped.xy0.y,
            width = warped.width(),
            height = warped.height(),
            "Warped exposure"
        );
        Ok(warped)
    }

    /// Resample over `grid`, evaluating only pixels inside `region`.
    fn resample(
        &self,
        dest_wcs: &Wcs,
        exposure: &Exposure,
        grid: Box2I,
        region: Box2I,
    ) -> Exposure {
        let (w, h) = (grid.width(), grid.height());
        let method = self.config.method;
        let no_data = MaskPlane::NoData.bit();

        let mut image = Buffer2::new_filled(w, h, f32::NAN);
        let mut variance = Buffer2::new_filled(w, h, NO_DATA_VARIANCE);
        let mut mask: Buffer2<MaskPixel> = Buffer2::new_filled(w, h, no_data);

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
                    let py = grid.y_min + (y_start + row) as i32;
                    for x in 0..w {
                        let px = grid.x_min + x as i32;
                        if !region.contains(px, py) {
                            continue;
                        }
                        let sky = dest_wcs.pixel_to_sky(DVec2::new(px as f64, py as f64));
                        let Some(src) = exposure.wcs.sky_to_pixel(sky) else {
                            continue;
                        };
                        if let Some((v, var, m)) = sample(exposure, src, method) {
                            let out = row * w + x;
                            img_out[out] = v as f32;
                            var_out[out] = var as f32;
                            mask_out[out] = m;
                        }
                    }
                }
            });

        Exposure {
            xy0: IVec2::new(grid.x_min, grid.y_min),
            image,
            mask,
            variance,
            wcs: dest_wcs.clone(),
            psf: None,
            calib: exposure.calib,
        }
    }
}

/// Sample the source at parent position `src`.
///
/// Returns `None` when the position is not fully covered by valid pixels.
fn sample(
    exposure: &Exposure,
    src: DVec2,
    method: InterpolationMethod,
) -> Option<(f64, f64, MaskPixel)> {
    let no_data = MaskPlane::NoData.bit();
    let local = src - exposure.xy0.as_dvec2();
    let reach = method.kernel_radius() as f64 + 1.0;
    if !(local.x > -reach
        && local.y > -reach
        && local.x < exposure.width() as f64 + reach
        && local.y < exposure.height() as f64 + reach)
    {
        return None;
    }
    let wx = axis_weights(method, local.x);
    let wy = axis_weights(method, local.y);

    let (mut value, mut var, mut bits) = (0.0f64, 0.0f64, 0);
    for (sy, ky) in wy.taps() {
        if ky == 0.0 {
            continue;
        }
        for (sx, kx) in wx.taps() {
            let k = kx * ky;
            if k == 0.0 {
                continue;
            }
            let m = *exposure.mask.checked(sx, sy)?;
            if m & no_data != 0 {
                return None;
            }
            let idx = exposure.image.index(sx as usize, sy as usize);
            value += k * exposure.image[idx] as f64;
            var += k * exposure.variance[idx] as f64;
            bits |= m;
        }
    }
    // Negative Lanczos lobes can pull a weighted variance below zero
    Some((value, var.max(0.0), bits))
}

/// Parent-pixel box in the destination spanned by the source boundary, or
/// `None` when no boundary point projects.
///
/// Projected points are clamped to `limit`; near the horizon of the tangent
/// plane they run off towards infinity.
fn project_footprint(exposure: &Exposure, dest_wcs: &Wcs, limit: Box2I) -> Option<Box2I> {
    let outline = Box2D::from(exposure.bbox());
    let (min, max) = (outline.min, outline.max);
    let n = FOOTPRINT_SAMPLES_PER_EDGE;

    let mut footprint = Box2I::empty();
    let mut any = false;
    for i in 0..=n {
        let t = i as f64 / n as f64;
        let x = min.x + t * (max.x - min.x);
        let y = min.y + t * (max.y - min.y);
        for p in [
            DVec2::new(x, min.y),
            DVec2::new(x, max.y),
            DVec2::new(min.x, y),
            DVec2::new(max.x, y),
        ] {
            let sky = exposure.wcs.pixel_to_sky(p);
            if let Some(d) = dest_wcs.sky_to_pixel(sky) {
                if !(d.x.is_finite() && d.y.is_finite()) {
                    continue;
                }
                let dx = d.x.clamp(limit.x_min as f64, limit.x_max as f64);
                let dy = d.y.clamp(limit.y_min as f64, limit.y_max as f64);
                footprint.include(dx.floor() as i32, dy.floor() as i32);
                footprint.include(dx.ceil() as i32, dy.ceil() as i32);
                any = true;
            }
        }
    }
    any.then_some(footprint)
}

/// Restrict an exposure to `bbox` (parent coordinates, inside the exposure).
fn crop(exposure: Exposure, bbox: Box2I) -> Exposure {
    if bbox == exposure.bbox() {
        return exposure;
    }
    let x0 = (bbox.x_min - exposure.xy0.x) as usize;
    let y0 = (bbox.y_min - exposure.xy0.y) as usize;
    let (w, h) = (bbox.width(), bbox.height());
    Exposure {
        xy0: IVec2::new(bbox.x_min, bbox.y_min),
        image: exposure.image.crop(x0, y0, w, h),
        mask: exposure.mask.crop(x0, y0, w, h),
        variance: exposure.variance.crop(x0, y0, w, h),
        wcs: exposure.wcs,
        psf: exposure.psf,
        calib: exposure.calib,
    }
}

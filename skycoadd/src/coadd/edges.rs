//! Fill `NO_DATA` holes in a composite by interpolating along rows.

use rayon::prelude::*;

use crate::exposure::{Exposure, MaskPlane};

/// Replace every `NO_DATA` pixel that has valid pixels on its row.
///
/// Between two valid pixels the value and variance are linearly interpolated;
/// beyond the last valid pixel of a row the nearest one is copied. Filled
/// pixels keep `NO_DATA` and gain `INTRP`. Returns the number of filled pixels.
pub fn interpolate_edge_pixels(exposure: &mut Exposure) -> usize {
    let width = exposure.width();
    if width == 0 {
        return 0;
    }
    let no_data = MaskPlane::NoData.bit();
    let intrp = MaskPlane::Intrp.bit();

    let filled: usize = exposure
        .image
        .pixels_mut()
        .par_chunks_mut(width)
        .zip(exposure.variance.pixels_mut().par_chunks_mut(width))
        .zip(exposure.mask.pixels_mut().par_chunks_mut(width))
        .map(|((image, variance), mask)| {
            let valid: Vec<usize> = (0..width).filter(|&x| mask[x] & no_data == 0).collect();
            if valid.is_empty() || valid.len() == width {
                return 0;
            }

            let mut filled = 0;
            // Index into `valid` of the first valid pixel right of x
            let mut next = 0usize;
            for x in 0..width {
                if mask[x] & no_data == 0 {
                    next += 1;
                    continue;
                }
                let left = next.checked_sub(1).map(|i| valid[i]);
                let right = valid.get(next).copied();
                let (v, var) = match (left, right) {
                    (Some(l), Some(r)) => {
                        let t = (x - l) as f32 / (r - l) as f32;
                        (
                            image[l] + t * (image[r] - image[l]),
                            variance[l] + t * (variance[r] - variance[l]),
                        )
                    }
                    (Some(l), None) => (image[l], variance[l]),
                    (None, Some(r)) => (image[r], variance[r]),
                    (None, None) => continue,
                };
                image[x] = v;
                variance[x] = var;
                mask[x] |= intrp;
                filled += 1;
            }
            filled
        })
        .sum();

    tracing::debug!(filled, "Interpolated coadd edge pixels");
    filled
}

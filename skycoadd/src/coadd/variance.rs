//! Rescaling of a variance plane to match the observed pixel noise.

use crate::exposure::{Exposure, MaskPixel};

/// Scale the variance plane so its mean matches the empirical variance of the
/// image over unmasked, finite pixels.
///
/// Returns the factor applied; 1.0 (and no change) when fewer than two pixels
/// are usable or the ratio is not positive and finite.
pub fn scale_variance(exposure: &mut Exposure, bad_mask: MaskPixel) -> f64 {
    let (mut n, mut sum, mut sum_sq, mut var_sum) = (0usize, 0.0f64, 0.0f64, 0.0f64);
    for ((&v, &var), &m) in exposure
        .image
        .pixels()
        .iter()
        .zip(exposure.variance.pixels())
        .zip(exposure.mask.pixels())
    {
        if m & bad_mask != 0 || !v.is_finite() || !(var.is_finite() && var > 0.0) {
            continue;
        }
        let v = v as f64;
        n += 1;
        sum += v;
        sum_sq += v * v;
        var_sum += var as f64;
    }

    if n < 2 {
        tracing::warn!(pixels = n, "Too few pixels to rescale variance");
        return 1.0;
    }

    let mean = sum / n as f64;
    let empirical = (sum_sq - n as f64 * mean * mean) / (n - 1) as f64;
    let factor = empirical / (var_sum / n as f64);
    if !(factor.is_finite() && factor > 0.0) {
        tracing::warn!(factor, "Variance rescaling factor rejected");
        return 1.0;
    }

    let scale = factor as f32;
    exposure
        .variance
        .pixels_mut()
        .iter_mut()
        .for_each(|v| *v *= scale);
    tracing::info!(factor, pixels = n, "Rescaled variance plane");
    factor
}

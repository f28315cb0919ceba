//! Separable resampling kernels.
//!
//! Every method is evaluated as a product of two 1D weight sets, one per
//! axis. Weights along an axis always sum to 1.

use std::f64::consts::PI;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Sample positions closer than this to a pixel centre (pixels) are snapped
/// onto it, so identity mappings reproduce the input exactly.
pub(crate) const SNAP_TOLERANCE: f64 = 1e-6;

/// Widest tap set of any method (Lanczos-4).
pub(crate) const MAX_TAPS: usize = 8;

/// Resampling kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Nearest neighbour - no interpolation
    Nearest,
    /// Bilinear interpolation - 2x2 footprint
    Bilinear,
    /// Lanczos-2 (4x4 kernel)
    Lanczos2,
    /// Lanczos-3 (6x6 kernel) - default
    #[default]
    Lanczos3,
    /// Lanczos-4 (8x8 kernel)
    Lanczos4,
}

impl InterpolationMethod {
    /// Returns the kernel radius for this interpolation method.
    #[inline]
    pub fn kernel_radius(&self) -> usize {
        match self {
            InterpolationMethod::Nearest => 1,
            InterpolationMethod::Bilinear => 1,
            InterpolationMethod::Lanczos2 => 2,
            InterpolationMethod::Lanczos3 => 3,
            InterpolationMethod::Lanczos4 => 4,
        }
    }
}

/// Lanczos kernel value (direct computation).
///
/// L(x) = sinc(x) * sinc(x/a) for |x| < a, 0 otherwise.
/// Exactly zero at every nonzero integer.
fn lanczos_direct(x: f64, a: f64) -> f64 {
    let abs_x = x.abs();
    if abs_x < 1e-12 {
        return 1.0;
    }
    if abs_x >= a || abs_x.fract() == 0.0 {
        return 0.0;
    }
    let pi_x = PI * x;
    let pi_x_a = pi_x / a;
    (pi_x.sin() / pi_x) * (pi_x_a.sin() / pi_x_a)
}

/// Sub-pixel samples per unit interval in the LUT.
const LANCZOS_LUT_RESOLUTION: usize = 4096;

/// Pre-computed Lanczos kernel over `[0, a]`; the kernel is symmetric.
#[derive(Debug)]
struct LanczosLut {
    values: Vec<f64>,
    a: usize,
}

impl LanczosLut {
    fn new(a: usize) -> Self {
        let values = (0..=a * LANCZOS_LUT_RESOLUTION)
            .map(|i| lanczos_direct(i as f64 / LANCZOS_LUT_RESOLUTION as f64, a as f64))
            .collect();
        Self { values, a }
    }

    #[inline]
    fn lookup(&self, x: f64) -> f64 {
        let abs_x = x.abs();
        if abs_x >= self.a as f64 {
            return 0.0;
        }
        let idx = (abs_x * LANCZOS_LUT_RESOLUTION as f64 + 0.5) as usize;
        self.values[idx.min(self.values.len() - 1)]
    }
}

static LANCZOS2_LUT: OnceLock<LanczosLut> = OnceLock::new();
static LANCZOS3_LUT: OnceLock<LanczosLut> = OnceLock::new();
static LANCZOS4_LUT: OnceLock<LanczosLut> = OnceLock::new();

#[inline]
fn lanczos_lut(a: usize) -> &'static LanczosLut {
    match a {
        2 => LANCZOS2_LUT.get_or_init(|| LanczosLut::new(2)),
        3 => LANCZOS3_LUT.get_or_init(|| LanczosLut::new(3)),
        4 => LANCZOS4_LUT.get_or_init(|| LanczosLut::new(4)),
        _ => unreachable!("Unsupported Lanczos parameter: {}", a),
    }
}

/// 1D weights for one output sample: taps `start..start + len`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AxisWeights {
    pub start: i64,
    pub len: usize,
    pub weights: [f64; MAX_TAPS],
}

impl AxisWeights {
    fn single(index: i64) -> Self {
        let mut weights = [0.0; MAX_TAPS];
        weights[0] = 1.0;
        Self {
            start: index,
            len: 1,
            weights,
        }
    }

    /// Tap positions paired with their weights.
    #[inline]
    pub fn taps(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.weights[..self.len]
            .iter()
            .enumerate()
            .map(move |(i, &w)| (self.start + i as i64, w))
    }
}

/// Weights for sampling at local coordinate `coord` along one axis.
///
/// A position within `SNAP_TOLERANCE` of a pixel centre resolves to that
/// single pixel for every method.
pub(crate) fn axis_weights(method: InterpolationMethod, coord: f64) -> AxisWeights {
    let nearest = coord.round();
    if (coord - nearest).abs() < SNAP_TOLERANCE {
        return AxisWeights::single(nearest as i64);
    }

    let x0 = coord.floor();
    let fx = coord - x0;
    let x0 = x0 as i64;

    match method {
        InterpolationMethod::Nearest => AxisWeights::single(nearest as i64),
        InterpolationMethod::Bilinear => {
            let mut weights = [0.0; MAX_TAPS];
            weights[0] = 1.0 - fx;
            weights[1] = fx;
            AxisWeights {
                start: x0,
                len: 2,
                weights,
            }
        }
        InterpolationMethod::Lanczos2
        | InterpolationMethod::Lanczos3
        | InterpolationMethod::Lanczos4 => {
            let a = method.kernel_radius();
            let lut = lanczos_lut(a);
            let mut weights = [0.0; MAX_TAPS];
            let mut sum = 0.0;
            for (i, w) in weights[..2 * a].iter_mut().enumerate() {
                *w = lut.lookup(fx - (i as f64 - a as f64 + 1.0));
                sum += *w;
            }
            let inv = 1.0 / sum;
            weights[..2 * a].iter_mut().for_each(|w| *w *= inv);
            AxisWeights {
                start: x0 - a as i64 + 1,
                len: 2 * a,
                weights,
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn lanczos_kernel(x: f64, a: usize) -> f64 {
    lanczos_lut(a).lookup(x)
}

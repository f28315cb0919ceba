//! Testing utilities for skycoadd.

#![allow(dead_code)]

use glam::{DVec2, IVec2};

use crate::common::Buffer2;
use crate::exposure::{Exposure, MaskPixel, PhotoCalib};
use crate::geom::Box2I;
use crate::psf::{KernelDims, Psf};
use crate::tile::{SkyMap, TractId};
use crate::wcs::{SkyCoord, Wcs};

/// Zero point every synthetic exposure is calibrated to.
pub const TEST_ZERO_POINT: f64 = 27.0;

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Tangent-plane WCS of the test tile: 0.2"/px, centred on (150°, 2°) at pixel (50, 50).
pub fn tile_wcs() -> Wcs {
    Wcs::from_scale_rotation(
        DVec2::new(50.0, 50.0),
        SkyCoord::new(150.0, 2.0),
        0.2,
        0.0,
    )
}

/// Gaussian PSF of width `sigma` on a 15×15 kernel.
pub fn gaussian_psf(sigma: f64) -> Psf {
    Psf::gaussian(sigma, KernelDims::odd_square(15)).expect("valid test PSF")
}

/// Uniform exposure on the tile grid with a PSF and the test zero point.
pub fn constant_exposure(bbox: Box2I, value: f32, variance: f32) -> Exposure {
    Exposure::from_constant(bbox, tile_wcs(), value, variance)
        .with_psf(gaussian_psf(1.5))
        .with_calib(PhotoCalib::from_zero_point(TEST_ZERO_POINT))
}

/// Exposure with explicit per-pixel planes on the tile grid.
pub fn exposure_from_planes(
    xy0: IVec2,
    width: usize,
    height: usize,
    image: Vec<f32>,
    mask: Vec<MaskPixel>,
    variance: Vec<f32>,
) -> Exposure {
    Exposure::new(
        xy0,
        Buffer2::new(width, height, image),
        Buffer2::new(width, height, mask),
        Buffer2::new(width, height, variance),
        tile_wcs(),
    )
    .with_calib(PhotoCalib::from_zero_point(TEST_ZERO_POINT))
}

/// Sky background with Gaussian stars of width `sigma` at `positions` (local pixels).
pub fn star_field_exposure(
    bbox: Box2I,
    background: f32,
    variance: f32,
    sigma: f64,
    positions: &[(f64, f64, f64)],
) -> Exposure {
    let mut exposure = constant_exposure(bbox, background, variance).with_psf(gaussian_psf(sigma));
    let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);
    let (w, h) = (exposure.width(), exposure.height());
    exposure.image = Buffer2::from_fn(w, h, |x, y| {
        let stars: f64 = positions
            .iter()
            .map(|&(sx, sy, amp)| {
                let dx = x as f64 - sx;
                let dy = y as f64 - sy;
                amp * (-(dx * dx + dy * dy) * inv_two_sigma_sq).exp()
            })
            .sum();
        background + stars as f32
    });
    exposure
}

/// Sky map backed by a closure.
pub struct FnSkyMap<F>(pub F);

impl<F> SkyMap for FnSkyMap<F>
where
    F: Fn(&SkyCoord) -> TractId + Send + Sync,
{
    fn find_tract(&self, coord: &SkyCoord) -> TractId {
        (self.0)(coord)
    }
}

//! Exposures: value, mask and variance planes on a common pixel grid, with
//! the WCS, PSF and photometric calibration that describe them.

mod mask;

pub use mask::{MaskPixel, MaskPlane};

use glam::IVec2;

use crate::common::Buffer2;
use crate::geom::Box2I;
use crate::psf::Psf;
use crate::wcs::Wcs;

/// Variance assigned to pixels that carry no information.
///
/// Infinite variance means zero inverse-variance weight, and it keeps the
/// variance plane free of negative values.
pub const NO_DATA_VARIANCE: f32 = f32::INFINITY;

/// Photometric calibration: the flux of a zero-magnitude source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotoCalib {
    pub flux_mag0: f64,
}

impl PhotoCalib {
    /// Calibration whose zero-magnitude flux corresponds to zero point `zero_point` (mag).
    pub fn from_zero_point(zero_point: f64) -> Self {
        Self {
            flux_mag0: 10f64.powf(0.4 * zero_point),
        }
    }

    pub fn zero_point(&self) -> f64 {
        2.5 * self.flux_mag0.log10()
    }

    pub fn is_valid(&self) -> bool {
        self.flux_mag0.is_finite() && self.flux_mag0 > 0.0
    }
}

/// A calibrated image with co-registered mask and variance planes.
///
/// `xy0` is the parent-pixel position of local pixel `(0, 0)`; the WCS is
/// always expressed in parent coordinates.
#[derive(Debug, Clone)]
pub struct Exposure {
    pub xy0: IVec2,
    pub image: Buffer2<f32>,
    pub mask: Buffer2<MaskPixel>,
    pub variance: Buffer2<f32>,
    pub wcs: Wcs,
    pub psf: Option<Psf>,
    pub calib: Option<PhotoCalib>,
}

impl Exposure {
    pub fn new(
        xy0: IVec2,
        image: Buffer2<f32>,
        mask: Buffer2<MaskPixel>,
        variance: Buffer2<f32>,
        wcs: Wcs,
    ) -> Self {
        assert_eq!(
            (image.width(), image.height()),
            (mask.width(), mask.height()),
            "mask plane must match image plane"
        );
        assert_eq!(
            (image.width(), image.height()),
            (variance.width(), variance.height()),
            "variance plane must match image plane"
        );
        Self {
            xy0,
            image,
            mask,
            variance,
            wcs,
            psf: None,
            calib: None,
        }
    }

    /// Uniform exposure covering `bbox`, no mask bits set.
    pub fn from_constant(bbox: Box2I, wcs: Wcs, value: f32, variance: f32) -> Self {
        let (w, h) = (bbox.width(), bbox.height());
        Self::new(
            IVec2::new(bbox.x_min, bbox.y_min),
            Buffer2::new_filled(w, h, value),
            Buffer2::new_filled(w, h, 0),
            Buffer2::new_filled(w, h, variance),
            wcs,
        )
    }

    pub fn with_psf(mut self, psf: Psf) -> Self {
        self.psf = Some(psf);
        self
    }

    pub fn with_calib(mut self, calib: PhotoCalib) -> Self {
        self.calib = Some(calib);
        self
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.image.height()
    }

    /// Parent-coordinate bounding box.
    pub fn bbox(&self) -> Box2I {
        Box2I::from_origin_size(self.xy0.x, self.xy0.y, self.width(), self.height())
    }

    /// Local buffer index of parent pixel `(x, y)`, if inside the exposure.
    #[inline]
    pub fn local_index(&self, x: i32, y: i32) -> Option<usize> {
        let lx = x - self.xy0.x;
        let ly = y - self.xy0.y;
        if lx < 0 || ly < 0 || lx as usize >= self.width() || ly as usize >= self.height() {
            None
        } else {
            Some(self.image.index(lx as usize, ly as usize))
        }
    }

    /// Number of pixels with any of `bits` set.
    pub fn count_masked(&self, bits: MaskPixel) -> usize {
        self.mask.pixels().iter().filter(|&&m| m & bits != 0).count()
    }

    /// Set `plane` on every pixel where `predicate(local_x, local_y)` holds.
    pub fn mask_where(
        &mut self,
        plane: MaskPlane,
        mut predicate: impl FnMut(usize, usize) -> bool,
    ) {
        let width = self.width();
        for (idx, m) in self.mask.pixels_mut().iter_mut().enumerate() {
            if predicate(idx % width, idx / width) {
                *m |= plane.bit();
            }
        }
    }
}

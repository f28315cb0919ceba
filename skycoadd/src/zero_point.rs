//! Photometric rescaling to the coadd zero point.

use crate::error::{Error, ExposureError};
use crate::exposure::{Exposure, PhotoCalib};

/// Rescales exposures so a source of magnitude `m` has flux
/// `10^(-0.4 (m - zero_point))` in every contributing exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroPointScaler {
    calib: PhotoCalib,
}

impl ZeroPointScaler {
    pub fn new(zero_point: f64) -> Result<Self, Error> {
        let calib = PhotoCalib::from_zero_point(zero_point);
        if !zero_point.is_finite() || !calib.is_valid() {
            return Err(Error::invalid(
                "coadd_zero_point",
                format!("must be finite, got {}", zero_point),
            ));
        }
        Ok(Self { calib })
    }

    /// Calibration every scaled exposure ends up with.
    #[inline]
    pub fn calib(&self) -> PhotoCalib {
        self.calib
    }

    #[inline]
    pub fn zero_point(&self) -> f64 {
        self.calib.zero_point()
    }

    /// Multiplier taking pixel values calibrated by `calib` to the coadd zero point.
    pub fn scale_factor(&self, calib: &PhotoCalib) -> Result<f64, ExposureError> {
        if !calib.is_valid() {
            return Err(ExposureError::CalibrationMissing);
        }
        Ok(self.calib.flux_mag0 / calib.flux_mag0)
    }

    /// Scale values by the factor and variances by its square, in place.
    ///
    /// Returns the factor applied. The exposure's calibration becomes the coadd
    /// calibration. Fails with `CalibrationMissing` when the exposure has no
    /// valid calibration; the exposure is left untouched in that case.
    pub fn scale_exposure(&self, exposure: &mut Exposure) -> Result<f64, ExposureError> {
        let calib = exposure.calib.ok_or(ExposureError::CalibrationMissing)?;
        let factor = self.scale_factor(&calib)?;
        let value_scale = factor as f32;
        let variance_scale = (factor * factor) as f32;

        exposure
            .image
            .pixels_mut()
            .iter_mut()
            .for_each(|v| *v *= value_scale);
        exposure
            .variance
            .pixels_mut()
            .iter_mut()
            .for_each(|v| *v *= variance_scale);
        exposure.calib = Some(self.calib);
        Ok(factor)
    }
}

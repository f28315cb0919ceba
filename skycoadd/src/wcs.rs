//! World Coordinate System: gnomonic (TAN) projection between parent pixel
//! coordinates and ICRS sky coordinates.

use glam::DVec2;

/// Sky position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyCoord {
    pub ra: f64,
    pub dec: f64,
}

impl SkyCoord {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// Great-circle distance in degrees (haversine form).
    pub fn separation_deg(&self, other: &SkyCoord) -> f64 {
        let (dec1, dec2) = (self.dec.to_radians(), other.dec.to_radians());
        let d_dec = dec2 - dec1;
        let d_ra = (other.ra - self.ra).to_radians();
        let a = (d_dec / 2.0).sin().powi(2) + dec1.cos() * dec2.cos() * (d_ra / 2.0).sin().powi(2);
        (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
    }
}

/// Tangent-plane WCS.
///
/// 1. Pixel to intermediate: `(xi, eta) = CD × (x - CRPIX1, y - CRPIX2)`
/// 2. Intermediate to sky: de-project from the tangent plane at CRVAL.
///
/// Pixel coordinates are parent coordinates: pixel `(i, j)` has its centre at
/// `(i, j)`, independent of any sub-image origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel (CRPIX1, CRPIX2).
    pub crpix: DVec2,
    /// Reference sky position (CRVAL1, CRVAL2).
    pub crval: SkyCoord,
    /// Pixel offset to intermediate coordinates, degrees per pixel.
    pub cd: [[f64; 2]; 2],
}

impl Wcs {
    pub fn new(crpix: DVec2, crval: SkyCoord, cd: [[f64; 2]; 2]) -> Self {
        Self { crpix, crval, cd }
    }

    /// WCS with pixel scale (arcsec/pixel) and position angle (degrees, North through East).
    pub fn from_scale_rotation(
        crpix: DVec2,
        crval: SkyCoord,
        pixel_scale: f64,
        rotation: f64,
    ) -> Self {
        let scale_deg = pixel_scale / 3600.0;
        let (sin_r, cos_r) = rotation.to_radians().sin_cos();
        let cd = [
            [scale_deg * cos_r, -scale_deg * sin_r],
            [scale_deg * sin_r, scale_deg * cos_r],
        ];
        Self::new(crpix, crval, cd)
    }

    pub fn pixel_to_sky(&self, pixel: DVec2) -> SkyCoord {
        let dx = pixel.x - self.crpix.x;
        let dy = pixel.y - self.crpix.y;

        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();

        let ra0 = self.crval.ra.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.dec.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());

        SkyCoord::new(ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// Project a sky position onto the pixel grid.
    ///
    /// Returns `None` for positions on the far hemisphere, which have no
    /// tangent-plane image.
    pub fn sky_to_pixel(&self, coord: SkyCoord) -> Option<DVec2> {
        let (sin_dec, cos_dec) = coord.dec.to_radians().sin_cos();
        let (sin_dec0, cos_dec0) = self.crval.dec.to_radians().sin_cos();
        let (sin_dra, cos_dra) = (coord.ra - self.crval.ra).to_radians().sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        if d <= 0.0 {
            return None;
        }

        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        debug_assert!(det.abs() > 1e-15, "CD matrix is singular (det = {})", det);

        let dx = (self.cd[1][1] * xi - self.cd[0][1] * eta) / det;
        let dy = (-self.cd[1][0] * xi + self.cd[0][0] * eta) / det;

        Some(DVec2::new(self.crpix.x + dx, self.crpix.y + dy))
    }

    /// Mean pixel scale in arcseconds per pixel.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale_x = (self.cd[0][0].powi(2) + self.cd[1][0].powi(2)).sqrt();
        let scale_y = (self.cd[0][1].powi(2) + self.cd[1][1].powi(2)).sqrt();
        (scale_x + scale_y) / 2.0 * 3600.0
    }
}

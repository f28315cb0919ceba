//! Run configuration for coaddition and coadd source processing.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::exposure::{MaskPixel, MaskPlane};
use crate::psf::PsfMatchConfig;
use crate::warp::WarpConfig;

/// Whether exposures are PSF-matched before warping.
///
/// Serialised as an optional FWHM in arcseconds: `null`, absent, NaN or a
/// non-positive value all mean `Disabled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum PsfMatching {
    #[default]
    Disabled,
    Enabled {
        /// Target core FWHM in arcseconds.
        fwhm: f64,
    },
}

impl PsfMatching {
    pub fn fwhm(&self) -> Option<f64> {
        match *self {
            PsfMatching::Disabled => None,
            PsfMatching::Enabled { fwhm } => Some(fwhm),
        }
    }
}

impl From<Option<f64>> for PsfMatching {
    fn from(fwhm: Option<f64>) -> Self {
        match fwhm {
            Some(fwhm) if fwhm > 0.0 => PsfMatching::Enabled { fwhm },
            _ => PsfMatching::Disabled,
        }
    }
}

impl From<PsfMatching> for Option<f64> {
    fn from(matching: PsfMatching) -> Self {
        matching.fwhm()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoaddConfig {
    /// Prefix of every dataset the run writes (`<name>Coadd`, `<name>Coadd_src`, ...).
    pub coadd_name: String,
    pub desired_fwhm: PsfMatching,
    /// Photometric zero point (mag) of the coadd.
    pub coadd_zero_point: f64,
    /// Mask planes whose pixels are left out of the weighted sum.
    pub mask_planes_to_exclude: Vec<String>,
    /// Fill `NO_DATA` holes in the coadd by linear interpolation along rows.
    pub do_interpolate_edges: bool,
    pub warp: WarpConfig,
    pub psf_match: PsfMatchConfig,
    /// Persist warped exposures, the coadd and its model PSF.
    pub do_write: bool,
    /// Coadd model-PSF kernel size in units of the desired FWHM (pixels).
    pub coadd_kernel_size_factor: f64,
    /// Image value of coadd pixels without any contribution.
    pub no_data_value: f32,
    /// Whether the detected source table went through deblending.
    pub do_deblend: bool,
    pub do_scale_variance: bool,
    /// Mask planes ignored when measuring the variance rescaling factor.
    pub scale_variance_mask_planes: Vec<String>,
}

impl Default for CoaddConfig {
    fn default() -> Self {
        Self {
            coadd_name: "deep".to_string(),
            desired_fwhm: PsfMatching::Disabled,
            coadd_zero_point: 27.0,
            mask_planes_to_exclude: ["BAD", "SAT", "EDGE", "NO_DATA"]
                .map(String::from)
                .to_vec(),
            do_interpolate_edges: false,
            warp: WarpConfig::default(),
            psf_match: PsfMatchConfig::default(),
            do_write: true,
            coadd_kernel_size_factor: 3.0,
            no_data_value: f32::NAN,
            do_deblend: true,
            do_scale_variance: true,
            scale_variance_mask_planes: ["DETECTED", "BAD", "SAT", "NO_DATA", "INTRP"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl CoaddConfig {
    /// Parse from YAML and validate. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, Error> {
        let config: CoaddConfig =
            serde_yml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, Error> {
        serde_yml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn with_desired_fwhm(mut self, fwhm: f64) -> Self {
        self.desired_fwhm = PsfMatching::from(Some(fwhm));
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.coadd_name.is_empty() {
            return Err(Error::invalid("coadd_name", "must not be empty"));
        }
        if !self.coadd_zero_point.is_finite() {
            return Err(Error::invalid(
                "coadd_zero_point",
                format!("must be finite, got {}", self.coadd_zero_point),
            ));
        }
        if let PsfMatching::Enabled { fwhm } = self.desired_fwhm {
            if !fwhm.is_finite() {
                return Err(Error::invalid(
                    "desired_fwhm",
                    format!("must be finite, got {}", fwhm),
                ));
            }
        }
        if !(self.coadd_kernel_size_factor.is_finite() && self.coadd_kernel_size_factor > 0.0) {
            return Err(Error::invalid(
                "coadd_kernel_size_factor",
                format!("must be positive, got {}", self.coadd_kernel_size_factor),
            ));
        }
        self.psf_match.validate()?;
        self.excluded_mask()?;
        self.scale_variance_mask()?;
        Ok(())
    }

    /// Bits of `mask_planes_to_exclude`.
    pub fn excluded_mask(&self) -> Result<MaskPixel, Error> {
        MaskPlane::parse_list(&self.mask_planes_to_exclude)
    }

    /// Bits of `scale_variance_mask_planes`.
    pub fn scale_variance_mask(&self) -> Result<MaskPixel, Error> {
        MaskPlane::parse_list(&self.scale_variance_mask_planes)
    }

    /// Dataset type `<coadd_name>Coadd<suffix>`.
    pub fn dataset_type(&self, suffix: &str) -> String {
        format!("{}Coadd{}", self.coadd_name, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warp::InterpolationMethod;

    #[test]
    fn test_default_values() {
        let config = CoaddConfig::default();
        assert_eq!(config.coadd_name, "deep");
        assert_eq!(config.desired_fwhm, PsfMatching::Disabled);
        assert!((config.coadd_zero_point - 27.0).abs() < 1e-12);
        assert!(!config.do_interpolate_edges);
        assert!(config.no_data_value.is_nan());
        assert!(config.validate().is_ok());
        assert_eq!(
            config.excluded_mask().unwrap(),
            MaskPlane::bits(&[
                MaskPlane::Bad,
                MaskPlane::Sat,
                MaskPlane::Edge,
                MaskPlane::NoData
            ])
        );
    }

    #[test]
    fn test_psf_matching_from_optional_fwhm() {
        assert_eq!(PsfMatching::from(None), PsfMatching::Disabled);
        assert_eq!(PsfMatching::from(Some(0.0)), PsfMatching::Disabled);
        assert_eq!(PsfMatching::from(Some(-1.0)), PsfMatching::Disabled);
        assert_eq!(PsfMatching::from(Some(f64::NAN)), PsfMatching::Disabled);
        assert_eq!(
            PsfMatching::from(Some(1.2)),
            PsfMatching::Enabled { fwhm: 1.2 }
        );
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = "
coadd_name: goodSeeing
desired_fwhm: 1.1
mask_planes_to_exclude: [BAD, NO_DATA]
do_interpolate_edges: true
warp:
  method: bilinear
";
        let config = CoaddConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.coadd_name, "goodSeeing");
        assert_eq!(config.desired_fwhm, PsfMatching::Enabled { fwhm: 1.1 });
        assert!(config.do_interpolate_edges);
        assert_eq!(config.warp.method, InterpolationMethod::Bilinear);
        assert_eq!(
            config.excluded_mask().unwrap(),
            MaskPlane::Bad.bit() | MaskPlane::NoData.bit()
        );
        // Untouched keys keep their defaults
        assert!((config.coadd_zero_point - 27.0).abs() < 1e-12);
        assert!(config.do_write);
    }

    #[test]
    fn test_from_yaml_null_and_negative_fwhm_disable_matching() {
        for yaml in ["desired_fwhm: null", "desired_fwhm: -1.0", "desired_fwhm: 0"] {
            let config = CoaddConfig::from_yaml_str(yaml).unwrap();
            assert_eq!(config.desired_fwhm, PsfMatching::Disabled, "{}", yaml);
        }
    }

    #[test]
    fn test_unknown_mask_plane_is_config_error() {
        let err = CoaddConfig::from_yaml_str("mask_planes_to_exclude: [BAD, GHOST]").unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("GHOST"), "{}", msg),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = CoaddConfig::from_yaml_str("coadd_zero_point: [1, 2]").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_kernel_size_factor() {
        let config = CoaddConfig {
            coadd_kernel_size_factor: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidParameter {
                name: "coadd_kernel_size_factor",
                ..
            })
        ));
    }

    #[test]
    fn test_yaml_roundtrip_keeps_matching() {
        let config = CoaddConfig::default().with_desired_fwhm(0.9);
        let yaml = config.to_yaml_string().unwrap();
        let back = CoaddConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(back.desired_fwhm, PsfMatching::Enabled { fwhm: 0.9 });
    }

    #[test]
    fn test_dataset_type_names() {
        let config = CoaddConfig::default();
        assert_eq!(config.dataset_type(""), "deepCoadd");
        assert_eq!(config.dataset_type("_src"), "deepCoadd_src");
    }
}

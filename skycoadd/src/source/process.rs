//! Post-coadd source processing for one patch.

use super::{ClassificationSummary, PrimaryFlagClassifier, SourceCatalog};
use crate::coadd::scale_variance;
use crate::config::CoaddConfig;
use crate::error::Error;
use crate::exposure::Exposure;
use crate::repository::{DataId, Dataset, Repository};
use crate::tile::{SkyInfo, SkyMap};

#[derive(Debug)]
pub struct ProcessCoaddResult {
    /// The coadd, with its variance plane rescaled if configured.
    pub coadd: Exposure,
    /// Detected sources with tile-membership flags set.
    pub sources: SourceCatalog,
    pub summary: ClassificationSummary,
    /// Factor applied to the coadd variance plane, if rescaling ran.
    pub variance_scale: Option<f64>,
}

/// Load the coadd of `patch_id` and its detected sources, optionally rescale
/// the coadd variance, and set primary flags on the sources.
///
/// Reads `<name>Coadd` and `<name>Coadd_det`; with `do_write` puts the
/// rescaled coadd as `<name>Coadd_calexp` and the flagged table as
/// `<name>Coadd_src`.
pub fn process_coadd(
    repository: &dyn Repository,
    patch_id: &DataId,
    sky_info: &SkyInfo,
    sky_map: &dyn SkyMap,
    config: &CoaddConfig,
) -> Result<ProcessCoaddResult, Error> {
    config.validate()?;
    tracing::info!(patch = %patch_id, "Processing coadd");

    let coadd_type = config.dataset_type("");
    let mut coadd = repository
        .get_exposure(&coadd_type, patch_id)
        .ok_or_else(|| Error::MissingDataset {
            dataset_type: coadd_type.clone(),
            id: patch_id.clone(),
        })?;

    let det_type = config.dataset_type("_det");
    let mut sources = repository
        .get_sources(&det_type, patch_id)
        .ok_or_else(|| Error::MissingDataset {
            dataset_type: det_type.clone(),
            id: patch_id.clone(),
        })?;

    let variance_scale = if config.do_scale_variance {
        Some(scale_variance(&mut coadd, config.scale_variance_mask()?))
    } else {
        None
    };

    let classifier = PrimaryFlagClassifier::new(sky_map, sky_info, config.do_deblend);
    let summary = classifier.set_primary_flags(&mut sources)?;

    if config.do_write {
        if variance_scale.is_some() {
            repository.put(
                &config.dataset_type("_calexp"),
                patch_id,
                Dataset::Exposure(coadd.clone()),
            )?;
        }
        repository.put(
            &config.dataset_type("_src"),
            patch_id,
            Dataset::Sources(sources.clone()),
        )?;
    }

    Ok(ProcessCoaddResult {
        coadd,
        sources,
        summary,
        variance_scale,
    })
}

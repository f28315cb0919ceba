//! Patch/tract inner and primary flags.

use rayon::prelude::*;

use super::{
    SourceCatalog, SourceRecord, IS_PATCH_INNER_FIELD, IS_PRIMARY_FIELD, IS_TRACT_INNER_FIELD,
    N_CHILD_FIELD,
};
use crate::error::Error;
use crate::geom::Box2D;
use crate::tile::{SkyInfo, SkyMap, TractId};

/// Flag counts after classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationSummary {
    pub total: usize,
    /// Sources skipped because their centroid is unknown.
    pub bad_centroid: usize,
    pub patch_inner: usize,
    pub tract_inner: usize,
    pub primary: usize,
}

/// Sets `is_patch_inner`, `is_tract_inner` and `is_primary` for sources
/// detected on one patch.
///
/// A source is patch-inner when its centroid lies in the patch inner box
/// (half-open, so the upper edge belongs to the next patch) and tract-inner
/// when the sky map assigns its sky position to this patch's tract. It is
/// primary when it is both and has no deblended children. When the table has
/// no child counts every source counts as childless.
pub struct PrimaryFlagClassifier<'a> {
    sky_map: &'a dyn SkyMap,
    inner_bbox: Box2D,
    tract_id: TractId,
    do_deblend: bool,
}

impl<'a> PrimaryFlagClassifier<'a> {
    /// `do_deblend` declares that the table came out of the deblender and so
    /// must carry [`N_CHILD_FIELD`].
    pub fn new(sky_map: &'a dyn SkyMap, sky_info: &SkyInfo, do_deblend: bool) -> Self {
        Self {
            sky_map,
            inner_bbox: sky_info.inner_bbox(),
            tract_id: sky_info.tract.id,
            do_deblend,
        }
    }

    /// Classify every record in place.
    ///
    /// Fails with `SchemaInconsistency`, before touching any record, when
    /// deblending was declared but the child count field is missing.
    pub fn set_primary_flags(
        &self,
        catalog: &mut SourceCatalog,
    ) -> Result<ClassificationSummary, Error> {
        let use_children = catalog.has_field(N_CHILD_FIELD);
        if self.do_deblend && !use_children {
            return Err(Error::SchemaInconsistency {
                field: N_CHILD_FIELD.to_string(),
            });
        }

        for field in [IS_PATCH_INNER_FIELD, IS_TRACT_INNER_FIELD, IS_PRIMARY_FIELD] {
            catalog.add_field(field);
        }

        catalog
            .records_mut()
            .par_iter_mut()
            .for_each(|record| self.classify(record, use_children));

        let summary = catalog.iter().fold(
            ClassificationSummary {
                total: catalog.len(),
                ..Default::default()
            },
            |mut s, r| {
                s.bad_centroid += r.centroid_flag as usize;
                s.patch_inner += r.is_patch_inner as usize;
                s.tract_inner += r.is_tract_inner as usize;
                s.primary += r.is_primary as usize;
                s
            },
        );
        tracing::info!(
            total = summary.total,
            primary = summary.primary,
            patch_inner = summary.patch_inner,
            tract_inner = summary.tract_inner,
            bad_centroid = summary.bad_centroid,
            "Set primary flags"
        );
        Ok(summary)
    }

    fn classify(&self, record: &mut SourceRecord, use_children: bool) {
        record.is_patch_inner = false;
        record.is_tract_inner = false;
        record.is_primary = false;
        if record.centroid_flag {
            return;
        }

        record.is_patch_inner = self.inner_bbox.contains(record.centroid);
        record.is_tract_inner = self.sky_map.find_tract(&record.coord) == self.tract_id;

        let childless = !use_children || record.n_child.unwrap_or(0) == 0;
        record.is_primary = childless && record.is_patch_inner && record.is_tract_inner;
    }
}

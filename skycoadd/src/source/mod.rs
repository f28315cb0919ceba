//! Detected-source tables and their tile-membership flags.

mod classify;
mod process;


pub use classify::{ClassificationSummary, PrimaryFlagClassifier};
pub use process::{process_coadd, ProcessCoaddResult};

use glam::DVec2;
use hashbrown::{HashMap, HashSet};

use crate::wcs::SkyCoord;

/// Deblender child count. Present in the schema only if deblending ran.
pub const N_CHILD_FIELD: &str = "deblend_nChild";
pub const IS_PATCH_INNER_FIELD: &str = "detect_isPatchInner";
pub const IS_TRACT_INNER_FIELD: &str = "detect_isTractInner";
pub const IS_PRIMARY_FIELD: &str = "detect_isPrimary";
pub const PSF_STAR_FIELD: &str = "calib_psfUsed";

/// Fields every detected-source table carries.
pub const BASE_FIELDS: [&str; 4] = ["id", "centroid", "centroid_flag", "coord"];

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    id: u64,
    /// Position in parent pixel coordinates.
    pub centroid: DVec2,
    /// The centroid could not be measured; `centroid` is meaningless.
    pub centroid_flag: bool,
    pub coord: SkyCoord,
    /// Number of deblended children; `None` when not recorded.
    pub n_child: Option<u32>,
    pub is_patch_inner: bool,
    pub is_tract_inner: bool,
    pub is_primary: bool,
    /// Used as a PSF-model star.
    pub psf_star: bool,
}

impl SourceRecord {
    pub fn new(id: u64, centroid: DVec2, coord: SkyCoord) -> Self {
        Self {
            id,
            centroid,
            centroid_flag: false,
            coord,
            n_child: None,
            is_patch_inner: false,
            is_tract_inner: false,
            is_primary: false,
            psf_star: false,
        }
    }

    pub fn with_n_child(mut self, n_child: u32) -> Self {
        self.n_child = Some(n_child);
        self
    }

    pub fn with_centroid_flag(mut self) -> Self {
        self.centroid_flag = true;
        self
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Source table: a schema (set of field names) and records with unique ids.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    fields: HashSet<String>,
    records: Vec<SourceRecord>,
    index: HashMap<u64, usize>,
}

impl SourceCatalog {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Schema of an undeblended detection table.
    pub fn detection() -> Self {
        Self::new(BASE_FIELDS)
    }

    /// Schema of a deblended detection table (adds [`N_CHILD_FIELD`]).
    pub fn deblended() -> Self {
        Self::new(BASE_FIELDS.into_iter().chain([N_CHILD_FIELD]))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    pub fn add_field(&mut self, name: &str) {
        self.fields.insert(name.to_string());
    }

    /// Append a record. Panics on a duplicate id.
    pub fn push(&mut self, record: SourceRecord) {
        let previous = self.index.insert(record.id, self.records.len());
        assert!(previous.is_none(), "duplicate source id {}", record.id);
        self.records.push(record);
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [SourceRecord] {
        &mut self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find_by_id(&self, id: u64) -> Option<&SourceRecord> {
        self.index.get(&id).map(|&i| &self.records[i])
    }

    pub fn find_by_id_mut(&mut self, id: u64) -> Option<&mut SourceRecord> {
        let i = *self.index.get(&id)?;
        Some(&mut self.records[i])
    }
}

impl FromIterator<SourceRecord> for SourceCatalog {
    /// Catalog with the undeblended detection schema.
    fn from_iter<I: IntoIterator<Item = SourceRecord>>(iter: I) -> Self {
        let mut catalog = SourceCatalog::detection();
        for record in iter {
            catalog.push(record);
        }
        catalog
    }
}

/// Copy the PSF-star flag from candidate copies back onto the matching
/// records of `catalog`. Returns the number of records flagged.
pub fn propagate_psf_star_flags(
    candidates: &[SourceRecord],
    catalog: &mut SourceCatalog,
) -> usize {
    catalog.add_field(PSF_STAR_FIELD);
    let mut flagged = 0;
    for candidate in candidates.iter().filter(|c| c.psf_star) {
        match catalog.find_by_id_mut(candidate.id) {
            Some(record) => {
                record.psf_star = true;
                flagged += 1;
            }
            None => {
                tracing::warn!(id = candidate.id, "PSF candidate not found in source table")
            }
        }
    }
    flagged
}

//! Sky tiling: tracts with their own coordinate system, split into patches.
//!
//! Patch inner boxes tile a tract without overlap; outer boxes add a border
//! shared with neighbouring patches.

use std::fmt;

use crate::error::Error;
use crate::geom::{Box2D, Box2I};
use crate::wcs::{SkyCoord, Wcs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TractId(pub u32);

impl fmt::Display for TractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tract={}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TractInfo {
    pub id: TractId,
    /// Sky position of the tract centre.
    pub ctr_coord: SkyCoord,
    pub wcs: Wcs,
    /// Pixel extent of the tract in its own coordinate system.
    pub bbox: Box2I,
}

impl TractInfo {
    /// Patch `index` of a regular grid of `patch_size`-pixel inner boxes, each
    /// grown by `border` pixels for the outer box. Both boxes are clipped to
    /// the tract.
    pub fn patch_info(
        &self,
        index: (u32, u32),
        patch_size: (usize, usize),
        border: usize,
    ) -> Result<PatchInfo, Error> {
        let x0 = self.bbox.x_min + (index.0 as usize * patch_size.0) as i32;
        let y0 = self.bbox.y_min + (index.1 as usize * patch_size.1) as i32;
        let inner = Box2I::from_origin_size(x0, y0, patch_size.0, patch_size.1)
            .intersection(&self.bbox);
        let outer = inner.grown(border as i32).intersection(&self.bbox);
        PatchInfo::new(index, inner, outer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchInfo {
    pub index: (u32, u32),
    /// Non-overlapping region used for primary assignment.
    pub inner_bbox: Box2I,
    /// Region coadded, overlapping neighbouring patches.
    pub outer_bbox: Box2I,
}

impl PatchInfo {
    pub fn new(index: (u32, u32), inner_bbox: Box2I, outer_bbox: Box2I) -> Result<Self, Error> {
        if inner_bbox.is_empty() {
            return Err(Error::invalid(
                "patch inner bbox",
                format!("patch {:?} has an empty inner box", index),
            ));
        }
        if !outer_bbox.contains_box(&inner_bbox) {
            return Err(Error::invalid(
                "patch outer bbox",
                format!("{:?} does not contain inner box {:?}", outer_bbox, inner_bbox),
            ));
        }
        Ok(Self {
            index,
            inner_bbox,
            outer_bbox,
        })
    }
}

/// The tile a run works on.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyInfo {
    pub tract: TractInfo,
    pub patch: PatchInfo,
}

impl SkyInfo {
    pub fn new(tract: TractInfo, patch: PatchInfo) -> Self {
        Self { tract, patch }
    }

    #[inline]
    pub fn wcs(&self) -> &Wcs {
        &self.tract.wcs
    }

    /// Coadd extent: the patch outer box.
    #[inline]
    pub fn bbox(&self) -> Box2I {
        self.patch.outer_bbox
    }

    /// Inner box with half-open float containment.
    #[inline]
    pub fn inner_bbox(&self) -> Box2D {
        Box2D::from(self.patch.inner_bbox)
    }
}

/// Resolves which tract claims a sky position.
pub trait SkyMap: Send + Sync {
    fn find_tract(&self, coord: &SkyCoord) -> TractId;
}

/// Each position belongs to the tract whose centre is nearest on the sky.
/// Equidistant positions go to the tract listed first.
#[derive(Debug, Clone)]
pub struct NearestTractSkyMap {
    tracts: Vec<TractInfo>,
}

impl NearestTractSkyMap {
    pub fn new(tracts: Vec<TractInfo>) -> Result<Self, Error> {
        if tracts.is_empty() {
            return Err(Error::invalid("tracts", "sky map needs at least one tract"));
        }
        for (i, t) in tracts.iter().enumerate() {
            if tracts[..i].iter().any(|o| o.id == t.id) {
                return Err(Error::invalid("tracts", format!("duplicate {}", t.id)));
            }
        }
        Ok(Self { tracts })
    }

    pub fn tracts(&self) -> &[TractInfo] {
        &self.tracts
    }

    pub fn tract(&self, id: TractId) -> Option<&TractInfo> {
        self.tracts.iter().find(|t| t.id == id)
    }
}

impl SkyMap for NearestTractSkyMap {
    fn find_tract(&self, coord: &SkyCoord) -> TractId {
        let mut best = &self.tracts[0];
        let mut best_sep = coord.separation_deg(&best.ctr_coord);
        for tract in &self.tracts[1..] {
            let sep = coord.separation_deg(&tract.ctr_coord);
            if sep < best_sep {
                best = tract;
                best_sep = sep;
            }
        }
        best.id
    }
}

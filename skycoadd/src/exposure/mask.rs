//! Per-pixel mask planes.

use std::str::FromStr;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::Error;

/// One mask pixel: a bitset over [`MaskPlane`]s.
pub type MaskPixel = u32;

/// Named mask planes, each owning one bit of a [`MaskPixel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskPlane {
    /// Known detector defect.
    Bad,
    /// Saturated.
    Sat,
    /// Value was interpolated.
    Intrp,
    /// Cosmic ray.
    Cr,
    /// Too close to the image edge for a full convolution kernel.
    Edge,
    /// Part of a detected source footprint.
    Detected,
    /// No data: not covered by any valid input.
    NoData,
    /// Rejected by clipping during assembly.
    Clipped,
}

impl MaskPlane {
    #[inline]
    pub const fn bit(self) -> MaskPixel {
        1 << self as u32
    }

    /// OR of the bits of `planes`.
    pub fn bits(planes: &[MaskPlane]) -> MaskPixel {
        planes.iter().fold(0, |acc, p| acc | p.bit())
    }

    /// Resolve plane names (e.g. `"NO_DATA"`) to a combined bitmask.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<MaskPixel, Error> {
        names.iter().try_fold(0, |acc, name| {
            let name = name.as_ref();
            MaskPlane::from_str(name)
                .map(|p| acc | p.bit())
                .map_err(|_| {
                    let known: Vec<String> = MaskPlane::iter().map(|p| p.to_string()).collect();
                    Error::Config(format!(
                        "unknown mask plane '{}' (known: {})",
                        name,
                        known.join(", ")
                    ))
                })
        })
    }

    /// Planes set in `mask`.
    pub fn planes_in(mask: MaskPixel) -> Vec<MaskPlane> {
        MaskPlane::iter().filter(|p| mask & p.bit() != 0).collect()
    }
}

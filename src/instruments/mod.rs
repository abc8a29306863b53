//! Instrument registry: per-product validity rules, pixel geometry, default
//! variables, name shortening and averaging-kernel projections.

pub mod omi;
pub mod viirs;

use crate::core::geometry::{as_2d, install_valid};
use crate::core::grid::DestinationGrid;
use crate::core::kernel::KernelProjection;
use crate::core::level3::{to_level3, Level3Result};
use crate::core::overlay::WeightAssigner;
use crate::types::{BoundingBox, GridError, GridResult, SwathDataset, CORNER_KEYS};
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// What a variable is used for during gridding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Pixel centre coordinates
    Geolocation,
    /// Pixel corner coordinates or corner-node grids
    Corner,
    /// Inputs to the validity predicate
    Quality,
    /// Gridded output values
    Science,
}

/// Expected name, dimensions and role of one product variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableDescriptor {
    pub name: &'static str,
    pub dims: &'static [&'static str],
    pub role: Role,
    /// Missing required variables fail validation; optional ones are only
    /// checked when present
    pub required: bool,
}

const fn required(name: &'static str, dims: &'static [&'static str], role: Role) -> VariableDescriptor {
    VariableDescriptor {
        name,
        dims,
        role,
        required: true,
    }
}

const fn optional(name: &'static str, dims: &'static [&'static str]) -> VariableDescriptor {
    VariableDescriptor {
        name,
        dims,
        role: Role::Science,
        required: false,
    }
}

/// Supported Level-2 products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Instrument {
    /// Any swath already carrying `valid` and the corner variables
    Generic,
    OmNo2,
    OmHcho,
    OmO3pr,
    OmProfoz,
    ViirsAerdt,
    ViirsAerdb,
}

impl Instrument {
    pub const ALL: [Instrument; 7] = [
        Instrument::Generic,
        Instrument::OmNo2,
        Instrument::OmHcho,
        Instrument::OmO3pr,
        Instrument::OmProfoz,
        Instrument::ViirsAerdt,
        Instrument::ViirsAerdb,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Instrument::Generic => "generic",
            Instrument::OmNo2 => "OMNO2",
            Instrument::OmHcho => "OMHCHO",
            Instrument::OmO3pr => "OMO3PR",
            Instrument::OmProfoz => "OMPROFOZ",
            Instrument::ViirsAerdt => "VIIRS_AERDT",
            Instrument::ViirsAerdb => "VIIRS_AERDB",
        }
    }

    /// Human-readable summary used in product provenance
    pub fn description(&self) -> &'static str {
        match self {
            Instrument::Generic => "Generic swath processor\n",
            Instrument::OmNo2 => omi::OMNO2_DESCRIPTION,
            Instrument::OmHcho => omi::OMHCHO_DESCRIPTION,
            Instrument::OmO3pr => omi::OMO3PR_DESCRIPTION,
            Instrument::OmProfoz => omi::OMPROFOZ_DESCRIPTION,
            Instrument::ViirsAerdt => viirs::AERDT_DESCRIPTION,
            Instrument::ViirsAerdb => viirs::AERDB_DESCRIPTION,
        }
    }

    /// Swath dimensions in `(along, across)` track order
    pub fn swath_dims(&self) -> Option<[&'static str; 2]> {
        match self {
            Instrument::Generic => None,
            Instrument::OmNo2 | Instrument::OmHcho | Instrument::OmO3pr | Instrument::OmProfoz => {
                Some(omi::SWATH_DIMS)
            }
            Instrument::ViirsAerdt => Some(viirs::AERDT_DIMS),
            Instrument::ViirsAerdb => Some(viirs::AERDB_DIMS),
        }
    }

    /// Variables gridded when none are requested
    pub fn default_variables(&self) -> &'static [&'static str] {
        match self {
            Instrument::Generic => &[],
            Instrument::OmNo2 => omi::OMNO2_DEFAULTS,
            Instrument::OmHcho => omi::OMHCHO_DEFAULTS,
            Instrument::OmO3pr => omi::OMO3PR_DEFAULTS,
            Instrument::OmProfoz => omi::OMPROFOZ_DEFAULTS,
            Instrument::ViirsAerdt => viirs::AERDT_DEFAULTS,
            Instrument::ViirsAerdb => viirs::AERDB_DEFAULTS,
        }
    }

    pub fn schema(&self) -> &'static [VariableDescriptor] {
        match self {
            Instrument::Generic => &[],
            Instrument::OmNo2 => omi::OMNO2_SCHEMA,
            Instrument::OmHcho => omi::OMHCHO_SCHEMA,
            Instrument::OmO3pr => omi::OMO3PR_SCHEMA,
            Instrument::OmProfoz => omi::OMPROFOZ_SCHEMA,
            Instrument::ViirsAerdt => viirs::AERDT_SCHEMA,
            Instrument::ViirsAerdb => viirs::AERDB_SCHEMA,
        }
    }

    /// Short output column name; OMI products abbreviate, others keep `key`
    pub fn shorten_name(&self, key: &str) -> String {
        match self {
            Instrument::OmNo2 | Instrument::OmHcho | Instrument::OmO3pr | Instrument::OmProfoz => {
                omi::shorten_name(key)
            }
            _ => key.to_string(),
        }
    }

    /// Averaging-kernel projection, for products that ship scattering weights
    pub fn averaging_kernel_projection(&self) -> Option<KernelProjection> {
        match self {
            Instrument::OmNo2 => Some(omi::OMNO2_KERNEL),
            Instrument::OmHcho => Some(omi::OMHCHO_KERNEL),
            _ => None,
        }
    }

    /// Check every described variable against the dataset
    pub fn validate_schema(&self, ds: &SwathDataset) -> GridResult<()> {
        for desc in self.schema() {
            let Some(var) = ds.variables.get(desc.name) else {
                if desc.required {
                    return Err(GridError::MissingVariable(format!(
                        "{} ({:?}) in {}",
                        desc.name, desc.role, ds.path
                    )));
                }
                continue;
            };
            let expected: BTreeSet<&str> = desc.dims.iter().copied().collect();
            let found: BTreeSet<&str> = var.dims.iter().map(String::as_str).collect();
            if expected != found {
                return Err(GridError::DimensionMismatch(format!(
                    "{} in {} has dimensions {:?}, expected {:?}",
                    desc.name, ds.path, var.dims, desc.dims
                )));
            }
        }
        Ok(())
    }

    /// Build `valid` and the eight corner variables in place.
    ///
    /// `valid_threshold` is the minimum acceptable quality flag for products
    /// that grade pixels (VIIRS). Returns the number of valid pixels.
    pub fn build_validity_and_geometry(
        &self,
        ds: &mut SwathDataset,
        bbox: Option<&BoundingBox>,
        valid_threshold: f64,
    ) -> GridResult<usize> {
        self.validate_schema(ds)?;
        log::info!("Building {} validity and geometry for {}", self.name(), ds.path);
        match self {
            Instrument::Generic => build_generic(ds, bbox),
            Instrument::OmNo2 => omi::build_omno2(ds, bbox),
            Instrument::OmHcho => omi::build_omhcho(ds, bbox),
            Instrument::OmO3pr => omi::build_omo3pr(ds, bbox),
            Instrument::OmProfoz => omi::build_omprofoz(ds, bbox),
            Instrument::ViirsAerdt => viirs::build_aerdt(ds, bbox, valid_threshold),
            Instrument::ViirsAerdb => viirs::build_aerdb(ds, bbox, valid_threshold),
        }
    }

    /// Requested keys, or the defaults this dataset actually carries
    pub fn variables_for(&self, ds: &SwathDataset, keys: &[String]) -> Vec<String> {
        if !keys.is_empty() {
            return keys.to_vec();
        }
        let defaults: Vec<String> = self
            .default_variables()
            .iter()
            .filter(|k| ds.contains(k))
            .map(|k| k.to_string())
            .collect();
        log::debug!("{}: default variables {:?}", ds.path, defaults);
        defaults
    }

    /// Regrid a built dataset, falling back to the default variables
    pub fn to_level3(
        &self,
        ds: &SwathDataset,
        keys: &[String],
        grid: &DestinationGrid,
        grid_dims: &[&str],
        weighting: &dyn WeightAssigner,
    ) -> GridResult<Level3Result> {
        let keys = self.variables_for(ds, keys);
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        to_level3(ds, &key_refs, grid, grid_dims, weighting)
    }
}

impl FromStr for Instrument {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase().replace('-', "_");
        Instrument::ALL
            .iter()
            .copied()
            .find(|i| i.name().to_uppercase() == wanted)
            .ok_or_else(|| GridError::UnknownInstrument(s.to_string()))
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Swaths from other sources must already carry `valid` and corners
fn build_generic(ds: &mut SwathDataset, bbox: Option<&BoundingBox>) -> GridResult<usize> {
    if bbox.is_some() {
        log::warn!("bbox not implemented for generic swaths; all cells returned");
    }
    for (kx, ky) in CORNER_KEYS {
        ds.get(kx)?;
        ds.get(ky)?;
    }
    let mask = ds
        .valid
        .take()
        .ok_or_else(|| GridError::MissingVariable(format!("valid in {}", ds.path)))?;
    let dims = mask.dims.clone();
    let dim_refs: Vec<&str> = dims.iter().map(String::as_str).collect();
    install_valid(ds, &dim_refs, mask.data, false)
}

/// Subset the along-track dimension to rows with a centre inside `bbox`.
///
/// `edge_dim` is the matching corner-node dimension, which keeps one extra row.
pub(crate) fn subset_along_track(
    ds: &mut SwathDataset,
    lon_key: &str,
    lat_key: &str,
    along_dim: &str,
    edge_dim: Option<&str>,
    bbox: &BoundingBox,
) -> GridResult<()> {
    let extent = crate::core::geometry::along_track_extent(
        ds.get(lon_key)?,
        ds.get(lat_key)?,
        bbox,
        along_dim,
    )?;
    let (first, last) = extent.ok_or_else(|| {
        GridError::NoValidPixels(format!("{} has no pixel centres in {:?}", ds.path, bbox))
    })?;
    log::debug!("{}: {} rows {}..={} inside bbox", ds.path, along_dim, first, last);
    ds.slice_dim(along_dim, first, last + 1);
    if let Some(edge_dim) = edge_dim {
        ds.slice_dim(edge_dim, first, last + 2);
    }
    Ok(())
}

/// Centre-in-box mask over `dims`
pub(crate) fn centre_mask(
    ds: &SwathDataset,
    lon_key: &str,
    lat_key: &str,
    dims: [&str; 2],
    bbox: &BoundingBox,
) -> GridResult<ArrayD<bool>> {
    let lon = as_2d(ds.get(lon_key)?, dims)?;
    let lat = as_2d(ds.get(lat_key)?, dims)?;
    Ok(Zip::from(&lon)
        .and(&lat)
        .map_collect(|&x, &y| bbox.contains(x, y))
        .into_dyn())
}

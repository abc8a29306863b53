//! satgrid: satellite Level-2 swath to Level-3 grid regridding
//!
//! Quality-filters swath pixels, builds their quadrilateral footprints, and
//! area-weights them onto a destination grid (lon/lat or Lambert conformal).
//! Results from many files combine into one Level-3 product, and averaging
//! kernels project model profiles into satellite-equivalent columns.

pub mod types;
pub mod io;
pub mod core;
pub mod instruments;

// Re-export main types and functions for easier access
pub use types::{BoundingBox, DimSignature, GridError, GridResult, SwathDataset, Variable};

pub use io::{JsonSwathSource, SwathSource};
pub use instruments::Instrument;
pub use crate::core::{
    paths_to_level3, BatchOutput, DestinationGrid, GriddingParams, Level3Product, Weighting,
};

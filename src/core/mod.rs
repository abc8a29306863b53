//! Core gridding modules

pub mod polygon;
pub mod crs;
pub mod grid;
pub mod geometry;
pub mod table;
pub mod overlay;
pub mod aggregate;
pub mod level3;
pub mod vertical;
pub mod kernel;
pub mod batch;

// Re-export main types
pub use polygon::{Bounds, Polygon};
pub use crs::{CoordinateReference, LambertConformal};
pub use grid::{candidate_cells, CellEnvelope, DestinationGrid, GridCell};
pub use geometry::CornerLayout;
pub use table::{to_table, PixelTable};
pub use overlay::{Intersection, WeightAssigner, Weighting};
pub use aggregate::{combine_tables, Level3Cell, Level3Row, Level3Table};
pub use level3::{combine_level3, to_level3, Level3Product, Level3Result};
pub use vertical::{coord_interp, coord_interp_profiles};
pub use kernel::{KernelProjection, KernelResult, ModelProfiles, SatelliteFields, Species};
pub use batch::{file_to_level3, paths_to_level3, BatchOutput, GriddingParams};

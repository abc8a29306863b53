use crate::core::crs::CoordinateReference;
use crate::core::grid::{candidate_cells, DestinationGrid};
use crate::core::polygon::Polygon;
use crate::types::{GridError, GridResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How each pixel/cell intersection is weighted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    /// Every overlapping pixel counts once
    Equal,
    /// Planar area of the intersection
    #[default]
    Area,
}

impl FromStr for Weighting {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equal" => Ok(Weighting::Equal),
            "area" => Ok(Weighting::Area),
            other => Err(GridError::UnknownWeighting(other.to_string())),
        }
    }
}

impl fmt::Display for Weighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weighting::Equal => write!(f, "equal"),
            Weighting::Area => write!(f, "area"),
        }
    }
}

/// Weight assignment step; implement this for custom schemes
pub trait WeightAssigner {
    fn weight(&self, intersection: &Intersection) -> f64;
}

impl WeightAssigner for Weighting {
    fn weight(&self, intersection: &Intersection) -> f64 {
        match self {
            Weighting::Equal => 1.0,
            Weighting::Area => intersection.polygon.area(),
        }
    }
}

/// Overlap of one pixel footprint with one grid cell
#[derive(Debug, Clone)]
pub struct Intersection {
    /// Swath index of the source pixel
    pub swath: Vec<usize>,
    /// Position of the destination cell in `DestinationGrid::cells`
    pub cell: usize,
    pub polygon: Polygon,
    pub weight: f64,
}

/// Project lon/lat footprints into the grid's coordinate reference
pub fn reproject(footprints: &[Polygon], crs: &CoordinateReference) -> Vec<Polygon> {
    if crs.is_geographic() {
        return footprints.to_vec();
    }
    footprints
        .iter()
        .map(|p| p.map_vertices(|x, y| crs.project(x, y)))
        .collect()
}

/// Intersect every footprint with every grid cell it overlaps.
///
/// A pixel spanning several cells yields one record per cell; no pixel or
/// cell is deduplicated. Weights are left at zero.
pub fn overlay(
    swath_index: &[Vec<usize>],
    footprints: &[Polygon],
    grid: &DestinationGrid,
) -> GridResult<Vec<Intersection>> {
    if swath_index.len() != footprints.len() {
        return Err(GridError::DimensionMismatch(format!(
            "{} swath indices for {} footprints",
            swath_index.len(),
            footprints.len()
        )));
    }
    let index = grid.spatial_index();
    let mut records = Vec::new();
    for (swath, footprint) in swath_index.iter().zip(footprints) {
        if !footprint.is_valid() {
            continue;
        }
        for cell in candidate_cells(&index, &footprint.bounds()) {
            if let Some(polygon) = footprint.intersection_convex(&grid.cells[cell].polygon) {
                records.push(Intersection {
                    swath: swath.clone(),
                    cell,
                    polygon,
                    weight: 0.0,
                });
            }
        }
    }
    log::debug!(
        "Overlay of {} footprints on {} cells produced {} intersections",
        footprints.len(),
        grid.len(),
        records.len()
    );
    Ok(records)
}

/// Fill in `weight` for every intersection
pub fn assign_weights(records: &mut [Intersection], assigner: &dyn WeightAssigner) {
    for record in records.iter_mut() {
        record.weight = assigner.weight(record);
    }
}

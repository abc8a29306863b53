use crate::core::crs::{CoordinateReference, LambertConformal};
use crate::core::polygon::{Bounds, Polygon};
use crate::types::{GridError, GridResult};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::BTreeSet;

/// One destination cell: composite key over the grid dimensions and its footprint
#[derive(Debug, Clone)]
pub struct GridCell {
    pub key: Vec<i64>,
    pub polygon: Polygon,
}

/// Destination grid for Level-3 output
#[derive(Debug, Clone)]
pub struct DestinationGrid {
    /// Names of the key components, e.g. `["ROW", "COL"]`
    pub dims: Vec<String>,
    pub cells: Vec<GridCell>,
    pub crs: CoordinateReference,
}

impl DestinationGrid {
    pub fn new<S: AsRef<str>>(
        dims: &[S],
        cells: Vec<GridCell>,
        crs: CoordinateReference,
    ) -> GridResult<Self> {
        let dims: Vec<String> = dims.iter().map(|d| d.as_ref().to_string()).collect();
        if cells.is_empty() {
            return Err(GridError::InvalidFormat("destination grid has no cells".to_string()));
        }
        if let Some(bad) = cells.iter().find(|c| c.key.len() != dims.len()) {
            return Err(GridError::DimensionMismatch(format!(
                "grid cell key {:?} does not match grid dimensions {:?}",
                bad.key, dims
            )));
        }
        Ok(Self { dims, cells, crs })
    }

    /// Regular longitude/latitude grid keyed by `(ROW, COL)`, row 0 at `south`
    pub fn regular_lonlat(
        west: f64,
        south: f64,
        dx: f64,
        dy: f64,
        ncols: usize,
        nrows: usize,
    ) -> GridResult<Self> {
        let cells = rectilinear_cells(west, south, dx, dy, ncols, nrows);
        Self::new(&["ROW", "COL"], cells, CoordinateReference::Geographic)
    }

    /// IOAPI-style Lambert grid: origin `(xorig, yorig)` at the south-west
    /// corner in projected metres, keyed by `(ROW, COL)`
    #[allow(clippy::too_many_arguments)]
    pub fn lambert(
        projection: LambertConformal,
        xorig: f64,
        yorig: f64,
        xcell: f64,
        ycell: f64,
        ncols: usize,
        nrows: usize,
    ) -> GridResult<Self> {
        let cells = rectilinear_cells(xorig, yorig, xcell, ycell, ncols, nrows);
        Self::new(
            &["ROW", "COL"],
            cells,
            CoordinateReference::LambertConformal(projection),
        )
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sorted unique values of one key component
    pub fn dim_values(&self, dim: &str) -> Option<Vec<i64>> {
        let pos = self.dims.iter().position(|d| d == dim)?;
        let values: BTreeSet<i64> = self.cells.iter().map(|c| c.key[pos]).collect();
        Some(values.into_iter().collect())
    }

    /// Cartesian product of the unique values of `dims` (all grid
    /// dimensions when empty), in ascending key order
    pub fn index_keys(&self, dims: &[&str]) -> GridResult<Vec<Vec<i64>>> {
        let names: Vec<&str> = if dims.is_empty() {
            self.dims.iter().map(String::as_str).collect()
        } else {
            dims.to_vec()
        };
        let mut keys: Vec<Vec<i64>> = vec![Vec::new()];
        for name in names {
            let values = self.dim_values(name).ok_or_else(|| {
                GridError::DimensionMismatch(format!("{} is not a grid dimension of {:?}", name, self.dims))
            })?;
            keys = keys
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |&v| {
                        let mut key = prefix.clone();
                        key.push(v);
                        key
                    })
                })
                .collect();
        }
        Ok(keys)
    }

    pub fn bounds(&self) -> Bounds {
        let first = self.cells[0].polygon.bounds();
        self.cells
            .iter()
            .skip(1)
            .fold(first, |acc, c| acc.union(&c.polygon.bounds()))
    }

    /// R-tree of cell envelopes for candidate lookup during overlay
    pub fn spatial_index(&self) -> RTree<CellEnvelope> {
        let entries: Vec<CellEnvelope> = self
            .cells
            .iter()
            .enumerate()
            .map(|(i, c)| CellEnvelope::new(i, &c.polygon.bounds()))
            .collect();
        log::debug!("Indexing {} grid cells", entries.len());
        RTree::bulk_load(entries)
    }
}

fn rectilinear_cells(
    x0: f64,
    y0: f64,
    dx: f64,
    dy: f64,
    ncols: usize,
    nrows: usize,
) -> Vec<GridCell> {
    let mut cells = Vec::with_capacity(ncols * nrows);
    for row in 0..nrows {
        for col in 0..ncols {
            let min_x = x0 + col as f64 * dx;
            let min_y = y0 + row as f64 * dy;
            cells.push(GridCell {
                key: vec![row as i64, col as i64],
                polygon: Polygon::rectangle(min_x, min_y, min_x + dx, min_y + dy),
            });
        }
    }
    cells
}

/// R-tree entry: a grid cell position and its bounding envelope
#[derive(Debug, Clone)]
pub struct CellEnvelope {
    pub cell: usize,
    env: AABB<[f64; 2]>,
}

impl CellEnvelope {
    fn new(cell: usize, b: &Bounds) -> Self {
        Self {
            cell,
            env: envelope_of(b),
        }
    }
}

impl RTreeObject for CellEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

fn envelope_of(b: &Bounds) -> AABB<[f64; 2]> {
    AABB::from_corners([b.min_x, b.min_y], [b.max_x, b.max_y])
}

/// Cells whose envelopes overlap `b`, ascending and unique
pub fn candidate_cells(index: &RTree<CellEnvelope>, b: &Bounds) -> Vec<usize> {
    let mut cells: Vec<usize> = index
        .locate_in_envelope_intersecting(&envelope_of(b))
        .map(|e| e.cell)
        .collect();
    cells.sort_unstable();
    cells.dedup();
    cells
}

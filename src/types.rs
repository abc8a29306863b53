use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form attributes (units, long names, descriptions)
pub type Attributes = BTreeMap<String, String>;

/// Names of the four pixel corner variables, x then y, in `ll, lu, ul, uu` order
pub const CORNER_KEYS: [(&str, &str); 4] = [
    ("ll_x", "ll_y"),
    ("lu_x", "lu_y"),
    ("ul_x", "ul_y"),
    ("uu_x", "uu_y"),
];

/// Geospatial bounding box in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Build from the conventional `(sw_lon, sw_lat, ne_lon, ne_lat)` tuple
    pub fn from_corners(sw_lon: f64, sw_lat: f64, ne_lon: f64, ne_lat: f64) -> Self {
        Self {
            min_lon: sw_lon,
            max_lon: ne_lon,
            min_lat: sw_lat,
            max_lat: ne_lat,
        }
    }

    /// Inclusive containment test; NaN coordinates are never contained
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// A named-dimension array variable. Missing values are NaN.
#[derive(Debug, Clone)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: ArrayD<f64>,
    pub attrs: Attributes,
}

impl Variable {
    pub fn new<S: AsRef<str>>(dims: &[S], data: ArrayD<f64>) -> GridResult<Self> {
        let dims: Vec<String> = dims.iter().map(|d| d.as_ref().to_string()).collect();
        if dims.len() != data.ndim() {
            return Err(GridError::DimensionMismatch(format!(
                "{} dimension names for a {}-d array",
                dims.len(),
                data.ndim()
            )));
        }
        Ok(Self {
            dims,
            data,
            attrs: Attributes::new(),
        })
    }

    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    /// Position of a named dimension
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Length along a named dimension
    pub fn len_of(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).map(|ax| self.data.len_of(Axis(ax)))
    }

    /// Select a single index along `dim`, dropping that dimension
    pub fn select(&self, dim: &str, index: usize) -> GridResult<Variable> {
        let axis = self.axis_of(dim).ok_or_else(|| {
            GridError::DimensionMismatch(format!("dimension {} not in {:?}", dim, self.dims))
        })?;
        if index >= self.data.len_of(Axis(axis)) {
            return Err(GridError::DimensionMismatch(format!(
                "index {} out of range for {} ({})",
                index,
                dim,
                self.data.len_of(Axis(axis))
            )));
        }
        let data = self.data.index_axis(Axis(axis), index).to_owned();
        let dims = self
            .dims
            .iter()
            .filter(|d| d.as_str() != dim)
            .cloned()
            .collect();
        Ok(Variable {
            dims,
            data,
            attrs: self.attrs.clone(),
        })
    }

    /// Reduce `dim` with the NaN-skipping maximum (NaN when every value is NaN)
    pub fn max_over(&self, dim: &str) -> GridResult<Variable> {
        let axis = self.axis_of(dim).ok_or_else(|| {
            GridError::DimensionMismatch(format!("dimension {} not in {:?}", dim, self.dims))
        })?;
        let data = self.data.map_axis(Axis(axis), |lane| {
            lane.iter()
                .copied()
                .filter(|v| !v.is_nan())
                .fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
        });
        let dims = self
            .dims
            .iter()
            .filter(|d| d.as_str() != dim)
            .cloned()
            .collect();
        Ok(Variable {
            dims,
            data,
            attrs: self.attrs.clone(),
        })
    }

    /// Value at a labelled index; dimensions absent from `index` must not exist
    /// on the variable, dimensions absent from the variable are ignored
    /// (broadcast).
    pub fn value_at(&self, index: &BTreeMap<&str, usize>) -> Option<f64> {
        let mut ix = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            ix.push(*index.get(dim.as_str())?);
        }
        self.data.get(IxDyn(&ix)).copied()
    }
}

/// Boolean per-pixel mask over the swath dimensions
#[derive(Debug, Clone)]
pub struct PixelMask {
    pub dims: Vec<String>,
    pub data: ArrayD<bool>,
}

impl PixelMask {
    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// One Level-2 input file: variables, global attributes and (after the
/// geometry builder has run) the `valid` mask.
#[derive(Debug, Clone, Default)]
pub struct SwathDataset {
    pub path: String,
    pub attrs: Attributes,
    pub variables: BTreeMap<String, Variable>,
    pub valid: Option<PixelMask>,
}

impl SwathDataset {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn insert(&mut self, name: &str, variable: Variable) {
        self.variables.insert(name.to_string(), variable);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn get(&self, name: &str) -> GridResult<&Variable> {
        self.variables
            .get(name)
            .ok_or_else(|| GridError::MissingVariable(format!("{} in {}", name, self.path)))
    }

    /// Swath (pixel) dimensions, as carried by the `valid` mask
    pub fn swath_dims(&self) -> GridResult<&[String]> {
        self.valid
            .as_ref()
            .map(|m| m.dims.as_slice())
            .ok_or_else(|| GridError::MissingVariable(format!("valid in {}", self.path)))
    }

    /// Length of a dimension as seen by any variable that carries it
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.variables.values().find_map(|v| v.len_of(dim))
    }

    /// Keep `range` along `dim` for every variable (and the mask) carrying it
    pub fn slice_dim(&mut self, dim: &str, start: usize, end: usize) {
        for var in self.variables.values_mut() {
            if let Some(axis) = var.axis_of(dim) {
                let len = var.data.len_of(Axis(axis));
                let stop = end.min(len);
                var.data = var
                    .data
                    .slice_axis(Axis(axis), Slice::from(start.min(stop)..stop))
                    .to_owned();
            }
        }
        if let Some(mask) = self.valid.as_mut() {
            if let Some(axis) = mask.dims.iter().position(|d| d == dim) {
                let len = mask.data.len_of(Axis(axis));
                let stop = end.min(len);
                mask.data = mask
                    .data
                    .slice_axis(Axis(axis), Slice::from(start.min(stop)..stop))
                    .to_owned();
            }
        }
    }
}

/// The full dimension tuple shared by a group of gridded variables
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DimSignature(pub Vec<String>);

impl fmt::Display for DimSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// Error types for swath gridding
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Missing variable: {0}")]
    MissingVariable(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("No valid pixels: {0}")]
    NoValidPixels(String),

    #[error("No valid pixel geometries: {0}")]
    EmptyGeometry(String),

    #[error("No pixel intersects the destination grid: {0}")]
    EmptyIntersection(String),

    #[error("Unknown weighting option {0}")]
    UnknownWeighting(String),

    #[error("Unknown instrument {0}")]
    UnknownInstrument(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for gridding operations
pub type GridResult<T> = Result<T, GridError>;

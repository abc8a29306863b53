use crate::core::polygon::Polygon;
use crate::types::{Attributes, GridError, GridResult, SwathDataset, CORNER_KEYS};
use ndarray::{Dimension, IxDyn};
use std::collections::BTreeMap;

/// Row index: position along the swath dimensions and along any extra dimensions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PixelRow {
    pub swath: Vec<usize>,
    pub extra: Vec<usize>,
}

/// One variable flattened to the table's rows
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
    pub attrs: Attributes,
}

/// Flattened pixel table, optionally with one footprint polygon per row
#[derive(Debug, Clone)]
pub struct PixelTable {
    pub swath_dims: Vec<String>,
    pub extra_dims: Vec<String>,
    pub rows: Vec<PixelRow>,
    pub valid: Vec<bool>,
    pub columns: Vec<Column>,
    pub geometry: Option<Vec<Polygon>>,
}

impl PixelTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Extra (non-swath) dimensions shared by `keys`, with their lengths
pub fn extra_dims(
    ds: &SwathDataset,
    keys: &[&str],
) -> GridResult<Vec<(String, usize)>> {
    let swath_dims = ds.swath_dims()?;
    let mut shared: Option<Vec<(String, usize)>> = None;
    for key in keys {
        let var = ds.get(key)?;
        let extra: Vec<(String, usize)> = var
            .dims
            .iter()
            .enumerate()
            .filter(|(_, d)| !swath_dims.contains(d))
            .map(|(ax, d)| (d.clone(), var.data.shape()[ax]))
            .collect();
        match &shared {
            None => shared = Some(extra),
            Some(existing) if *existing != extra => {
                return Err(GridError::DimensionMismatch(format!(
                    "{} has extra dimensions {:?}, expected {:?}",
                    key, extra, existing
                )));
            }
            Some(_) => {}
        }
    }
    Ok(shared.unwrap_or_default())
}

/// Flatten `keys` to one row per swath index (times extra-dimension index).
///
/// `valid_only` drops invalid pixels. `want_geometry` attaches the
/// `ll -> lu -> uu -> ul` footprint and drops rows whose corners cannot form
/// a polygon; an empty result is then an error.
pub fn to_table(
    ds: &SwathDataset,
    keys: &[&str],
    valid_only: bool,
    want_geometry: bool,
) -> GridResult<PixelTable> {
    let mask = ds
        .valid
        .as_ref()
        .ok_or_else(|| GridError::MissingVariable(format!("valid in {}", ds.path)))?;
    let swath_dims = mask.dims.clone();
    let extra = extra_dims(ds, keys)?;
    let extra_names: Vec<String> = extra.iter().map(|(d, _)| d.clone()).collect();
    let extra_shape: Vec<usize> = extra.iter().map(|(_, n)| *n).collect();

    let vars = keys
        .iter()
        .map(|k| ds.get(k))
        .collect::<GridResult<Vec<_>>>()?;
    let corners = if want_geometry {
        let mut found = Vec::with_capacity(4);
        for (kx, ky) in CORNER_KEYS {
            found.push((ds.get(kx)?, ds.get(ky)?));
        }
        Some(found)
    } else {
        None
    };

    let mut rows = Vec::new();
    let mut valid = Vec::new();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); vars.len()];
    let mut geometry = Vec::new();
    let mut dropped = 0usize;

    for (swath_ix, &is_valid) in mask.data.indexed_iter() {
        if valid_only && !is_valid {
            continue;
        }
        let swath: Vec<usize> = swath_ix.slice().to_vec();
        let mut labels: BTreeMap<&str, usize> = swath_dims
            .iter()
            .map(String::as_str)
            .zip(swath.iter().copied())
            .collect();

        let footprint = match &corners {
            Some(corners) => {
                let mut pts = [(f64::NAN, f64::NAN); 4];
                for (pt, (vx, vy)) in pts.iter_mut().zip(corners) {
                    *pt = (
                        vx.value_at(&labels).unwrap_or(f64::NAN),
                        vy.value_at(&labels).unwrap_or(f64::NAN),
                    );
                }
                // CORNER_KEYS order is ll, lu, ul, uu
                let poly = Polygon::quad(pts[0], pts[1], pts[3], pts[2]);
                if !poly.is_valid() {
                    dropped += 1;
                    continue;
                }
                Some(poly)
            }
            None => None,
        };

        for extra_ix in ndarray::indices(IxDyn(&extra_shape)) {
            let extra_ix: Vec<usize> = extra_ix.slice().to_vec();
            for (name, &i) in extra_names.iter().zip(&extra_ix) {
                labels.insert(name.as_str(), i);
            }
            for (col, var) in values.iter_mut().zip(&vars) {
                col.push(var.value_at(&labels).unwrap_or(f64::NAN));
            }
            if let Some(poly) = &footprint {
                geometry.push(poly.clone());
            }
            rows.push(PixelRow {
                swath: swath.clone(),
                extra: extra_ix,
            });
            valid.push(is_valid);
        }
    }

    if want_geometry {
        log::debug!(
            "{}: {} pixel footprints, {} dropped as degenerate",
            ds.path,
            geometry.len(),
            dropped
        );
        if geometry.is_empty() {
            return Err(GridError::EmptyGeometry(ds.path.clone()));
        }
    }

    let columns = keys
        .iter()
        .zip(vars)
        .zip(values)
        .map(|((key, var), values)| Column {
            name: key.to_string(),
            values,
            attrs: var.attrs.clone(),
        })
        .collect();

    Ok(PixelTable {
        swath_dims,
        extra_dims: extra_names,
        rows,
        valid,
        columns,
        geometry: if want_geometry { Some(geometry) } else { None },
    })
}

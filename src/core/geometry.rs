use crate::types::{
    BoundingBox, GridError, GridResult, PixelMask, SwathDataset, Variable, CORNER_KEYS,
};
use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2, Zip};

/// Which edge-grid offset `(along, across)` each corner reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CornerLayout {
    /// ll=(0,0) ul=(0,1) lu=(1,0) uu=(1,1)
    AlongTrackUpper,
    /// ll=(0,0) lu=(0,1) uu=(1,1) ul=(1,0)
    CrossTrackUpper,
}

impl CornerLayout {
    /// Offsets in `CORNER_KEYS` order: ll, lu, ul, uu
    fn offsets(&self) -> [(usize, usize); 4] {
        match self {
            CornerLayout::AlongTrackUpper => [(0, 0), (1, 0), (0, 1), (1, 1)],
            CornerLayout::CrossTrackUpper => [(0, 0), (0, 1), (1, 0), (1, 1)],
        }
    }
}

/// Fractional index positions of the half-pixel edges of an `n`-point axis.
///
/// Interior edges sit at `i - 0.5`; the outer edges reuse the boundary
/// centres instead of extrapolating past them.
pub fn edge_positions(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let mut edges = Vec::with_capacity(n + 1);
    edges.push(0.0);
    for i in 1..n {
        edges.push(i as f64 - 0.5);
    }
    edges.push((n - 1) as f64);
    edges
}

/// Linear interpolation along one axis at a fractional position
fn lerp_index(lo: f64, hi: f64, frac: f64) -> f64 {
    if frac == 0.0 {
        lo
    } else {
        lo * (1.0 - frac) + hi * frac
    }
}

/// Bilinear sample of `centers` at fractional `(pi, pj)`, both within bounds
fn sample(centers: &ArrayView2<f64>, pi: f64, pj: f64) -> f64 {
    let (n, m) = centers.dim();
    let i0 = (pi.floor() as usize).min(n - 1);
    let j0 = (pj.floor() as usize).min(m - 1);
    let fi = pi - i0 as f64;
    let fj = pj - j0 as f64;
    let i1 = (i0 + 1).min(n - 1);
    let j1 = (j0 + 1).min(m - 1);
    let low = lerp_index(centers[[i0, j0]], centers[[i0, j1]], fj);
    if fi == 0.0 {
        return low;
    }
    let high = lerp_index(centers[[i1, j0]], centers[[i1, j1]], fj);
    lerp_index(low, high, fi)
}

/// Build the `(n+1) x (m+1)` edge grid of a 2-D field of pixel centres
pub fn interpolate_edges(centers: ArrayView2<f64>) -> Array2<f64> {
    let (n, m) = centers.dim();
    let rows = edge_positions(n);
    let cols = edge_positions(m);
    let mut edges = Array2::<f64>::zeros((rows.len(), cols.len()));
    for (i, &pi) in rows.iter().enumerate() {
        for (j, &pj) in cols.iter().enumerate() {
            edges[[i, j]] = sample(&centers, pi, pj);
        }
    }
    edges
}

/// View a variable as 2-D with its axes in `dims` order
pub fn as_2d(var: &Variable, dims: [&str; 2]) -> GridResult<Array2<f64>> {
    let a0 = var.axis_of(dims[0]);
    let a1 = var.axis_of(dims[1]);
    match (a0, a1) {
        (Some(a0), Some(a1)) if var.dims.len() == 2 => {
            let permuted = var.data.view().permuted_axes(vec![a0, a1]);
            Ok(permuted
                .into_dimensionality::<Ix2>()
                .map_err(|e| GridError::DimensionMismatch(e.to_string()))?
                .to_owned())
        }
        _ => Err(GridError::DimensionMismatch(format!(
            "expected 2-d variable over {:?}, got {:?}",
            dims, var.dims
        ))),
    }
}

/// Write the eight corner variables from longitude/latitude edge grids
pub fn set_corners_from_edges(
    ds: &mut SwathDataset,
    lon_edges: ArrayView2<f64>,
    lat_edges: ArrayView2<f64>,
    layout: CornerLayout,
    swath_dims: [&str; 2],
) -> GridResult<()> {
    let (ne, me) = lon_edges.dim();
    if lat_edges.dim() != (ne, me) || ne < 2 || me < 2 {
        return Err(GridError::DimensionMismatch(format!(
            "edge grids {:?} and {:?} cannot describe pixel corners",
            lon_edges.dim(),
            lat_edges.dim()
        )));
    }
    let (n, m) = (ne - 1, me - 1);
    for ((key_x, key_y), (di, dj)) in CORNER_KEYS.iter().zip(layout.offsets()) {
        let xs = lon_edges.slice(ndarray::s![di..di + n, dj..dj + m]).to_owned();
        let ys = lat_edges.slice(ndarray::s![di..di + n, dj..dj + m]).to_owned();
        ds.insert(key_x, Variable::new(&swath_dims, xs.into_dyn())?);
        ds.insert(key_y, Variable::new(&swath_dims, ys.into_dyn())?);
    }
    Ok(())
}

/// Write corners by interpolating half-pixel edges from centre coordinates
pub fn set_corners_from_centers(
    ds: &mut SwathDataset,
    lon_key: &str,
    lat_key: &str,
    layout: CornerLayout,
    swath_dims: [&str; 2],
) -> GridResult<()> {
    let lon = as_2d(ds.get(lon_key)?, swath_dims)?;
    let lat = as_2d(ds.get(lat_key)?, swath_dims)?;
    log::debug!("Interpolating {}x{} pixel edges", lon.nrows() + 1, lon.ncols() + 1);
    let lon_edges = interpolate_edges(lon.view());
    let lat_edges = interpolate_edges(lat.view());
    set_corners_from_edges(ds, lon_edges.view(), lat_edges.view(), layout, swath_dims)
}

/// Write corners by selecting known indices along a corner dimension.
///
/// `indices` is in `CORNER_KEYS` order (ll, lu, ul, uu).
pub fn set_corners_direct(
    ds: &mut SwathDataset,
    lon_key: &str,
    lat_key: &str,
    corner_dim: &str,
    indices: [usize; 4],
) -> GridResult<()> {
    let mut selected = Vec::with_capacity(8);
    for ((key_x, key_y), idx) in CORNER_KEYS.iter().zip(indices) {
        selected.push((*key_x, ds.get(lon_key)?.select(corner_dim, idx)?));
        selected.push((*key_y, ds.get(lat_key)?.select(corner_dim, idx)?));
    }
    for (key, var) in selected {
        ds.insert(key, var);
    }
    Ok(())
}

/// Copy pixel centres into `cn_x`/`cn_y`
pub fn set_centers(ds: &mut SwathDataset, lon_key: &str, lat_key: &str) -> GridResult<()> {
    let lon = ds.get(lon_key)?.clone();
    let lat = ds.get(lat_key)?.clone();
    ds.insert("cn_x", lon);
    ds.insert("cn_y", lat);
    Ok(())
}

/// Evaluate a per-pixel predicate on a 2-D variable, laid out over `dims`
pub fn mask_where<F>(var: &Variable, dims: [&str; 2], predicate: F) -> GridResult<ArrayD<bool>>
where
    F: Fn(f64) -> bool,
{
    Ok(as_2d(var, dims)?.mapv(predicate).into_dyn())
}

/// Bitwise flag test after integer conversion; NaN flags never pass
pub fn flag_clear(value: f64, bits: i64) -> bool {
    value.is_finite() && (value as i64) & bits == 0
}

/// Logical AND of equally shaped masks
pub fn and_masks(masks: Vec<ArrayD<bool>>) -> GridResult<ArrayD<bool>> {
    let mut iter = masks.into_iter();
    let mut combined = iter
        .next()
        .ok_or_else(|| GridError::Processing("no validity conditions".to_string()))?;
    for mask in iter {
        if mask.shape() != combined.shape() {
            return Err(GridError::DimensionMismatch(format!(
                "validity masks {:?} and {:?}",
                combined.shape(),
                mask.shape()
            )));
        }
        Zip::from(&mut combined).and(&mask).for_each(|c, &m| *c = *c && m);
    }
    Ok(combined)
}

/// Pixel centres inside the bounding box
pub fn bbox_mask(lon: &Variable, lat: &Variable, bbox: &BoundingBox) -> GridResult<ArrayD<bool>> {
    if lon.data.shape() != lat.data.shape() {
        return Err(GridError::DimensionMismatch(
            "longitude and latitude shapes differ".to_string(),
        ));
    }
    let mut mask = ArrayD::from_elem(lon.data.raw_dim(), false);
    Zip::from(&mut mask)
        .and(&lon.data)
        .and(&lat.data)
        .for_each(|m, &x, &y| *m = bbox.contains(x, y));
    Ok(mask)
}

/// First and last index along `dim` holding any centre inside the box
pub fn along_track_extent(
    lon: &Variable,
    lat: &Variable,
    bbox: &BoundingBox,
    dim: &str,
) -> GridResult<Option<(usize, usize)>> {
    let inside = bbox_mask(lon, lat, bbox)?;
    let axis = lon.axis_of(dim).ok_or_else(|| {
        GridError::DimensionMismatch(format!("dimension {} not in {:?}", dim, lon.dims))
    })?;
    let rows: Vec<usize> = inside
        .axis_iter(Axis(axis))
        .enumerate()
        .filter(|(_, lane)| lane.iter().any(|v| *v))
        .map(|(i, _)| i)
        .collect();
    Ok(rows.first().copied().zip(rows.last().copied()))
}

/// Install the validity mask, failing when nothing is valid.
///
/// Relaxed instruments only warn, leaving the empty geometry to fail later.
pub fn install_valid(
    ds: &mut SwathDataset,
    dims: &[&str],
    mask: ArrayD<bool>,
    relaxed: bool,
) -> GridResult<usize> {
    let mask = PixelMask {
        dims: dims.iter().map(|d| d.to_string()).collect(),
        data: mask,
    };
    let count = mask.count_valid();
    ds.valid = Some(mask);
    log::debug!("{}: {} valid pixels", ds.path, count);
    if count == 0 {
        if relaxed {
            log::warn!("No valid pixels in {}", ds.path);
        } else {
            return Err(GridError::NoValidPixels(ds.path.clone()));
        }
    }
    Ok(count)
}

use crate::types::{GridError, GridResult};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};
use num_traits::Float;

/// Linear interpolation of one profile onto `target` coordinates.
///
/// `ascending` states the direction of `source_coord`. Non-finite source
/// samples are dropped, targets outside the source range take the nearest
/// end value, a NaN target gives NaN, and a profile with no finite samples
/// gives all NaN.
pub fn coord_interp<T: Float>(
    target: &[T],
    source_coord: &[T],
    source_value: &[T],
    ascending: bool,
) -> GridResult<Vec<T>> {
    if source_coord.len() != source_value.len() {
        return Err(GridError::DimensionMismatch(format!(
            "{} source coordinates for {} values",
            source_coord.len(),
            source_value.len()
        )));
    }

    let mut samples: Vec<(T, T)> = source_coord
        .iter()
        .zip(source_value)
        .filter(|(c, v)| c.is_finite() && v.is_finite())
        .map(|(&c, &v)| (c, v))
        .collect();
    if !ascending {
        samples.reverse();
    }

    if samples.is_empty() {
        return Ok(vec![T::nan(); target.len()]);
    }
    Ok(target.iter().map(|&t| interp_sorted(&samples, t)).collect())
}

/// Interpolate within samples sorted by ascending coordinate
fn interp_sorted<T: Float>(samples: &[(T, T)], t: T) -> T {
    if t.is_nan() {
        return T::nan();
    }
    let (first_c, first_v) = samples[0];
    let (last_c, last_v) = samples[samples.len() - 1];
    if t <= first_c {
        return first_v;
    }
    if t >= last_c {
        return last_v;
    }
    let upper = samples.partition_point(|(c, _)| *c < t);
    let (c1, v1) = samples[upper];
    if c1 == t {
        return v1;
    }
    let (c0, v0) = samples[upper - 1];
    let frac = (t - c0) / (c1 - c0);
    v0 + (v1 - v0) * frac
}

/// Row-wise `coord_interp` over `(profile, level)` matrices.
///
/// `target` has one row per profile; `source_coord` and `source_value`
/// share their shape and row count with it.
pub fn coord_interp_profiles<T: Float>(
    target: ArrayView2<T>,
    source_coord: ArrayView2<T>,
    source_value: ArrayView2<T>,
    ascending: bool,
) -> GridResult<Array2<T>> {
    if source_coord.dim() != source_value.dim() || source_coord.nrows() != target.nrows() {
        return Err(GridError::DimensionMismatch(format!(
            "targets {:?}, coordinates {:?}, values {:?}",
            target.dim(),
            source_coord.dim(),
            source_value.dim()
        )));
    }
    let mut out = Array2::from_elem(target.dim(), T::nan());
    let mut failure = None;
    Zip::from(out.axis_iter_mut(Axis(0)))
        .and(target.axis_iter(Axis(0)))
        .and(source_coord.axis_iter(Axis(0)))
        .and(source_value.axis_iter(Axis(0)))
        .for_each(|mut row, t, c, v| {
            match coord_interp(&to_vec(t), &to_vec(c), &to_vec(v), ascending) {
                Ok(values) => row.iter_mut().zip(values).for_each(|(o, x)| *o = x),
                Err(e) => failure = Some(e),
            }
        });
    match failure {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

fn to_vec<T: Float>(view: ArrayView1<T>) -> Vec<T> {
    view.iter().copied().collect()
}

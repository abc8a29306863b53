use crate::core::aggregate::{combine_tables, Level3Table, WeightedAccumulator};
use crate::core::grid::DestinationGrid;
use crate::core::overlay::{assign_weights, overlay, reproject, Intersection, WeightAssigner};
use crate::core::table::to_table;
use crate::types::{Attributes, DimSignature, GridError, GridResult, SwathDataset};
use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::Path;

/// Per-signature Level-3 tables of one result
pub type Level3Result = BTreeMap<DimSignature, Level3Table>;

/// Group variables by their full dimension tuple (swath dims, then extras)
pub fn partition_by_signature(
    ds: &SwathDataset,
    keys: &[&str],
) -> GridResult<BTreeMap<DimSignature, Vec<String>>> {
    let swath_dims = ds.swath_dims()?;
    let mut groups: BTreeMap<DimSignature, Vec<String>> = BTreeMap::new();
    for key in keys {
        let var = ds.get(key)?;
        let mut dims = swath_dims.to_vec();
        dims.extend(var.dims.iter().filter(|d| !swath_dims.contains(d)).cloned());
        groups.entry(DimSignature(dims)).or_default().push(key.to_string());
    }
    Ok(groups)
}

/// Regrid `keys` of a validated dataset onto `grid`.
///
/// `grid_dims` picks the grid key components rows are grouped by (all of
/// them when empty). Every variable is averaged as `sum(v*w)/sum(w)` over
/// the pixel/cell intersections it takes part in.
pub fn to_level3(
    ds: &SwathDataset,
    keys: &[&str],
    grid: &DestinationGrid,
    grid_dims: &[&str],
    weighting: &dyn WeightAssigner,
) -> GridResult<Level3Result> {
    let key_positions = grid_key_positions(grid, grid_dims)?;
    let out_grid_dims: Vec<String> = key_positions.iter().map(|&p| grid.dims[p].clone()).collect();
    let groups = partition_by_signature(ds, keys)?;

    let geometry = to_table(ds, &[], true, true)?;
    let footprints = reproject(
        geometry.geometry.as_deref().unwrap_or_default(),
        &grid.crs,
    );
    let swath_index: Vec<Vec<usize>> = geometry.rows.iter().map(|r| r.swath.clone()).collect();
    let mut intersections = overlay(&swath_index, &footprints, grid)?;
    if intersections.is_empty() {
        return Err(GridError::EmptyIntersection(ds.path.clone()));
    }
    assign_weights(&mut intersections, weighting);
    log::info!(
        "{}: {} footprints, {} intersections, {} variable groups",
        ds.path,
        footprints.len(),
        intersections.len(),
        groups.len()
    );

    let mut result = Level3Result::new();
    for (signature, names) in groups {
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let table = aggregate_group(ds, &name_refs, grid, &key_positions, &out_grid_dims, &intersections)?;
        log::debug!("{}: {} rows for {}", ds.path, table.len(), signature);
        result.insert(signature, table);
    }
    Ok(result)
}

fn grid_key_positions(grid: &DestinationGrid, grid_dims: &[&str]) -> GridResult<Vec<usize>> {
    if grid_dims.is_empty() {
        return Ok((0..grid.dims.len()).collect());
    }
    grid_dims
        .iter()
        .map(|d| {
            grid.dims.iter().position(|g| g == d).ok_or_else(|| {
                GridError::DimensionMismatch(format!("{} is not a grid dimension of {:?}", d, grid.dims))
            })
        })
        .collect()
}

/// Inner join of one signature group's rows with the intersections, then
/// grouped weighted average
fn aggregate_group(
    ds: &SwathDataset,
    names: &[&str],
    grid: &DestinationGrid,
    key_positions: &[usize],
    grid_dims: &[String],
    intersections: &[Intersection],
) -> GridResult<Level3Table> {
    let table = to_table(ds, names, true, false)?;

    // Rows of one pixel are contiguous: one per extra-dimension index
    let mut by_swath: HashMap<&[usize], Range<usize>> = HashMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        by_swath
            .entry(row.swath.as_slice())
            .and_modify(|r| r.end = i + 1)
            .or_insert(i..i + 1);
    }

    let mut acc = WeightedAccumulator::new(names.iter().map(|n| n.to_string()).collect());
    let mut values = vec![0.0; table.columns.len()];
    for record in intersections {
        let Some(rows) = by_swath.get(record.swath.as_slice()) else {
            continue;
        };
        let cell_key = &grid.cells[record.cell].key;
        for i in rows.clone() {
            for (v, col) in values.iter_mut().zip(&table.columns) {
                *v = col.values[i];
            }
            let mut key: Vec<i64> = key_positions.iter().map(|&p| cell_key[p]).collect();
            key.extend(table.rows[i].extra.iter().map(|&e| e as i64));
            acc.add(key, &values, record.weight);
        }
    }

    let attrs: BTreeMap<String, Attributes> = table
        .columns
        .iter()
        .map(|c| (c.name.clone(), c.attrs.clone()))
        .collect();
    let mut dims = grid_dims.to_vec();
    dims.extend(table.extra_dims.iter().cloned());
    Ok(acc.finish(dims, attrs))
}

/// Combine several Level-3 results signature by signature
pub fn combine_level3(results: &[&Level3Result]) -> GridResult<Level3Result> {
    let mut by_signature: BTreeMap<&DimSignature, Vec<&Level3Table>> = BTreeMap::new();
    for result in results {
        for (signature, table) in result.iter() {
            by_signature.entry(signature).or_default().push(table);
        }
    }
    by_signature
        .into_iter()
        .map(|(signature, tables)| Ok((signature.clone(), combine_tables(&tables)?)))
        .collect()
}

/// Level-3 tables with provenance attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level3Product {
    #[serde(with = "signature_map")]
    pub groups: Level3Result,
    pub description: String,
    /// Local time, `%FT%H:%M:%S%z`
    pub updated: String,
    pub history: String,
}

impl Level3Product {
    pub fn new<S: Into<String>>(groups: Level3Result, description: S) -> Self {
        Self {
            groups,
            description: description.into(),
            updated: timestamp(),
            history: String::new(),
        }
    }

    /// Table holding `name`, if any
    pub fn table_for(&self, name: &str) -> Option<&Level3Table> {
        self.groups.values().find(|t| t.variable_index(name).is_some())
    }

    pub fn variables(&self) -> Vec<&str> {
        self.groups
            .values()
            .flat_map(|t| t.variables.iter().map(String::as_str))
            .collect()
    }

    /// Values of a per-cell variable at `cells` (NaN where missing)
    pub fn scalar_field(&self, name: &str, cells: &[Vec<i64>]) -> GridResult<Vec<f64>> {
        let table = self
            .table_for(name)
            .ok_or_else(|| GridError::MissingVariable(name.to_string()))?;
        Ok(cells
            .iter()
            .map(|key| table.value(key, name).unwrap_or(f64::NAN))
            .collect())
    }

    /// Values of a variable with one extra dimension as `(cell, level)`;
    /// the level count is the largest level index present plus one
    pub fn profile_field(&self, name: &str, cells: &[Vec<i64>]) -> GridResult<Array2<f64>> {
        let table = self
            .table_for(name)
            .ok_or_else(|| GridError::MissingVariable(name.to_string()))?;
        let ngrid = cells.first().map(|c| c.len()).unwrap_or(0);
        if table.dims.len() != ngrid + 1 {
            return Err(GridError::DimensionMismatch(format!(
                "{} over {:?} is not a single-level profile",
                name, table.dims
            )));
        }
        let nlevels = table
            .rows
            .iter()
            .filter_map(|r| r.key.last())
            .max()
            .map(|&k| k as usize + 1)
            .unwrap_or(0);
        let mut field = Array2::from_elem((cells.len(), nlevels), f64::NAN);
        for (i, cell) in cells.iter().enumerate() {
            for k in 0..nlevels {
                let mut key = cell.clone();
                key.push(k as i64);
                if let Some(v) = table.value(&key, name) {
                    field[[i, k]] = v;
                }
            }
        }
        Ok(field)
    }

    /// Expand every table to the full grid index over `grid_dims` (all grid
    /// dimensions when empty)
    pub fn reindex(&mut self, grid: &DestinationGrid, grid_dims: &[&str]) -> GridResult<()> {
        let keys = grid.index_keys(grid_dims)?;
        for table in self.groups.values_mut() {
            *table = table.reindex(&keys);
        }
        Ok(())
    }

    pub fn rename_variables<F>(&mut self, f: F)
    where
        F: Fn(&str) -> String,
    {
        for table in self.groups.values_mut() {
            table.rename_variables(&f);
        }
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> GridResult<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        log::info!("Wrote Level-3 product to {}", path.as_ref().display());
        Ok(())
    }

    pub fn read_json<P: AsRef<Path>>(path: P) -> GridResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

pub(crate) fn timestamp() -> String {
    chrono::Local::now().format("%FT%H:%M:%S%z").to_string()
}

/// JSON object keys must be strings, so signature maps travel as pairs
mod signature_map {
    use super::*;

    pub fn serialize<S: Serializer>(map: &Level3Result, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Level3Result, D::Error> {
        let pairs: Vec<(DimSignature, Level3Table)> = Vec::deserialize(d)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::overlay::Weighting;
    use crate::types::{PixelMask, Variable};
    use approx::assert_relative_eq;
    use ndarray::{Array, Array2, ArrayD, IxDyn};

    /// Four unit-square pixels along x, centred at x = 0.5, 1.5, 2.5, 3.5
    fn four_pixel_swath(values: [f64; 4]) -> SwathDataset {
        let mut ds = SwathDataset::new("four.json");
        let corners = [
            ("ll_x", 0.0, "ll_y", 0.0),
            ("lu_x", 0.0, "lu_y", 1.0),
            ("ul_x", 1.0, "ul_y", 0.0),
            ("uu_x", 1.0, "uu_y", 1.0),
        ];
        for (kx, dx, ky, y) in corners {
            let xs = Array2::from_shape_fn((1, 4), |(_, j)| j as f64 + dx).into_dyn();
            let ys = ArrayD::from_elem(IxDyn(&[1, 4]), y);
            ds.insert(kx, Variable::new(&["t", "x"], xs).unwrap());
            ds.insert(ky, Variable::new(&["t", "x"], ys).unwrap());
        }
        let v = Array::from_shape_vec((1, 4), values.to_vec()).unwrap().into_dyn();
        let mut attrs = Attributes::new();
        attrs.insert("units".into(), "DU".into());
        ds.insert("o3", Variable::new(&["t", "x"], v).unwrap().with_attrs(attrs));
        let profile = Array::from_shape_fn((1, 4, 2), |(_, j, k)| (j * 10 + k) as f64).into_dyn();
        ds.insert("prof", Variable::new(&["t", "x", "lev"], profile).unwrap());
        ds.valid = Some(PixelMask {
            dims: vec!["t".into(), "x".into()],
            data: ArrayD::from_elem(IxDyn(&[1, 4]), true),
        });
        ds
    }

    #[test]
    fn test_two_and_a_half_pixels_area_weighted() {
        let ds = four_pixel_swath([1.0, 2.0, 4.0, 100.0]);
        // One cell covering pixels 0 and 1 fully and half of pixel 2
        let grid = DestinationGrid::regular_lonlat(0.0, 0.0, 2.5, 1.0, 1, 1).unwrap();
        let result = to_level3(&ds, &["o3"], &grid, &[], &Weighting::Area).unwrap();
        assert_eq!(result.len(), 1);
        let table = result.values().next().unwrap();
        let expected = (1.0 * 1.0 + 2.0 * 1.0 + 4.0 * 0.5) / 2.5;
        assert_relative_eq!(table.value(&[0, 0], "o3").unwrap(), expected, epsilon = 1e-12);
        assert_relative_eq!(table.rows[0].weight_sum, 2.5, epsilon = 1e-12);
        assert_eq!(table.attrs["o3"]["units"], "DU");
    }

    #[test]
    fn test_equal_weighting_counts_pixels() {
        let ds = four_pixel_swath([1.0, 2.0, 4.0, 100.0]);
        let grid = DestinationGrid::regular_lonlat(0.0, 0.0, 2.5, 1.0, 1, 1).unwrap();
        let result = to_level3(&ds, &["o3"], &grid, &[], &Weighting::Equal).unwrap();
        let table = result.values().next().unwrap();
        assert_relative_eq!(table.value(&[0, 0], "o3").unwrap(), 7.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(table.rows[0].weight_sum, 3.0);
    }

    /// Same four pixels as `four_pixel_swath`, stored in `order`
    fn reordered_swath(values: [f64; 4], order: [usize; 4]) -> SwathDataset {
        let base = four_pixel_swath(values);
        let mut ds = SwathDataset::new("reordered.json");
        for key in ["ll_x", "lu_x", "ul_x", "uu_x", "ll_y", "lu_y", "ul_y", "uu_y", "o3"] {
            let src = base.get(key).unwrap();
            let data = Array2::from_shape_fn((1, 4), |(_, j)| src.data[[0, order[j]]]).into_dyn();
            let var = Variable::new(&["t", "x"], data).unwrap().with_attrs(src.attrs.clone());
            ds.insert(key, var);
        }
        ds.valid = base.valid.clone();
        ds
    }

    #[test]
    fn test_pixel_order_does_not_change_level3() {
        let values = [1.0, 2.0, 4.0, 8.0];
        let grid = DestinationGrid::regular_lonlat(0.25, 0.0, 1.5, 1.0, 3, 1).unwrap();
        let reference = to_level3(&four_pixel_swath(values), &["o3"], &grid, &[], &Weighting::Area)
            .unwrap();
        let reference = reference.values().next().unwrap();
        for order in [[3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]] {
            let ds = reordered_swath(values, order);
            let result = to_level3(&ds, &["o3"], &grid, &[], &Weighting::Area).unwrap();
            let table = result.values().next().unwrap();
            assert_eq!(table.len(), reference.len());
            for row in &reference.rows {
                let other = table.row(&row.key).unwrap();
                assert_relative_eq!(other.weight_sum, row.weight_sum, epsilon = 1e-12);
                assert_relative_eq!(
                    other.cells[0].value.unwrap(),
                    row.cells[0].value.unwrap(),
                    epsilon = 1e-12
                );
            }
        }
        // Cell 0 spans [0.25, 1.75]: 0.75 of pixel 0 and 0.75 of pixel 1
        assert_relative_eq!(reference.value(&[0, 0], "o3").unwrap(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_partition_by_extra_dims() {
        let ds = four_pixel_swath([1.0, 2.0, 3.0, 4.0]);
        let grid = DestinationGrid::regular_lonlat(0.0, 0.0, 2.0, 1.0, 2, 1).unwrap();
        let result = to_level3(&ds, &["o3", "prof"], &grid, &[], &Weighting::Area).unwrap();
        assert_eq!(result.len(), 2);
        let prof = result
            .get(&DimSignature(vec!["t".into(), "x".into(), "lev".into()]))
            .unwrap();
        assert_eq!(prof.dims, vec!["ROW", "COL", "lev"]);
        // Cell (0, 1) averages pixels 2 and 3 at level 1
        assert_relative_eq!(prof.value(&[0, 1, 1], "prof").unwrap(), 26.0, epsilon = 1e-12);
    }

    #[test]
    fn test_grid_dims_subset_groups_columns() {
        let ds = four_pixel_swath([1.0, 2.0, 3.0, 4.0]);
        let grid = DestinationGrid::regular_lonlat(0.0, 0.0, 2.0, 1.0, 2, 1).unwrap();
        let result = to_level3(&ds, &["o3"], &grid, &["COL"], &Weighting::Area).unwrap();
        let table = result.values().next().unwrap();
        assert_eq!(table.dims, vec!["COL"]);
        assert_relative_eq!(table.value(&[1], "o3").unwrap(), 3.5, epsilon = 1e-12);
        assert!(to_level3(&ds, &["o3"], &grid, &["LAY"], &Weighting::Area).is_err());
    }

    #[test]
    fn test_no_overlap_is_error() {
        let ds = four_pixel_swath([1.0, 2.0, 3.0, 4.0]);
        let grid = DestinationGrid::regular_lonlat(50.0, 50.0, 1.0, 1.0, 1, 1).unwrap();
        let result = to_level3(&ds, &["o3"], &grid, &[], &Weighting::Area);
        assert!(matches!(result, Err(GridError::EmptyIntersection(_))));
    }

    #[test]
    fn test_product_fields_and_json() {
        let ds = four_pixel_swath([1.0, 2.0, 3.0, 4.0]);
        let grid = DestinationGrid::regular_lonlat(0.0, 0.0, 2.0, 1.0, 3, 1).unwrap();
        let result = to_level3(&ds, &["o3", "prof"], &grid, &[], &Weighting::Area).unwrap();
        let mut product = Level3Product::new(result, "test");
        product.reindex(&grid, &[]).unwrap();
        let cells = vec![vec![0, 0], vec![0, 2]];
        let o3 = product.scalar_field("o3", &cells).unwrap();
        assert_relative_eq!(o3[0], 1.5, epsilon = 1e-12);
        assert!(o3[1].is_nan());
        let prof = product.profile_field("prof", &cells).unwrap();
        assert_eq!(prof.dim(), (2, 2));
        assert!(product.profile_field("o3", &cells).is_err());
        assert_relative_eq!(prof[[0, 1]], 6.0, epsilon = 1e-12);
        assert!(prof[[1, 0]].is_nan());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l3.json");
        product.write_json(&path).unwrap();
        let back = Level3Product::read_json(&path).unwrap();
        assert_eq!(back.groups.len(), 2);
        assert_eq!(back.description, "test");
    }
}

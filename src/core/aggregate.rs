use crate::types::{Attributes, GridError, GridResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Weighted value of one variable in one output row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level3Cell {
    /// `sum(v*w)/sum(w)` over non-null contributions; `None` if that sum of
    /// weights is zero
    pub value: Option<f64>,
    /// `sum(w)` over the non-null contributions
    pub weight_sum: f64,
}

impl Level3Cell {
    pub const EMPTY: Level3Cell = Level3Cell {
        value: None,
        weight_sum: 0.0,
    };
}

/// One grid cell (plus extra-dimension index) of a Level-3 table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level3Row {
    pub key: Vec<i64>,
    pub cells: Vec<Level3Cell>,
    /// Total weight of every contribution to this row
    pub weight_sum: f64,
}

/// Aggregated output for one dimension signature, rows sorted by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level3Table {
    /// Grid dimensions followed by extra dimensions
    pub dims: Vec<String>,
    pub variables: Vec<String>,
    pub attrs: BTreeMap<String, Attributes>,
    pub rows: Vec<Level3Row>,
}

impl Level3Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == name)
    }

    pub fn row(&self, key: &[i64]) -> Option<&Level3Row> {
        self.rows
            .binary_search_by(|r| r.key.as_slice().cmp(key))
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Weighted value of `name` at `key`
    pub fn value(&self, key: &[i64], name: &str) -> Option<f64> {
        let col = self.variable_index(name)?;
        self.row(key)?.cells[col].value
    }

    /// Rename variables (and their attribute entries) through `f`
    pub fn rename_variables<F>(&mut self, f: F)
    where
        F: Fn(&str) -> String,
    {
        let renamed: Vec<String> = self.variables.iter().map(|v| f(v)).collect();
        let mut attrs = BTreeMap::new();
        for (old, new) in self.variables.iter().zip(&renamed) {
            if let Some(a) = self.attrs.remove(old) {
                attrs.insert(new.clone(), a);
            }
        }
        self.variables = renamed;
        self.attrs = attrs;
    }

    /// Expand to every grid key, keeping the extra-dimension suffixes already
    /// present. Cells without data become empty.
    pub fn reindex(&self, grid_keys: &[Vec<i64>]) -> Level3Table {
        let ngrid = grid_keys.first().map(|k| k.len()).unwrap_or(0);
        let mut suffixes: BTreeSet<Vec<i64>> = self
            .rows
            .iter()
            .map(|r| r.key[ngrid.min(r.key.len())..].to_vec())
            .collect();
        if suffixes.is_empty() {
            suffixes.insert(Vec::new());
        }

        let mut rows = Vec::with_capacity(grid_keys.len() * suffixes.len());
        for grid_key in grid_keys {
            for suffix in &suffixes {
                let mut key = grid_key.clone();
                key.extend_from_slice(suffix);
                let row = self.row(&key).cloned().unwrap_or_else(|| Level3Row {
                    key,
                    cells: vec![Level3Cell::EMPTY; self.variables.len()],
                    weight_sum: 0.0,
                });
                rows.push(row);
            }
        }
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Level3Table {
            dims: self.dims.clone(),
            variables: self.variables.clone(),
            attrs: self.attrs.clone(),
            rows,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct GroupSums {
    value_weight: Vec<f64>,
    weight: Vec<f64>,
    total_weight: f64,
}

/// Streaming grouped weighted average.
///
/// Rows are accumulated by key; `finish` divides once per group, so the
/// result does not depend on the order rows were added in (up to floating
/// point summation order).
#[derive(Debug, Clone)]
pub struct WeightedAccumulator {
    variables: Vec<String>,
    groups: BTreeMap<Vec<i64>, GroupSums>,
}

impl WeightedAccumulator {
    pub fn new(variables: Vec<String>) -> Self {
        Self {
            variables,
            groups: BTreeMap::new(),
        }
    }

    fn group(&mut self, key: Vec<i64>) -> &mut GroupSums {
        let n = self.variables.len();
        self.groups.entry(key).or_insert_with(|| GroupSums {
            value_weight: vec![0.0; n],
            weight: vec![0.0; n],
            total_weight: 0.0,
        })
    }

    /// Add one row sharing a single weight across all variables
    pub fn add(&mut self, key: Vec<i64>, values: &[f64], weight: f64) {
        let sums = self.group(key);
        sums.total_weight += weight;
        for (i, &v) in values.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            sums.value_weight[i] += v * weight;
            sums.weight[i] += weight;
        }
    }

    /// Add an already-averaged row, each variable weighted by its own weight sum
    pub fn add_cells(&mut self, key: Vec<i64>, cells: &[(usize, Level3Cell)], total_weight: f64) {
        let sums = self.group(key);
        sums.total_weight += total_weight;
        for (i, cell) in cells {
            if let Some(v) = cell.value {
                if v.is_nan() {
                    continue;
                }
                sums.value_weight[*i] += v * cell.weight_sum;
                sums.weight[*i] += cell.weight_sum;
            }
        }
    }

    pub fn finish(self, dims: Vec<String>, attrs: BTreeMap<String, Attributes>) -> Level3Table {
        let rows = self
            .groups
            .into_iter()
            .map(|(key, sums)| Level3Row {
                key,
                cells: sums
                    .value_weight
                    .iter()
                    .zip(&sums.weight)
                    .map(|(&vw, &w)| Level3Cell {
                        value: if w != 0.0 { Some(vw / w) } else { None },
                        weight_sum: w,
                    })
                    .collect(),
                weight_sum: sums.total_weight,
            })
            .collect();
        Level3Table {
            dims,
            variables: self.variables,
            attrs,
            rows,
        }
    }
}

/// Second weighted pass over several Level-3 tables of one signature.
///
/// Each variable's `weight_sum` is the combining weight, so combining
/// `{A, B}` and then `C` equals combining `{A, B, C}` at once. Attributes
/// come from the first table that carries each variable.
pub fn combine_tables(tables: &[&Level3Table]) -> GridResult<Level3Table> {
    let first = tables
        .first()
        .ok_or_else(|| GridError::Processing("no tables to combine".to_string()))?;
    let dims = first.dims.clone();

    let mut variables: Vec<String> = Vec::new();
    let mut attrs = BTreeMap::new();
    for table in tables {
        if table.dims != dims {
            return Err(GridError::DimensionMismatch(format!(
                "cannot combine tables over {:?} and {:?}",
                dims, table.dims
            )));
        }
        for var in &table.variables {
            if !variables.contains(var) {
                variables.push(var.clone());
            }
            if !attrs.contains_key(var) {
                if let Some(a) = table.attrs.get(var) {
                    attrs.insert(var.clone(), a.clone());
                }
            }
        }
    }

    let mut acc = WeightedAccumulator::new(variables.clone());
    for table in tables {
        let columns: Vec<usize> = table
            .variables
            .iter()
            .filter_map(|v| variables.iter().position(|u| u == v))
            .collect();
        for row in &table.rows {
            let cells: Vec<(usize, Level3Cell)> =
                columns.iter().copied().zip(row.cells.iter().copied()).collect();
            acc.add_cells(row.key.clone(), &cells, row.weight_sum);
        }
    }
    Ok(acc.finish(dims, attrs))
}

use crate::core::grid::DestinationGrid;
use crate::core::level3::{combine_level3, Level3Product, Level3Result};
use crate::core::overlay::Weighting;
use crate::instruments::Instrument;
use crate::io::SwathSource;
use crate::types::{BoundingBox, GridResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parameters shared by every file of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GriddingParams {
    pub weighting: Weighting,
    /// Restrict pixels to centres inside this box
    pub bbox: Option<BoundingBox>,
    /// Minimum quality flag for graded products (VIIRS)
    pub valid_threshold: f64,
    /// Grid key components to group by; empty means all
    pub grid_dims: Vec<String>,
    /// Variables to grid; empty means the instrument defaults
    pub variables: Vec<String>,
    /// Apply the instrument's short-name table to output variables
    pub shorten_names: bool,
    /// Expand results onto every grid cell, missing cells null
    pub reindex: bool,
    /// Process files on the rayon pool (needs the `parallel` feature)
    pub parallel: bool,
}

impl Default for GriddingParams {
    fn default() -> Self {
        Self {
            weighting: Weighting::Area,
            bbox: None,
            valid_threshold: 2.0, // VIIRS "high" quality
            grid_dims: Vec::new(),
            variables: Vec::new(),
            shorten_names: false,
            reindex: false,
            parallel: true,
        }
    }
}

impl GriddingParams {
    fn grid_dim_refs(&self) -> Vec<&str> {
        self.grid_dims.iter().map(String::as_str).collect()
    }
}

/// Combined result of a batch plus the files that failed
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub product: Level3Product,
    /// Input path to error message
    pub failures: BTreeMap<String, String>,
}

impl BatchOutput {
    pub fn outputs(&self) -> &Level3Result {
        &self.product.groups
    }
}

/// Open, build and regrid a single file; the swath is dropped on return
pub fn file_to_level3<S: SwathSource + ?Sized>(
    source: &S,
    instrument: Instrument,
    path: &str,
    grid: &DestinationGrid,
    params: &GriddingParams,
) -> GridResult<Level3Result> {
    let mut ds = source.open(path)?;
    let nvalid =
        instrument.build_validity_and_geometry(&mut ds, params.bbox.as_ref(), params.valid_threshold)?;
    log::debug!("{}: {} valid pixels", path, nvalid);
    instrument.to_level3(
        &ds,
        &params.variables,
        grid,
        &params.grid_dim_refs(),
        &params.weighting,
    )
}

/// Regrid every path and combine the survivors.
///
/// A failing file never stops the batch; its error message is kept in
/// `failures` and in the product history.
pub fn paths_to_level3<S: SwathSource + ?Sized>(
    source: &S,
    instrument: Instrument,
    paths: &[String],
    grid: &DestinationGrid,
    params: &GriddingParams,
) -> GridResult<BatchOutput> {
    log::info!("Gridding {} {} files onto {} cells", paths.len(), instrument, grid.len());
    let run = |path: &String| (path.clone(), file_to_level3(source, instrument, path, grid, params));

    #[cfg(feature = "parallel")]
    let results: Vec<(String, GridResult<Level3Result>)> = if params.parallel {
        use rayon::prelude::*;
        paths.par_iter().map(run).collect()
    } else {
        paths.iter().map(run).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let results: Vec<(String, GridResult<Level3Result>)> = paths.iter().map(run).collect();

    let mut failures = BTreeMap::new();
    let mut outputs = Vec::with_capacity(results.len());
    for (path, result) in results {
        match result {
            Ok(l3) => outputs.push(l3),
            Err(e) => {
                log::warn!("Skipping {}: {}", path, e);
                failures.insert(path, e.to_string());
            }
        }
    }
    log::info!("{} files gridded, {} failed", outputs.len(), failures.len());

    let refs: Vec<&Level3Result> = outputs.iter().collect();
    let groups = combine_level3(&refs)?;
    drop(outputs);

    let mut product = Level3Product::new(groups, describe(instrument, paths));
    product.history = serde_json::to_string(&failures)?;
    if params.shorten_names {
        product.rename_variables(|k| instrument.shorten_name(k));
    }
    if params.reindex {
        product.reindex(grid, &params.grid_dim_refs())?;
    }
    Ok(BatchOutput { product, failures })
}

/// Instrument text followed by the common input directory and each path
/// relative to it
fn describe(instrument: Instrument, paths: &[String]) -> String {
    let parts = strip_common_root(paths);
    format!("{}{}", instrument.description(), parts.join("\n - "))
}

/// `[root, relative paths...]` where root is the deepest shared directory
pub(crate) fn strip_common_root(paths: &[String]) -> Vec<String> {
    let mut root: Option<PathBuf> = None;
    for path in paths {
        let parent = Path::new(path).parent().map(Path::to_path_buf).unwrap_or_default();
        root = Some(match root {
            None => parent,
            Some(r) => r
                .components()
                .zip(parent.components())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    let root = root.unwrap_or_default();
    let mut parts = vec![root.display().to_string()];
    parts.extend(paths.iter().map(|p| {
        Path::new(p)
            .strip_prefix(&root)
            .map(|r| r.display().to_string())
            .unwrap_or_else(|_| p.clone())
    }));
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridError, PixelMask, SwathDataset, Variable, CORNER_KEYS};
    use approx::assert_relative_eq;
    use ndarray::{Array2, ArrayD, IxDyn};
    use std::collections::HashMap;

    struct MemorySource(HashMap<String, SwathDataset>);

    impl SwathSource for MemorySource {
        fn open(&self, path: &str) -> GridResult<SwathDataset> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| GridError::Processing(format!("cannot open {}", path)))
        }
    }

    /// One unit pixel over [x0, x0+1] x [0, 1]
    fn pixel(path: &str, x0: f64, value: f64) -> SwathDataset {
        let mut ds = SwathDataset::new(path);
        let offsets = [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)];
        for ((kx, ky), (dx, dy)) in CORNER_KEYS.iter().zip(offsets) {
            let x = ArrayD::from_elem(IxDyn(&[1, 1]), x0 + dx);
            let y = ArrayD::from_elem(IxDyn(&[1, 1]), dy);
            ds.insert(kx, Variable::new(&["t", "x"], x).unwrap());
            ds.insert(ky, Variable::new(&["t", "x"], y).unwrap());
        }
        let v = Array2::from_elem((1, 1), value).into_dyn();
        ds.insert("aod", Variable::new(&["t", "x"], v).unwrap());
        ds.valid = Some(PixelMask {
            dims: vec!["t".into(), "x".into()],
            data: ArrayD::from_elem(IxDyn(&[1, 1]), true),
        });
        ds
    }

    fn params() -> GriddingParams {
        GriddingParams {
            variables: vec!["aod".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_failures_do_not_stop_batch() {
        let mut files = HashMap::new();
        files.insert("/data/a.json".to_string(), pixel("/data/a.json", 0.0, 1.0));
        files.insert("/data/b.json".to_string(), pixel("/data/b.json", 0.0, 3.0));
        let source = MemorySource(files);
        let grid = DestinationGrid::regular_lonlat(0.0, 0.0, 1.0, 1.0, 1, 1).unwrap();
        let paths: Vec<String> = ["/data/a.json", "/data/missing.json", "/data/b.json"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let out = paths_to_level3(&source, Instrument::Generic, &paths, &grid, &params()).unwrap();
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures.contains_key("/data/missing.json"));
        let table = out.product.table_for("aod").unwrap();
        assert_relative_eq!(table.value(&[0, 0], "aod").unwrap(), 2.0);
        assert_relative_eq!(table.rows[0].weight_sum, 2.0);

        let history: BTreeMap<String, String> = serde_json::from_str(&out.product.history).unwrap();
        assert_eq!(history, out.failures);
        assert!(out.product.description.contains("\n - a.json"));
    }

    #[test]
    fn test_all_failures_give_empty_product() {
        let source = MemorySource(HashMap::new());
        let grid = DestinationGrid::regular_lonlat(0.0, 0.0, 1.0, 1.0, 1, 1).unwrap();
        let paths = vec!["x.json".to_string()];
        let out = paths_to_level3(&source, Instrument::Generic, &paths, &grid, &params()).unwrap();
        assert!(out.outputs().is_empty());
        assert_eq!(out.failures.len(), 1);
    }

    #[test]
    fn test_reindex_fills_missing_cells() {
        let mut files = HashMap::new();
        files.insert("a".to_string(), pixel("a", 0.0, 5.0));
        let source = MemorySource(files);
        let grid = DestinationGrid::regular_lonlat(0.0, 0.0, 1.0, 1.0, 3, 1).unwrap();
        let params = GriddingParams {
            reindex: true,
            parallel: false,
            ..params()
        };
        let out =
            paths_to_level3(&source, Instrument::Generic, &["a".to_string()], &grid, &params).unwrap();
        let table = out.product.table_for("aod").unwrap();
        assert_eq!(table.len(), 3);
        let filled = table.rows.iter().filter(|r| r.cells[0].value.is_some()).count();
        assert_eq!(filled, 1);
    }

    #[test]
    fn test_strip_common_root() {
        let paths = vec![
            "/data/omi/2019/a.he5".to_string(),
            "/data/omi/2020/b.he5".to_string(),
        ];
        assert_eq!(
            strip_common_root(&paths),
            vec!["/data/omi", "2019/a.he5", "2020/b.he5"]
        );
    }
}

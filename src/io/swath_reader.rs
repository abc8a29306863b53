use crate::types::{Attributes, GridError, GridResult, PixelMask, SwathDataset, Variable};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Anything that can turn a path into a swath dataset.
///
/// Bounding-box restriction is applied afterwards by the instrument builder,
/// so sources only decode.
pub trait SwathSource: Sync {
    fn open(&self, path: &str) -> GridResult<SwathDataset>;
}

/// One variable as stored on disk; `null` marks a missing value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableRecord {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub values: Vec<Option<f64>>,
    #[serde(default)]
    pub attrs: Attributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRecord {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub values: Vec<bool>,
}

/// JSON exchange record for a Level-2 swath
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwathRecord {
    #[serde(default)]
    pub attrs: Attributes,
    pub variables: BTreeMap<String, VariableRecord>,
    /// Only needed for pre-built (generic) swaths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<MaskRecord>,
}

fn check_shape(name: &str, dims: &[String], shape: &[usize], len: usize) -> GridResult<()> {
    if dims.len() != shape.len() {
        return Err(GridError::InvalidFormat(format!(
            "{}: {} dimension names for shape {:?}",
            name,
            dims.len(),
            shape
        )));
    }
    let expected: usize = shape.iter().product();
    if expected != len {
        return Err(GridError::InvalidFormat(format!(
            "{}: shape {:?} needs {} values, found {}",
            name, shape, expected, len
        )));
    }
    Ok(())
}

impl SwathRecord {
    pub fn from_dataset(ds: &SwathDataset) -> Self {
        let variables = ds
            .variables
            .iter()
            .map(|(name, var)| {
                let record = VariableRecord {
                    dims: var.dims.clone(),
                    shape: var.data.shape().to_vec(),
                    values: var
                        .data
                        .iter()
                        .map(|v| if v.is_nan() { None } else { Some(*v) })
                        .collect(),
                    attrs: var.attrs.clone(),
                };
                (name.clone(), record)
            })
            .collect();
        let valid = ds.valid.as_ref().map(|m| MaskRecord {
            dims: m.dims.clone(),
            shape: m.shape().to_vec(),
            values: m.data.iter().copied().collect(),
        });
        Self {
            attrs: ds.attrs.clone(),
            variables,
            valid,
        }
    }

    /// Validate every shape and build the in-memory dataset
    pub fn into_dataset(self, path: &str) -> GridResult<SwathDataset> {
        let mut ds = SwathDataset::new(path);
        ds.attrs = self.attrs;
        for (name, record) in self.variables {
            check_shape(&name, &record.dims, &record.shape, record.values.len())?;
            let values: Vec<f64> = record
                .values
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            let data = ArrayD::from_shape_vec(IxDyn(&record.shape), values)
                .map_err(|e| GridError::InvalidFormat(format!("{}: {}", name, e)))?;
            let var = Variable::new(&record.dims, data)?.with_attrs(record.attrs);
            ds.insert(&name, var);
        }
        if let Some(mask) = self.valid {
            check_shape("valid", &mask.dims, &mask.shape, mask.values.len())?;
            let data = ArrayD::from_shape_vec(IxDyn(&mask.shape), mask.values)
                .map_err(|e| GridError::InvalidFormat(format!("valid: {}", e)))?;
            ds.valid = Some(PixelMask {
                dims: mask.dims,
                data,
            });
        }
        Ok(ds)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> GridResult<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Reads swaths stored as [`SwathRecord`] JSON documents
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSwathSource;

impl SwathSource for JsonSwathSource {
    fn open(&self, path: &str) -> GridResult<SwathDataset> {
        log::info!("Reading swath from: {}", path);
        let file = File::open(path)?;
        let record: SwathRecord = serde_json::from_reader(BufReader::new(file))?;
        log::debug!("{} variables in {}", record.variables.len(), path);
        record.into_dataset(path)
    }
}

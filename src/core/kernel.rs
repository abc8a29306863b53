use crate::core::level3::Level3Product;
use crate::core::vertical::coord_interp_profiles;
use crate::types::{GridError, GridResult};
use ndarray::{Array1, Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// Standard gravity, m/s2
pub const GRAVITY: f64 = 9.80665;
/// Molar mass of dry air, kg/mol
pub const AIR_MOLAR_MASS: f64 = 0.0289;
pub const AVOGADRO: f64 = 6.022e23;

/// Moles of air per m2 in each layer from `(cell, level)` edge pressures in Pa
pub fn air_moles_per_m2(level_pressure: ArrayView2<f64>) -> GridResult<Array2<f64>> {
    let (ncell, nlev) = level_pressure.dim();
    if nlev < 2 {
        return Err(GridError::DimensionMismatch(format!(
            "{} pressure levels cannot bound a layer",
            nlev
        )));
    }
    Ok(Array2::from_shape_fn((ncell, nlev - 1), |(i, k)| {
        (level_pressure[[i, k]] - level_pressure[[i, k + 1]]) / GRAVITY / AIR_MOLAR_MASS
    }))
}

/// Volume mixing ratio unit of a model gas field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixingRatio {
    Ppm,
    Ppb,
    Ppt,
}

impl MixingRatio {
    /// Parse from a units attribute, e.g. `"ppmV"` or `" ppb "`
    pub fn from_units(units: &str) -> GridResult<Self> {
        let units = units.trim();
        if units.starts_with("ppm") {
            Ok(MixingRatio::Ppm)
        } else if units.starts_with("ppb") {
            Ok(MixingRatio::Ppb)
        } else if units.starts_with("ppt") {
            Ok(MixingRatio::Ppt)
        } else {
            Err(GridError::InvalidFormat(format!("unsupported mixing ratio units {}", units)))
        }
    }

    pub fn scale(&self) -> f64 {
        match self {
            MixingRatio::Ppm => 1e6,
            MixingRatio::Ppb => 1e9,
            MixingRatio::Ppt => 1e12,
        }
    }
}

/// Trace gas the projection is defined for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Species {
    /// Partial columns in molecules/cm2
    No2,
    /// Partial columns in mol/m2, model field in ppm
    Hcho,
}

impl Species {
    /// Layer partial columns from a model mixing ratio field
    pub fn partial_column(
        &self,
        gas: ArrayView2<f64>,
        units: &str,
        air_moles: ArrayView2<f64>,
    ) -> GridResult<Array2<f64>> {
        if gas.dim() != air_moles.dim() {
            return Err(GridError::DimensionMismatch(format!(
                "gas {:?} and air {:?}",
                gas.dim(),
                air_moles.dim()
            )));
        }
        match self {
            Species::No2 => {
                let scale = MixingRatio::from_units(units)?.scale();
                Ok(Zip::from(&gas)
                    .and(&air_moles)
                    .map_collect(|&q, &n| n * (q / scale) * AVOGADRO / 1e4))
            }
            Species::Hcho => Ok(Zip::from(&gas).and(&air_moles).map_collect(|&q, &n| n * q / 1e6)),
        }
    }
}

/// Model fields on `(cell, layer)`, already matched to the overpass
#[derive(Debug, Clone)]
pub struct ModelProfiles {
    /// Layer pressure in Pa
    pub pressure: Array2<f64>,
    /// Gas partial column per layer
    pub partial_column: Array2<f64>,
}

/// Satellite Level-3 fields at the model cells
#[derive(Debug, Clone)]
pub struct SatelliteFields {
    /// Scattering weight pressure levels in hPa, `(cell, level)`
    pub pressure: Array2<f64>,
    pub scattering_weight: Array2<f64>,
    pub amf: Array1<f64>,
    pub column: Array1<f64>,
    /// Only layers below the tropopause (higher pressure) are kept when set
    pub tropopause: Option<Array1<f64>>,
}

/// Outputs of a kernel projection, per cell (and per layer where 2-D)
#[derive(Debug, Clone)]
pub struct KernelResult {
    pub scattering_weight: Array2<f64>,
    pub averaging_kernel: Array2<f64>,
    /// `sum(sw*q)/sum(q)` over layers with a defined weight
    pub model_amf: Array1<f64>,
    /// Model column over the layers the kernel covers, kernel of one
    pub model_column: Array1<f64>,
    /// Model column weighted by the satellite averaging kernel
    pub model_column_sat_kernel: Array1<f64>,
    /// Satellite column re-derived with the model air-mass factor
    pub satellite_column_model_amf: Array1<f64>,
}

/// Instrument-specific description of where kernel inputs live and how
/// they are adjusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelProjection {
    pub species: Species,
    pub column_key: &'static str,
    pub amf_key: &'static str,
    pub weight_key: &'static str,
    pub weight_pressure_key: &'static str,
    pub tropopause_key: Option<&'static str>,
    /// Replace the first weight level with the model surface layer pressure
    pub replace_surface_level: bool,
}

impl KernelProjection {
    /// Read the satellite inputs for `cells` out of a Level-3 product
    pub fn satellite_fields(
        &self,
        product: &Level3Product,
        cells: &[Vec<i64>],
    ) -> GridResult<SatelliteFields> {
        let pressure = product.profile_field(self.weight_pressure_key, cells)?;
        let scattering_weight = product.profile_field(self.weight_key, cells)?;
        let amf = Array1::from(product.scalar_field(self.amf_key, cells)?);
        let column = Array1::from(product.scalar_field(self.column_key, cells)?);
        let tropopause = match self.tropopause_key {
            Some(key) => Some(Array1::from(product.scalar_field(key, cells)?)),
            None => None,
        };
        Ok(SatelliteFields {
            pressure,
            scattering_weight,
            amf,
            column,
            tropopause,
        })
    }

    /// Scattering weights interpolated to model layer pressures (NaN where
    /// masked)
    pub fn scattering_weight(
        &self,
        model: &ModelProfiles,
        sat: &SatelliteFields,
    ) -> GridResult<Array2<f64>> {
        let model_hpa = model.pressure.mapv(|p| p / 100.0);
        let mut sat_pressure = sat.pressure.clone();
        if self.replace_surface_level && sat_pressure.ncols() > 0 && model_hpa.ncols() > 0 {
            sat_pressure
                .column_mut(0)
                .assign(&model_hpa.column(0));
        }
        let mut sw = coord_interp_profiles(
            model_hpa.view(),
            sat_pressure.view(),
            sat.scattering_weight.view(),
            false,
        )?;
        if let Some(trop) = &sat.tropopause {
            Zip::from(sw.rows_mut())
                .and(model_hpa.rows())
                .and(trop)
                .for_each(|mut row, p, &t| {
                    Zip::from(&mut row).and(&p).for_each(|w, &p| {
                        if t.is_nan() || t >= p {
                            *w = f64::NAN;
                        }
                    });
                });
        }
        Ok(sw)
    }

    /// Full projection for cells matched between `model` and `sat`
    pub fn project(&self, model: &ModelProfiles, sat: &SatelliteFields) -> GridResult<KernelResult> {
        if model.pressure.dim() != model.partial_column.dim()
            || model.pressure.nrows() != sat.amf.len()
        {
            return Err(GridError::DimensionMismatch(format!(
                "model {:?} / {:?} for {} satellite cells",
                model.pressure.dim(),
                model.partial_column.dim(),
                sat.amf.len()
            )));
        }
        let sw = self.scattering_weight(model, sat)?;
        let mut ak = sw.clone();
        Zip::from(ak.rows_mut())
            .and(&sat.amf)
            .for_each(|mut row, &amf| row.mapv_inplace(|w| w / amf));

        let q = &model.partial_column;
        let model_amf = model_amf(&sw, q);
        let kernel_one = ak.mapv(|a| a / a);
        let model_column = apply_kernel(q, &kernel_one);
        let model_column_sat_kernel = apply_kernel(q, &ak);
        let satellite_column_model_amf = Zip::from(&sat.column)
            .and(&sat.amf)
            .and(&model_amf)
            .map_collect(|&vcd, &amf_sat, &amf_model| vcd * amf_sat / amf_model);

        log::debug!(
            "Projected {:?} kernel onto {} cells x {} layers",
            self.species,
            sw.nrows(),
            sw.ncols()
        );
        Ok(KernelResult {
            scattering_weight: sw,
            averaging_kernel: ak,
            model_amf,
            model_column,
            model_column_sat_kernel,
            satellite_column_model_amf,
        })
    }
}

/// `sum(sw*q)/sum(q)` over layers where `sw` is defined; NaN when the
/// denominator is zero
pub fn model_amf(sw: &Array2<f64>, q: &Array2<f64>) -> Array1<f64> {
    Zip::from(sw.rows()).and(q.rows()).map_collect(|w, q| {
        let mut num = 0.0;
        let mut den = 0.0;
        for (&w, &q) in w.iter().zip(q) {
            if w.is_nan() || q.is_nan() {
                continue;
            }
            num += w * q;
            den += q;
        }
        if den != 0.0 {
            num / den
        } else {
            f64::NAN
        }
    })
}

/// `sum(q*ak)` over layers where both are defined; NaN when none are
pub fn apply_kernel(q: &Array2<f64>, ak: &Array2<f64>) -> Array1<f64> {
    Zip::from(q.rows()).and(ak.rows()).map_collect(|q, ak| {
        let terms: Vec<f64> = q
            .iter()
            .zip(ak)
            .map(|(&q, &a)| q * a)
            .filter(|v| !v.is_nan())
            .collect();
        if terms.is_empty() {
            f64::NAN
        } else {
            terms.iter().sum()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn no2_projection() -> KernelProjection {
        KernelProjection {
            species: Species::No2,
            column_key: "ColumnAmountNO2Trop",
            amf_key: "AmfTrop",
            weight_key: "ScatteringWeight",
            weight_pressure_key: "ScatteringWtPressure",
            tropopause_key: Some("TropopausePressure"),
            replace_surface_level: false,
        }
    }

    fn sat_fields(tropopause: Option<f64>) -> SatelliteFields {
        SatelliteFields {
            pressure: array![[1000.0, 500.0, 100.0]],
            scattering_weight: array![[0.5, 1.0, 2.0]],
            amf: array![2.0],
            column: array![4.0e15],
            tropopause: tropopause.map(|t| array![t]),
        }
    }

    #[test]
    fn test_air_moles() {
        let p = array![[101325.0, 90000.0, 80000.0]];
        let n = air_moles_per_m2(p.view()).unwrap();
        assert_eq!(n.dim(), (1, 2));
        assert_relative_eq!(n[[0, 0]], 11325.0 / GRAVITY / AIR_MOLAR_MASS, epsilon = 1e-9);
        assert!(air_moles_per_m2(array![[1.0]].view()).is_err());
    }

    #[test]
    fn test_no2_unit_conversion() {
        let gas = array![[1.0]];
        let air = array![[2.0]];
        let ppb = Species::No2.partial_column(gas.view(), "ppbV", air.view()).unwrap();
        assert_relative_eq!(ppb[[0, 0]], 2.0 * 1e-9 * AVOGADRO / 1e4, max_relative = 1e-12);
        let ppm = Species::No2.partial_column(gas.view(), "ppm", air.view()).unwrap();
        assert_relative_eq!(ppm[[0, 0]] / ppb[[0, 0]], 1e3, max_relative = 1e-12);
        assert!(Species::No2.partial_column(gas.view(), "kg", air.view()).is_err());
        let hcho = Species::Hcho.partial_column(gas.view(), "ppmV", air.view()).unwrap();
        assert_relative_eq!(hcho[[0, 0]], 2.0e-6);
    }

    #[test]
    fn test_tropopause_masks_upper_layers() {
        let model = ModelProfiles {
            pressure: array![[90000.0, 30000.0]],
            partial_column: array![[1.0, 1.0]],
        };
        let sw = no2_projection()
            .scattering_weight(&model, &sat_fields(Some(400.0)))
            .unwrap();
        // 900 hPa lies between 1000 (0.5) and 500 (1.0)
        assert_relative_eq!(sw[[0, 0]], 0.6, epsilon = 1e-12);
        assert!(sw[[0, 1]].is_nan());
    }

    #[test]
    fn test_projection_columns() {
        let model = ModelProfiles {
            pressure: array![[90000.0, 30000.0]],
            partial_column: array![[3.0e15, 1.0e15]],
        };
        let result = no2_projection()
            .project(&model, &sat_fields(Some(400.0)))
            .unwrap();
        // Only the lower layer is inside the troposphere
        assert_relative_eq!(result.model_amf[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(result.averaging_kernel[[0, 0]], 0.3, epsilon = 1e-12);
        assert_relative_eq!(result.model_column[0], 3.0e15, max_relative = 1e-12);
        assert_relative_eq!(result.model_column_sat_kernel[0], 0.9e15, max_relative = 1e-12);
        assert_relative_eq!(
            result.satellite_column_model_amf[0],
            4.0e15 * 2.0 / 0.6,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_surface_level_replacement() {
        let projection = KernelProjection {
            species: Species::Hcho,
            column_key: "ColumnAmount",
            amf_key: "AirMassFactor",
            weight_key: "ScatteringWeights",
            weight_pressure_key: "ClimatologyLevels",
            tropopause_key: None,
            replace_surface_level: true,
        };
        let model = ModelProfiles {
            pressure: array![[95000.0, 70000.0]],
            partial_column: array![[1.0, 1.0]],
        };
        let sw = projection.scattering_weight(&model, &sat_fields(None)).unwrap();
        // Surface node moved to 950 hPa keeps weight 0.5 there
        assert_relative_eq!(sw[[0, 0]], 0.5, epsilon = 1e-12);
        // 700 hPa between 950 (0.5) and 500 (1.0)
        assert_relative_eq!(sw[[0, 1]], 0.5 + 0.5 * 250.0 / 450.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_denominator_amf_is_nan() {
        let sw = array![[f64::NAN, f64::NAN]];
        let q = array![[1.0, 2.0]];
        assert!(model_amf(&sw, &q)[0].is_nan());
        assert!(apply_kernel(&q, &sw)[0].is_nan());
    }
}

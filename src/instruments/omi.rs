use super::{centre_mask, optional, required, subset_along_track, Role, VariableDescriptor};
use crate::core::geometry::{
    and_masks, as_2d, flag_clear, install_valid, mask_where, set_centers, set_corners_direct,
    set_corners_from_centers, set_corners_from_edges, CornerLayout,
};
use crate::core::kernel::{KernelProjection, Species, AIR_MOLAR_MASS, GRAVITY};
use crate::types::{BoundingBox, GridResult, SwathDataset, Variable};
use ndarray::{ArrayD, Zip};

pub const SWATH_DIMS: [&str; 2] = ["nTimes", "nXtrack"];
const EDGE_DIMS: [&str; 2] = ["nTimes_1", "nXtrack_1"];
const PIXEL: &[&str] = &["nTimes", "nXtrack"];
const EDGE: &[&str] = &["nTimes_1", "nXtrack_1"];

pub const OMNO2_DESCRIPTION: &str = "OMNO2 satellite processor.
* bbox subsets the nTimes and nTimes_1 dimensions
* valid based three conditions
  * (VcdQualityFlags & 1) == 0
  * XTrackQualityFlags == 0
  * CloudFraction <= 0.3
";

pub const OMHCHO_DESCRIPTION: &str = "OMHCHO satellite processor.
* bbox subsets the nTimes and nTimes_1 dimensions
* valid based three conditions
  * MainDataQualityFlag == 0
  * (XtrackQualityFlagsExpanded & 1) == 0
  * AMFCloudFraction <= 0.3
";

pub const OMO3PR_DESCRIPTION: &str = "OMO3PR satellite processor.
* bbox subsets the nTimes and nTimes_1 dimensions
* valid where O3 has any value over nLayers
* pixel corners are based on interpolated lat/lon
";

pub const OMPROFOZ_DESCRIPTION: &str = "OMPROFOZ satellite processor.
* bbox subsets the nTimes and nTimes_1 dimensions
* valid unless any of
  * ExitStatus <= 0 or ExitStatus >= 10
  * max RMS over nChannel > 3
  * max AverageResiduals over nChannel >= 3
  * EffectiveCloudFraction >= 0.3
";

pub const OMNO2_DEFAULTS: &[&str] = &[
    "ColumnAmountNO2Trop",
    "AmfTrop",
    "ScatteringWeight",
    "ScatteringWtPressure",
    "TropopausePressure",
    "TerrainPressure",
];

pub const OMHCHO_DEFAULTS: &[&str] = &[
    "ColumnAmount",
    "ReferenceSectorCorrectedVerticalColumn",
    "AirMassFactor",
    "ScatteringWeights",
    "ClimatologyLevels",
];

pub const OMO3PR_DEFAULTS: &[&str] = &["O3", "AveragingKernel", "O3APriori", "Pressure"];

pub const OMPROFOZ_DEFAULTS: &[&str] = &[
    "O3TotalColumn",
    "O3TroposphericColumn",
    "O3Retrieved500hPa",
    "AirMassFactor",
    "ScatteringWeights",
    "ClimatologyLevels",
];

pub const OMNO2_SCHEMA: &[VariableDescriptor] = &[
    required("Latitude", PIXEL, Role::Geolocation),
    required("Longitude", PIXEL, Role::Geolocation),
    required("FoV75CornerLatitude", &["nTimes", "nXtrack", "nCorners"], Role::Corner),
    required("FoV75CornerLongitude", &["nTimes", "nXtrack", "nCorners"], Role::Corner),
    required("VcdQualityFlags", PIXEL, Role::Quality),
    required("XTrackQualityFlags", PIXEL, Role::Quality),
    required("CloudFraction", PIXEL, Role::Quality),
    optional("ColumnAmountNO2Trop", PIXEL),
    optional("AmfTrop", PIXEL),
    optional("ScatteringWeight", &["nTimes", "nXtrack", "nPresLevels"]),
    optional("ScatteringWtPressure", &["nPresLevels"]),
    optional("TropopausePressure", PIXEL),
    optional("TerrainPressure", PIXEL),
];

pub const OMHCHO_SCHEMA: &[VariableDescriptor] = &[
    required("Latitude", PIXEL, Role::Geolocation),
    required("Longitude", PIXEL, Role::Geolocation),
    required("PixelCornerLatitudes", EDGE, Role::Corner),
    required("PixelCornerLongitudes", EDGE, Role::Corner),
    required("MainDataQualityFlag", PIXEL, Role::Quality),
    required("XtrackQualityFlagsExpanded", PIXEL, Role::Quality),
    required("AMFCloudFraction", PIXEL, Role::Quality),
    optional("ColumnAmount", PIXEL),
    optional("ReferenceSectorCorrectedVerticalColumn", PIXEL),
    optional("AirMassFactor", PIXEL),
    optional("ScatteringWeights", &["nTimes", "nXtrack", "nLevels"]),
    optional("ClimatologyLevels", &["nTimes", "nXtrack", "nLevels"]),
];

pub const OMO3PR_SCHEMA: &[VariableDescriptor] = &[
    required("Latitude", PIXEL, Role::Geolocation),
    required("Longitude", PIXEL, Role::Geolocation),
    required("O3", &["nTimes", "nXtrack", "nLayers"], Role::Quality),
    optional("O3APriori", &["nTimes", "nXtrack", "nLayers"]),
    optional("Pressure", &["nTimes", "nXtrack", "nLevels"]),
];

pub const OMPROFOZ_SCHEMA: &[VariableDescriptor] = &[
    required("Latitude", PIXEL, Role::Geolocation),
    required("Longitude", PIXEL, Role::Geolocation),
    required("LatitudePixelCorner", EDGE, Role::Corner),
    required("LongitudePixelCorner", EDGE, Role::Corner),
    required("ExitStatus", PIXEL, Role::Quality),
    required("RMS", &["nTimes", "nXtrack", "nChannel"], Role::Quality),
    required("AverageResiduals", &["nTimes", "nXtrack", "nChannel"], Role::Quality),
    required("EffectiveCloudFraction", PIXEL, Role::Quality),
    required("O3RetrievedProfile", &["nTimes", "nXtrack", "nLayer"], Role::Science),
    required("ProfileLevelPressure", &["nTimes", "nXtrack", "nLayer_1"], Role::Science),
    optional("O3TotalColumn", PIXEL),
    optional("O3TroposphericColumn", PIXEL),
];

pub const OMNO2_KERNEL: KernelProjection = KernelProjection {
    species: Species::No2,
    column_key: "ColumnAmountNO2Trop",
    amf_key: "AmfTrop",
    weight_key: "ScatteringWeight",
    weight_pressure_key: "ScatteringWtPressure",
    tropopause_key: Some("TropopausePressure"),
    replace_surface_level: false,
};

pub const OMHCHO_KERNEL: KernelProjection = KernelProjection {
    species: Species::Hcho,
    column_key: "ColumnAmount",
    amf_key: "AirMassFactor",
    weight_key: "ScatteringWeights",
    weight_pressure_key: "ClimatologyLevels",
    tropopause_key: None,
    replace_surface_level: true,
};

/// Literal replacements, applied in order
const SHORT_NAMES: &[(&str, &str)] = &[
    ("ReferenceSectorCorrectedVerticalColumn", "RefSctCor_VCD"),
    ("SlantColumnAmount", "SCD"),
    ("ColumnAmount", "VCD"),
    ("Pressure", "Press"),
    ("Scattering", "Scat"),
    ("Altitude", "Alt"),
    ("Spacecraft", "Craft"),
    ("Wavelength", "WvLen"),
    ("Registration", "Reg"),
    ("Viewing", "View"),
    ("Angle", "Ang"),
    ("Pixel", "Pix"),
    ("Measurement", "Msrmt"),
    ("Radiance", "Rad"),
    ("Latitude", "Lat"),
    ("Longitude", "Lon"),
    ("Check", "Chk"),
    ("Fraction", "Frac"),
    ("Configuration", "Cfg"),
    ("Pointer", "Ptr"),
    ("CloudRadianceFraction", "CldRadFrac"),
    ("QualityFlags", "QAFlag"),
    ("TerrainReflectivity", "TerrainRefl"),
    ("ClimatologyLevels", "ClimPresLevels"),
];

pub fn shorten_name(key: &str) -> String {
    SHORT_NAMES
        .iter()
        .fold(key.to_string(), |name, (long, short)| name.replace(long, short))
}

/// OMPROFOZ layer nearest 500 hPa
const LAYER_500HPA: usize = 22;

/// Along-track subset, centre copies; shared by every OMI builder
fn prepare(ds: &mut SwathDataset, bbox: Option<&BoundingBox>) -> GridResult<()> {
    if let Some(bbox) = bbox {
        subset_along_track(ds, "Longitude", "Latitude", "nTimes", Some("nTimes_1"), bbox)?;
    }
    set_centers(ds, "Longitude", "Latitude")
}

fn finish(
    ds: &mut SwathDataset,
    mut masks: Vec<ArrayD<bool>>,
    bbox: Option<&BoundingBox>,
    relaxed: bool,
) -> GridResult<usize> {
    if let Some(bbox) = bbox {
        masks.push(centre_mask(ds, "Longitude", "Latitude", SWATH_DIMS, bbox)?);
    }
    let valid = and_masks(masks)?;
    install_valid(ds, &SWATH_DIMS, valid, relaxed)
}

fn corners_from_edge_arrays(ds: &mut SwathDataset, lon_key: &str, lat_key: &str) -> GridResult<()> {
    let lon = as_2d(ds.get(lon_key)?, EDGE_DIMS)?;
    let lat = as_2d(ds.get(lat_key)?, EDGE_DIMS)?;
    set_corners_from_edges(ds, lon.view(), lat.view(), CornerLayout::AlongTrackUpper, SWATH_DIMS)
}

pub(crate) fn build_omno2(ds: &mut SwathDataset, bbox: Option<&BoundingBox>) -> GridResult<usize> {
    prepare(ds, bbox)?;
    set_corners_direct(ds, "FoV75CornerLongitude", "FoV75CornerLatitude", "nCorners", [0, 3, 1, 2])?;
    let masks = vec![
        mask_where(ds.get("VcdQualityFlags")?, SWATH_DIMS, |v| flag_clear(v, 1))?,
        mask_where(ds.get("XTrackQualityFlags")?, SWATH_DIMS, |v| v == 0.0)?,
        mask_where(ds.get("CloudFraction")?, SWATH_DIMS, |v| v <= 0.3)?,
    ];
    finish(ds, masks, bbox, true)
}

pub(crate) fn build_omhcho(ds: &mut SwathDataset, bbox: Option<&BoundingBox>) -> GridResult<usize> {
    prepare(ds, bbox)?;
    let masks = vec![
        mask_where(ds.get("MainDataQualityFlag")?, SWATH_DIMS, |v| v == 0.0)?,
        mask_where(ds.get("XtrackQualityFlagsExpanded")?, SWATH_DIMS, |v| flag_clear(v, 1))?,
        mask_where(ds.get("AMFCloudFraction")?, SWATH_DIMS, |v| v <= 0.3)?,
    ];
    corners_from_edge_arrays(ds, "PixelCornerLongitudes", "PixelCornerLatitudes")?;
    finish(ds, masks, bbox, false)
}

pub(crate) fn build_omo3pr(ds: &mut SwathDataset, bbox: Option<&BoundingBox>) -> GridResult<usize> {
    prepare(ds, bbox)?;
    let any_o3 = ds.get("O3")?.max_over("nLayers")?;
    let masks = vec![mask_where(&any_o3, SWATH_DIMS, |v| !v.is_nan())?];
    set_corners_from_centers(ds, "Longitude", "Latitude", CornerLayout::AlongTrackUpper, SWATH_DIMS)?;
    finish(ds, masks, bbox, false)
}

pub(crate) fn build_omprofoz(ds: &mut SwathDataset, bbox: Option<&BoundingBox>) -> GridResult<usize> {
    prepare(ds, bbox)?;
    // Undefined statistics do not reject a pixel
    let masks = vec![
        mask_where(ds.get("ExitStatus")?, SWATH_DIMS, |v| !(v <= 0.0 || v >= 10.0))?,
        mask_where(&ds.get("RMS")?.max_over("nChannel")?, SWATH_DIMS, |v| {
            v <= 3.0 || v.is_nan()
        })?,
        mask_where(&ds.get("AverageResiduals")?.max_over("nChannel")?, SWATH_DIMS, |v| {
            v < 3.0 || v.is_nan()
        })?,
        mask_where(ds.get("EffectiveCloudFraction")?, SWATH_DIMS, |v| {
            v < 0.3 || v.is_nan()
        })?,
    ];
    corners_from_edge_arrays(ds, "LongitudePixelCorner", "LatitudePixelCorner")?;
    add_500hpa_ozone(ds)?;
    finish(ds, masks, bbox, false)
}

/// `O3Retrieved500hPa` (DU) and its mixing ratio `O3Retrieved500hPa_ppm`
fn add_500hpa_ozone(ds: &mut SwathDataset) -> GridResult<()> {
    let o3 = ds.get("O3RetrievedProfile")?.select("nLayer", LAYER_500HPA)?;
    let levels = ds.get("ProfileLevelPressure")?;
    let bottom = as_2d(&levels.select("nLayer_1", LAYER_500HPA)?, SWATH_DIMS)?;
    let top = as_2d(&levels.select("nLayer_1", LAYER_500HPA + 1)?, SWATH_DIMS)?;
    let o3_du = as_2d(&o3, SWATH_DIMS)?;

    let ppm = Zip::from(&o3_du)
        .and(&bottom)
        .and(&top)
        .map_collect(|&du, &p0, &p1| {
            let o3_moles = du * 1e-5 * 101325.0 / 273.15 / 8.314;
            let air_moles = (p1 - p0) / GRAVITY / AIR_MOLAR_MASS * 100.0;
            o3_moles / air_moles * 1e6
        });

    let mut attrs = o3.attrs.clone();
    attrs.insert("units".to_string(), "ppm".to_string());
    let o3_500 = Variable::new(&SWATH_DIMS, o3_du.into_dyn())?.with_attrs(o3.attrs.clone());
    ds.insert("O3Retrieved500hPa", o3_500);
    ds.insert(
        "O3Retrieved500hPa_ppm",
        Variable::new(&SWATH_DIMS, ppm.into_dyn())?.with_attrs(attrs),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::Instrument;
    use crate::types::{GridError, CORNER_KEYS};
    use approx::assert_relative_eq;
    use ndarray::{Array, Array2, Array3};

    fn var2(data: Array2<f64>) -> Variable {
        Variable::new(&SWATH_DIMS, data.into_dyn()).unwrap()
    }

    /// 3 scans x 2 cross-track pixels on a 1-degree lattice
    fn omi_base() -> SwathDataset {
        let mut ds = SwathDataset::new("omi.he5");
        ds.insert("Longitude", var2(Array::from_shape_fn((3, 2), |(_, x)| x as f64)));
        ds.insert("Latitude", var2(Array::from_shape_fn((3, 2), |(t, _)| t as f64)));
        ds
    }

    fn omno2() -> SwathDataset {
        let mut ds = omi_base();
        let corner = |axis: usize| {
            Array3::from_shape_fn((3, 2, 4), move |(t, x, c)| {
                // Corner order in the product: ll, ul, uu, lu
                let (dt, dx) = [(-0.5, -0.5), (-0.5, 0.5), (0.5, 0.5), (0.5, -0.5)][c];
                if axis == 0 {
                    x as f64 + dx
                } else {
                    t as f64 + dt
                }
            })
        };
        let dims = ["nTimes", "nXtrack", "nCorners"];
        ds.insert("FoV75CornerLongitude", Variable::new(&dims, corner(0).into_dyn()).unwrap());
        ds.insert("FoV75CornerLatitude", Variable::new(&dims, corner(1).into_dyn()).unwrap());
        ds.insert("VcdQualityFlags", var2(ndarray::array![[0.0, 1.0], [2.0, 0.0], [0.0, 0.0]]));
        ds.insert("XTrackQualityFlags", var2(Array2::zeros((3, 2))));
        ds.insert("CloudFraction", var2(ndarray::array![[0.1, 0.1], [0.1, 0.5], [0.3, 0.0]]));
        ds.insert("ColumnAmountNO2Trop", var2(Array2::from_elem((3, 2), 1e15)));
        ds
    }

    #[test]
    fn test_omno2_validity_and_corners() {
        let mut ds = omno2();
        let count = Instrument::OmNo2.build_validity_and_geometry(&mut ds, None, 2.0).unwrap();
        // [0,1] fails the VCD flag, [1,1] the cloud fraction
        assert_eq!(count, 4);
        let valid = ds.valid.as_ref().unwrap();
        assert!(!valid.data[[0, 1]]);
        assert!(valid.data[[1, 0]]);
        assert!(!valid.data[[1, 1]]);
        // lu is product corner 3: (t + 0.5, x - 0.5)
        assert_relative_eq!(ds.get("lu_x").unwrap().data[[1, 1]], 0.5);
        assert_relative_eq!(ds.get("lu_y").unwrap().data[[1, 1]], 1.5);
        assert!(ds.contains("cn_x"));
    }

    #[test]
    fn test_omno2_zero_valid_only_warns() {
        let mut ds = omno2();
        ds.insert("CloudFraction", var2(Array2::from_elem((3, 2), 0.9)));
        let count = Instrument::OmNo2.build_validity_and_geometry(&mut ds, None, 2.0).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_bbox_subsets_scans() {
        let mut ds = omno2();
        let bbox = BoundingBox::from_corners(-0.5, 0.5, 0.5, 1.5);
        let count = Instrument::OmNo2
            .build_validity_and_geometry(&mut ds, Some(&bbox), 2.0)
            .unwrap();
        assert_eq!(ds.valid.as_ref().unwrap().shape(), &[1, 2]);
        // Only the x = 0 centre of scan 1 is inside the box
        assert_eq!(count, 1);

        let mut ds = omno2();
        let far = BoundingBox::from_corners(40.0, 40.0, 41.0, 41.0);
        let result = Instrument::OmNo2.build_validity_and_geometry(&mut ds, Some(&far), 2.0);
        assert!(matches!(result, Err(GridError::NoValidPixels(_))));
    }

    #[test]
    fn test_omhcho_edge_arrays() {
        let mut ds = omi_base();
        let edges_x = Array::from_shape_fn((4, 3), |(_, x)| x as f64 - 0.5);
        let edges_y = Array::from_shape_fn((4, 3), |(t, _)| t as f64 - 0.5);
        ds.insert("PixelCornerLongitudes", Variable::new(&EDGE_DIMS, edges_x.into_dyn()).unwrap());
        ds.insert("PixelCornerLatitudes", Variable::new(&EDGE_DIMS, edges_y.into_dyn()).unwrap());
        ds.insert("MainDataQualityFlag", var2(Array2::zeros((3, 2))));
        ds.insert("XtrackQualityFlagsExpanded", var2(ndarray::array![[0.0, 0.0], [3.0, 0.0], [2.0, 0.0]]));
        ds.insert("AMFCloudFraction", var2(Array2::from_elem((3, 2), 0.2)));
        let count = Instrument::OmHcho.build_validity_and_geometry(&mut ds, None, 2.0).unwrap();
        assert_eq!(count, 5);
        // ul is the next cross-track node of the same scan edge
        assert_relative_eq!(ds.get("ul_x").unwrap().data[[0, 0]], 0.5);
        assert_relative_eq!(ds.get("ul_y").unwrap().data[[0, 0]], -0.5);
        assert_relative_eq!(ds.get("lu_y").unwrap().data[[0, 0]], 0.5);
    }

    #[test]
    fn test_omo3pr_all_false_validity_fails() {
        let mut ds = omi_base();
        let o3 = Array3::from_elem((3, 2, 4), f64::NAN);
        ds.insert("O3", Variable::new(&["nTimes", "nXtrack", "nLayers"], o3.into_dyn()).unwrap());
        let result = Instrument::OmO3pr.build_validity_and_geometry(&mut ds, None, 2.0);
        assert!(matches!(result, Err(GridError::NoValidPixels(_))));
    }

    #[test]
    fn test_omo3pr_interpolated_corners() {
        let mut ds = omi_base();
        let mut o3 = Array3::from_elem((3, 2, 4), f64::NAN);
        o3[[1, 1, 2]] = 10.0;
        ds.insert("O3", Variable::new(&["nTimes", "nXtrack", "nLayers"], o3.into_dyn()).unwrap());
        let count = Instrument::OmO3pr.build_validity_and_geometry(&mut ds, None, 2.0).unwrap();
        assert_eq!(count, 1);
        for (kx, ky) in CORNER_KEYS {
            assert_eq!(ds.get(kx).unwrap().data.shape(), &[3, 2]);
            assert_eq!(ds.get(ky).unwrap().data.shape(), &[3, 2]);
        }
        // Interior pixel corners sit half way between centres
        assert_relative_eq!(ds.get("ll_x").unwrap().data[[1, 1]], 0.5);
        assert_relative_eq!(ds.get("ll_y").unwrap().data[[1, 1]], 0.5);
        assert_relative_eq!(ds.get("uu_y").unwrap().data[[1, 1]], 1.5);
    }

    #[test]
    fn test_omprofoz_validity_and_ppm() {
        let mut ds = omi_base();
        let edges_x = Array::from_shape_fn((4, 3), |(_, x)| x as f64 - 0.5);
        let edges_y = Array::from_shape_fn((4, 3), |(t, _)| t as f64 - 0.5);
        ds.insert("LongitudePixelCorner", Variable::new(&EDGE_DIMS, edges_x.into_dyn()).unwrap());
        ds.insert("LatitudePixelCorner", Variable::new(&EDGE_DIMS, edges_y.into_dyn()).unwrap());
        ds.insert("ExitStatus", var2(ndarray::array![[1.0, 0.0], [1.0, 10.0], [9.0, 1.0]]));
        let chan = ["nTimes", "nXtrack", "nChannel"];
        let mut rms = Array3::from_elem((3, 2, 2), 1.0);
        rms[[2, 0, 1]] = 3.5;
        ds.insert("RMS", Variable::new(&chan, rms.into_dyn()).unwrap());
        ds.insert("AverageResiduals", Variable::new(&chan, Array3::from_elem((3, 2, 2), f64::NAN).into_dyn()).unwrap());
        ds.insert("EffectiveCloudFraction", var2(Array2::from_elem((3, 2), 0.1)));
        let profile = Array3::from_shape_fn((3, 2, 24), |(_, _, k)| k as f64);
        ds.insert(
            "O3RetrievedProfile",
            Variable::new(&["nTimes", "nXtrack", "nLayer"], profile.into_dyn()).unwrap(),
        );
        let pressure = Array3::from_shape_fn((3, 2, 25), |(_, _, k)| 1000.0 - 10.0 * k as f64);
        ds.insert(
            "ProfileLevelPressure",
            Variable::new(&["nTimes", "nXtrack", "nLayer_1"], pressure.into_dyn()).unwrap(),
        );

        let count = Instrument::OmProfoz.build_validity_and_geometry(&mut ds, None, 2.0).unwrap();
        // Exit status rejects [0,1] and [1,1]; RMS rejects [2,0]
        assert_eq!(count, 3);
        let o3 = ds.get("O3Retrieved500hPa").unwrap();
        assert_relative_eq!(o3.data[[0, 0]], 22.0);
        let ppm = ds.get("O3Retrieved500hPa_ppm").unwrap();
        assert_eq!(ppm.attrs["units"], "ppm");
        let o3_moles = 22.0 * 1e-5 * 101325.0 / 273.15 / 8.314;
        let air_moles = -10.0 / GRAVITY / AIR_MOLAR_MASS * 100.0;
        assert_relative_eq!(ppm.data[[0, 0]], o3_moles / air_moles * 1e6, max_relative = 1e-12);
    }

    #[test]
    fn test_shorten_name_order() {
        assert_eq!(shorten_name("ReferenceSectorCorrectedVerticalColumn"), "RefSctCor_VCD");
        assert_eq!(shorten_name("SlantColumnAmountNO2"), "SCDNO2");
        assert_eq!(shorten_name("ScatteringWtPressure"), "ScatWtPress");
        // Radiance and Fraction are replaced before the combined entry is reached
        assert_eq!(shorten_name("CloudRadianceFraction"), "CloudRadFrac");
        assert_eq!(shorten_name("ClimatologyLevels"), "ClimPresLevels");
    }
}

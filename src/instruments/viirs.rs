use super::{optional, required, subset_along_track, Role, VariableDescriptor};
use crate::core::geometry::{
    and_masks, install_valid, mask_where, set_corners_from_centers, CornerLayout,
};
use crate::types::{BoundingBox, GridResult, SwathDataset};
use ndarray::Zip;

pub const AERDT_DIMS: [&str; 2] = ["number_of_lines_8x8", "number_of_pixels_8x8"];
pub const AERDB_DIMS: [&str; 2] = ["Idx_Atrack", "Idx_Xtrack"];
const DT: &[&str] = &["number_of_lines_8x8", "number_of_pixels_8x8"];
const DB: &[&str] = &["Idx_Atrack", "Idx_Xtrack"];

pub const AERDT_DESCRIPTION: &str = "AERDT_L2_VIIRS_SNPP
* valid = Land_Ocean_Quality_Flag >= isvalid (default 2)
* pixel corners are based on interpolated lat/lon
";

pub const AERDB_DESCRIPTION: &str = "AERDB_L2_VIIRS_SNPP
* valid = either QA flag >= isvalid (default 2) and
  Aerosol_Optical_Thickness_550_Land_Ocean_Best_Estimate is defined
* pixel corners are based on interpolated lat/lon
";

pub const AERDT_DEFAULTS: &[&str] = &["Optical_Depth_Land_And_Ocean", "Land_Ocean_Quality_Flag"];

pub const AERDB_DEFAULTS: &[&str] = &[
    "Aerosol_Optical_Thickness_550_Land_Ocean_Best_Estimate",
    "Aerosol_Optical_Thickness_550_Ocean_Best_Estimate",
    "Aerosol_Optical_Thickness_550_Land_Best_Estimate",
    "Aerosol_Optical_Thickness_QA_Flag_Ocean",
    "Aerosol_Optical_Thickness_QA_Flag_Land",
];

pub const AERDT_SCHEMA: &[VariableDescriptor] = &[
    required("latitude", DT, Role::Geolocation),
    required("longitude", DT, Role::Geolocation),
    required("Land_Ocean_Quality_Flag", DT, Role::Quality),
    required("Optical_Depth_Land_And_Ocean", DT, Role::Quality),
];

pub const AERDB_SCHEMA: &[VariableDescriptor] = &[
    required("Latitude", DB, Role::Geolocation),
    required("Longitude", DB, Role::Geolocation),
    required("Aerosol_Optical_Thickness_QA_Flag_Land", DB, Role::Quality),
    required("Aerosol_Optical_Thickness_QA_Flag_Ocean", DB, Role::Quality),
    required("Aerosol_Optical_Thickness_550_Land_Ocean_Best_Estimate", DB, Role::Quality),
    optional("Aerosol_Optical_Thickness_550_Ocean_Best_Estimate", DB),
    optional("Aerosol_Optical_Thickness_550_Land_Best_Estimate", DB),
];

fn build(
    ds: &mut SwathDataset,
    bbox: Option<&BoundingBox>,
    dims: [&str; 2],
    lon_key: &str,
    lat_key: &str,
    validity: impl FnOnce(&SwathDataset) -> GridResult<ndarray::ArrayD<bool>>,
) -> GridResult<usize> {
    // The box only trims scan lines; pixels outside it on kept lines stay valid
    if let Some(bbox) = bbox {
        subset_along_track(ds, lon_key, lat_key, dims[0], None, bbox)?;
    }
    set_corners_from_centers(ds, lon_key, lat_key, CornerLayout::CrossTrackUpper, dims)?;
    let valid = validity(ds)?;
    install_valid(ds, &dims, valid, false)
}

pub(crate) fn build_aerdt(
    ds: &mut SwathDataset,
    bbox: Option<&BoundingBox>,
    isvalid: f64,
) -> GridResult<usize> {
    build(ds, bbox, AERDT_DIMS, "longitude", "latitude", |ds| {
        and_masks(vec![
            mask_where(ds.get("Land_Ocean_Quality_Flag")?, AERDT_DIMS, |q| q >= isvalid)?,
            mask_where(ds.get("Optical_Depth_Land_And_Ocean")?, AERDT_DIMS, |v| !v.is_nan())?,
        ])
    })
}

pub(crate) fn build_aerdb(
    ds: &mut SwathDataset,
    bbox: Option<&BoundingBox>,
    isvalid: f64,
) -> GridResult<usize> {
    build(ds, bbox, AERDB_DIMS, "Longitude", "Latitude", |ds| {
        let land = mask_where(ds.get("Aerosol_Optical_Thickness_QA_Flag_Land")?, AERDB_DIMS, |q| {
            q >= isvalid
        })?;
        let ocean = mask_where(ds.get("Aerosol_Optical_Thickness_QA_Flag_Ocean")?, AERDB_DIMS, |q| {
            q >= isvalid
        })?;
        let either = Zip::from(&land).and(&ocean).map_collect(|&l, &o| l || o);
        let best = mask_where(
            ds.get("Aerosol_Optical_Thickness_550_Land_Ocean_Best_Estimate")?,
            AERDB_DIMS,
            |v| !v.is_nan(),
        )?;
        and_masks(vec![either, best])
    })
}

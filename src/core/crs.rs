use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Spherical earth radius used by CMAQ/IOAPI Lambert grids (metres)
pub const IOAPI_EARTH_RADIUS: f64 = 6_370_000.0;

/// Coordinate reference of a destination grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordinateReference {
    /// Longitude/latitude in decimal degrees (EPSG:4326)
    Geographic,
    /// Lambert Conformal Conic on a sphere, coordinates in metres
    LambertConformal(LambertConformal),
}

impl CoordinateReference {
    /// EPSG code or proj-style definition string
    pub fn identifier(&self) -> String {
        match self {
            CoordinateReference::Geographic => "EPSG:4326".to_string(),
            CoordinateReference::LambertConformal(lcc) => lcc.proj_string(),
        }
    }

    /// Project a longitude/latitude pair into this reference
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            CoordinateReference::Geographic => (lon, lat),
            CoordinateReference::LambertConformal(lcc) => lcc.forward(lon, lat),
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, CoordinateReference::Geographic)
    }
}

/// Lambert Conformal Conic projection parameters.
///
/// Angles are stored in radians. The projection origin is `(lon0, lat0)`,
/// which maps to `(0, 0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambertConformal {
    /// First standard parallel
    pub lat1: f64,
    /// Second standard parallel
    pub lat2: f64,
    /// Latitude of origin
    pub lat0: f64,
    /// Central meridian
    pub lon0: f64,
    /// Sphere radius in metres
    pub earth_radius: f64,
    n: f64,
    f: f64,
    rho0: f64,
}

impl LambertConformal {
    /// Build from degrees, in IOAPI order (`P_ALP`, `P_BET`, `P_GAM`, `YCENT`)
    pub fn new(
        lat1_deg: f64,
        lat2_deg: f64,
        lon0_deg: f64,
        lat0_deg: f64,
        earth_radius: f64,
    ) -> Self {
        let to_rad = PI / 180.0;
        let lat1 = lat1_deg * to_rad;
        let lat2 = lat2_deg * to_rad;
        let lat0 = lat0_deg * to_rad;
        let lon0 = lon0_deg * to_rad;

        let n = if (lat1 - lat2).abs() < 1e-10 {
            // Tangent cone
            lat1.sin()
        } else {
            let ln_ratio = (lat1.cos() / lat2.cos()).ln();
            let tan_ratio =
                ((PI / 4.0 + lat2 / 2.0).tan() / (PI / 4.0 + lat1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };
        let f = (lat1.cos() * (PI / 4.0 + lat1 / 2.0).tan().powf(n)) / n;
        let rho0 = earth_radius * f / (PI / 4.0 + lat0 / 2.0).tan().powf(n);

        Self {
            lat1,
            lat2,
            lat0,
            lon0,
            earth_radius,
            n,
            f,
            rho0,
        }
    }

    /// The standard CMAQ 12US1/12US2 continental projection
    pub fn cmaq_conus() -> Self {
        Self::new(33.0, 45.0, -97.0, 40.0, IOAPI_EARTH_RADIUS)
    }

    pub fn proj_string(&self) -> String {
        let to_deg = 180.0 / PI;
        format!(
            "+proj=lcc +lat_1={} +lat_2={} +lat_0={} +lon_0={} +R={} +units=m +no_defs",
            self.lat1 * to_deg,
            self.lat2 * to_deg,
            self.lat0 * to_deg,
            self.lon0 * to_deg,
            self.earth_radius
        )
    }

    fn rho(&self, lat: f64) -> f64 {
        self.earth_radius * self.f / (PI / 4.0 + lat / 2.0).tan().powf(self.n)
    }

    /// Longitude/latitude (degrees) to projected metres
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let to_rad = PI / 180.0;
        let lat = lat_deg * to_rad;
        let mut dlon = lon_deg * to_rad - self.lon0;
        while dlon > PI {
            dlon -= 2.0 * PI;
        }
        while dlon < -PI {
            dlon += 2.0 * PI;
        }
        let rho = self.rho(lat);
        let theta = self.n * dlon;
        (rho * theta.sin(), self.rho0 - rho * theta.cos())
    }

    /// Projected metres to longitude/latitude (degrees)
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let to_deg = 180.0 / PI;
        let dy = self.rho0 - y;
        let rho = self.n.signum() * (x * x + dy * dy).sqrt();
        let theta = if self.n > 0.0 {
            x.atan2(dy)
        } else {
            (-x).atan2(-dy)
        };
        let lat = 2.0 * (self.earth_radius * self.f / rho).powf(1.0 / self.n).atan() - PI / 2.0;
        let lon = self.lon0 + theta / self.n;
        (lon * to_deg, lat * to_deg)
    }
}

//! # Coordinate Projection
//!
//! Transforms between geographic WGS84 coordinates (EPSG:4326, degrees) and
//! spherical Web Mercator (EPSG:3857, meters).
//!
//! Every length, area and buffer in this crate is computed in Web Mercator
//! meters, so tracks and street networks are projected before any metric
//! computation. Web Mercator inflates distances by `1 / cos(latitude)`. All
//! thresholds are calibrated in projected meters, so comparisons between a
//! track and a street at the same place stay consistent.
//!
//! Geometries use `geo`'s convention of `x = longitude`, `y = latitude`.
//!
//! ```rust
//! use street_coverage::projection::{project, Crs};
//! use geo::{coord, LineString};
//!
//! let line = LineString::from(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 0.0 }]);
//! let metric = project(&line, Crs::Wgs84, Crs::WebMercator);
//! assert!((metric.0[1].x - 111_319.49).abs() < 0.01);
//! ```

use std::fmt;

use geo::{Coord, MapCoords};
use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, Result};

/// Earth radius used by spherical Web Mercator.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator square.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_78;

/// Coordinate reference systems understood by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// Geographic WGS84, degrees (EPSG:4326). Default CRS of GPS data.
    Wgs84,
    /// Spherical Web Mercator, meters (EPSG:3857). The metric CRS.
    WebMercator,
}

impl Crs {
    /// CRS assumed for data that arrives without one.
    pub const DEFAULT: Crs = Crs::Wgs84;
    /// CRS used for all length, area and buffer computations.
    pub const METRIC: Crs = Crs::WebMercator;

    /// EPSG code of this CRS.
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
        }
    }

    /// Look up a CRS by EPSG code.
    pub fn from_epsg(code: u32) -> Result<Self> {
        match code {
            4326 => Ok(Crs::Wgs84),
            3857 | 900913 => Ok(Crs::WebMercator),
            other => Err(CoverageError::UnsupportedCrs { epsg: other }),
        }
    }

    /// Check that a coordinate is plausible for this CRS.
    pub fn accepts(&self, coord: Coord<f64>) -> bool {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return false;
        }
        match self {
            Crs::Wgs84 => coord.x.abs() <= 180.0 && coord.y.abs() <= 90.0,
            Crs::WebMercator => {
                let limit = EARTH_RADIUS * std::f64::consts::PI * 1.000_001;
                coord.x.abs() <= limit && coord.y.abs() <= limit
            }
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Project a WGS84 coordinate (degrees) to Web Mercator (meters).
///
/// Latitudes beyond the Mercator limit are clamped.
pub fn to_web_mercator(coord: Coord<f64>) -> Coord<f64> {
    let lat = coord.y.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    let x = EARTH_RADIUS * coord.x.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    Coord { x, y }
}

/// Project a Web Mercator coordinate (meters) back to WGS84 (degrees).
pub fn from_web_mercator(coord: Coord<f64>) -> Coord<f64> {
    let lon = (coord.x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (coord.y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    Coord { x: lon, y: lat }
}

/// Transform a single coordinate between two CRSs.
pub fn project_coord(coord: Coord<f64>, from: Crs, to: Crs) -> Coord<f64> {
    match (from, to) {
        (Crs::Wgs84, Crs::WebMercator) => to_web_mercator(coord),
        (Crs::WebMercator, Crs::Wgs84) => from_web_mercator(coord),
        _ => coord,
    }
}

/// Transform any `geo` geometry between two CRSs.
pub fn project<G>(geometry: &G, from: Crs, to: Crs) -> G
where
    G: MapCoords<f64, f64, Output = G> + Clone,
{
    if from == to {
        return geometry.clone();
    }
    geometry.map_coords(move |c| project_coord(c, from, to))
}

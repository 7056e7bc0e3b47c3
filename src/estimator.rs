//! # City Parameter Estimation
//!
//! Derives [`CityParameters`] from the shape of a city's street network.
//!
//! ## Characteristics
//!
//! | Measure | Definition |
//! |---------|------------|
//! | Street density | Total street length / convex hull area (m/m²) |
//! | Grid score | Share of edge bearings near 0°, 45°, 90° or 135° |
//! | Intersection complexity | Share of nodes with more than 4 incident streets |
//!
//! ## Thresholds
//!
//! | Characteristic | Parameter |
//! |----------------|-----------|
//! | density > 0.005 / 0.002 / 0.001 / otherwise | buffer 3 / 5 / 8 / 12 m |
//! | grid score > 0.4 | speeds 0.2..3.5 m/s, otherwise 0.1..3.0 m/s |
//! | complexity > 0.3 | max sinuosity 5.0, otherwise 3.5 |
//!
//! Estimation never fails: when the network cannot be fetched or analyzed,
//! [`CityParameters::fallback`] is returned and a warning is logged.

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, Result};
use crate::geometry::convex_hull_area;
use crate::network::StreetNetwork;
use crate::params::{legacy_parameters, normalize_city_name, CityParameters, ParameterStore};
use crate::projection::Crs;
use crate::Bounds;

/// Grid score above which a city counts as a grid.
pub const GRID_SCORE_THRESHOLD: f64 = 0.4;

/// Incident-street count above which a node is complex.
pub const COMPLEX_NODE_DEGREE: u32 = 4;

/// Bearing bins that indicate grid-like or diagonal streets (10° bins over 0..180°).
const GRID_BINS: [usize; 8] = [0, 17, 4, 5, 8, 9, 13, 14];

/// Measured properties of a street network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityCharacteristics {
    /// Street length per unit hull area (m/m²)
    pub street_density: f64,
    /// Total street length (m)
    pub total_street_length: f64,
    /// Convex hull area (m²)
    pub area: f64,
    pub grid_score: f64,
    pub is_grid: bool,
    pub intersection_complexity: f64,
    /// Number of distinct nodes
    pub total_intersections: usize,
}

/// Street density of a metric network: `(density, total length, hull area)`.
pub fn street_density(network: &StreetNetwork) -> (f64, f64, f64) {
    let total = network.total_length();
    let area = convex_hull_area(network.segments().iter().map(|s| &s.geometry));
    let density = if area > 0.0 { total / area } else { 0.0 };
    (density, total, area)
}

/// Fraction of edge bearings falling into grid or diagonal bins.
///
/// Each consecutive coordinate pair contributes one bearing, folded into
/// `[0, 180)` degrees. Zero-length pairs are ignored.
pub fn grid_score(network: &StreetNetwork) -> f64 {
    let mut histogram = [0usize; 18];
    let mut samples = 0usize;
    for segment in network.segments() {
        for w in segment.geometry.0.windows(2) {
            let (dx, dy) = (w[1].x - w[0].x, w[1].y - w[0].y);
            if dx == 0.0 && dy == 0.0 {
                continue;
            }
            let bearing = dy.atan2(dx).to_degrees().rem_euclid(180.0);
            let bin = ((bearing / 10.0) as usize).min(17);
            histogram[bin] += 1;
            samples += 1;
        }
    }
    if samples == 0 {
        return 0.0;
    }
    let grid: usize = GRID_BINS.iter().map(|&b| histogram[b]).sum();
    grid as f64 / samples as f64
}

/// `(complexity, node count)`: share of nodes with more than four streets.
pub fn intersection_complexity(network: &StreetNetwork) -> (f64, usize) {
    let counts = network.node_street_counts();
    if counts.is_empty() {
        return (0.0, 0);
    }
    let complex = counts.values().filter(|&&c| c > COMPLEX_NODE_DEGREE).count();
    (complex as f64 / counts.len() as f64, counts.len())
}

/// Measure a street network. The network is projected to meters first.
pub fn analyze_network(network: &StreetNetwork) -> Result<CityCharacteristics> {
    network.require_segments()?;
    let metric = network.to_crs(Crs::METRIC)?;

    let (street_density, total_street_length, area) = street_density(&metric);
    let grid_score = grid_score(&metric);
    let (intersection_complexity, total_intersections) = intersection_complexity(&metric);

    Ok(CityCharacteristics {
        street_density,
        total_street_length,
        area,
        grid_score,
        is_grid: grid_score > GRID_SCORE_THRESHOLD,
        intersection_complexity,
        total_intersections,
    })
}

/// Map characteristics to parameters.
pub fn derive_parameters(characteristics: &CityCharacteristics, bbox: Option<Bounds>) -> CityParameters {
    let density = characteristics.street_density;
    let buffer_distance = if density > 0.005 {
        3.0
    } else if density > 0.002 {
        5.0
    } else if density > 0.001 {
        8.0
    } else {
        12.0
    };

    let (max_walking_speed, min_walking_speed) = if characteristics.is_grid {
        (3.5, 0.2)
    } else {
        (3.0, 0.1)
    };

    let max_sinuosity = if characteristics.intersection_complexity > 0.3 {
        5.0
    } else {
        3.5
    };

    CityParameters {
        buffer_distance,
        max_walking_speed,
        min_walking_speed,
        max_sinuosity,
        max_direct_distance: 15000.0,
        bbox,
    }
}

// ============================================================================
// Estimator
// ============================================================================

/// Provider of street networks by place name.
pub trait NetworkSource {
    /// Fetch the street network for `place`, giving up after `timeout`.
    fn fetch_network(&self, place: &str, timeout: Duration) -> Result<StreetNetwork>;
}

/// Configuration for parameter estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Upper bound on one street network fetch (default: 180 s)
    pub fetch_timeout: Duration,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(180),
        }
    }
}

/// Looks up or estimates parameters for a city.
///
/// Lookup order:
/// 1. legacy table, returned verbatim;
/// 2. the caller's [`ParameterStore`], unless a refresh is forced;
/// 3. a fresh estimate, written back to the store.
#[derive(Debug, Clone)]
pub struct ParameterEstimator<S> {
    source: S,
    config: EstimatorConfig,
}

impl<S: NetworkSource> ParameterEstimator<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, EstimatorConfig::default())
    }

    pub fn with_config(source: S, config: EstimatorConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Estimate parameters for `city` from its street network.
    ///
    /// Never fails: fetch or analysis errors yield the fallback parameters.
    pub fn estimate(&self, city: &str) -> CityParameters {
        info!("[CityParams] Estimating parameters for {}", city);
        let network = match self.source.fetch_network(city, self.config.fetch_timeout) {
            Ok(network) => network,
            Err(e) => {
                warn!("[CityParams] Could not fetch street network for {}: {}; using defaults", city, e);
                return CityParameters::fallback();
            }
        };

        match self.estimate_from_network(&network) {
            Ok(params) => params,
            Err(e) => {
                warn!("[CityParams] Could not analyze street network for {}: {}; using defaults", city, e);
                CityParameters::fallback()
            }
        }
    }

    fn estimate_from_network(&self, network: &StreetNetwork) -> Result<CityParameters> {
        let characteristics = analyze_network(network)?;
        let bbox = network.to_crs(Crs::Wgs84)?.bounds().map(|r| Bounds::from_rect(&r));
        let params = derive_parameters(&characteristics, bbox);
        info!(
            "[CityParams] {}: density {:.5} m/m², grid score {:.2}, complexity {:.2} -> buffer {}m, speed {}..{} m/s",
            network.name(),
            characteristics.street_density,
            characteristics.grid_score,
            characteristics.intersection_complexity,
            params.buffer_distance,
            params.min_walking_speed,
            params.max_walking_speed
        );
        Ok(params)
    }

    /// Parameters for `city`, consulting the legacy table and `store` first.
    ///
    /// Only configuration errors (such as a stored entry with unknown keys)
    /// are returned. Unreadable or malformed store entries are logged, treated
    /// as misses and overwritten with a fresh estimate.
    pub fn parameters_for(
        &self,
        city: &str,
        store: &mut dyn ParameterStore,
        refresh: bool,
    ) -> Result<CityParameters> {
        if let Some(params) = legacy_parameters(city) {
            debug!("[CityParams] Using legacy parameters for {}", city);
            return Ok(params);
        }

        let key = normalize_city_name(city);
        if refresh {
            if let Err(e) = store.invalidate(&key) {
                warn!("[CityParams] Could not invalidate cached parameters for {}: {}", key, e);
            }
        } else {
            match store.get(&key) {
                Ok(Some(params)) => {
                    debug!("[CityParams] Loaded cached parameters for {}", key);
                    return Ok(params);
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("[CityParams] Could not read cached parameters for {}: {}", key, e),
            }
        }

        let params = self.estimate(city);
        if let Err(e) = store.put(&key, &params) {
            warn!("[CityParams] Could not cache parameters for {}: {}", key, e);
        }
        Ok(params)
    }
}

impl<S: NetworkSource + ?Sized> NetworkSource for &S {
    fn fetch_network(&self, place: &str, timeout: Duration) -> Result<StreetNetwork> {
        (**self).fetch_network(place, timeout)
    }
}

/// Source that always fails, for running fully offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSource;

impl NetworkSource for OfflineSource {
    fn fetch_network(&self, place: &str, _timeout: Duration) -> Result<StreetNetwork> {
        Err(CoverageError::NetworkUnavailable {
            place: place.to_string(),
            message: "offline".to_string(),
        })
    }
}

//! # Street Coverage
//!
//! Turns GPS walking tracks into a verified map of which street segments a
//! pedestrian has actually walked.
//!
//! This library provides:
//! - Trajectory classification that rejects transit rides, GPS noise and
//!   other non-walking motion
//! - Coverage matching of walk corridors against a street network
//! - Per-city threshold estimation from street network density and topology
//! - TCX track ingestion with a bounded worker pool
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel processing with rayon
//! - **`http`** - Enable the Overpass street network source
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use geo::{coord, LineString};
//! use street_coverage::{
//!     analyze_walks, legacy_parameters, ClassifierConfig, CoverageConfig, Crs,
//!     GpsPoint, StreetNetwork, StreetSegment, Track, TrackPoint,
//! };
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
//! let walk = Track::from_points(
//!     "morning-walk",
//!     vec![
//!         TrackPoint::new(t0, GpsPoint::new(40.7128, -74.0060)),
//!         TrackPoint::new(t0 + chrono::Duration::seconds(60), GpsPoint::new(40.7130, -74.0062)),
//!     ],
//! )
//! .unwrap();
//!
//! let street = StreetSegment::new(
//!     "broadway:0",
//!     LineString::from(vec![
//!         coord! { x: -74.00599, y: 40.71279 },
//!         coord! { x: -74.00621, y: 40.71301 },
//!     ]),
//! );
//! let network = StreetNetwork::new("lower-manhattan", Some(Crs::Wgs84), vec![street]).unwrap();
//!
//! let params = legacy_parameters("New York").unwrap();
//! let result = analyze_walks(
//!     vec![walk],
//!     &network,
//!     &params,
//!     &ClassifierConfig::default(),
//!     &CoverageConfig::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(result.valid_walks.len(), 1);
//! assert!(result.segments[0].covered);
//! ```

use chrono::{DateTime, Utc};
use geo::{Coord, LineString, Rect};
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{CoverageError, OptionExt, Result};

pub mod projection;
pub use projection::{project, Crs};

pub mod geometry;
pub use geometry::{buffer, buffer_all, line_length, Corridor, SpatialIndex};

pub mod network;
pub use network::{NodeKey, SegmentId, StreetNetwork, StreetSegment};

pub mod params;
pub use params::{
    legacy_parameters, normalize_city_name, CityParameters, JsonFileParameterStore,
    MemoryParameterStore, ParameterStore,
};

pub mod estimator;
pub use estimator::{
    analyze_network, derive_parameters, CityCharacteristics, EstimatorConfig, NetworkSource, OfflineSource,
    ParameterEstimator,
};

pub mod classifier;
pub use classifier::{
    classify_track, classify_tracks, track_metrics, ClassifiedTrack, ClassifierConfig,
    StreetContext, TrackMetrics, TransitPolicy, Verdict,
};

pub mod coverage;
pub use coverage::{
    analyze_walks, match_coverage, CoverageConfig, CoverageResult, CoverageStats,
    CoveredSegment, SegmentCoverage,
};

pub mod ingest;
pub use ingest::{
    find_track_files, load_track_dir, load_tracks, ActivityKind, IngestReport, ParsedActivity,
    TrackReader,
};

pub mod tcx;
pub use tcx::{parse_tcx, TcxReader};

pub mod overpass;
#[cfg(feature = "http")]
pub use overpass::OverpassSource;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use street_coverage::GpsPoint;
/// let point = GpsPoint::new(40.7128, -74.0060); // New York
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// As a `geo` coordinate (`x = longitude`, `y = latitude`).
    pub fn to_coord(&self) -> Coord<f64> {
        Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }
}

/// Geographic bounding box.
///
/// Serialized as `[min_lng, min_lat, max_lng, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from `min_lng, min_lat, max_lng, max_lat`.
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut bounds = Bounds::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for p in points {
            bounds.min_lat = bounds.min_lat.min(p.latitude);
            bounds.max_lat = bounds.max_lat.max(p.latitude);
            bounds.min_lng = bounds.min_lng.min(p.longitude);
            bounds.max_lng = bounds.max_lng.max(p.longitude);
        }
        Some(bounds)
    }

    /// Create bounds from a WGS84 rectangle.
    pub fn from_rect(rect: &Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

impl From<[f64; 4]> for Bounds {
    fn from(v: [f64; 4]) -> Self {
        Bounds::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Bounds> for [f64; 4] {
    fn from(b: Bounds) -> Self {
        [b.min_lng, b.min_lat, b.max_lng, b.max_lat]
    }
}

/// A timestamped GPS sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp: DateTime<Utc>,
    pub position: GpsPoint,
}

impl TrackPoint {
    pub fn new(timestamp: DateTime<Utc>, position: GpsPoint) -> Self {
        Self { timestamp, position }
    }
}

/// Fewest points a usable track can have.
pub const MIN_TRACK_POINTS: usize = 2;

/// One recorded GPS track.
///
/// Points are in WGS84 and ordered by non-decreasing time. A track always
/// has at least [`MIN_TRACK_POINTS`] points and never changes after it is
/// built.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    source_id: String,
    points: Vec<TrackPoint>,
    skipped_samples: usize,
}

impl Track {
    /// Build a track from raw samples.
    ///
    /// Samples with invalid coordinates, and samples earlier than the last
    /// accepted one, are dropped and counted. Returns `None` when fewer than
    /// [`MIN_TRACK_POINTS`] samples survive.
    pub fn from_points(source_id: impl Into<String>, samples: Vec<TrackPoint>) -> Option<Self> {
        let mut points: Vec<TrackPoint> = Vec::with_capacity(samples.len());
        let mut skipped_samples = 0;
        for sample in samples {
            let in_order = points
                .last()
                .map_or(true, |last| sample.timestamp >= last.timestamp);
            if sample.position.is_valid() && in_order {
                points.push(sample);
            } else {
                skipped_samples += 1;
            }
        }
        if points.len() < MIN_TRACK_POINTS {
            return None;
        }
        Some(Self {
            source_id: source_id.into(),
            points,
            skipped_samples,
        })
    }

    /// Add samples that a reader dropped before the track was built.
    pub(crate) fn with_reader_skips(mut self, skipped: usize) -> Self {
        self.skipped_samples += skipped;
        self
    }

    /// Identifier of the source (usually the file name).
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// Samples dropped while reading and building the track.
    pub fn skipped_samples(&self) -> usize {
        self.skipped_samples
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.points[0].timestamp
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.points[self.points.len() - 1].timestamp
    }

    /// Elapsed time between first and last sample, seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_time() - self.start_time()).num_milliseconds() as f64 / 1000.0
    }

    /// WGS84 polyline of the track.
    pub fn line_string(&self) -> LineString<f64> {
        self.points.iter().map(|p| p.position.to_coord()).collect()
    }

    /// Polyline of the track in `crs`.
    pub fn projected(&self, crs: Crs) -> LineString<f64> {
        project(&self.line_string(), Crs::Wgs84, crs)
    }

    pub fn bounds(&self) -> Bounds {
        let positions: Vec<GpsPoint> = self.points.iter().map(|p| p.position).collect();
        Bounds::from_points(&positions).unwrap_or(Bounds::new(0.0, 0.0, 0.0, 0.0))
    }
}

// ============================================================================
// Tests
// ============================================================================

//! # Trajectory Classification
//!
//! Decides whether a recorded [`Track`] is a genuine walk.
//!
//! All metrics are computed on the track projected to Web Mercator meters.
//! Two rule sets are available through [`TransitPolicy`]. The default,
//! [`TransitPolicy::StreetFollowing`], applies these rules in order:
//!
//! 1. Average speed above `max_walking_speed × 1.2` → rejected (too fast).
//! 2. Nearly straight (`sinuosity < 1.05`), longer than 500 m and sparsely
//!    sampled (`< 50` points/km) → ambiguous. The track is kept only if at least
//!    30% of its length runs within 11 m of a street.
//! 3. Longer than 5 km → rejected.
//! 4. Otherwise a walk.
//!
//! Classification is pure: the same track, parameters and configuration always
//! produce the same verdict.

use geo::{BoundingRect, LineString};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::{buffer_all, distance, expand_rect, line_length, SpatialIndex};
use crate::network::StreetNetwork;
use crate::params::CityParameters;
use crate::projection::Crs;
use crate::Track;

/// Rule set used to tell walks from transit and noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransitPolicy {
    /// Speed ceiling, street-following check for straight sparse tracks,
    /// distance ceiling.
    #[default]
    StreetFollowing,
    /// Speed window, straightness ceiling for long tracks, distance ceiling.
    /// No street context needed.
    SpeedDistance,
}

/// Configuration for trajectory classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Rule set (default: StreetFollowing)
    pub policy: TransitPolicy,
    /// Multiplier on the city's max walking speed (default: 1.2)
    pub speed_tolerance: f64,
    /// Sinuosity below which a track counts as straight (default: 1.05)
    pub min_sinuosity: f64,
    /// Straight tracks longer than this are checked against streets, meters (default: 500)
    pub straight_check_distance: f64,
    /// Point density below which a straight track is suspicious, points/km (default: 50)
    pub min_point_density: f64,
    /// Share of length that must run along streets (default: 0.3)
    pub min_street_following: f64,
    /// Street buffer for the street-following check, meters (default: 11)
    pub street_buffer: f64,
    /// Longest accepted track, meters (default: 5000)
    pub max_walk_distance: f64,
    /// Straight tracks longer than this are rejected by `SpeedDistance`, meters (default: 2000)
    pub max_straight_distance: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            policy: TransitPolicy::StreetFollowing,
            speed_tolerance: 1.2,
            min_sinuosity: 1.05,
            straight_check_distance: 500.0,
            min_point_density: 50.0,
            min_street_following: 0.3,
            street_buffer: 11.0,
            max_walk_distance: 5000.0,
            max_straight_distance: 2000.0,
        }
    }
}

/// Motion metrics of a track, in projected meters and seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackMetrics {
    /// Path length (m)
    pub distance: f64,
    /// Elapsed time (s)
    pub duration: f64,
    /// Mean speed (m/s), 0 when the duration is not positive
    pub avg_speed: f64,
    /// First-to-last point distance (m)
    pub straight_distance: f64,
    /// Path length over straight distance, 1 for closed loops
    pub sinuosity: f64,
    pub point_count: usize,
    /// Points per kilometre, 0 for zero-length tracks
    pub point_density: f64,
    /// Share of length near streets, when it was needed and available
    pub street_following_ratio: Option<f64>,
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Passed every rule.
    Walk,
    /// Straight and sparse, but follows streets.
    StraightOnStreets,
    /// Faster than the walking speed ceiling.
    TooFast,
    /// Slower than the walking speed floor.
    TooSlow,
    /// Straight and sparse, and does not follow streets (or no streets known).
    StraightOffStreet,
    /// Straight over a long distance.
    TooStraight,
    /// Longer than the longest accepted walk.
    TooLong,
}

impl Verdict {
    pub fn is_walk(&self) -> bool {
        matches!(self, Verdict::Walk | Verdict::StraightOnStreets)
    }
}

/// A track together with its verdict and the metrics behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedTrack {
    pub track: Track,
    pub verdict: Verdict,
    pub metrics: TrackMetrics,
}

impl ClassifiedTrack {
    pub fn is_walk(&self) -> bool {
        self.verdict.is_walk()
    }
}

/// Metric street geometries used for the street-following check.
#[derive(Debug, Clone)]
pub struct StreetContext {
    lines: Vec<LineString<f64>>,
    index: SpatialIndex,
}

impl StreetContext {
    /// Project `network` to meters and index its segments.
    pub fn new(network: &StreetNetwork) -> Result<Self> {
        let metric = network.to_crs(Crs::METRIC)?;
        let lines: Vec<LineString<f64>> = metric.segments().iter().map(|s| s.geometry.clone()).collect();
        let index = SpatialIndex::from_lines(lines.iter());
        Ok(Self { lines, index })
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Share of `track` (metric) lying within `radius` of any street.
    pub fn street_following_ratio(&self, track: &LineString<f64>, radius: f64) -> f64 {
        let length = line_length(track);
        if length <= 0.0 {
            return 0.0;
        }
        let Some(rect) = track.bounding_rect() else {
            return 0.0;
        };
        let nearby = self.index.query_candidates(&expand_rect(&rect, radius));
        if nearby.is_empty() {
            return 0.0;
        }
        let corridor = buffer_all(nearby.iter().map(|&i| &self.lines[i]), radius);
        let inside: f64 = corridor.clip(track).iter().map(line_length).sum();
        (inside / length).min(1.0)
    }
}

/// Compute the motion metrics of a track.
pub fn track_metrics(track: &Track) -> TrackMetrics {
    metrics_for_line(track, &track.projected(Crs::METRIC))
}

fn metrics_for_line(track: &Track, line: &LineString<f64>) -> TrackMetrics {
    let distance_m = line_length(line);
    let duration = track.duration_secs();
    let avg_speed = if duration > 0.0 { distance_m / duration } else { 0.0 };

    let coords = &line.0;
    let straight_distance = match (coords.first(), coords.last()) {
        (Some(a), Some(b)) => distance(*a, *b),
        _ => 0.0,
    };
    let sinuosity = if straight_distance > 0.0 {
        distance_m / straight_distance
    } else {
        1.0
    };

    let point_count = track.points().len();
    let point_density = if distance_m > 0.0 {
        point_count as f64 / (distance_m / 1000.0)
    } else {
        0.0
    };

    TrackMetrics {
        distance: distance_m,
        duration,
        avg_speed,
        straight_distance,
        sinuosity,
        point_count,
        point_density,
        street_following_ratio: None,
    }
}

/// Classify a single track.
///
/// `streets` is consulted only for straight, sparse tracks under
/// [`TransitPolicy::StreetFollowing`]. Without it such tracks are rejected.
pub fn classify_track(
    track: Track,
    params: &CityParameters,
    config: &ClassifierConfig,
    streets: Option<&StreetContext>,
) -> ClassifiedTrack {
    let line = track.projected(Crs::METRIC);
    let mut metrics = metrics_for_line(&track, &line);

    let verdict = match config.policy {
        TransitPolicy::StreetFollowing => {
            street_following_verdict(&line, &mut metrics, params, config, streets)
        }
        TransitPolicy::SpeedDistance => speed_distance_verdict(&metrics, params, config),
    };

    debug!(
        "[Classifier] {}: {:?} ({:.0}m, {:.2}m/s, sinuosity {:.3}, {:.1} pts/km)",
        track.source_id(),
        verdict,
        metrics.distance,
        metrics.avg_speed,
        metrics.sinuosity,
        metrics.point_density
    );

    ClassifiedTrack {
        track,
        verdict,
        metrics,
    }
}

fn street_following_verdict(
    line: &LineString<f64>,
    metrics: &mut TrackMetrics,
    params: &CityParameters,
    config: &ClassifierConfig,
    streets: Option<&StreetContext>,
) -> Verdict {
    if metrics.avg_speed > params.max_walking_speed * config.speed_tolerance {
        return Verdict::TooFast;
    }

    let ambiguous = metrics.sinuosity < config.min_sinuosity
        && metrics.distance > config.straight_check_distance
        && metrics.point_density < config.min_point_density;
    if ambiguous {
        let ratio = streets.map(|s| s.street_following_ratio(line, config.street_buffer));
        metrics.street_following_ratio = ratio;
        return match ratio {
            Some(r) if r >= config.min_street_following => Verdict::StraightOnStreets,
            _ => Verdict::StraightOffStreet,
        };
    }

    if metrics.distance > config.max_walk_distance {
        return Verdict::TooLong;
    }
    Verdict::Walk
}

fn speed_distance_verdict(metrics: &TrackMetrics, params: &CityParameters, config: &ClassifierConfig) -> Verdict {
    if metrics.avg_speed > params.max_walking_speed * config.speed_tolerance {
        return Verdict::TooFast;
    }
    if metrics.avg_speed < params.min_walking_speed {
        return Verdict::TooSlow;
    }
    if metrics.sinuosity < config.min_sinuosity && metrics.distance > config.max_straight_distance {
        return Verdict::TooStraight;
    }
    if metrics.distance > config.max_walk_distance {
        return Verdict::TooLong;
    }
    Verdict::Walk
}

/// Classify many tracks, preserving input order.
///
/// Runs in parallel with the `parallel` feature.
pub fn classify_tracks(
    tracks: Vec<Track>,
    params: &CityParameters,
    config: &ClassifierConfig,
    streets: Option<&StreetContext>,
) -> Vec<ClassifiedTrack> {
    let total = tracks.len();

    #[cfg(feature = "parallel")]
    let classified: Vec<ClassifiedTrack> = {
        use rayon::prelude::*;
        tracks
            .into_par_iter()
            .map(|t| classify_track(t, params, config, streets))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let classified: Vec<ClassifiedTrack> = tracks
        .into_iter()
        .map(|t| classify_track(t, params, config, streets))
        .collect();

    let walks = classified.iter().filter(|c| c.is_walk()).count();
    info!("[Classifier] Found {} valid walks out of {} tracks", walks, total);
    classified
}

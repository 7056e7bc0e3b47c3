//! # Coverage Matching
//!
//! Computes how much of each street segment lies inside the corridors of the
//! accepted walks.
//!
//! ## Algorithm
//!
//! 1. Project walks and streets to meters, then buffer each walk by the city's
//!    `buffer_distance` into a corridor.
//! 2. Query a street R-tree with every corridor's bounding box to find the
//!    candidate streets. All other streets stay uncovered.
//! 3. Process candidates in batches of `batch_size`. Each batch queries the
//!    corridor R-tree once with the union of its street boxes.
//! 4. Clip each street against each corridor whose box touches its own, in
//!    corridor order. Pieces longer than `max_piece_length` are discarded.
//! 5. `coverage_percent = min(100, 100 × covered / length)`. A segment is
//!    covered when its percent is above zero.
//!
//! The set of corridors tested against a street does not depend on how streets
//! are batched, so results are identical for any `batch_size` and with or
//! without the `parallel` feature.

use geo::{BoundingRect, LineString};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::classifier::{classify_tracks, ClassifiedTrack, ClassifierConfig, StreetContext, TransitPolicy};
use crate::error::Result;
use crate::geometry::{bounding_rect, buffer, line_length, rects_intersect, Corridor, SpatialIndex};
use crate::network::{SegmentId, StreetNetwork};
use crate::params::CityParameters;
use crate::projection::Crs;
use crate::Track;

/// Configuration for coverage matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Candidate streets per batch (default: 5000)
    pub batch_size: usize,
    /// Longest piece counted towards coverage, meters (default: 500)
    pub max_piece_length: f64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            max_piece_length: 500.0,
        }
    }
}

/// Coverage of one street segment in one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentCoverage {
    pub segment_id: SegmentId,
    pub covered: bool,
    /// Share of the segment covered, 0..=100
    pub coverage_percent: f64,
    /// Covered length (m), at most `segment_length`
    pub covered_length: f64,
    /// Segment length (m)
    pub segment_length: f64,
}

/// A covered segment with its geometry in the network's CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct CoveredSegment {
    pub segment_id: SegmentId,
    pub geometry: LineString<f64>,
    pub coverage_percent: f64,
}

/// Summary counters of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageStats {
    pub total_segments: usize,
    pub covered_segments: usize,
    /// Segments whose box touched at least one corridor box
    pub candidate_segments: usize,
    pub batches: usize,
    /// Pieces dropped for exceeding `max_piece_length`
    pub discarded_pieces: usize,
    pub valid_walks: usize,
    /// Total street length (m)
    pub total_length: f64,
    /// Total covered street length (m)
    pub covered_length: f64,
    /// Total length of valid walks (m)
    pub walk_distance: f64,
}

impl CoverageStats {
    /// Covered segments as a percentage of all segments.
    pub fn segment_percent(&self) -> f64 {
        if self.total_segments == 0 {
            return 0.0;
        }
        self.covered_segments as f64 / self.total_segments as f64 * 100.0
    }

    /// Covered street length as a percentage of total street length.
    pub fn length_percent(&self) -> f64 {
        if self.total_length <= 0.0 {
            return 0.0;
        }
        self.covered_length / self.total_length * 100.0
    }
}

/// Output of a coverage run.
#[derive(Debug, Clone)]
pub struct CoverageResult {
    /// CRS of the input network and of `covered_segments`
    pub crs: Crs,
    /// One entry per network segment, in network order
    pub segments: Vec<SegmentCoverage>,
    pub covered_segments: Vec<CoveredSegment>,
    /// Accepted walks, in WGS84
    pub valid_walks: Vec<ClassifiedTrack>,
    pub stats: CoverageStats,
}

impl CoverageResult {
    /// Coverage of the segment with `id`.
    pub fn coverage(&self, id: &SegmentId) -> Option<&SegmentCoverage> {
        self.segments.iter().find(|s| &s.segment_id == id)
    }

    /// True when no walk contributed, so every segment is uncovered.
    pub fn is_empty_result(&self) -> bool {
        self.valid_walks.is_empty()
    }
}

// ============================================================================
// Matching
// ============================================================================

/// Per-street raw outcome of clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StreetMatch {
    street: usize,
    covered_length: f64,
    discarded: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct MatchOutcome {
    /// Summed piece length per street, uncapped
    covered: Vec<f64>,
    candidates: usize,
    batches: usize,
    discarded: usize,
}

/// Match metric street geometries against metric corridors.
fn match_metric(corridors: &[Corridor], streets: &[LineString<f64>], config: &CoverageConfig) -> MatchOutcome {
    let mut outcome = MatchOutcome {
        covered: vec![0.0; streets.len()],
        ..MatchOutcome::default()
    };
    if corridors.is_empty() || streets.is_empty() {
        return outcome;
    }

    let corridor_index = SpatialIndex::from_rects(corridors.iter().map(Corridor::bounding_rect));
    let street_index = SpatialIndex::from_lines(streets.iter());

    let mut candidates: Vec<usize> = corridors
        .iter()
        .filter_map(Corridor::bounding_rect)
        .flat_map(|rect| street_index.query_candidates(&rect))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    let batches: Vec<&[usize]> = candidates.chunks(config.batch_size.max(1)).collect();
    info!(
        "[Coverage] {} candidate streets of {} in {} batches",
        candidates.len(),
        streets.len(),
        batches.len()
    );

    #[cfg(feature = "parallel")]
    let per_batch: Vec<Vec<StreetMatch>> = {
        use rayon::prelude::*;
        batches
            .par_iter()
            .map(|batch| match_batch(batch, streets, corridors, &corridor_index, config.max_piece_length))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let per_batch: Vec<Vec<StreetMatch>> = batches
        .iter()
        .map(|batch| match_batch(batch, streets, corridors, &corridor_index, config.max_piece_length))
        .collect();

    for m in per_batch.into_iter().flatten() {
        outcome.covered[m.street] = m.covered_length;
        outcome.discarded += m.discarded;
    }
    outcome.candidates = candidates.len();
    outcome.batches = batches.len();
    outcome
}

fn match_batch(
    batch: &[usize],
    streets: &[LineString<f64>],
    corridors: &[Corridor],
    corridor_index: &SpatialIndex,
    max_piece_length: f64,
) -> Vec<StreetMatch> {
    let Some(batch_rect) = bounding_rect(batch.iter().map(|&i| &streets[i])) else {
        return Vec::new();
    };
    let batch_corridors = corridor_index.query_candidates(&batch_rect);

    batch
        .iter()
        .map(|&street| {
            let line = &streets[street];
            let mut covered_length = 0.0;
            let mut discarded = 0;
            if let Some(rect) = line.bounding_rect() {
                for &c in &batch_corridors {
                    let corridor = &corridors[c];
                    let touches = corridor
                        .bounding_rect()
                        .map_or(false, |crect| rects_intersect(&rect, &crect));
                    if !touches {
                        continue;
                    }
                    for piece in corridor.clip(line) {
                        let length = line_length(&piece);
                        if length > max_piece_length {
                            discarded += 1;
                        } else {
                            covered_length += length;
                        }
                    }
                }
            }
            StreetMatch {
                street,
                covered_length,
                discarded,
            }
        })
        .collect()
}

/// Compute street coverage for already-classified walks.
///
/// Tracks whose verdict is not a walk are ignored. An empty walk set gives an
/// all-uncovered result. An empty network fails with `EmptyStreetNetwork`,
/// and a network without a CRS fails with `UndefinedCrs`.
pub fn match_coverage(
    walks: Vec<ClassifiedTrack>,
    network: &StreetNetwork,
    params: &CityParameters,
    config: &CoverageConfig,
) -> Result<CoverageResult> {
    network.require_segments()?;
    let crs = network.require_crs()?;
    let metric = network.to_crs(Crs::METRIC)?;

    let total = walks.len();
    let valid_walks: Vec<ClassifiedTrack> = walks.into_iter().filter(ClassifiedTrack::is_walk).collect();
    if valid_walks.len() < total {
        debug!("[Coverage] Ignoring {} rejected tracks", total - valid_walks.len());
    }

    let walk_lines: Vec<LineString<f64>> = valid_walks.iter().map(|w| w.track.projected(Crs::METRIC)).collect();
    let corridors: Vec<Corridor> = walk_lines
        .iter()
        .map(|line| buffer(line, params.buffer_distance))
        .collect();
    let street_lines: Vec<LineString<f64>> = metric.segments().iter().map(|s| s.geometry.clone()).collect();

    info!(
        "[Coverage] Matching {} walks against {} streets (buffer {}m)",
        corridors.len(),
        street_lines.len(),
        params.buffer_distance
    );
    let outcome = match_metric(&corridors, &street_lines, config);

    let mut stats = CoverageStats {
        total_segments: street_lines.len(),
        candidate_segments: outcome.candidates,
        batches: outcome.batches,
        discarded_pieces: outcome.discarded,
        valid_walks: valid_walks.len(),
        walk_distance: walk_lines.iter().map(line_length).sum(),
        ..CoverageStats::default()
    };

    let mut segments = Vec::with_capacity(street_lines.len());
    let mut covered_segments = Vec::new();
    for ((segment, line), raw) in network.segments().iter().zip(&street_lines).zip(&outcome.covered) {
        let segment_length = line_length(line);
        let covered_length = raw.min(segment_length);
        let coverage_percent = if segment_length > 0.0 {
            (covered_length / segment_length * 100.0).min(100.0)
        } else {
            0.0
        };
        let covered = coverage_percent > 0.0;

        stats.total_length += segment_length;
        if covered {
            stats.covered_segments += 1;
            stats.covered_length += covered_length;
            covered_segments.push(CoveredSegment {
                segment_id: segment.id.clone(),
                geometry: segment.geometry.clone(),
                coverage_percent,
            });
        }
        segments.push(SegmentCoverage {
            segment_id: segment.id.clone(),
            covered,
            coverage_percent,
            covered_length,
            segment_length,
        });
    }

    info!(
        "[Coverage] Covered {}/{} streets ({:.1}%), {:.2} km walked",
        stats.covered_segments,
        stats.total_segments,
        stats.segment_percent(),
        stats.walk_distance / 1000.0
    );

    Ok(CoverageResult {
        crs,
        segments,
        covered_segments,
        valid_walks,
        stats,
    })
}

/// Classify `tracks` and compute street coverage for the accepted walks.
///
/// The street network doubles as street context for the classifier's
/// street-following check.
pub fn analyze_walks(
    tracks: Vec<Track>,
    network: &StreetNetwork,
    params: &CityParameters,
    classifier: &ClassifierConfig,
    config: &CoverageConfig,
) -> Result<CoverageResult> {
    network.require_segments()?;
    let streets = match classifier.policy {
        TransitPolicy::StreetFollowing => Some(StreetContext::new(network)?),
        TransitPolicy::SpeedDistance => None,
    };
    let classified = classify_tracks(tracks, params, classifier, streets.as_ref());
    match_coverage(classified, network, params, config)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_track;
    use crate::network::StreetSegment;
    use crate::projection::EARTH_RADIUS;
    use crate::{CoverageError, GpsPoint, TrackPoint};
    use chrono::{Duration, TimeZone, Utc};
    use geo::coord;

    fn line(coords: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(
            coords
                .iter()
                .map(|&(x, y)| coord! { x: x, y: y })
                .collect::<Vec<_>>(),
        )
    }

    fn lon_for(meters: f64) -> f64 {
        (meters / EARTH_RADIUS).to_degrees()
    }

    /// Walk along the equator between two x offsets in meters, at 1 m/s.
    fn walk(from_m: f64, to_m: f64) -> ClassifiedTrack {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let secs = (to_m - from_m).abs().max(1.0) as i64;
        let track = Track::from_points(
            "walk",
            vec![
                TrackPoint::new(t0, GpsPoint::new(0.0, lon_for(from_m))),
                TrackPoint::new(t0 + Duration::seconds(secs), GpsPoint::new(0.0, lon_for(to_m))),
            ],
        )
        .unwrap();
        classify_track(track, &CityParameters::default(), &ClassifierConfig::default(), None)
    }

    fn equator_street(id: &str, from_m: f64, to_m: f64, lat: f64) -> StreetSegment {
        StreetSegment::new(
            id,
            LineString::from(vec![
                coord! { x: lon_for(from_m), y: lat },
                coord! { x: lon_for(to_m), y: lat },
            ]),
        )
    }

    /// Streets on a 100 m lattice, walks crossing it diagonally and along rows.
    fn lattice() -> (Vec<Corridor>, Vec<LineString<f64>>) {
        let mut streets = Vec::new();
        for i in 0..10 {
            let v = i as f64 * 100.0;
            streets.push(line(&[(0.0, v), (900.0, v)]));
            streets.push(line(&[(v, 0.0), (v, 900.0)]));
        }
        let walks = [
            line(&[(0.0, 0.0), (900.0, 900.0)]),
            line(&[(50.0, 300.0), (450.0, 300.0), (450.0, 700.0)]),
            line(&[(800.0, 100.0), (820.0, 100.0)]),
        ];
        let corridors = walks.iter().map(|w| buffer(w, 8.0)).collect();
        (corridors, streets)
    }

    #[test]
    fn test_result_independent_of_batch_size() {
        let (corridors, streets) = lattice();
        let reference = match_metric(&corridors, &streets, &CoverageConfig::default());
        assert!(reference.covered.iter().any(|&c| c > 0.0));

        for batch_size in [1, 2, 3, 7, 19] {
            let config = CoverageConfig {
                batch_size,
                ..CoverageConfig::default()
            };
            let outcome = match_metric(&corridors, &streets, &config);
            assert_eq!(outcome.covered, reference.covered, "batch size {}", batch_size);
            assert_eq!(outcome.candidates, reference.candidates);
            assert_eq!(outcome.discarded, reference.discarded);
        }
    }

    #[test]
    fn test_long_pieces_are_discarded() {
        let corridors = vec![buffer(&line(&[(0.0, 0.0), (1000.0, 0.0)]), 8.0)];
        let streets = vec![
            line(&[(0.0, 0.0), (1000.0, 0.0)]),
            line(&[(0.0, 0.0), (400.0, 0.0)]),
        ];
        let outcome = match_metric(&corridors, &streets, &CoverageConfig::default());
        assert_eq!(outcome.covered[0], 0.0);
        assert!((outcome.covered[1] - 400.0).abs() < 1e-9);
        assert_eq!(outcome.discarded, 1);
    }

    #[test]
    fn test_no_walks_no_streets() {
        let outcome = match_metric(&[], &[line(&[(0.0, 0.0), (1.0, 0.0)])], &CoverageConfig::default());
        assert_eq!(outcome.covered, vec![0.0]);
        assert_eq!(outcome.candidates, 0);

        let corridors = vec![buffer(&line(&[(0.0, 0.0), (1.0, 0.0)]), 8.0)];
        let outcome = match_metric(&corridors, &[], &CoverageConfig::default());
        assert!(outcome.covered.is_empty());
    }

    #[test]
    fn test_street_outside_corridor_boxes_is_not_a_candidate() {
        let corridors = vec![buffer(&line(&[(0.0, 0.0), (100.0, 0.0)]), 8.0)];
        let streets = vec![line(&[(0.0, 0.0), (100.0, 0.0)]), line(&[(5000.0, 5000.0), (5100.0, 5000.0)])];
        let outcome = match_metric(&corridors, &streets, &CoverageConfig::default());
        assert_eq!(outcome.candidates, 1);
        assert_eq!(outcome.covered[1], 0.0);
    }

    #[test]
    fn test_match_coverage_percentages() {
        let network = StreetNetwork::new(
            "equator",
            Some(Crs::Wgs84),
            vec![
                equator_street("full", 0.0, 100.0, 0.0),
                equator_street("half", 50.0, 250.0, 0.0),
                equator_street("far", 0.0, 100.0, 0.01),
            ],
        )
        .unwrap();

        let result = match_coverage(vec![walk(0.0, 150.0)], &network, &CityParameters::default(), &CoverageConfig::default())
            .unwrap();

        let full = result.coverage(&"full".into()).unwrap();
        assert!(full.covered);
        assert!((full.coverage_percent - 100.0).abs() < 1e-6);

        // Walk ends at 150 m; the 8 m round cap reaches 158 m.
        let half = result.coverage(&"half".into()).unwrap();
        assert!(half.covered);
        assert!((half.coverage_percent - 54.0).abs() < 1e-6);

        let far = result.coverage(&"far".into()).unwrap();
        assert!(!far.covered);
        assert_eq!(far.coverage_percent, 0.0);

        assert_eq!(result.crs, Crs::Wgs84);
        assert_eq!(result.covered_segments.len(), 2);
        assert_eq!(result.covered_segments[0].geometry, network.segments()[0].geometry);
        assert_eq!(result.stats.covered_segments, 2);
        assert_eq!(result.stats.total_segments, 3);
        assert!((result.stats.walk_distance - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_overlapping_walks_capped_at_100() {
        let network = StreetNetwork::new("equator", Some(Crs::Wgs84), vec![equator_street("s", 0.0, 100.0, 0.0)]).unwrap();
        let result = match_coverage(
            vec![walk(0.0, 100.0), walk(100.0, 0.0)],
            &network,
            &CityParameters::default(),
            &CoverageConfig::default(),
        )
        .unwrap();
        let s = &result.segments[0];
        assert_eq!(s.coverage_percent, 100.0);
        assert!(s.covered_length <= s.segment_length);
    }

    #[test]
    fn test_empty_walks_all_uncovered() {
        let network = StreetNetwork::new("equator", Some(Crs::Wgs84), vec![equator_street("s", 0.0, 100.0, 0.0)]).unwrap();
        let result = match_coverage(vec![], &network, &CityParameters::default(), &CoverageConfig::default()).unwrap();
        assert!(result.is_empty_result());
        assert!(result.segments.iter().all(|s| !s.covered && s.coverage_percent == 0.0));
        assert!(result.covered_segments.is_empty());
    }

    #[test]
    fn test_rejected_tracks_are_ignored() {
        let network = StreetNetwork::new("equator", Some(Crs::Wgs84), vec![equator_street("s", 0.0, 100.0, 0.0)]).unwrap();
        let mut rejected = walk(0.0, 100.0);
        rejected.verdict = crate::Verdict::TooFast;
        let result = match_coverage(vec![rejected], &network, &CityParameters::default(), &CoverageConfig::default()).unwrap();
        assert!(result.valid_walks.is_empty());
        assert!(!result.segments[0].covered);
    }

    #[test]
    fn test_network_errors() {
        let empty = StreetNetwork::new("empty", Some(Crs::Wgs84), vec![]).unwrap();
        let err = match_coverage(vec![], &empty, &CityParameters::default(), &CoverageConfig::default()).unwrap_err();
        assert!(err.is_nothing_to_do());

        let bare = StreetNetwork::new("bare", None, vec![equator_street("s", 0.0, 100.0, 0.0)]).unwrap();
        let err = match_coverage(vec![], &bare, &CityParameters::default(), &CoverageConfig::default()).unwrap_err();
        assert!(matches!(err, CoverageError::UndefinedCrs { .. }));
    }

    #[test]
    fn test_metric_network_keeps_its_crs() {
        let network = StreetNetwork::new(
            "metric",
            Some(Crs::WebMercator),
            vec![StreetSegment::new(7u64, line(&[(0.0, 0.0), (100.0, 0.0)]))],
        )
        .unwrap();
        let result = match_coverage(vec![walk(0.0, 100.0)], &network, &CityParameters::default(), &CoverageConfig::default())
            .unwrap();
        assert_eq!(result.crs, Crs::WebMercator);
        assert_eq!(result.covered_segments[0].segment_id.as_str(), "7");
        assert_eq!(result.covered_segments[0].geometry, network.segments()[0].geometry);
    }
}

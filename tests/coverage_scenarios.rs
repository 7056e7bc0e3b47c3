//! End-to-end coverage scenarios over the public API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use geo::{coord, LineString};
use street_coverage::projection::EARTH_RADIUS;
use street_coverage::{
    analyze_walks, classify_track, legacy_parameters, load_track_dir, match_coverage,
    CityParameters, ClassifierConfig, CoverageConfig, Crs, GpsPoint, MemoryParameterStore,
    OfflineSource, ParameterEstimator, ParameterStore, SegmentId, StreetNetwork, StreetSegment,
    TcxReader, Track, TrackPoint, Verdict,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

fn lon_for(meters: f64) -> f64 {
    (meters / EARTH_RADIUS).to_degrees()
}

fn segment(id: &str, coords: &[(f64, f64)]) -> StreetSegment {
    StreetSegment::new(
        id,
        LineString::from(
            coords
                .iter()
                .map(|&(x, y)| coord! { x: x, y: y })
                .collect::<Vec<_>>(),
        ),
    )
}

/// Walk east along the equator, one sample every `step_m` meters at 1.25 m/s.
fn equator_walk(id: &str, from_m: f64, to_m: f64, step_m: f64) -> Track {
    let steps = ((to_m - from_m) / step_m).round() as i64;
    let points = (0..=steps)
        .map(|i| {
            let x = from_m + i as f64 * step_m;
            TrackPoint::new(
                t0() + Duration::milliseconds((i as f64 * step_m / 1.25 * 1000.0) as i64),
                GpsPoint::new(0.0, lon_for(x)),
            )
        })
        .collect();
    Track::from_points(id, points).unwrap()
}

fn nyc_walk() -> Track {
    Track::from_points(
        "nyc",
        vec![
            TrackPoint::new(t0(), GpsPoint::new(40.7128, -74.0060)),
            TrackPoint::new(t0() + Duration::seconds(60), GpsPoint::new(40.7130, -74.0062)),
        ],
    )
    .unwrap()
}

fn nyc_network() -> StreetNetwork {
    StreetNetwork::new(
        "nyc",
        Some(Crs::Wgs84),
        vec![
            segment("broadway:0", &[(-74.00599, 40.71279), (-74.00621, 40.71301)]),
            segment("far-away:0", &[(-73.95, 40.78), (-73.951, 40.781)]),
        ],
    )
    .unwrap()
}

#[test]
fn nyc_walk_covers_collinear_street() {
    let params = legacy_parameters("New York").unwrap();
    let result = analyze_walks(
        vec![nyc_walk()],
        &nyc_network(),
        &params,
        &ClassifierConfig::default(),
        &CoverageConfig::default(),
    )
    .unwrap();

    assert_eq!(result.valid_walks.len(), 1);
    let broadway = result.coverage(&SegmentId::from("broadway:0")).unwrap();
    assert!(broadway.covered);
    assert!(broadway.coverage_percent > 99.0, "got {}", broadway.coverage_percent);
    assert!(broadway.coverage_percent <= 100.0);

    let far = result.coverage(&SegmentId::from("far-away:0")).unwrap();
    assert!(!far.covered);
    assert_eq!(far.coverage_percent, 0.0);

    assert_eq!(result.stats.covered_segments, 1);
    assert_eq!(result.covered_segments.len(), 1);
    assert_eq!(result.covered_segments[0].geometry, nyc_network().segments()[0].geometry);
}

#[test]
fn fast_straight_track_is_rejected() {
    let track = Track::from_points(
        "ride",
        vec![
            TrackPoint::new(t0(), GpsPoint::new(0.0, 0.0)),
            TrackPoint::new(t0() + Duration::seconds(600), GpsPoint::new(0.0, lon_for(6000.0))),
        ],
    )
    .unwrap();
    let classified = classify_track(track, &CityParameters::default(), &ClassifierConfig::default(), None);
    assert_eq!(classified.verdict, Verdict::TooFast);
    assert!((classified.metrics.avg_speed - 10.0).abs() < 0.1);
}

#[test]
fn empty_walk_set_leaves_everything_uncovered() {
    let result = match_coverage(Vec::new(), &nyc_network(), &CityParameters::default(), &CoverageConfig::default())
        .unwrap();
    assert!(result.is_empty_result());
    assert_eq!(result.segments.len(), 2);
    assert!(result.segments.iter().all(|s| !s.covered && s.coverage_percent == 0.0));
    assert_eq!(result.stats.covered_segments, 0);
}

#[test]
fn unreachable_city_gets_exact_defaults() {
    let estimator = ParameterEstimator::new(OfflineSource);
    assert_eq!(estimator.estimate("Atlantis"), CityParameters::fallback());

    let mut store = MemoryParameterStore::new();
    let params = estimator.parameters_for("Atlantis", &mut store, false).unwrap();
    assert_eq!(params, CityParameters::default());
    assert_eq!(store.get("atlantis").unwrap(), Some(CityParameters::default()));

    // Legacy cities never reach the source or the store.
    let mut empty = MemoryParameterStore::new();
    let nyc = estimator.parameters_for("New York", &mut empty, true).unwrap();
    assert_eq!(nyc.buffer_distance, 5.0);
    assert!(empty.is_empty());
}

#[test]
fn long_pieces_never_count() {
    // One 2 km street walked end to end: the single clipped piece is too long.
    let network = StreetNetwork::new(
        "equator",
        Some(Crs::Wgs84),
        vec![
            segment("long:0", &[(0.0, 0.0), (lon_for(2000.0), 0.0)]),
            segment("short:0", &[(lon_for(100.0), 0.0), (lon_for(400.0), 0.0)]),
        ],
    )
    .unwrap();
    let walk = equator_walk("long-walk", 0.0, 2000.0, 10.0);

    let result = analyze_walks(
        vec![walk],
        &network,
        &CityParameters::default(),
        &ClassifierConfig::default(),
        &CoverageConfig::default(),
    )
    .unwrap();

    assert_eq!(result.valid_walks.len(), 1);
    let long = result.coverage(&SegmentId::from("long:0")).unwrap();
    assert!(!long.covered);
    assert_eq!(long.coverage_percent, 0.0);
    let short = result.coverage(&SegmentId::from("short:0")).unwrap();
    assert!(short.coverage_percent > 99.0);
    assert!(result.stats.discarded_pieces >= 1);
}

#[test]
fn results_are_repeatable_and_batch_independent() {
    let network = StreetNetwork::new(
        "equator",
        Some(Crs::Wgs84),
        (0..20)
            .map(|i| {
                let x = i as f64 * 100.0;
                segment(&format!("block:{}", i), &[(lon_for(x), 0.0), (lon_for(x + 100.0), 0.0)])
            })
            .collect(),
    )
    .unwrap();
    let run = |batch_size: usize| {
        analyze_walks(
            vec![equator_walk("a", 150.0, 650.0, 10.0), equator_walk("b", 1200.0, 1350.0, 10.0)],
            &network,
            &CityParameters::default(),
            &ClassifierConfig::default(),
            &CoverageConfig {
                batch_size,
                ..CoverageConfig::default()
            },
        )
        .unwrap()
    };

    let first = run(5000);
    let again = run(5000);
    let tiny = run(1);
    assert_eq!(first.segments, again.segments);
    assert_eq!(first.segments, tiny.segments);
    assert!(tiny.stats.batches > first.stats.batches);
    assert!(first.stats.covered_segments >= 7);
}

#[test]
fn tcx_directory_to_coverage() {
    let dir = tempfile::tempdir().unwrap();
    let trackpoints: String = (0..=30)
        .map(|i| {
            let time = t0() + Duration::seconds(i * 8);
            format!(
                "<Trackpoint><Time>{}</Time><Position><LatitudeDegrees>0.0</LatitudeDegrees>\
                 <LongitudeDegrees>{}</LongitudeDegrees></Position></Trackpoint>",
                time.to_rfc3339(),
                lon_for(i as f64 * 10.0)
            )
        })
        .collect();
    let doc = |sport: &str| {
        format!(
            "<TrainingCenterDatabase xmlns=\"http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2\">\
             <Activities><Activity Sport=\"{}\"><Lap><Track>{}</Track></Lap></Activity></Activities>\
             </TrainingCenterDatabase>",
            sport, trackpoints
        )
    };
    std::fs::write(dir.path().join("walk.tcx"), doc("Walking")).unwrap();
    std::fs::write(dir.path().join("run.tcx"), doc("Running")).unwrap();
    std::fs::write(dir.path().join("broken.tcx"), "<TrainingCenterDatabase></Activities>").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a track").unwrap();

    let report = load_track_dir(dir.path(), &TcxReader, Some(2)).unwrap();
    assert_eq!(report.files_seen, 3);
    assert_eq!(report.tracks.len(), 1);
    assert_eq!(report.non_walking, 1);
    assert_eq!(report.skipped_files, 1);
    assert_eq!(report.tracks[0].source_id(), "walk.tcx");

    let network = StreetNetwork::new(
        "equator",
        Some(Crs::Wgs84),
        vec![segment("path:0", &[(lon_for(50.0), 0.0), (lon_for(250.0), 0.0)])],
    )
    .unwrap();
    let result = analyze_walks(
        report.tracks,
        &network,
        &CityParameters::default(),
        &ClassifierConfig::default(),
        &CoverageConfig::default(),
    )
    .unwrap();
    assert!(result.segments[0].covered);
    assert!(result.stats.walk_distance > 299.0);
}

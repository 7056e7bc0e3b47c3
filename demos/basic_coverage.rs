//! Coverage of a small synthetic street grid.
//!
//! Run with: cargo run --example basic_coverage

use chrono::{Duration, TimeZone, Utc};
use geo::{coord, LineString};
use street_coverage::{
    analyze_walks, legacy_parameters, ClassifierConfig, CoverageConfig, Crs, GpsPoint,
    StreetNetwork, StreetSegment, Track, TrackPoint,
};

/// Degrees per ~100 m block near lower Manhattan.
const BLOCK_LAT: f64 = 0.0009;
const BLOCK_LNG: f64 = 0.0012;

fn main() {
    env_logger::init();
    println!("Street Coverage Example\n");

    let (lat0, lng0) = (40.7100, -74.0100);

    // 4x4 blocks: 5 east-west and 5 north-south streets, split per block
    let mut segments = Vec::new();
    for row in 0..5 {
        for col in 0..4 {
            let y = lat0 + row as f64 * BLOCK_LAT;
            let x = lng0 + col as f64 * BLOCK_LNG;
            segments.push(StreetSegment::new(
                format!("ew-{}:{}", row, col),
                LineString::from(vec![coord! { x: x, y: y }, coord! { x: x + BLOCK_LNG, y: y }]),
            ));
        }
    }
    for col in 0..5 {
        for row in 0..4 {
            let y = lat0 + row as f64 * BLOCK_LAT;
            let x = lng0 + col as f64 * BLOCK_LNG;
            segments.push(StreetSegment::new(
                format!("ns-{}:{}", col, row),
                LineString::from(vec![coord! { x: x, y: y }, coord! { x: x, y: y + BLOCK_LAT }]),
            ));
        }
    }
    let network = StreetNetwork::new("demo-grid", Some(Crs::Wgs84), segments).expect("valid network");

    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

    // A zig-zag walk around two blocks at ~1.3 m/s, one sample every 30 s
    let corners = [(0, 0), (0, 2), (1, 2), (1, 0), (2, 0), (2, 2)];
    let mut walk_points = Vec::new();
    let mut t = t0;
    for pair in corners.windows(2) {
        let (r0, c0) = pair[0];
        let (r1, c1) = pair[1];
        let steps = 8;
        for s in 0..steps {
            let f = s as f64 / steps as f64;
            let row = r0 as f64 + (r1 - r0) as f64 * f;
            let col = c0 as f64 + (c1 - c0) as f64 * f;
            walk_points.push(TrackPoint::new(
                t,
                GpsPoint::new(lat0 + row * BLOCK_LAT, lng0 + col * BLOCK_LNG),
            ));
            t += Duration::seconds(30);
        }
    }
    let (rl, cl) = corners[corners.len() - 1];
    walk_points.push(TrackPoint::new(
        t,
        GpsPoint::new(lat0 + rl as f64 * BLOCK_LAT, lng0 + cl as f64 * BLOCK_LNG),
    ));
    let walk = Track::from_points("zig-zag", walk_points).expect("walk has points");

    // A straight ride up the grid at 15 m/s
    let ride = Track::from_points(
        "bus-ride",
        vec![
            TrackPoint::new(t0, GpsPoint::new(lat0, lng0 + 4.0 * BLOCK_LNG)),
            TrackPoint::new(t0 + Duration::seconds(30), GpsPoint::new(lat0 + 4.0 * BLOCK_LAT, lng0 + 4.0 * BLOCK_LNG)),
        ],
    )
    .expect("ride has points");

    let params = legacy_parameters("New York").expect("legacy city");
    println!(
        "Parameters: buffer={}m, speed={}..{} m/s\n",
        params.buffer_distance, params.min_walking_speed, params.max_walking_speed
    );

    let result = analyze_walks(
        vec![walk, ride],
        &network,
        &params,
        &ClassifierConfig::default(),
        &CoverageConfig::default(),
    )
    .expect("coverage run");

    println!("Valid walks: {}", result.valid_walks.len());
    for walk in &result.valid_walks {
        println!(
            "  {}: {:.0}m in {:.0}s ({:.2} m/s)",
            walk.track.source_id(),
            walk.metrics.distance,
            walk.metrics.duration,
            walk.metrics.avg_speed
        );
    }

    println!("\nCovered segments:");
    for segment in &result.covered_segments {
        println!("  {:<8} {:5.1}%", segment.segment_id.as_str(), segment.coverage_percent);
    }

    let stats = &result.stats;
    println!("\nSummary:");
    println!("  Total streets:   {}", stats.total_segments);
    println!("  Covered streets: {} ({:.1}%)", stats.covered_segments, stats.segment_percent());
    println!("  Covered length:  {:.1}%", stats.length_percent());
    println!("  Walked:          {:.2} km", stats.walk_distance / 1000.0);
}

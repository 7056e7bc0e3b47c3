//! Ingest a directory of TCX files and classify the walks.
//!
//! Run with: cargo run --example batch_ingest --features parallel -- <dir> [city]
//!
//! Without a directory, a few synthetic TCX files are written to a
//! temporary directory first.

use std::path::PathBuf;
use std::time::Instant;

use street_coverage::{
    classify_tracks, legacy_parameters, load_track_dir, CityParameters, ClassifierConfig, TcxReader,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let _tmp;
    let dir = match args.first() {
        Some(dir) => PathBuf::from(dir),
        None => {
            let tmp = tempfile::tempdir().expect("temp dir");
            write_samples(tmp.path());
            let path = tmp.path().to_path_buf();
            _tmp = tmp;
            path
        }
    };
    let params = args
        .get(1)
        .and_then(|city| legacy_parameters(city))
        .unwrap_or_else(CityParameters::fallback);

    println!("Batch Ingest Example\n");
    println!("Reading {}", dir.display());

    let start = Instant::now();
    let report = match load_track_dir(&dir, &TcxReader, None) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    println!(
        "Loaded {} walks from {} files in {:.2?} ({} skipped, {} not walking, {} bad samples)\n",
        report.tracks.len(),
        report.files_seen,
        start.elapsed(),
        report.skipped_files,
        report.non_walking,
        report.skipped_samples
    );

    let classified = classify_tracks(report.tracks, &params, &ClassifierConfig::default(), None);
    for track in &classified {
        println!(
            "  {:<20} {:<18?} {:6.0}m {:5.2} m/s sinuosity {:.2}",
            track.track.source_id(),
            track.verdict,
            track.metrics.distance,
            track.metrics.avg_speed,
            track.metrics.sinuosity
        );
    }
}

fn write_samples(dir: &std::path::Path) {
    let walk: String = (0..12)
        .map(|i| {
            let lat = 40.7128 + 0.0003 * i as f64;
            let lon = -74.0060 + if i % 2 == 0 { 0.0 } else { 0.0002 };
            trackpoint(&format!("2024-05-01T09:{:02}:00Z", i), lat, lon)
        })
        .collect();
    let ride: String = (0..12)
        .map(|i| trackpoint(&format!("2024-05-01T10:{:02}:00Z", i), 40.70 + 0.01 * i as f64, -74.0))
        .collect();
    let run: String = (0..4)
        .map(|i| trackpoint(&format!("2024-05-01T11:{:02}:00Z", i), 40.71 + 0.002 * i as f64, -74.01))
        .collect();

    let files = [
        ("walk.tcx", document("Walking", &walk)),
        ("subway.tcx", document("Walking", &ride)),
        ("run.tcx", document("Running", &run)),
        ("broken.tcx", "<TrainingCenterDatabase></Activities>".to_string()),
    ];
    for (name, body) in files {
        std::fs::write(dir.join(name), body).expect("write sample");
    }
}

fn document(sport: &str, trackpoints: &str) -> String {
    format!(
        "<TrainingCenterDatabase xmlns=\"http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2\">\
         <Activities><Activity Sport=\"{}\"><Lap><Track>{}</Track></Lap></Activity></Activities>\
         </TrainingCenterDatabase>",
        sport, trackpoints
    )
}

fn trackpoint(time: &str, lat: f64, lon: f64) -> String {
    format!(
        "<Trackpoint><Time>{}</Time><Position><LatitudeDegrees>{}</LatitudeDegrees>\
         <LongitudeDegrees>{}</LongitudeDegrees></Position></Trackpoint>",
        time, lat, lon
    )
}

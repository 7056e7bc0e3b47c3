//! Track ingestion.
//!
//! Reads a set of activity files into [`Track`]s. Each file is read on its
//! own. A bad file or a bad sample is skipped and counted, and never aborts
//! the batch. With the `parallel` feature, files are read on a rayon pool of
//! `min(cores, files)` threads, or of the size the caller asks for.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{CoverageError, OptionExt, Result};
use crate::{Track, TrackPoint, MIN_TRACK_POINTS};

/// Kind of activity recorded in a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Walking,
    Running,
    Biking,
    Other(String),
}

impl ActivityKind {
    /// Map a sport label as written by fitness apps.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Walking" | "walking" => ActivityKind::Walking,
            "Running" | "running" => ActivityKind::Running,
            "Biking" | "biking" | "Cycling" | "cycling" => ActivityKind::Biking,
            other => ActivityKind::Other(other.to_string()),
        }
    }
}

/// Samples read from one activity file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedActivity {
    pub kind: ActivityKind,
    /// Samples that passed field-level validation, in file order
    pub points: Vec<TrackPoint>,
    /// Samples dropped for missing or malformed fields
    pub skipped_samples: usize,
}

/// Reader for one activity file format.
pub trait TrackReader: Sync {
    /// File extension handled by this reader, without the dot.
    fn extension(&self) -> &str;

    /// Read one file.
    fn read_activity(&self, path: &Path) -> Result<ParsedActivity>;
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Walking tracks, in input file order
    pub tracks: Vec<Track>,
    pub files_seen: usize,
    /// Files that could not be read or had too few valid samples
    pub skipped_files: usize,
    /// Files holding some other activity than walking
    pub non_walking: usize,
    /// Samples dropped across all accepted tracks
    pub skipped_samples: usize,
}

impl IngestReport {
    /// True when no walking track was loaded.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// What happened to one file.
#[derive(Debug)]
enum FileOutcome {
    Walk(Track),
    NotWalking(ActivityKind),
    Skipped(CoverageError),
}

fn source_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn ingest_file<R: TrackReader + ?Sized>(path: &Path, reader: &R) -> FileOutcome {
    let activity = match reader.read_activity(path) {
        Ok(activity) => activity,
        Err(e) => return FileOutcome::Skipped(e),
    };
    if activity.kind != ActivityKind::Walking {
        return FileOutcome::NotWalking(activity.kind);
    }

    let id = source_id(path);
    let count = activity.points.len();
    let skipped = activity.skipped_samples;
    match Track::from_points(id.clone(), activity.points).ok_or_insufficient_points(&id, count, MIN_TRACK_POINTS) {
        Ok(track) => FileOutcome::Walk(track.with_reader_skips(skipped)),
        Err(e) => FileOutcome::Skipped(e),
    }
}

/// Read every file in `paths`.
///
/// `max_workers` caps the pool size with the `parallel` feature and is
/// ignored otherwise. Output order follows `paths`.
pub fn load_tracks<R: TrackReader + ?Sized>(paths: &[PathBuf], reader: &R, max_workers: Option<usize>) -> IngestReport {
    let outcomes = read_all(paths, reader, max_workers);

    let mut report = IngestReport {
        files_seen: paths.len(),
        ..IngestReport::default()
    };
    for (path, outcome) in paths.iter().zip(outcomes) {
        match outcome {
            FileOutcome::Walk(track) => {
                report.skipped_samples += track.skipped_samples();
                report.tracks.push(track);
            }
            FileOutcome::NotWalking(kind) => {
                info!("[Ingest] Skipping {}: activity is {:?}, not walking", path.display(), kind);
                report.non_walking += 1;
            }
            FileOutcome::Skipped(e) => {
                warn!("[Ingest] Skipping {}: {}", path.display(), e);
                report.skipped_files += 1;
            }
        }
    }

    info!(
        "[Ingest] Loaded {} walks from {} files ({} skipped, {} not walking, {} bad samples)",
        report.tracks.len(),
        report.files_seen,
        report.skipped_files,
        report.non_walking,
        report.skipped_samples
    );
    report
}

#[cfg(feature = "parallel")]
fn read_all<R: TrackReader + ?Sized>(paths: &[PathBuf], reader: &R, max_workers: Option<usize>) -> Vec<FileOutcome> {
    use rayon::prelude::*;

    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    let workers = max_workers.unwrap_or(cores).min(paths.len()).max(1);
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => {
            info!("[Ingest] Reading {} files on {} workers", paths.len(), workers);
            pool.install(|| paths.par_iter().map(|p| ingest_file(p, reader)).collect())
        }
        Err(e) => {
            warn!("[Ingest] Could not build worker pool ({}), reading sequentially", e);
            paths.iter().map(|p| ingest_file(p, reader)).collect()
        }
    }
}

#[cfg(not(feature = "parallel"))]
fn read_all<R: TrackReader + ?Sized>(paths: &[PathBuf], reader: &R, _max_workers: Option<usize>) -> Vec<FileOutcome> {
    paths.iter().map(|p| ingest_file(p, reader)).collect()
}

/// Files in `dir` with the reader's extension, sorted by path.
pub fn find_track_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| CoverageError::TrackRead {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .map_or(false, |ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Read every matching file in `dir`.
pub fn load_track_dir<R: TrackReader + ?Sized>(dir: &Path, reader: &R, max_workers: Option<usize>) -> Result<IngestReport> {
    let files = find_track_files(dir, reader.extension())?;
    if files.is_empty() {
        warn!("[Ingest] No .{} files found in {}", reader.extension(), dir.display());
    }
    Ok(load_tracks(&files, reader, max_workers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsPoint;
    use chrono::{Duration, TimeZone, Utc};

    /// Reader that decides by file name, without touching the disk.
    struct NameReader;

    impl TrackReader for NameReader {
        fn extension(&self) -> &str {
            "fake"
        }

        fn read_activity(&self, path: &Path) -> Result<ParsedActivity> {
            let name = source_id(path);
            let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
            let points = vec![
                TrackPoint::new(t0, GpsPoint::new(40.7128, -74.0060)),
                TrackPoint::new(t0 + Duration::seconds(60), GpsPoint::new(40.7130, -74.0062)),
            ];
            if name.starts_with("broken") {
                return Err(CoverageError::TrackRead {
                    path: name,
                    message: "unexpected end of file".to_string(),
                });
            }
            if name.starts_with("run") {
                return Ok(ParsedActivity {
                    kind: ActivityKind::Running,
                    points,
                    skipped_samples: 0,
                });
            }
            if name.starts_with("short") {
                return Ok(ParsedActivity {
                    kind: ActivityKind::Walking,
                    points: points[..1].to_vec(),
                    skipped_samples: 3,
                });
            }
            Ok(ParsedActivity {
                kind: ActivityKind::Walking,
                points,
                skipped_samples: 1,
            })
        }
    }

    #[test]
    fn test_activity_kind_labels() {
        assert_eq!(ActivityKind::from_label("Walking"), ActivityKind::Walking);
        assert_eq!(ActivityKind::from_label("Running"), ActivityKind::Running);
        assert_eq!(ActivityKind::from_label("Biking"), ActivityKind::Biking);
        assert_eq!(ActivityKind::from_label("Other"), ActivityKind::Other("Other".to_string()));
    }

    #[test]
    fn test_bad_files_do_not_abort_batch() {
        let paths: Vec<PathBuf> = ["walk-a.fake", "broken.fake", "run.fake", "short.fake", "walk-b.fake"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let report = load_tracks(&paths, &NameReader, Some(2));

        assert_eq!(report.files_seen, 5);
        assert_eq!(report.tracks.len(), 2);
        assert_eq!(report.tracks[0].source_id(), "walk-a.fake");
        assert_eq!(report.tracks[1].source_id(), "walk-b.fake");
        assert_eq!(report.skipped_files, 2);
        assert_eq!(report.non_walking, 1);
        assert_eq!(report.skipped_samples, 2);
        assert_eq!(report.tracks[0].skipped_samples(), 1);
    }

    #[test]
    fn test_empty_input() {
        let report = load_tracks(&[], &NameReader, None);
        assert!(report.is_empty());
        assert_eq!(report.files_seen, 0);
    }

    #[test]
    fn test_find_track_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.fake", "a.FAKE", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.fake")).unwrap();

        let files = find_track_files(dir.path(), "fake").unwrap();
        let names: Vec<String> = files.iter().map(|p| source_id(p)).collect();
        assert_eq!(names, vec!["a.FAKE", "b.fake"]);

        assert!(find_track_files(&dir.path().join("missing"), "fake").is_err());
    }
}

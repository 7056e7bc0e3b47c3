//! City parameters and their persistence.
//!
//! [`CityParameters`] carry the per-city thresholds used by the classifier and
//! the coverage matcher. They come from one of three places:
//!
//! - the legacy table ([`legacy_parameters`]), returned verbatim;
//! - a [`ParameterStore`] holding earlier estimates, keyed by
//!   [`normalize_city_name`];
//! - a fresh estimate from [`crate::estimator::ParameterEstimator`].

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, Result};
use crate::Bounds;

/// Thresholds for one city.
///
/// Serialized with the field names used by parameter files. Unknown keys are
/// rejected, so a stale or hand-edited file fails loudly instead of being
/// half-applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CityParameters {
    /// Corridor radius around walks, meters (default: 8.0)
    pub buffer_distance: f64,
    /// Upper walking speed, m/s (default: 3.0)
    pub max_walking_speed: f64,
    /// Lower walking speed, m/s (default: 0.1)
    pub min_walking_speed: f64,
    /// Upper path/straight-line ratio (default: 4.0)
    pub max_sinuosity: f64,
    /// Upper start-to-end distance, meters (default: 15000.0)
    pub max_direct_distance: f64,
    /// City extent as `[min_lon, min_lat, max_lon, max_lat]`
    #[serde(default)]
    pub bbox: Option<Bounds>,
}

impl Default for CityParameters {
    fn default() -> Self {
        Self {
            buffer_distance: 8.0,
            max_walking_speed: 3.0,
            min_walking_speed: 0.1,
            max_sinuosity: 4.0,
            max_direct_distance: 15000.0,
            bbox: None,
        }
    }
}

impl CityParameters {
    /// Parameters used when a city cannot be analyzed.
    pub fn fallback() -> Self {
        Self::default()
    }

    /// Check that every threshold is usable.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("buffer_distance", self.buffer_distance),
            ("max_walking_speed", self.max_walking_speed),
            ("max_sinuosity", self.max_sinuosity),
            ("max_direct_distance", self.max_direct_distance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CoverageError::Config {
                    message: format!("{} must be a positive number, got {}", name, value),
                });
            }
        }
        if !(self.min_walking_speed.is_finite() && self.min_walking_speed >= 0.0) {
            return Err(CoverageError::Config {
                message: format!("min_walking_speed must be >= 0, got {}", self.min_walking_speed),
            });
        }
        if self.min_walking_speed >= self.max_walking_speed {
            return Err(CoverageError::Config {
                message: format!(
                    "min_walking_speed ({}) must be below max_walking_speed ({})",
                    self.min_walking_speed, self.max_walking_speed
                ),
            });
        }
        Ok(())
    }

    /// Parse a JSON parameter document.
    ///
    /// A key outside [`CityParameters::FIELDS`] is [`CoverageError::UnknownParameter`].
    /// Anything else wrong with the document (bad syntax, a truncated file,
    /// wrong value types, unusable thresholds) is [`CoverageError::Storage`],
    /// which the estimator treats as a cache miss.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(malformed)?;
        if let Some(map) = value.as_object() {
            if let Some(key) = map.keys().find(|k| !Self::FIELDS.contains(&k.as_str())) {
                return Err(CoverageError::UnknownParameter {
                    message: format!("unknown key '{}'", key),
                });
            }
        }
        let params: CityParameters = serde_json::from_value(value).map_err(malformed)?;
        params.validate().map_err(malformed)?;
        Ok(params)
    }

    /// Keys accepted in a parameter document.
    pub const FIELDS: &'static [&'static str] = &[
        "buffer_distance",
        "max_walking_speed",
        "min_walking_speed",
        "max_sinuosity",
        "max_direct_distance",
        "bbox",
    ];
}

fn malformed(e: impl std::fmt::Display) -> CoverageError {
    CoverageError::Storage {
        message: format!("malformed city parameters: {}", e),
    }
}

/// Cache key for a city: lower case, spaces to underscores, commas removed.
///
/// ```
/// use street_coverage::params::normalize_city_name;
/// assert_eq!(normalize_city_name("New York, NY"), "new_york_ny");
/// ```
pub fn normalize_city_name(city: &str) -> String {
    city.to_lowercase().replace(' ', "_").replace(',', "")
}

/// Cities with hand-tuned parameters.
pub const LEGACY_CITIES: &[&str] = &["new_york", "london"];

/// Hand-tuned parameters for a legacy city, matched by normalized name.
pub fn legacy_parameters(city: &str) -> Option<CityParameters> {
    match normalize_city_name(city).as_str() {
        "new_york" => Some(CityParameters {
            buffer_distance: 5.0,
            bbox: Some(Bounds::new(-74.3, 40.5, -73.7, 40.9)),
            ..CityParameters::default()
        }),
        "london" => Some(CityParameters {
            buffer_distance: 8.0,
            bbox: Some(Bounds::new(-0.6, 51.1, 0.4, 51.8)),
            ..CityParameters::default()
        }),
        _ => None,
    }
}

// ============================================================================
// Parameter Stores
// ============================================================================

/// Persistence for estimated parameters, keyed by normalized city name.
///
/// Owned by the caller and handed to the estimator for each lookup.
pub trait ParameterStore {
    /// Stored parameters for `key`, `None` on a miss.
    fn get(&self, key: &str) -> Result<Option<CityParameters>>;

    /// Store parameters for `key`, replacing any previous entry.
    fn put(&mut self, key: &str, params: &CityParameters) -> Result<()>;

    /// Remove the entry for `key`. Missing entries are not an error.
    fn invalidate(&mut self, key: &str) -> Result<()>;
}

/// In-memory store, lives as long as the value.
#[derive(Debug, Clone, Default)]
pub struct MemoryParameterStore {
    entries: HashMap<String, CityParameters>,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ParameterStore for MemoryParameterStore {
    fn get(&self, key: &str) -> Result<Option<CityParameters>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, params: &CityParameters) -> Result<()> {
        self.entries.insert(key.to_string(), params.clone());
        Ok(())
    }

    fn invalidate(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Directory of `<key>_params.json` files.
#[derive(Debug, Clone)]
pub struct JsonFileParameterStore {
    dir: PathBuf,
}

impl JsonFileParameterStore {
    /// Use `dir` for parameter files. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}_params.json", key))
    }
}

fn storage_error(path: &Path, e: impl std::fmt::Display) -> CoverageError {
    CoverageError::Storage {
        message: format!("{}: {}", path.display(), e),
    }
}

impl ParameterStore for JsonFileParameterStore {
    fn get(&self, key: &str) -> Result<Option<CityParameters>> {
        let path = self.path_for(key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(&path, e)),
        };
        CityParameters::from_json(&text).map(Some).map_err(|e| match e {
            CoverageError::Storage { message } => storage_error(&path, message),
            other => other,
        })
    }

    fn put(&mut self, key: &str, params: &CityParameters) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| storage_error(&self.dir, e))?;
        let path = self.path_for(key);
        let text = serde_json::to_string_pretty(params).map_err(|e| storage_error(&path, e))?;
        fs::write(&path, text).map_err(|e| storage_error(&path, e))
    }

    fn invalidate(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(&path, e)),
        }
    }
}

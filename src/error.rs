//! Unified error handling for the street-coverage library.
//!
//! Errors fall into five groups, and callers react to each one differently:
//!
//! - **Input-malformed** (`TrackRead`, `InsufficientPoints`): the unit (a sample
//!   or a file) is skipped and counted, and the batch goes on.
//! - **Network-unavailable** (`NetworkUnavailable`, `Http`): recoverable. The
//!   parameter estimator falls back to default parameters.
//! - **Store-unavailable** (`Storage`): a parameter cache entry is unreadable
//!   or malformed. The estimator treats it as a miss and re-estimates.
//! - **Empty-result** (`EmptyStreetNetwork`): nothing to analyze. See
//!   [`CoverageError::is_nothing_to_do`].
//! - **Configuration-invalid** (`UnknownParameter`, `Config`, `UndefinedCrs`,
//!   `InconsistentCrs`, `UnsupportedCrs`): fatal, propagated immediately.

use thiserror::Error;

use crate::projection::Crs;

/// Unified error type for street-coverage operations.
#[derive(Debug, Clone, Error)]
pub enum CoverageError {
    /// Track has too few usable samples to form a polyline
    #[error("Track '{source_id}' has {point_count} valid points, minimum {minimum_required} required")]
    InsufficientPoints {
        source_id: String,
        point_count: usize,
        minimum_required: usize,
    },
    /// Track file could not be read or parsed
    #[error("Track file '{path}' could not be read: {message}")]
    TrackRead { path: String, message: String },
    /// Layer has no coordinate reference system
    #[error("Layer '{layer}' has no coordinate reference system; assign a default before projecting")]
    UndefinedCrs { layer: String },
    /// Declared CRS does not match the coordinates it describes
    #[error("Layer '{layer}' is declared as {crs} but contains out-of-range coordinates")]
    InconsistentCrs { layer: String, crs: Crs },
    /// EPSG code outside the supported set
    #[error("Unsupported coordinate reference system EPSG:{epsg}")]
    UnsupportedCrs { epsg: u32 },
    /// City parameter payload carries a key the library does not know
    #[error("Unrecognized city parameter: {message}")]
    UnknownParameter { message: String },
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
    /// Street network without any segment
    #[error("Street network '{name}' has no segments")]
    EmptyStreetNetwork { name: String },
    /// Street network could not be acquired
    #[error("Street network unavailable for '{place}': {message}")]
    NetworkUnavailable { place: String, message: String },
    /// Parameter store entry could not be read, parsed or written
    #[error("Parameter store error: {message}")]
    Storage { message: String },
    /// HTTP/API error
    #[error("HTTP error{}: {message}", .status_code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Http {
        message: String,
        status_code: Option<u16>,
    },
}

impl CoverageError {
    /// True for the empty-result condition (no streets to analyze).
    pub fn is_nothing_to_do(&self) -> bool {
        matches!(self, CoverageError::EmptyStreetNetwork { .. })
    }

    /// True for configuration errors, which must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoverageError::UnknownParameter { .. }
                | CoverageError::Config { .. }
                | CoverageError::UndefinedCrs { .. }
                | CoverageError::InconsistentCrs { .. }
                | CoverageError::UnsupportedCrs { .. }
        )
    }
}

/// Result type alias for street-coverage operations.
pub type Result<T> = std::result::Result<T, CoverageError>;

/// Extension trait for converting Option to CoverageError.
pub trait OptionExt<T> {
    /// Convert Option to Result with insufficient points error.
    fn ok_or_insufficient_points(
        self,
        source_id: &str,
        point_count: usize,
        minimum: usize,
    ) -> Result<T>;

    /// Convert Option to Result with undefined CRS error.
    fn ok_or_undefined_crs(self, layer: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient_points(
        self,
        source_id: &str,
        point_count: usize,
        minimum: usize,
    ) -> Result<T> {
        self.ok_or_else(|| CoverageError::InsufficientPoints {
            source_id: source_id.to_string(),
            point_count,
            minimum_required: minimum,
        })
    }

    fn ok_or_undefined_crs(self, layer: &str) -> Result<T> {
        self.ok_or_else(|| CoverageError::UndefinedCrs {
            layer: layer.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoverageError::InsufficientPoints {
            source_id: "walk-1".to_string(),
            point_count: 1,
            minimum_required: 2,
        };
        assert!(err.to_string().contains("walk-1"));
        assert!(err.to_string().contains("1 valid points"));

        let http = CoverageError::Http {
            message: "gateway".to_string(),
            status_code: Some(504),
        };
        assert_eq!(http.to_string(), "HTTP error (504): gateway");

        let http = CoverageError::Http {
            message: "connect".to_string(),
            status_code: None,
        };
        assert_eq!(http.to_string(), "HTTP error: connect");
    }

    #[test]
    fn test_error_classes() {
        let empty = CoverageError::EmptyStreetNetwork {
            name: "nowhere".to_string(),
        };
        assert!(empty.is_nothing_to_do());
        assert!(!empty.is_fatal());

        let crs = CoverageError::InconsistentCrs {
            layer: "streets".to_string(),
            crs: Crs::Wgs84,
        };
        assert!(crs.is_fatal());
        assert!(crs.to_string().contains("EPSG:4326"));

        let offline = CoverageError::NetworkUnavailable {
            place: "Springfield".to_string(),
            message: "timeout".to_string(),
        };
        assert!(!offline.is_fatal());
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_insufficient_points("walk", 0, 2);
        assert!(matches!(
            result,
            Err(CoverageError::InsufficientPoints { .. })
        ));

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_undefined_crs("streets"),
            Err(CoverageError::UndefinedCrs { .. })
        ));
    }
}

//! Street network model.
//!
//! A [`StreetNetwork`] is a named set of [`StreetSegment`]s tagged with the
//! coordinate reference system of their geometries. Segments never carry
//! coverage state; each analysis run produces fresh
//! [`SegmentCoverage`](crate::coverage::SegmentCoverage) values instead.

use std::collections::{HashMap, HashSet};
use std::fmt;

use geo::{Coord, LineString, Rect};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, OptionExt, Result};
use crate::geometry::{bounding_rect, line_length};
use crate::projection::{project, Crs};

/// Stable identifier of a street segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(String);

impl SegmentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SegmentId {
    fn from(value: &str) -> Self {
        SegmentId(value.to_string())
    }
}

impl From<String> for SegmentId {
    fn from(value: String) -> Self {
        SegmentId(value)
    }
}

impl From<u64> for SegmentId {
    fn from(value: u64) -> Self {
        SegmentId(value.to_string())
    }
}

impl From<usize> for SegmentId {
    fn from(value: usize) -> Self {
        SegmentId(value.to_string())
    }
}

/// A single street segment: a polyline between two graph nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct StreetSegment {
    pub id: SegmentId,
    pub geometry: LineString<f64>,
    /// Endpoint node ids, when the source provides them.
    pub nodes: Option<(u64, u64)>,
}

impl StreetSegment {
    /// Create a segment without node ids.
    pub fn new(id: impl Into<SegmentId>, geometry: LineString<f64>) -> Self {
        Self {
            id: id.into(),
            geometry,
            nodes: None,
        }
    }

    /// Attach endpoint node ids.
    pub fn with_nodes(mut self, from: u64, to: u64) -> Self {
        self.nodes = Some((from, to));
        self
    }

    /// Length in the units of the network CRS.
    pub fn length(&self) -> f64 {
        line_length(&self.geometry)
    }
}

/// Identity of a graph node used for degree counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// Node id supplied by the network source.
    Id(u64),
    /// Endpoint coordinate quantized to 1e-7 units.
    Position(i64, i64),
}

impl NodeKey {
    fn at(coord: Coord<f64>) -> Self {
        NodeKey::Position((coord.x * 1e7).round() as i64, (coord.y * 1e7).round() as i64)
    }
}

/// A named collection of street segments.
#[derive(Debug, Clone)]
pub struct StreetNetwork {
    name: String,
    crs: Option<Crs>,
    segments: Vec<StreetSegment>,
}

impl StreetNetwork {
    /// Build a network. Segment ids must be unique. Segments with fewer
    /// than two coordinates are dropped with a warning.
    pub fn new(name: impl Into<String>, crs: Option<Crs>, segments: Vec<StreetSegment>) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::with_capacity(segments.len());
        for segment in &segments {
            if !seen.insert(segment.id.clone()) {
                return Err(CoverageError::Config {
                    message: format!("duplicate street segment id '{}' in '{}'", segment.id, name),
                });
            }
        }

        let before = segments.len();
        let segments: Vec<StreetSegment> = segments
            .into_iter()
            .filter(|s| s.geometry.0.len() >= 2)
            .collect();
        if segments.len() < before {
            warn!(
                "[Network] '{}': dropped {} segments with fewer than 2 coordinates",
                name,
                before - segments.len()
            );
        }

        Ok(Self { name, crs, segments })
    }

    /// Combine several networks into one, keeping the first CRS.
    ///
    /// All parts are reprojected to the CRS of the first part. Neighbouring
    /// areas share their border streets, so a segment id already taken by an
    /// earlier part is the same street and is dropped.
    pub fn merge(name: impl Into<String>, parts: Vec<StreetNetwork>) -> Result<Self> {
        let name = name.into();
        let crs = match parts.first() {
            Some(first) => Some(first.require_crs()?),
            None => None,
        };
        let mut seen: HashSet<SegmentId> = HashSet::new();
        let mut segments = Vec::new();
        let mut duplicates = 0;
        for part in parts {
            let part = match crs {
                Some(target) => part.to_crs(target)?,
                None => part,
            };
            for segment in part.segments {
                if seen.insert(segment.id.clone()) {
                    segments.push(segment);
                } else {
                    duplicates += 1;
                }
            }
        }
        if duplicates > 0 {
            debug!("[Network] '{}': merged away {} shared segments", name, duplicates);
        }
        Self::new(name, crs, segments)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn crs(&self) -> Option<Crs> {
        self.crs
    }

    pub fn segments(&self) -> &[StreetSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Assign `crs` when the network has none.
    pub fn with_default_crs(mut self, crs: Crs) -> Self {
        if self.crs.is_none() {
            self.crs = Some(crs);
        }
        self
    }

    /// The network CRS, or `UndefinedCrs`.
    pub fn require_crs(&self) -> Result<Crs> {
        self.crs.ok_or_undefined_crs(&self.name)
    }

    /// Fail with `EmptyStreetNetwork` when there is nothing to analyze.
    pub fn require_segments(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(CoverageError::EmptyStreetNetwork {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Reproject every segment to `target`.
    ///
    /// Fails when the network has no CRS, or when its coordinates are not
    /// plausible for the CRS it declares.
    pub fn to_crs(&self, target: Crs) -> Result<StreetNetwork> {
        let source = self.require_crs()?;
        let consistent = self
            .segments
            .iter()
            .flat_map(|s| s.geometry.coords())
            .all(|c| source.accepts(*c));
        if !consistent {
            return Err(CoverageError::InconsistentCrs {
                layer: self.name.clone(),
                crs: source,
            });
        }

        let segments = self
            .segments
            .iter()
            .map(|s| StreetSegment {
                id: s.id.clone(),
                geometry: project(&s.geometry, source, target),
                nodes: s.nodes,
            })
            .collect();

        Ok(StreetNetwork {
            name: self.name.clone(),
            crs: Some(target),
            segments,
        })
    }

    /// Bounding rectangle in the network CRS.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        bounding_rect(self.segments.iter().map(|s| &s.geometry))
    }

    /// Sum of segment lengths in the network CRS.
    pub fn total_length(&self) -> f64 {
        self.segments.iter().map(StreetSegment::length).sum()
    }

    /// Number of street segments incident to each node.
    ///
    /// Uses explicit node ids where a segment has them, endpoint coordinates
    /// otherwise. A loop counts twice at its node.
    pub fn node_street_counts(&self) -> HashMap<NodeKey, u32> {
        let mut counts: HashMap<NodeKey, u32> = HashMap::new();
        for segment in &self.segments {
            let (from, to) = match segment.nodes {
                Some((a, b)) => (NodeKey::Id(a), NodeKey::Id(b)),
                None => {
                    let coords = &segment.geometry.0;
                    match (coords.first(), coords.last()) {
                        (Some(a), Some(b)) => (NodeKey::at(*a), NodeKey::at(*b)),
                        _ => continue,
                    }
                }
            };
            *counts.entry(from).or_insert(0) += 1;
            *counts.entry(to).or_insert(0) += 1;
        }
        counts
    }
}

//! Street networks from the OpenStreetMap Overpass API.
//!
//! The payload model and the way-splitting are always available. The HTTP
//! client ([`OverpassSource`]) needs the `http` feature.
//!
//! Ways are split at every node shared with another kept way (or visited
//! twice by the same way). This yields one segment per street stretch
//! between intersections. Segment `k` of way `w` has id `"w:k"` and its
//! endpoint node ids as [`StreetSegment::nodes`].

use std::collections::HashMap;

use geo::{Coord, LineString};
use log::{debug, warn};
use serde::Deserialize;

use crate::error::{CoverageError, Result};
use crate::network::{StreetNetwork, StreetSegment};
use crate::projection::Crs;

/// Public Overpass endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

/// `highway` values that are not drivable streets.
const EXCLUDED_HIGHWAYS: &[&str] = &[
    "abandoned",
    "bridleway",
    "bus_guideway",
    "construction",
    "corridor",
    "cycleway",
    "elevator",
    "escalator",
    "footway",
    "path",
    "pedestrian",
    "planned",
    "platform",
    "proposed",
    "raceway",
    "service",
    "steps",
    "track",
];

/// Overpass JSON response.
#[derive(Debug, Clone, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<Element>,
}

/// One OSM element.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Node {
        id: u64,
        lat: f64,
        lon: f64,
    },
    Way {
        id: u64,
        #[serde(default)]
        nodes: Vec<u64>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

/// True when a way's tags describe a drivable public street.
pub fn is_drivable(tags: &HashMap<String, String>) -> bool {
    let tag = |k: &str| tags.get(k).map(String::as_str);
    match tag("highway") {
        Some(h) if !EXCLUDED_HIGHWAYS.contains(&h) => {}
        _ => return false,
    }
    if tag("area") == Some("yes") || tag("access") == Some("private") {
        return false;
    }
    !matches!(tag("motor_vehicle"), Some("no")) && !matches!(tag("motorcar"), Some("no"))
}

/// Overpass QL for the drivable streets inside the area named `place`.
pub fn street_query(place: &str, timeout_secs: u64) -> String {
    let escaped = place.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "[out:json][timeout:{timeout}];\
         area[\"name\"=\"{place}\"]->.searchArea;\
         way[\"highway\"][\"area\"!~\"yes\"](area.searchArea);\
         (._;>;);\
         out body;",
        timeout = timeout_secs.max(1),
        place = escaped
    )
}

/// Parse an Overpass JSON body into a WGS84 street network.
pub fn parse_overpass(name: &str, body: &str) -> Result<StreetNetwork> {
    let response: OverpassResponse = serde_json::from_str(body).map_err(|e| CoverageError::NetworkUnavailable {
        place: name.to_string(),
        message: format!("invalid Overpass response: {}", e),
    })?;
    network_from_response(name, &response)
}

/// Split the drivable ways of `response` into street segments.
pub fn network_from_response(name: &str, response: &OverpassResponse) -> Result<StreetNetwork> {
    let mut positions: HashMap<u64, Coord<f64>> = HashMap::new();
    let mut ways: Vec<(u64, &[u64])> = Vec::new();
    for element in &response.elements {
        match element {
            Element::Node { id, lat, lon } => {
                positions.insert(*id, Coord { x: *lon, y: *lat });
            }
            Element::Way { id, nodes, tags } if is_drivable(tags) && nodes.len() >= 2 => {
                ways.push((*id, nodes.as_slice()));
            }
            _ => {}
        }
    }

    // Node visits across all kept ways; a node visited twice is a junction.
    let mut visits: HashMap<u64, u32> = HashMap::new();
    for (_, nodes) in &ways {
        for node in *nodes {
            *visits.entry(*node).or_insert(0) += 1;
        }
    }

    let mut segments = Vec::new();
    let mut incomplete = 0;
    for (way_id, nodes) in &ways {
        let coords: Option<Vec<Coord<f64>>> = nodes.iter().map(|n| positions.get(n).copied()).collect();
        let Some(coords) = coords else {
            incomplete += 1;
            continue;
        };

        let mut start = 0;
        let mut k = 0;
        for i in 1..nodes.len() {
            let is_last = i == nodes.len() - 1;
            if is_last || visits.get(&nodes[i]).copied().unwrap_or(0) > 1 {
                let line = LineString::from(coords[start..=i].to_vec());
                segments.push(
                    StreetSegment::new(format!("{}:{}", way_id, k), line).with_nodes(nodes[start], nodes[i]),
                );
                k += 1;
                start = i;
            }
        }
    }

    if incomplete > 0 {
        warn!("[Overpass] {}: dropped {} ways with missing node positions", name, incomplete);
    }
    debug!(
        "[Overpass] {}: {} drivable ways split into {} segments",
        name,
        ways.len(),
        segments.len()
    );
    StreetNetwork::new(name, Some(Crs::Wgs84), segments)
}

/// Merge per-area fetch results into one network named `name`.
///
/// Failed areas are logged and left out. Fails only when no area succeeded,
/// with the error of the last failed area.
pub fn merge_areas<P: AsRef<str>>(name: &str, results: Vec<(P, Result<StreetNetwork>)>) -> Result<StreetNetwork> {
    let total = results.len();
    let mut parts = Vec::with_capacity(total);
    let mut last_error = None;
    for (place, result) in results {
        match result {
            Ok(network) => parts.push(network),
            Err(e) => {
                warn!("[Overpass] Skipping area '{}' of '{}': {}", place.as_ref(), name, e);
                last_error = Some(e);
            }
        }
    }
    if parts.is_empty() {
        return Err(last_error.unwrap_or_else(|| CoverageError::Config {
            message: format!("no areas given for '{}'", name),
        }));
    }
    if parts.len() < total {
        warn!("[Overpass] '{}': using {} of {} areas", name, parts.len(), total);
    }
    StreetNetwork::merge(name, parts)
}

#[cfg(feature = "http")]
pub use client::OverpassSource;

#[cfg(feature = "http")]
mod client {
    use std::time::{Duration, Instant};

    use futures::stream::{self, StreamExt};
    use log::{info, warn};
    use reqwest::Client;

    use super::{merge_areas, parse_overpass, street_query, DEFAULT_ENDPOINT};
    use crate::error::{CoverageError, Result};
    use crate::estimator::NetworkSource;
    use crate::network::StreetNetwork;

    /// Concurrent requests when fetching several areas.
    const MAX_CONCURRENCY: usize = 2;

    /// [`NetworkSource`] backed by an Overpass endpoint.
    ///
    /// The blocking entry points start their own tokio runtime and must not
    /// be called from inside one. Use the `*_async` methods there.
    #[derive(Debug, Clone)]
    pub struct OverpassSource {
        client: Client,
        endpoint: String,
    }

    impl OverpassSource {
        /// Source using the public endpoint.
        pub fn new() -> Result<Self> {
            Self::with_endpoint(DEFAULT_ENDPOINT)
        }

        pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
            let client = Client::builder()
                .pool_idle_timeout(Duration::from_secs(60))
                .tcp_keepalive(Duration::from_secs(30))
                .user_agent(concat!("street-coverage/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| CoverageError::Http {
                    message: format!("Failed to create HTTP client: {}", e),
                    status_code: None,
                })?;
            Ok(Self {
                client,
                endpoint: endpoint.into(),
            })
        }

        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }

        /// Fetch the drivable streets of one area.
        pub async fn fetch_async(&self, place: &str, timeout: Duration) -> Result<StreetNetwork> {
            let start = Instant::now();
            let query = street_query(place, timeout.as_secs());
            let response = self
                .client
                .post(&self.endpoint)
                .timeout(timeout)
                .form(&[("data", query.as_str())])
                .send()
                .await
                .map_err(|e| CoverageError::NetworkUnavailable {
                    place: place.to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(CoverageError::Http {
                    message: format!("Overpass request for '{}' failed", place),
                    status_code: Some(status.as_u16()),
                });
            }

            let body = response.text().await.map_err(|e| CoverageError::NetworkUnavailable {
                place: place.to_string(),
                message: format!("Body download error: {}", e),
            })?;
            let network = parse_overpass(place, &body)?;
            info!(
                "[Overpass] {}: {} segments ({:.1}KB) in {:.2}s",
                place,
                network.len(),
                body.len() as f64 / 1024.0,
                start.elapsed().as_secs_f64()
            );
            Ok(network)
        }

        /// Fetch several areas and merge them into one network named `name`.
        ///
        /// Areas that fail are skipped (see [`merge_areas`]). Fails if every
        /// area fails, or if no area is given.
        pub async fn fetch_places_async(&self, name: &str, places: &[String], timeout: Duration) -> Result<StreetNetwork> {
            if places.is_empty() {
                return Err(CoverageError::Config {
                    message: format!("no areas given for '{}'", name),
                });
            }

            let results: Vec<Result<StreetNetwork>> = stream::iter(places)
                .map(|place| self.fetch_async(place, timeout))
                .buffered(MAX_CONCURRENCY)
                .collect()
                .await;

            merge_areas(name, places.iter().zip(results).collect())
        }

        /// Blocking form of [`fetch_places_async`](Self::fetch_places_async).
        pub fn fetch_places(&self, name: &str, places: &[String], timeout: Duration) -> Result<StreetNetwork> {
            block_on(self.fetch_places_async(name, places, timeout))
        }
    }

    impl NetworkSource for OverpassSource {
        fn fetch_network(&self, place: &str, timeout: Duration) -> Result<StreetNetwork> {
            block_on(self.fetch_async(place, timeout))
        }
    }

    fn block_on<F: std::future::Future<Output = Result<StreetNetwork>>>(future: F) -> Result<StreetNetwork> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                warn!("[Overpass] Failed to create tokio runtime: {}", e);
                CoverageError::Http {
                    message: format!("Failed to create runtime: {}", e),
                    status_code: None,
                }
            })?;
        rt.block_on(future)
    }

}

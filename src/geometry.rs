//! # Geometric Primitives
//!
//! Planar geometry used by the classifier, the parameter estimator and the
//! coverage matcher. All inputs are expected in a metric CRS (see
//! [`crate::projection`]).
//!
//! ## Overview
//!
//! | Item | Description |
//! |------|-------------|
//! | [`line_length`] | Euclidean length of a polyline |
//! | [`convex_hull_area`] | Area of the convex hull of a set of polylines |
//! | [`buffer`] / [`buffer_all`] | Corridor around one or many polylines |
//! | [`Corridor::clip`] | Pieces of a polyline inside a corridor |
//! | [`SpatialIndex`] | R-tree over bounding boxes with candidate queries |
//!
//! ## Example
//!
//! ```rust
//! use street_coverage::geometry::{buffer, line_length};
//! use geo::{coord, LineString};
//!
//! let walk = LineString::from(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 100.0, y: 0.0 }]);
//! let street = LineString::from(vec![coord! { x: 50.0, y: -50.0 }, coord! { x: 50.0, y: 50.0 }]);
//!
//! let corridor = buffer(&walk, 5.0);
//! let pieces = corridor.clip(&street);
//! assert_eq!(pieces.len(), 1);
//! assert!((line_length(&pieces[0]) - 10.0).abs() < 1e-9);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Corridors
//!
//! A corridor is the Minkowski sum of a polyline with a disk of radius `r`. It
//! is represented exactly as the union of one *capsule* (stadium) per polyline
//! edge. Capsules are kept in an R-tree so that clipping a long street against
//! a long walk only touches nearby edges.
//!
//! ### Clipping
//!
//! A street edge `P(t) = A + t(B - A)` meets a convex capsule in a single
//! parameter interval. That interval is the hull of three pieces: the two end
//! disks (quadratic in `t`) and the rectangle between them (two linear slabs).
//! Intervals from every capsule are merged per edge. Pieces that run
//! across a vertex are joined into one polyline.

use geo::{Area, BoundingRect, ConvexHull, Coord, LineString, MultiPoint, Point, Rect};
use rstar::{RTree, RTreeObject, AABB};

/// Tolerance on edge parameters when merging intervals and joining pieces.
const PARAM_EPSILON: f64 = 1e-12;

// =============================================================================
// Measures
// =============================================================================

/// Euclidean length of a polyline, in the units of its CRS.
///
/// # Example
///
/// ```rust
/// use street_coverage::geometry::line_length;
/// use geo::{coord, LineString};
///
/// let line = LineString::from(vec![
///     coord! { x: 0.0, y: 0.0 },
///     coord! { x: 3.0, y: 4.0 },
///     coord! { x: 3.0, y: 10.0 },
/// ]);
/// assert!((line_length(&line) - 11.0).abs() < 1e-12);
/// ```
pub fn line_length(line: &LineString<f64>) -> f64 {
    line.0
        .windows(2)
        .map(|w| distance(w[0], w[1]))
        .sum()
}

/// Distance between two coordinates.
#[inline]
pub fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Bounding rectangle of a set of polylines.
pub fn bounding_rect<'a, I>(lines: I) -> Option<Rect<f64>>
where
    I: IntoIterator<Item = &'a LineString<f64>>,
{
    lines
        .into_iter()
        .filter_map(|l| l.bounding_rect())
        .reduce(|a, b| union_rect(&a, &b))
}

/// Smallest rectangle containing both inputs.
pub fn union_rect(a: &Rect<f64>, b: &Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

/// Grow a rectangle by `margin` on every side.
pub fn expand_rect(rect: &Rect<f64>, margin: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: rect.min().x - margin,
            y: rect.min().y - margin,
        },
        Coord {
            x: rect.max().x + margin,
            y: rect.max().y + margin,
        },
    )
}

/// True when two rectangles share at least one point.
#[inline]
pub fn rects_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

/// Area of the convex hull of all coordinates in `lines`.
///
/// Returns 0 for fewer than three non-collinear coordinates.
pub fn convex_hull_area<'a, I>(lines: I) -> f64
where
    I: IntoIterator<Item = &'a LineString<f64>>,
{
    let points: Vec<Point<f64>> = lines
        .into_iter()
        .flat_map(|l| l.coords().map(|c| Point::from(*c)))
        .collect();
    if points.len() < 3 {
        return 0.0;
    }
    MultiPoint::from(points).convex_hull().unsigned_area()
}

#[inline]
fn rect_to_aabb(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

// =============================================================================
// Corridors
// =============================================================================

/// One buffered polyline edge: all points within `radius` of segment `start..end`.
#[derive(Debug, Clone)]
struct Capsule {
    start: Coord<f64>,
    end: Coord<f64>,
    radius: f64,
}

impl RTreeObject for Capsule {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [
                self.start.x.min(self.end.x) - self.radius,
                self.start.y.min(self.end.y) - self.radius,
            ],
            [
                self.start.x.max(self.end.x) + self.radius,
                self.start.y.max(self.end.y) + self.radius,
            ],
        )
    }
}

impl Capsule {
    /// Parameter interval of `a + t (b - a)` inside this capsule, unclamped.
    fn interval(&self, a: Coord<f64>, b: Coord<f64>) -> Option<(f64, f64)> {
        let d = b - a;
        let mut hull: Option<(f64, f64)> = None;
        let mut extend = |iv: Option<(f64, f64)>| {
            if let Some((lo, hi)) = iv {
                hull = Some(match hull {
                    Some((l, h)) => (l.min(lo), h.max(hi)),
                    None => (lo, hi),
                });
            }
        };

        extend(disk_interval(a, d, self.start, self.radius));
        extend(disk_interval(a, d, self.end, self.radius));

        let u = self.end - self.start;
        let u_len2 = u.x * u.x + u.y * u.y;
        if u_len2 > 0.0 {
            let w = a - self.start;
            // Projection onto the capsule axis must stay within the edge.
            let along = slab_interval(dot(w, u), dot(d, u), 0.0, u_len2);
            // Perpendicular offset must stay within the radius.
            let half_width = self.radius * u_len2.sqrt();
            let across = slab_interval(cross(u, w), cross(u, d), -half_width, half_width);
            extend(intersect(along, across));
        }
        hull
    }
}

#[inline]
fn dot(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x * b.x + a.y * b.y
}

#[inline]
fn cross(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Values of `t` with `|a + t d - center| <= radius`.
fn disk_interval(a: Coord<f64>, d: Coord<f64>, center: Coord<f64>, radius: f64) -> Option<(f64, f64)> {
    let w = a - center;
    let qa = dot(d, d);
    let qb = 2.0 * dot(d, w);
    let qc = dot(w, w) - radius * radius;
    if qa == 0.0 {
        return if qc <= 0.0 {
            Some((f64::NEG_INFINITY, f64::INFINITY))
        } else {
            None
        };
    }
    let disc = qb * qb - 4.0 * qa * qc;
    if disc < 0.0 {
        return None;
    }
    let root = disc.sqrt();
    Some(((-qb - root) / (2.0 * qa), (-qb + root) / (2.0 * qa)))
}

/// Values of `t` with `lo <= offset + t slope <= hi`.
fn slab_interval(offset: f64, slope: f64, lo: f64, hi: f64) -> Option<(f64, f64)> {
    if slope == 0.0 {
        return if offset >= lo && offset <= hi {
            Some((f64::NEG_INFINITY, f64::INFINITY))
        } else {
            None
        };
    }
    let t1 = (lo - offset) / slope;
    let t2 = (hi - offset) / slope;
    Some((t1.min(t2), t1.max(t2)))
}

fn intersect(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> Option<(f64, f64)> {
    let (a0, a1) = a?;
    let (b0, b1) = b?;
    let lo = a0.max(b0);
    let hi = a1.min(b1);
    (lo <= hi).then_some((lo, hi))
}

/// The area within a fixed distance of one or more polylines.
///
/// Built with [`buffer`] or [`buffer_all`].
#[derive(Debug, Clone)]
pub struct Corridor {
    capsules: RTree<Capsule>,
    bounds: Option<Rect<f64>>,
}

/// Buffer a single polyline by `radius`.
pub fn buffer(line: &LineString<f64>, radius: f64) -> Corridor {
    buffer_all(std::iter::once(line), radius)
}

/// Buffer the union of several polylines by `radius`.
///
/// A polyline with a single coordinate contributes a disk.
pub fn buffer_all<'a, I>(lines: I, radius: f64) -> Corridor
where
    I: IntoIterator<Item = &'a LineString<f64>>,
{
    let radius = radius.max(0.0);
    let mut capsules = Vec::new();
    let mut bounds: Option<Rect<f64>> = None;

    for line in lines {
        match line.0.len() {
            0 => continue,
            1 => capsules.push(Capsule {
                start: line.0[0],
                end: line.0[0],
                radius,
            }),
            _ => capsules.extend(line.0.windows(2).map(|w| Capsule {
                start: w[0],
                end: w[1],
                radius,
            })),
        }
        if let Some(rect) = line.bounding_rect() {
            bounds = Some(match bounds {
                Some(b) => union_rect(&b, &rect),
                None => rect,
            });
        }
    }

    Corridor {
        capsules: RTree::bulk_load(capsules),
        bounds: bounds.map(|b| expand_rect(&b, radius)),
    }
}

impl Corridor {
    /// Bounding rectangle of the corridor, `None` when it is empty.
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.bounds
    }

    /// True when the corridor covers no area and no point.
    pub fn is_empty(&self) -> bool {
        self.capsules.size() == 0
    }

    /// Pieces of `line` that lie inside the corridor.
    ///
    /// Pieces are returned in the order they occur along `line`. A piece that
    /// continues across a vertex of `line` is returned as one polyline.
    /// Zero-length touches are dropped.
    pub fn clip(&self, line: &LineString<f64>) -> Vec<LineString<f64>> {
        let mut pieces = Vec::new();
        let mut current: Vec<Coord<f64>> = Vec::new();

        for edge in line.0.windows(2) {
            let (a, b) = (edge[0], edge[1]);
            let d = b - a;
            if d.x == 0.0 && d.y == 0.0 {
                continue;
            }

            let intervals = self.edge_intervals(a, b);
            if intervals.is_empty() {
                flush(&mut current, &mut pieces);
                continue;
            }

            for (t0, t1) in intervals {
                let continues = t0 <= PARAM_EPSILON && !current.is_empty();
                if !continues {
                    flush(&mut current, &mut pieces);
                    current.push(a + d * t0);
                }
                if t1 >= 1.0 - PARAM_EPSILON {
                    current.push(b);
                } else {
                    current.push(a + d * t1);
                    flush(&mut current, &mut pieces);
                }
            }
        }
        flush(&mut current, &mut pieces);
        pieces
    }

    /// Merged, clamped parameter intervals of edge `a..b` inside the corridor.
    fn edge_intervals(&self, a: Coord<f64>, b: Coord<f64>) -> Vec<(f64, f64)> {
        let envelope = AABB::from_corners(
            [a.x.min(b.x), a.y.min(b.y)],
            [a.x.max(b.x), a.y.max(b.y)],
        );
        let mut intervals: Vec<(f64, f64)> = self
            .capsules
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|capsule| capsule.interval(a, b))
            .filter_map(|(lo, hi)| {
                let lo = lo.max(0.0);
                let hi = hi.min(1.0);
                (lo <= hi).then_some((lo, hi))
            })
            .collect();

        intervals.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.total_cmp(&y.1)));

        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(intervals.len());
        for (lo, hi) in intervals {
            match merged.last_mut() {
                Some(last) if lo <= last.1 + PARAM_EPSILON => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }
        merged
    }
}

/// Close the open piece, keeping it only if it has positive length.
fn flush(current: &mut Vec<Coord<f64>>, pieces: &mut Vec<LineString<f64>>) {
    if current.len() >= 2 {
        let piece = LineString::from(std::mem::take(current));
        if line_length(&piece) > 0.0 {
            pieces.push(piece);
        }
    } else {
        current.clear();
    }
}

// =============================================================================
// Spatial Index
// =============================================================================

#[derive(Debug, Clone)]
struct IndexedRect {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedRect {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over the bounding rectangles of a collection of geometries.
///
/// Answers "which items might touch this rectangle". It is a broad phase
/// only: callers still run the exact test on each candidate.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    tree: RTree<IndexedRect>,
}

impl SpatialIndex {
    /// Index rectangles by their position in the input. `None` entries
    /// (empty geometries) are never returned as candidates.
    pub fn from_rects<I>(rects: I) -> Self
    where
        I: IntoIterator<Item = Option<Rect<f64>>>,
    {
        let items: Vec<IndexedRect> = rects
            .into_iter()
            .enumerate()
            .filter_map(|(index, rect)| {
                rect.map(|r| IndexedRect {
                    index,
                    envelope: rect_to_aabb(&r),
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    /// Index polylines by their bounding rectangles.
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a LineString<f64>>,
    {
        Self::from_rects(lines.into_iter().map(|l| l.bounding_rect()))
    }

    /// Indices of items whose rectangle intersects `rect`, ascending.
    pub fn query_candidates(&self, rect: &Rect<f64>) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&rect_to_aabb(rect))
            .map(|item| item.index)
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    /// Number of indexed items.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================

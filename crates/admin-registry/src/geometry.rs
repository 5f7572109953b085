//! Planar polygon geometry in geographic coordinates (x = longitude, y = latitude).
//!
//! Only what the pipeline needs: ring repair, point location with an explicit
//! boundary case, bounding boxes, and area/centroid computed in Web Mercator.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Tolerance for "point lies on a segment" tests, in degrees.
pub const BOUNDARY_EPS: f64 = 1e-10;

/// WGS84 semi-major axis used by EPSG:3857 (metres)
const MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// Web Mercator latitude limit
const MERCATOR_MAX_LAT: f64 = 85.051_128_78;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Closed ring: first vertex repeated as the last one.
pub type Ring = Vec<Coord>;

/// Where a point lies relative to an areal geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Interior,
    Boundary,
    Exterior,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn extend(&mut self, c: Coord) {
        self.min_x = self.min_x.min(c.x);
        self.min_y = self.min_y.min(c.y);
        self.max_x = self.max_x.max(c.x);
        self.max_y = self.max_y.max(c.y);
    }

    /// Inclusive containment, padded by `eps`
    pub fn contains(&self, c: Coord, eps: f64) -> bool {
        c.x >= self.min_x - eps
            && c.x <= self.max_x + eps
            && c.y >= self.min_y - eps
            && c.y <= self.max_y + eps
    }

    pub fn intersects(&self, other: &BoundingBox, eps: f64) -> bool {
        self.min_x <= other.max_x + eps
            && other.min_x <= self.max_x + eps
            && self.min_y <= other.max_y + eps
            && other.min_y <= self.max_y + eps
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Ring,
    pub holes: Vec<Ring>,
}

impl Polygon {
    /// Repair raw rings into valid polygons.
    ///
    /// Drops non-finite and consecutive duplicate vertices and closes rings.
    /// Rings that cross themselves are split at each crossing into simple
    /// loops; a bow-tie becomes two triangles. Zero-area loops are dropped.
    /// Each exterior loop becomes its own polygon (counter-clockwise); hole
    /// loops (clockwise) go to the first part that contains them, and are
    /// dropped when none does. Empty when no exterior loop survives.
    pub fn repaired(exterior: Vec<Coord>, holes: Vec<Vec<Coord>>) -> Vec<Self> {
        let mut parts: Vec<Polygon> = repair_ring(exterior)
            .into_iter()
            .map(|mut ring| {
                if signed_area(&ring) < 0.0 {
                    ring.reverse();
                }
                Polygon {
                    exterior: ring,
                    holes: Vec::new(),
                }
            })
            .collect();

        for mut hole in holes.into_iter().flat_map(repair_ring) {
            if signed_area(&hole) > 0.0 {
                hole.reverse();
            }
            if let Some(owner) = parts
                .iter_mut()
                .find(|p| locate_in_ring(hole[0], &p.exterior) != Location::Exterior)
            {
                owner.holes.push(hole);
            }
        }
        parts
    }

    pub fn bbox(&self) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        for c in &self.exterior {
            bb.extend(*c);
        }
        bb
    }

    pub fn locate(&self, p: Coord) -> Location {
        match locate_in_ring(p, &self.exterior) {
            Location::Exterior => Location::Exterior,
            Location::Boundary => Location::Boundary,
            Location::Interior => {
                for hole in &self.holes {
                    match locate_in_ring(p, hole) {
                        Location::Interior => return Location::Exterior,
                        Location::Boundary => return Location::Boundary,
                        Location::Exterior => {}
                    }
                }
                Location::Interior
            }
        }
    }

    pub fn rings(&self) -> impl Iterator<Item = &Ring> {
        std::iter::once(&self.exterior).chain(self.holes.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiPolygon(pub Vec<Polygon>);

impl MultiPolygon {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.0
    }

    pub fn extend(&mut self, other: MultiPolygon) {
        self.0.extend(other.0);
    }

    /// Axis-aligned single-part rectangle; empty if it has no area.
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        let ring = vec![
            Coord::new(min_x, min_y),
            Coord::new(max_x, min_y),
            Coord::new(max_x, max_y),
            Coord::new(min_x, max_y),
        ];
        Self(Polygon::repaired(ring, vec![]))
    }

    pub fn bbox(&self) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        for poly in &self.0 {
            for c in &poly.exterior {
                bb.extend(*c);
            }
        }
        bb
    }

    /// Interior wins over boundary across parts.
    pub fn locate(&self, p: Coord) -> Location {
        let mut on_boundary = false;
        for poly in &self.0 {
            match poly.locate(p) {
                Location::Interior => return Location::Interior,
                Location::Boundary => on_boundary = true,
                Location::Exterior => {}
            }
        }
        if on_boundary {
            Location::Boundary
        } else {
            Location::Exterior
        }
    }

    /// Area in km² measured in EPSG:3857
    pub fn projected_area_km2(&self) -> f64 {
        let mut total = 0.0;
        for poly in &self.0 {
            for ring in poly.rings() {
                let projected: Vec<Coord> = ring.iter().map(|c| to_mercator(*c)).collect();
                total += signed_area(&projected);
            }
        }
        total.abs() / 1e6
    }

    /// Area-weighted centroid computed in EPSG:3857, returned as lon/lat.
    pub fn projected_centroid(&self) -> Option<Coord> {
        let origin = self.0.first()?.exterior.first().map(|c| to_mercator(*c))?;

        let mut area_sum = 0.0;
        let mut cx_sum = 0.0;
        let mut cy_sum = 0.0;
        let mut vertex_sum = Coord::new(0.0, 0.0);
        let mut vertex_count = 0usize;

        for poly in &self.0 {
            for ring in poly.rings() {
                let pts: Vec<Coord> = ring
                    .iter()
                    .map(|c| {
                        let m = to_mercator(*c);
                        Coord::new(m.x - origin.x, m.y - origin.y)
                    })
                    .collect();
                for w in pts.windows(2) {
                    let cross = w[0].x * w[1].y - w[1].x * w[0].y;
                    area_sum += cross;
                    cx_sum += (w[0].x + w[1].x) * cross;
                    cy_sum += (w[0].y + w[1].y) * cross;
                    vertex_sum.x += w[0].x;
                    vertex_sum.y += w[0].y;
                    vertex_count += 1;
                }
            }
        }

        let local = if area_sum.abs() > f64::EPSILON {
            Coord::new(cx_sum / (3.0 * area_sum), cy_sum / (3.0 * area_sum))
        } else if vertex_count > 0 {
            Coord::new(
                vertex_sum.x / vertex_count as f64,
                vertex_sum.y / vertex_count as f64,
            )
        } else {
            return None;
        };

        Some(from_mercator(Coord::new(local.x + origin.x, local.y + origin.y)))
    }
}

/// Shoelace signed area of a closed ring (positive = counter-clockwise)
pub fn signed_area(ring: &[Coord]) -> f64 {
    ring.windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum::<f64>()
        / 2.0
}

/// Dedup, drop non-finite vertices and close; `None` below three vertices.
fn clean_ring(raw: Vec<Coord>) -> Option<Ring> {
    let mut ring: Ring = Vec::with_capacity(raw.len() + 1);
    for c in raw.into_iter().filter(Coord::is_finite) {
        if ring.last() != Some(&c) {
            ring.push(c);
        }
    }
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    if ring.len() < 3 {
        return None;
    }
    let first = ring[0];
    ring.push(first);
    Some(ring)
}

fn repair_ring(raw: Vec<Coord>) -> Vec<Ring> {
    let Some(ring) = clean_ring(raw) else {
        return Vec::new();
    };
    split_self_intersections(ring)
        .into_iter()
        .filter(|r| signed_area(r).abs() > f64::EPSILON * 1e-6)
        .collect()
}

fn orient(a: Coord, b: Coord, p: Coord) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Crossing point of segments `ab` and `cd` when they cross at a point
/// interior to both. Touching and collinear overlaps are not crossings.
fn proper_crossing(a: Coord, b: Coord, c: Coord, d: Coord) -> Option<Coord> {
    let (d1, d2) = (orient(c, d, a), orient(c, d, b));
    let (d3, d4) = (orient(a, b, c), orient(a, b, d));
    if d1 * d2 >= 0.0 || d3 * d4 >= 0.0 {
        return None;
    }
    let t = d1 / (d1 - d2);
    Some(Coord::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t))
}

/// First crossing between non-adjacent edges of a closed ring, as
/// `(i, j, point)` with `i < j`. Edges are swept by their minimum x.
pub fn first_crossing(ring: &[Coord]) -> Option<(usize, usize, Coord)> {
    let n = ring.len().checked_sub(1)?;
    let span = |k: usize| (ring[k].x.min(ring[k + 1].x), ring[k].x.max(ring[k + 1].x));

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| span(a).0.total_cmp(&span(b).0).then(a.cmp(&b)));

    for (k, &e) in order.iter().enumerate() {
        let max_x = span(e).1;
        for &f in &order[k + 1..] {
            if span(f).0 > max_x {
                break;
            }
            let (i, j) = (e.min(f), e.max(f));
            if j - i == 1 || (i == 0 && j == n - 1) {
                continue;
            }
            if let Some(p) = proper_crossing(ring[i], ring[i + 1], ring[j], ring[j + 1]) {
                return Some((i, j, p));
            }
        }
    }
    None
}

/// Cut a closed ring at its crossings until every loop is simple.
///
/// Each cut at edges `i < j` yields `v0..vi, P, vj+1..` and `P, vi+1..vj`,
/// both with fewer vertices than the input, so the loop terminates.
fn split_self_intersections(ring: Ring) -> Vec<Ring> {
    let mut pending = vec![ring];
    let mut simple = Vec::new();

    while let Some(ring) = pending.pop() {
        let Some((i, j, p)) = first_crossing(&ring) else {
            simple.push(ring);
            continue;
        };
        let n = ring.len() - 1;
        let mut outer: Vec<Coord> = ring[..=i].to_vec();
        outer.push(p);
        outer.extend_from_slice(&ring[j + 1..n]);

        let mut inner = vec![p];
        inner.extend_from_slice(&ring[i + 1..=j]);

        pending.extend(clean_ring(inner));
        pending.extend(clean_ring(outer));
    }
    simple
}

fn on_segment(p: Coord, a: Coord, b: Coord) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let len = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
    if cross.abs() > BOUNDARY_EPS * len.max(1.0) {
        return false;
    }
    p.x >= a.x.min(b.x) - BOUNDARY_EPS
        && p.x <= a.x.max(b.x) + BOUNDARY_EPS
        && p.y >= a.y.min(b.y) - BOUNDARY_EPS
        && p.y <= a.y.max(b.y) + BOUNDARY_EPS
}

/// Even-odd ray casting with an explicit boundary check first
fn locate_in_ring(p: Coord, ring: &[Coord]) -> Location {
    if ring.windows(2).any(|w| on_segment(p, w[0], w[1])) {
        return Location::Boundary;
    }

    let mut inside = false;
    for w in ring.windows(2) {
        let (a, b) = (w[0], w[1]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
    }
    if inside {
        Location::Interior
    } else {
        Location::Exterior
    }
}

pub fn to_mercator(c: Coord) -> Coord {
    let lat = c.y.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    Coord::new(
        MERCATOR_RADIUS_M * c.x.to_radians(),
        MERCATOR_RADIUS_M * (PI / 4.0 + lat / 2.0).tan().ln(),
    )
}

pub fn from_mercator(c: Coord) -> Coord {
    Coord::new(
        (c.x / MERCATOR_RADIUS_M).to_degrees(),
        (2.0 * (c.y / MERCATOR_RADIUS_M).exp().atan() - PI / 2.0).to_degrees(),
    )
}

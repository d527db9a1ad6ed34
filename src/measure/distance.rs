//! Point, surface and ray distance queries over a [`Mesh`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::{Mesh, Point3};

/// Determinant threshold below which a ray is treated as parallel to a face.
pub const RAY_EPSILON: f32 = 1e-8;

/// Euclidean distance between two points.
pub fn distance(a: Point3, b: Point3) -> f32 {
    a.distance(b)
}

/// Squared distance; use for comparisons to avoid the square root.
pub fn distance_squared(a: Point3, b: Point3) -> f32 {
    a.distance_squared(b)
}

/// Angle at `vertex` between the rays towards `a` and `b`, in degrees.
///
/// Returns `None` if either arm has zero length.
pub fn angle_at(a: Point3, vertex: Point3, b: Point3) -> Option<f32> {
    let u = (a - vertex).try_normalize()?;
    let v = (b - vertex).try_normalize()?;
    Some(u.dot(v).clamp(-1.0, 1.0).acos().to_degrees())
}

/// Closest point to `p` on triangle `(a, b, c)`.
///
/// Classifies `p` against the seven Voronoi regions of the triangle (three
/// vertices, three edges, interior) so corner and edge cases return exact
/// corner/edge points.
#[allow(clippy::many_single_char_names)]
pub fn closest_point_on_triangle(p: Point3, a: Point3, b: Point3, c: Point3) -> Point3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = va + vb + vc;
    if denom.abs() <= f32::EPSILON {
        // Degenerate (zero-area) triangle that slipped past the region tests.
        return a;
    }
    let v = vb / denom;
    let w = vc / denom;
    a + ab * v + ac * w
}

/// Snap a point onto the nearest location of the mesh surface.
///
/// Exhaustive O(faces) scan. Returns `None` if the mesh has no valid faces or
/// the query is not finite.
pub fn snap_to_surface(point: Point3, mesh: &Mesh) -> Option<Point3> {
    if !point.is_finite() {
        return None;
    }

    let mut best: Option<(f32, Point3)> = None;
    for (_, [a, b, c]) in mesh.triangles() {
        let q = closest_point_on_triangle(point, a, b, c);
        let d = distance_squared(point, q);
        if best.is_none_or(|(best_d, _)| d < best_d) {
            best = Some((d, q));
        }
    }
    best.map(|(_, q)| q)
}

/// Successful ray cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Point3,
    /// Distance along the normalized ray direction.
    pub distance: f32,
    pub face: usize,
}

/// Why a ray cast produced no hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayMiss {
    /// Origin or direction is not finite, or the direction has zero length.
    InvalidRay,
    /// The mesh has no valid faces.
    NoFaces,
    /// Every face is parallel to the ray.
    AllParallel,
    /// No face is crossed in front of the origin.
    NoHit,
}

/// Möller–Trumbore test of one triangle. `Err(())` marks a parallel ray.
fn intersect_triangle(
    origin: Point3,
    dir: Point3,
    [v0, v1, v2]: [Point3; 3],
) -> Result<Option<f32>, ()> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let h = dir.cross(e2);
    let det = e1.dot(h);
    if det.abs() < RAY_EPSILON {
        return Err(());
    }

    let inv = 1.0 / det;
    let s = origin - v0;
    let u = inv * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return Ok(None);
    }

    let q = s.cross(e1);
    let v = inv * dir.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return Ok(None);
    }

    let t = inv * e2.dot(q);
    Ok((t > 0.0).then_some(t))
}

/// Cast a ray against every face and report the nearest hit in front of the
/// origin, or the reason there is none.
pub fn cast_ray(origin: Point3, direction: Point3, mesh: &Mesh) -> Result<RayHit, RayMiss> {
    if !origin.is_finite() {
        return Err(RayMiss::InvalidRay);
    }
    let dir = direction.try_normalize().ok_or(RayMiss::InvalidRay)?;

    let mut tested = 0usize;
    let mut parallel = 0usize;
    let mut nearest: Option<(f32, usize)> = None;

    for (face, tri) in mesh.triangles() {
        tested += 1;
        match intersect_triangle(origin, dir, tri) {
            Err(()) => parallel += 1,
            Ok(Some(t)) if nearest.is_none_or(|(best, _)| t < best) => nearest = Some((t, face)),
            Ok(_) => {}
        }
    }

    match nearest {
        Some((t, face)) => Ok(RayHit {
            point: origin + dir * t,
            distance: t,
            face,
        }),
        None if tested == 0 => Err(RayMiss::NoFaces),
        None if parallel == tested => Err(RayMiss::AllParallel),
        None => Err(RayMiss::NoHit),
    }
}

/// Nearest intersection of a ray with the mesh, if any.
pub fn ray_mesh_intersection(origin: Point3, direction: Point3, mesh: &Mesh) -> Option<Point3> {
    cast_ray(origin, direction, mesh).ok().map(|hit| hit.point)
}

/// Approximate geodesic distance along a mesh surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeodesicDistance {
    Reachable(f32),
    /// The endpoints snap to vertices in disconnected parts of the mesh.
    Unreachable,
    /// The mesh has no vertices, or a query point is not finite.
    EmptyMesh,
}

impl GeodesicDistance {
    pub fn value(self) -> Option<f32> {
        match self {
            GeodesicDistance::Reachable(d) => Some(d),
            _ => None,
        }
    }
}

/// Undirected edge graph of a mesh with Euclidean edge weights.
#[derive(Debug, Clone)]
pub struct EdgeGraph {
    neighbors: Vec<Vec<(u32, f64)>>,
}

impl EdgeGraph {
    /// Build the graph from every valid face; duplicate edges are stored once.
    pub fn from_mesh(mesh: &Mesh) -> Self {
        let mut neighbors: Vec<Vec<(u32, f64)>> = vec![Vec::new(); mesh.vertices.len()];
        for (face, [a, b, c]) in mesh.triangles() {
            let [i0, i1, i2] = mesh.faces[face];
            Self::add_edge(&mut neighbors, i0, i1, a.distance(b) as f64);
            Self::add_edge(&mut neighbors, i1, i2, b.distance(c) as f64);
            Self::add_edge(&mut neighbors, i2, i0, c.distance(a) as f64);
        }
        Self { neighbors }
    }

    fn add_edge(neighbors: &mut [Vec<(u32, f64)>], v0: u32, v1: u32, length: f64) {
        if v0 == v1 {
            return;
        }
        if !neighbors[v0 as usize].iter().any(|&(n, _)| n == v1) {
            neighbors[v0 as usize].push((v1, length));
        }
        if !neighbors[v1 as usize].iter().any(|&(n, _)| n == v0) {
            neighbors[v1 as usize].push((v0, length));
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn neighbors(&self, vertex: usize) -> &[(u32, f64)] {
        self.neighbors.get(vertex).map_or(&[], Vec::as_slice)
    }

    pub fn edge_count(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum::<usize>() / 2
    }

    /// Dijkstra shortest path length between two vertices, `None` if the
    /// target cannot be reached.
    pub fn shortest_path(&self, source: usize, target: usize) -> Option<f64> {
        let n = self.neighbors.len();
        if source >= n || target >= n {
            return None;
        }
        if source == target {
            return Some(0.0);
        }

        let mut dist = vec![f64::INFINITY; n];
        let mut heap = BinaryHeap::new();
        dist[source] = 0.0;
        heap.push(State {
            vertex: source as u32,
            distance: 0.0,
        });

        while let Some(State { vertex, distance }) = heap.pop() {
            let v = vertex as usize;
            if v == target {
                return Some(distance);
            }
            if distance > dist[v] {
                continue;
            }
            for &(next, len) in self.neighbors(v) {
                let candidate = distance + len;
                if candidate < dist[next as usize] {
                    dist[next as usize] = candidate;
                    heap.push(State {
                        vertex: next,
                        distance: candidate,
                    });
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct State {
    vertex: u32,
    distance: f64,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for State {}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap.
        other.distance.total_cmp(&self.distance)
    }
}

fn nearest_vertex(mesh: &Mesh, p: Point3) -> Option<usize> {
    mesh.vertices
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|(_, a), (_, b)| {
            distance_squared(**a, p).total_cmp(&distance_squared(**b, p))
        })
        .map(|(i, _)| i)
}

/// Geodesic distance between two points near the surface.
///
/// Each endpoint is snapped to its nearest vertex, the shortest edge path
/// between those vertices is found, and both snap offsets are added.
pub fn surface_distance(from: Point3, to: Point3, mesh: &Mesh) -> GeodesicDistance {
    if !from.is_finite() || !to.is_finite() {
        return GeodesicDistance::EmptyMesh;
    }
    let (Some(start), Some(end)) = (nearest_vertex(mesh, from), nearest_vertex(mesh, to)) else {
        return GeodesicDistance::EmptyMesh;
    };

    let graph = EdgeGraph::from_mesh(mesh);
    match graph.shortest_path(start, end) {
        Some(path) => {
            let offset = distance(from, mesh.vertices[start]) + distance(to, mesh.vertices[end]);
            GeodesicDistance::Reachable(path as f32 + offset)
        }
        None => GeodesicDistance::Unreachable,
    }
}

//! Enclosed volume, closed-surface validation and volume estimators.

use std::collections::HashMap;

use glam::Vec3;
use serde::Serialize;

use crate::measure::area::{FaceFilter, mesh_surface_area};
use crate::types::{BoundingBox, Mesh, Point3, SurfaceClass};

/// Fraction of the bounding box assumed to be filled by an open scan.
pub const OPEN_MESH_FILL_FACTOR: f32 = 0.85;

/// A volume that is either exact or an explicit approximation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum VolumeEstimate {
    /// Divergence-theorem volume of a watertight mesh.
    Exact(f32),
    /// Bounding-box volume scaled by `fill_factor`.
    Approximate { volume: f32, fill_factor: f32 },
}

impl VolumeEstimate {
    pub fn volume(&self) -> f32 {
        match *self {
            VolumeEstimate::Exact(v) => v,
            VolumeEstimate::Approximate { volume, .. } => volume,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, VolumeEstimate::Exact(_))
    }
}

/// Enclosed volume via the signed-tetrahedra sum.
///
/// Only meaningful for closed, consistently wound meshes; check
/// [`is_watertight`] first when exactness matters.
pub fn mesh_volume(mesh: &Mesh) -> f32 {
    let six_v: f64 = mesh
        .triangles()
        .map(|(_, [a, b, c])| a.dot(b.cross(c)) as f64)
        .sum();
    (six_v.abs() / 6.0) as f32
}

fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

fn edge_face_counts(mesh: &Mesh) -> HashMap<(u32, u32), u32> {
    let mut counts = HashMap::with_capacity(mesh.faces.len() * 3 / 2);
    for (face, _) in mesh.triangles() {
        let [a, b, c] = mesh.faces[face];
        for (u, v) in [(a, b), (b, c), (c, a)] {
            *counts.entry(edge_key(u, v)).or_insert(0) += 1;
        }
    }
    counts
}

/// Edge-sharing diagnostics for a mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EdgeDiagnostics {
    pub edge_count: usize,
    /// Edges used by exactly one face, sorted.
    pub boundary_edges: Vec<(u32, u32)>,
    /// Edges used by three or more faces, sorted.
    pub non_manifold_edges: Vec<(u32, u32)>,
}

impl EdgeDiagnostics {
    pub fn is_watertight(&self) -> bool {
        self.edge_count > 0 && self.boundary_edges.is_empty() && self.non_manifold_edges.is_empty()
    }
}

pub fn edge_diagnostics(mesh: &Mesh) -> EdgeDiagnostics {
    let counts = edge_face_counts(mesh);
    let mut boundary_edges: Vec<_> = counts
        .iter()
        .filter(|(_, n)| **n == 1)
        .map(|(e, _)| *e)
        .collect();
    let mut non_manifold_edges: Vec<_> = counts
        .iter()
        .filter(|(_, n)| **n > 2)
        .map(|(e, _)| *e)
        .collect();
    boundary_edges.sort_unstable();
    non_manifold_edges.sort_unstable();
    EdgeDiagnostics {
        edge_count: counts.len(),
        boundary_edges,
        non_manifold_edges,
    }
}

/// Whether every edge is shared by exactly two faces. A mesh without faces
/// is not watertight.
pub fn is_watertight(mesh: &Mesh) -> bool {
    let counts = edge_face_counts(mesh);
    !counts.is_empty() && counts.values().all(|&n| n == 2)
}

/// Edges used by exactly one face, as `(smaller, larger)` vertex pairs.
pub fn find_boundary_edges(mesh: &Mesh) -> Vec<(u32, u32)> {
    edge_diagnostics(mesh).boundary_edges
}

/// Volume of the axis-aligned box around the points; zero when empty.
pub fn bounding_box_volume(points: &[Point3]) -> f32 {
    BoundingBox::from_points(points.iter().copied()).map_or(0.0, |bb| bb.volume())
}

/// Exact volume for watertight meshes, bounding-box approximation otherwise.
pub fn estimate_volume_open_mesh(mesh: &Mesh) -> VolumeEstimate {
    if is_watertight(mesh) {
        return VolumeEstimate::Exact(mesh_volume(mesh));
    }
    VolumeEstimate::Approximate {
        volume: bounding_box_volume(&mesh.vertices) * OPEN_MESH_FILL_FACTOR,
        fill_factor: OPEN_MESH_FILL_FACTOR,
    }
}

/// Floor area used for room volume: classified floor faces, else
/// upward-facing faces, else the bounding-box footprint.
pub fn room_floor_area(mesh: &Mesh) -> f32 {
    if mesh.classification.is_some() {
        let classified = mesh_surface_area(mesh, &FaceFilter::Classified(SurfaceClass::Floor));
        if classified > 0.0 {
            return classified;
        }
    }
    let facing_up = mesh_surface_area(
        mesh,
        &FaceFilter::Facing {
            direction: Vec3::Y,
            min_cos: 0.9,
        },
    );
    if facing_up > 0.0 {
        return facing_up;
    }
    BoundingBox::from_points(mesh.vertices.iter().copied()).map_or(0.0, |bb| {
        let s = bb.size();
        s.x * s.z
    })
}

/// Floor area times room height. Heights default to the mesh's Y extent.
pub fn room_volume(mesh: &Mesh, floor_height: Option<f32>, ceiling_height: Option<f32>) -> f32 {
    let Some(bb) = BoundingBox::from_points(mesh.vertices.iter().copied()) else {
        return 0.0;
    };
    let floor = floor_height.unwrap_or(bb.min.y);
    let ceiling = ceiling_height.unwrap_or(bb.max.y);
    room_floor_area(mesh) * (ceiling - floor).max(0.0)
}

fn sorted_sections(sections: &[(f32, f32)]) -> Vec<(f32, f32)> {
    let mut s: Vec<_> = sections
        .iter()
        .copied()
        .filter(|(h, a)| h.is_finite() && a.is_finite())
        .collect();
    s.sort_by(|a, b| a.0.total_cmp(&b.0));
    s
}

fn trapezoid(sections: &[(f32, f32)]) -> f32 {
    match sections {
        [] => 0.0,
        [(_, area)] => *area,
        _ => sections
            .windows(2)
            .map(|w| {
                let (h0, a0) = w[0];
                let (h1, a1) = w[1];
                (h1 - h0) as f64 * (a0 + a1) as f64 * 0.5
            })
            .sum::<f64>() as f32,
    }
}

/// Volume from `(height, area)` slices by the trapezoid rule.
///
/// Sections are sorted by height first. A single section returns its area.
pub fn volume_from_cross_sections(sections: &[(f32, f32)]) -> f32 {
    trapezoid(&sorted_sections(sections))
}

/// Simpson's rule over evenly spaced slices with an odd count, falling back
/// to the trapezoid rule otherwise.
pub fn volume_from_cross_sections_simpson(sections: &[(f32, f32)]) -> f32 {
    let s = sorted_sections(sections);
    let n = s.len();
    if n < 3 || n % 2 == 0 {
        return trapezoid(&s);
    }
    let h = (s[n - 1].0 - s[0].0) as f64 / (n - 1) as f64;
    let even = s
        .windows(2)
        .all(|w| ((w[1].0 - w[0].0) as f64 - h).abs() <= 1e-4 * h.abs().max(1.0));
    if !even || h <= 0.0 {
        return trapezoid(&s);
    }

    let mut sum = (s[0].1 + s[n - 1].1) as f64;
    for (i, (_, a)) in s.iter().enumerate().take(n - 1).skip(1) {
        sum += if i % 2 == 1 { 4.0 } else { 2.0 } * *a as f64;
    }
    (sum * h / 3.0) as f32
}

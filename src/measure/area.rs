//! Polygon and mesh surface areas.

use glam::{Vec2, Vec3};

use crate::types::{Mesh, Point3, SurfaceClass};

/// Area of triangle `(v0, v1, v2)`; independent of winding.
pub fn triangle_area(v0: Point3, v1: Point3, v2: Point3) -> f32 {
    (v1 - v0).cross(v2 - v0).length() * 0.5
}

/// Newell normal of a closed polygon loop. Its length is twice the area.
pub fn newell_normal(points: &[Point3]) -> Vec3 {
    let n = points.len();
    let mut normal = Vec3::ZERO;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        normal.x += (a.y - b.y) * (a.z + b.z);
        normal.y += (a.z - b.z) * (a.x + b.x);
        normal.z += (a.x - b.x) * (a.y + b.y);
    }
    normal
}

/// Area of a planar (or near-planar) simple polygon in any orientation.
///
/// Uses Newell's method; fewer than three points give zero.
pub fn polygon_area(points: &[Point3]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    newell_normal(points).length() * 0.5
}

/// Which faces of a mesh contribute to [`mesh_surface_area`].
#[derive(Debug, Clone, PartialEq)]
pub enum FaceFilter {
    All,
    /// Explicit face indices; out-of-range entries are ignored.
    Subset(Vec<usize>),
    /// Faces whose unit normal has at least `min_cos` alignment with `direction`.
    Facing { direction: Vec3, min_cos: f32 },
    /// Faces whose corner classification majority is the given class.
    Classified(SurfaceClass),
}

fn face_normal([a, b, c]: [Point3; 3]) -> Vec3 {
    (b - a).cross(c - a).normalize_or_zero()
}

/// Total area of the mesh faces selected by `filter`.
pub fn mesh_surface_area(mesh: &Mesh, filter: &FaceFilter) -> f32 {
    let area = |[a, b, c]: [Point3; 3]| triangle_area(a, b, c) as f64;

    let total: f64 = match filter {
        FaceFilter::All => mesh.triangles().map(|(_, t)| area(t)).sum(),
        FaceFilter::Subset(faces) => faces
            .iter()
            .filter_map(|&f| mesh.triangle(f))
            .map(area)
            .sum(),
        FaceFilter::Facing { direction, min_cos } => {
            let dir = direction.normalize_or_zero();
            mesh.triangles()
                .filter(|(_, t)| face_normal(*t).dot(dir) >= *min_cos)
                .map(|(_, t)| area(t))
                .sum()
        }
        FaceFilter::Classified(class) => mesh
            .triangles()
            .filter(|(f, _)| mesh.face_class(*f) == Some(*class))
            .map(|(_, t)| area(t))
            .sum(),
    };
    total as f32
}

/// Orientation of a polygon relative to the Y-up world frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneOrientation {
    /// Floor, ceiling or table top: Y is the dominant normal component.
    Horizontal,
    Vertical,
}

/// Index of the largest-magnitude component. Ties go to the earlier axis.
fn dominant_axis(n: Vec3) -> usize {
    let a = n.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}

/// Classify a polygon by its Newell normal; `None` if it has no area.
pub fn classify_polygon(points: &[Point3]) -> Option<PlaneOrientation> {
    if points.len() < 3 {
        return None;
    }
    let n = newell_normal(points);
    if n.length_squared() <= f32::EPSILON * f32::EPSILON {
        return None;
    }
    Some(if dominant_axis(n) == 1 {
        PlaneOrientation::Horizontal
    } else {
        PlaneOrientation::Vertical
    })
}

fn shoelace(points: &[Vec2]) -> f32 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0_f64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        sum += (a.x as f64) * (b.y as f64) - (b.x as f64) * (a.y as f64);
    }
    (sum.abs() * 0.5) as f32
}

/// Area of the polygon projected onto the axis plane it faces most.
///
/// The axis with the largest Newell-normal component is dropped and the
/// shoelace formula applied to the other two coordinates.
pub fn projected_area(points: &[Point3]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let flat: Vec<Vec2> = match dominant_axis(newell_normal(points)) {
        0 => points.iter().map(|p| Vec2::new(p.y, p.z)).collect(),
        1 => points.iter().map(|p| Vec2::new(p.x, p.z)).collect(),
        _ => points.iter().map(|p| Vec2::new(p.x, p.y)).collect(),
    };
    shoelace(&flat)
}

/// Floor area of an outline traced on the floor.
pub fn floor_area(points: &[Point3]) -> f32 {
    projected_area(points)
}

/// Area of an outline traced on a wall.
pub fn wall_area(points: &[Point3]) -> f32 {
    projected_area(points)
}

/// Orthonormal in-plane basis `(u, v)` for the points' best-fit plane.
///
/// Uses the first edge and the first point not collinear with it; falls
/// back to the vertical XY plane when every point is collinear.
fn plane_basis(points: &[Point3]) -> (Vec3, Vec3) {
    let origin = points[0];
    let first_edge = points[1..]
        .iter()
        .map(|p| *p - origin)
        .find(|e| e.length_squared() > f32::EPSILON);

    if let Some(e1) = first_edge {
        let normal = points[1..]
            .iter()
            .map(|p| e1.cross(*p - origin))
            .find(|n| n.length_squared() > f32::EPSILON * e1.length_squared());
        if let Some(n) = normal {
            let u = e1.normalize();
            let v = n.normalize().cross(u);
            return (u, v);
        }
    }
    (Vec3::X, Vec3::Y)
}

fn cross2(o: Vec2, a: Vec2, b: Vec2) -> f32 {
    (a - o).perp_dot(b - o)
}

/// Convex hull of 2-D points by gift wrapping (Jarvis march), counter-clockwise.
pub fn convex_hull_2d(points: &[Vec2]) -> Vec<Vec2> {
    let mut pts: Vec<Vec2> = Vec::with_capacity(points.len());
    for p in points.iter().filter(|p| p.is_finite()) {
        if !pts.iter().any(|q| q.distance_squared(*p) <= f32::EPSILON) {
            pts.push(*p);
        }
    }
    if pts.len() < 3 {
        return pts;
    }

    let start = (0..pts.len())
        .min_by(|&a, &b| {
            pts[a]
                .x
                .total_cmp(&pts[b].x)
                .then(pts[a].y.total_cmp(&pts[b].y))
        })
        .unwrap_or(0);

    let mut hull = Vec::new();
    let mut current = start;
    loop {
        hull.push(pts[current]);
        let mut next = (current + 1) % pts.len();
        for (i, &r) in pts.iter().enumerate() {
            if i == current {
                continue;
            }
            let turn = cross2(pts[current], pts[next], r);
            let farther = pts[current].distance_squared(r) > pts[current].distance_squared(pts[next]);
            if turn < 0.0 || (turn == 0.0 && farther) {
                next = i;
            }
        }
        current = next;
        if current == start || hull.len() > pts.len() {
            break;
        }
    }
    hull
}

/// Area of the convex hull of the points within their best-fit plane.
pub fn convex_hull_area(points: &[Point3]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let (u, v) = plane_basis(points);
    let origin = points[0];
    let flat: Vec<Vec2> = points
        .iter()
        .map(|p| {
            let d = *p - origin;
            Vec2::new(d.dot(u), d.dot(v))
        })
        .collect();
    shoelace(&convex_hull_2d(&flat))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use glam::Mat4;

    use super::*;

    fn unit_square_mesh() -> Mesh {
        Mesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    fn floor_square(size: f32, height: f32) -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, height, 0.0),
            Vec3::new(size, height, 0.0),
            Vec3::new(size, height, size),
            Vec3::new(0.0, height, size),
        ]
    }

    #[test]
    fn triangle_area_is_orientation_independent() {
        let tris = [
            (Vec3::ZERO, Vec3::X, Vec3::Y),
            (Vec3::new(1.0, 2.0, 3.0), Vec3::new(-4.0, 0.5, 2.0), Vec3::new(0.0, 7.0, -1.0)),
        ];
        for (a, b, c) in tris {
            assert_eq!(triangle_area(a, b, c), triangle_area(a, c, b));
        }
        assert_abs_diff_eq!(triangle_area(Vec3::ZERO, Vec3::X, Vec3::Y), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn unit_square_surface_area() {
        let area = mesh_surface_area(&unit_square_mesh(), &FaceFilter::All);
        assert_abs_diff_eq!(area, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn surface_area_ignores_transform_and_bad_faces() {
        let mut mesh = unit_square_mesh().with_transform(Mat4::from_scale(Vec3::splat(3.0)));
        mesh.faces.push([0, 1, 40]);
        assert_abs_diff_eq!(mesh_surface_area(&mesh, &FaceFilter::All), 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(
            mesh_surface_area(&mesh.to_world(), &FaceFilter::All),
            9.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn surface_area_subset_and_orientation() {
        let mesh = unit_square_mesh();
        let half = mesh_surface_area(&mesh, &FaceFilter::Subset(vec![1, 99]));
        assert_abs_diff_eq!(half, 0.5, epsilon = 1e-6);

        let up = FaceFilter::Facing {
            direction: Vec3::Z,
            min_cos: 0.9,
        };
        assert_abs_diff_eq!(mesh_surface_area(&mesh, &up), 1.0, epsilon = 1e-4);
        let down = FaceFilter::Facing {
            direction: Vec3::NEG_Z,
            min_cos: 0.9,
        };
        assert_eq!(mesh_surface_area(&mesh, &down), 0.0);
    }

    #[test]
    fn surface_area_by_classification() {
        let mut mesh = unit_square_mesh();
        mesh.classification = Some(vec![2, 2, 2, 1]);
        // Face 0 is all floor; face 1 is floor by majority (2, 2, 1).
        let floor = mesh_surface_area(&mesh, &FaceFilter::Classified(SurfaceClass::Floor));
        assert_abs_diff_eq!(floor, 1.0, epsilon = 1e-4);
        let wall = mesh_surface_area(&mesh, &FaceFilter::Classified(SurfaceClass::Wall));
        assert_eq!(wall, 0.0);
    }

    #[test]
    fn polygon_area_newell() {
        assert_abs_diff_eq!(polygon_area(&floor_square(2.0, 1.0)), 4.0, epsilon = 1e-5);
        // Tilted square keeps its true area.
        let rot = Mat4::from_rotation_x(0.7);
        let tilted: Vec<Vec3> = floor_square(2.0, 0.0)
            .iter()
            .map(|p| rot.transform_point3(*p))
            .collect();
        assert_abs_diff_eq!(polygon_area(&tilted), 4.0, epsilon = 1e-4);
    }

    #[test]
    fn polygon_area_degenerate() {
        assert_eq!(polygon_area(&[]), 0.0);
        assert_eq!(polygon_area(&[Vec3::ZERO, Vec3::X]), 0.0);
        assert_eq!(projected_area(&[Vec3::ZERO, Vec3::X]), 0.0);
        assert_eq!(classify_polygon(&[Vec3::ZERO, Vec3::X, Vec3::new(2.0, 0.0, 0.0)]), None);
    }

    #[test]
    fn floor_and_wall_projection() {
        let floor = floor_square(3.0, 1.2);
        assert_eq!(classify_polygon(&floor), Some(PlaneOrientation::Horizontal));
        assert_abs_diff_eq!(floor_area(&floor), 9.0, epsilon = 1e-4);

        let wall = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(4.0, 2.5, 0.0),
            Vec3::new(0.0, 2.5, 0.0),
        ];
        assert_eq!(classify_polygon(&wall), Some(PlaneOrientation::Vertical));
        assert_abs_diff_eq!(wall_area(&wall), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn projected_area_of_sloped_floor_is_footprint() {
        // Gentle slope along X: rises 0.5 over 2 m; footprint is 2 x 2.
        let slope = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.5, 0.0),
            Vec3::new(2.0, 0.5, 2.0),
            Vec3::new(0.0, 0.0, 2.0),
        ];
        assert_abs_diff_eq!(projected_area(&slope), 4.0, epsilon = 1e-4);
        assert!(polygon_area(&slope) > 4.0);
    }

    #[test]
    fn convex_hull_ignores_interior_points() {
        let mut pts = floor_square(2.0, 0.0);
        pts.push(Vec3::new(1.0, 0.0, 1.0));
        pts.push(Vec3::new(0.5, 0.0, 1.5));
        pts.swap(0, 4);
        assert_abs_diff_eq!(convex_hull_area(&pts), 4.0, epsilon = 1e-4);
    }

    #[test]
    fn convex_hull_of_tilted_points() {
        let rot = Mat4::from_rotation_z(0.4) * Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let pts: Vec<Vec3> = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(3.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::new(0.5, 0.0, 0.5),
        ]
        .iter()
        .map(|p| rot.transform_point3(*p))
        .collect();
        assert_abs_diff_eq!(convex_hull_area(&pts), 4.5, epsilon = 1e-3);
    }

    #[test]
    fn convex_hull_collinear_is_zero() {
        let pts = [Vec3::ZERO, Vec3::X, Vec3::new(2.0, 0.0, 0.0)];
        assert_abs_diff_eq!(convex_hull_area(&pts), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn hull_2d_is_counter_clockwise() {
        let hull = convex_hull_2d(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ]);
        assert_eq!(hull.len(), 4);
        assert_eq!(hull[0], Vec2::new(0.0, 0.0));
        assert_eq!(hull[1], Vec2::new(2.0, 0.0));
    }
}

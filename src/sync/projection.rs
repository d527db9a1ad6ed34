//! Projection of world points into synchronized camera frames.
//!
//! Camera space follows the capture device: +X right, +Y up, and the camera
//! looks down -Z. Image space has its origin at the top-left pixel with +V
//! pointing down, and UVs are pixel coordinates divided by the resolution.

use glam::{Mat4, Vec2, Vec3};

use super::frame::{CameraIntrinsics, Resolution, SynchronizedFrame};

/// Points closer than this in front of the camera are rejected.
const MIN_DEPTH: f32 = 1e-4;

const ALIGNMENT_WEIGHT: f32 = 0.7;
const CENTRALITY_WEIGHT: f32 = 0.3;

/// Project a world point through a camera pose and intrinsics.
///
/// Returns `None` for points behind the camera or outside [0, 1]².
pub fn project_to_uv(
    point: Vec3,
    camera_transform: &Mat4,
    intrinsics: &CameraIntrinsics,
    resolution: Resolution,
) -> Option<Vec2> {
    if !point.is_finite() || !intrinsics.is_valid() || resolution.pixel_count() == 0 {
        return None;
    }
    let local = camera_transform.inverse().transform_point3(point);
    let depth = -local.z;
    if !depth.is_finite() || depth < MIN_DEPTH {
        return None;
    }
    let px = intrinsics.fx * local.x / depth + intrinsics.cx;
    let py = intrinsics.cy - intrinsics.fy * local.y / depth;
    let uv = Vec2::new(px, py) / resolution.as_vec2();
    let inside = (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y);
    inside.then_some(uv)
}

/// UV of `point` in the color image of `frame`.
pub fn generate_uv(point: Vec3, frame: &SynchronizedFrame) -> Option<Vec2> {
    project_to_uv(
        point,
        &frame.camera_transform,
        &frame.camera_intrinsics,
        frame.color_resolution,
    )
}

/// 1 at the image center falling to 0 at the corners.
fn centrality(uv: Vec2) -> f32 {
    let max = Vec2::splat(0.5).length();
    (1.0 - (uv - Vec2::splat(0.5)).length() / max).clamp(0.0, 1.0)
}

/// Score a frame for texturing the surface at `point` with outward `normal`.
///
/// Alignment is the cosine between the normal and the direction to the
/// camera, clamped at zero. `None` if the point does not project into the
/// frame.
pub fn texture_score(point: Vec3, normal: Vec3, frame: &SynchronizedFrame) -> Option<f32> {
    let uv = generate_uv(point, frame)?;
    let to_camera = (frame.camera_position() - point).normalize_or_zero();
    let alignment = normal.normalize_or_zero().dot(to_camera).max(0.0);
    Some(ALIGNMENT_WEIGHT * alignment + CENTRALITY_WEIGHT * centrality(uv))
}

/// Index and score of the best frame for texturing `point`. Ties go to the
/// earlier frame.
pub fn find_best_texture_frame(
    point: Vec3,
    normal: Vec3,
    frames: &[SynchronizedFrame],
) -> Option<(usize, f32)> {
    frames
        .iter()
        .enumerate()
        .filter_map(|(i, f)| texture_score(point, normal, f).map(|s| (i, s)))
        .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
}

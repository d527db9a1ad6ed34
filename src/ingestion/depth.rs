//! Back-projection of depth frames into world-space point clouds.
//!
//! Pixel `(u, v)` with depth `d` maps to camera space as
//! `((u - cx) d / fx, -(v - cy) d / fy, -d)`: the camera looks down -Z with
//! +Y up, while image rows grow downwards. This is the inverse of
//! [`crate::sync::project_to_uv`].

use std::collections::HashSet;

use glam::{IVec3, Vec3};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::error::Result;
use crate::sync::{CameraIntrinsics, ColorImage, ImageEncoding};
use crate::types::{PointCloud, Rgba};

use super::lraw::DepthCapture;

/// Decode a color image's pixels. HEIC and unknown containers yield `None`.
pub fn decode_color(image: &ColorImage) -> Option<RgbaImage> {
    let format = match image.encoding {
        ImageEncoding::Jpeg => image::ImageFormat::Jpeg,
        ImageEncoding::Png => image::ImageFormat::Png,
        ImageEncoding::Heic | ImageEncoding::Unknown => {
            debug!(encoding = ?image.encoding, "Color image not decodable, skipping colors");
            return None;
        }
    };
    match image::load_from_memory_with_format(&image.data, format) {
        Ok(img) => Some(img.to_rgba8()),
        Err(e) => {
            warn!(error = %e, "Failed to decode color image");
            None
        }
    }
}

/// Camera-space position of pixel `(u, v)` at depth `d`.
pub fn unproject(u: f32, v: f32, d: f32, k: &CameraIntrinsics) -> Vec3 {
    Vec3::new((u - k.cx) * d / k.fx, -(v - k.cy) * d / k.fy, -d)
}

struct Sample {
    point: Vec3,
    normal: Vec3,
    confidence: Option<f32>,
    color: Option<Rgba>,
}

/// Turn one depth frame into a world-space point cloud.
///
/// Samples below `min_confidence` are discarded when the frame has a
/// confidence map. Normals come from central differences of neighbouring
/// back-projected pixels and face the camera. When more than `max_points`
/// survive, the cloud is voxel-downsampled and then strided.
pub fn extract_point_cloud(
    frame: &DepthCapture,
    color: Option<&RgbaImage>,
    config: &ExtractionConfig,
) -> Result<PointCloud> {
    let k = frame.intrinsics;
    if !k.is_valid() {
        warn!(fx = k.fx, fy = k.fy, "Invalid depth intrinsics, skipping frame");
        return Ok(PointCloud::default());
    }
    let res = frame.depth.resolution();
    let camera_at = |x: i64, y: i64| -> Option<Vec3> {
        if x < 0 || y < 0 {
            return None;
        }
        let d = frame.depth.get(x as u32, y as u32)?;
        Some(unproject(x as f32, y as f32, d, &k))
    };

    let mut samples = Vec::new();
    for y in 0..res.height {
        for x in 0..res.width {
            let Some(d) = frame.depth.get(x, y) else {
                continue;
            };
            let confidence = frame.confidence.as_ref().and_then(|c| c.normalized(x, y));
            if confidence.is_some_and(|c| c < config.min_confidence) {
                continue;
            }

            let p = unproject(x as f32, y as f32, d, &k);
            let (xi, yi) = (x as i64, y as i64);
            let normal = surface_normal(
                p,
                camera_at(xi - 1, yi),
                camera_at(xi + 1, yi),
                camera_at(xi, yi - 1),
                camera_at(xi, yi + 1),
            );

            let color = color.and_then(|img| {
                let cx = (x as u64 * img.width() as u64 / res.width.max(1) as u64) as u32;
                let cy = (y as u64 * img.height() as u64 / res.height.max(1) as u64) as u32;
                img.get_pixel_checked(cx, cy).map(|px| Rgba(px.0))
            });

            samples.push(Sample {
                point: frame.camera_transform.transform_point3(p),
                normal: frame
                    .camera_transform
                    .transform_vector3(normal)
                    .normalize_or_zero(),
                confidence,
                color,
            });
        }
    }

    let extracted = samples.len();
    let keep = downsample(&samples, config.voxel_size, config.max_points);
    if keep.len() < extracted {
        debug!(extracted, kept = keep.len(), "Downsampled depth points");
    }

    let picked: Vec<&Sample> = keep.iter().map(|&i| &samples[i]).collect();
    let mut cloud = PointCloud::new(picked.iter().map(|s| s.point).collect())
        .with_normals(picked.iter().map(|s| s.normal).collect())?;
    if frame.confidence.is_some() {
        cloud = cloud.with_confidences(
            picked.iter().map(|s| s.confidence.unwrap_or(0.0)).collect(),
        )?;
    }
    if color.is_some() {
        let colors: Option<Vec<Rgba>> = picked.iter().map(|s| s.color).collect();
        if let Some(colors) = colors {
            cloud = cloud.with_colors(colors)?;
        }
    }
    Ok(cloud)
}

/// Camera-facing normal at `p` from its left/right/up/down neighbours,
/// falling back to one-sided differences, then to the view direction.
fn surface_normal(
    p: Vec3,
    left: Option<Vec3>,
    right: Option<Vec3>,
    up: Option<Vec3>,
    down: Option<Vec3>,
) -> Vec3 {
    let diff = |a: Option<Vec3>, b: Option<Vec3>| match (a, b) {
        (Some(a), Some(b)) => Some(b - a),
        (None, Some(b)) => Some(b - p),
        (Some(a), None) => Some(p - a),
        (None, None) => None,
    };
    let toward_camera = (-p).normalize_or_zero();
    let n = match (diff(left, right), diff(up, down)) {
        (Some(du), Some(dv)) => du.cross(dv).normalize_or_zero(),
        _ => Vec3::ZERO,
    };
    if n == Vec3::ZERO {
        return toward_camera;
    }
    if n.dot(toward_camera) < 0.0 { -n } else { n }
}

/// Indices to keep so that at most `max_points` remain: the first sample in
/// each voxel, then a uniform stride over those.
fn downsample(samples: &[Sample], voxel_size: f32, max_points: usize) -> Vec<usize> {
    if samples.len() <= max_points {
        return (0..samples.len()).collect();
    }
    let mut seen = HashSet::new();
    let mut keep: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            let voxel: IVec3 = (s.point / voxel_size).floor().as_ivec3();
            seen.insert(voxel)
        })
        .map(|(i, _)| i)
        .collect();
    if keep.len() > max_points {
        let n = keep.len();
        keep = (0..max_points).map(|i| keep[i * n / max_points]).collect();
    }
    keep
}

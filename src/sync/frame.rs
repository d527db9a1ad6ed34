use std::sync::Arc;

use glam::{Mat3, Mat4, Vec2, Vec3};
use serde::Serialize;

use crate::error::{Result, ScanMetricsError};

/// Pinhole intrinsics in pixels of the image they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    /// From a column-major 3x3 matrix `[[fx, 0, 0], [0, fy, 0], [cx, cy, 1]]`.
    pub fn from_matrix(m: Mat3) -> Self {
        Self {
            fx: m.x_axis.x,
            fy: m.y_axis.y,
            cx: m.z_axis.x,
            cy: m.z_axis.y,
        }
    }

    /// Intrinsics for the same camera at a resized resolution.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_vec2(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }
}

/// Summary of the valid (finite, positive) samples in a depth map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DepthStatistics {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    /// Valid samples over all samples, in [0, 1].
    pub valid_ratio: f32,
}

/// Row-major depth in metres.
#[derive(Debug, Clone)]
pub struct DepthMap {
    resolution: Resolution,
    data: Arc<[f32]>,
}

impl DepthMap {
    pub fn new(resolution: Resolution, data: Vec<f32>) -> Result<Self> {
        check_len("depth map", data.len(), resolution)?;
        Ok(Self {
            resolution,
            data: data.into(),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Depth at pixel `(x, y)` if it is inside the map and valid.
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let d = self.data[y as usize * self.resolution.width as usize + x as usize];
        (d.is_finite() && d > 0.0).then_some(d)
    }

    /// `None` when the map holds no valid sample.
    pub fn statistics(&self) -> Option<DepthStatistics> {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut valid = 0usize;
        for &d in self.data.iter().filter(|d| d.is_finite() && **d > 0.0) {
            min = min.min(d);
            max = max.max(d);
            sum += d as f64;
            valid += 1;
        }
        if valid == 0 {
            return None;
        }
        Some(DepthStatistics {
            min,
            max,
            mean: (sum / valid as f64) as f32,
            valid_ratio: valid as f32 / self.data.len() as f32,
        })
    }
}

/// Row-major per-pixel confidence levels (0 = low, 1 = medium, 2 = high).
#[derive(Debug, Clone)]
pub struct ConfidenceMap {
    resolution: Resolution,
    data: Arc<[u8]>,
}

impl ConfidenceMap {
    pub const MAX_LEVEL: u8 = 2;

    pub fn new(resolution: Resolution, data: Vec<u8>) -> Result<Self> {
        check_len("confidence map", data.len(), resolution)?;
        Ok(Self {
            resolution,
            data: data.into(),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn level(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        Some(self.data[y as usize * self.resolution.width as usize + x as usize])
    }

    /// Confidence at `(x, y)` normalized to [0, 1].
    pub fn normalized(&self, x: u32, y: u32) -> Option<f32> {
        self.level(x, y)
            .map(|l| (l.min(Self::MAX_LEVEL) as f32) / Self::MAX_LEVEL as f32)
    }
}

fn check_len(what: &str, len: usize, resolution: Resolution) -> Result<()> {
    if len != resolution.pixel_count() {
        return Err(ScanMetricsError::Validation(format!(
            "{what} has {len} samples, expected {}x{}",
            resolution.width, resolution.height
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Jpeg,
    Heic,
    Png,
    Unknown,
}

impl ImageEncoding {
    /// Sniff the container from its leading bytes.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ImageEncoding::Jpeg
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            ImageEncoding::Png
        } else if bytes.len() >= 12
            && &bytes[4..8] == b"ftyp"
            && matches!(&bytes[8..12], b"heic" | b"heix" | b"mif1" | b"msf1" | b"hevc")
        {
            ImageEncoding::Heic
        } else {
            ImageEncoding::Unknown
        }
    }
}

/// An encoded color image. Pixels are decoded only when needed.
#[derive(Debug, Clone)]
pub struct ColorImage {
    pub resolution: Resolution,
    pub encoding: ImageEncoding,
    pub data: Arc<[u8]>,
}

impl ColorImage {
    pub fn new(resolution: Resolution, data: Vec<u8>) -> Self {
        Self {
            resolution,
            encoding: ImageEncoding::detect(&data),
            data: data.into(),
        }
    }
}

/// Depth sample set for one sensor tick.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub timestamp: f64,
    pub depth: DepthMap,
    pub confidence: Option<ConfidenceMap>,
}

/// A color frame with its camera pose, optionally carrying co-delivered depth.
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub timestamp: f64,
    pub image: ColorImage,
    /// Camera-to-world transform.
    pub camera_transform: Mat4,
    /// Intrinsics in pixels of `image`.
    pub intrinsics: CameraIntrinsics,
    pub depth: Option<DepthFrame>,
}

/// Color and depth paired for a single instant.
#[derive(Debug, Clone)]
pub struct SynchronizedFrame {
    pub timestamp: f64,
    pub color_image: ColorImage,
    pub depth_map: DepthMap,
    pub confidence_map: Option<ConfidenceMap>,
    pub camera_transform: Mat4,
    pub camera_intrinsics: CameraIntrinsics,
    pub color_resolution: Resolution,
    pub depth_resolution: Resolution,
    /// Absolute color/depth timestamp difference in seconds.
    pub timestamp_delta: f64,
}

impl SynchronizedFrame {
    pub fn camera_position(&self) -> Vec3 {
        self.camera_transform.w_axis.truncate()
    }

    /// Intrinsics rescaled to the depth map's resolution.
    pub fn depth_intrinsics(&self) -> CameraIntrinsics {
        let c = self.color_resolution.as_vec2();
        let d = self.depth_resolution.as_vec2();
        if c.x <= 0.0 || c.y <= 0.0 {
            return self.camera_intrinsics;
        }
        self.camera_intrinsics.scaled(d.x / c.x, d.y / c.y)
    }
}

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, ScanMetricsError};
use crate::types::{BoundingBox, Point3};

/// 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rgba(pub [u8; 4]);

/// A point cloud with optional per-point channels.
///
/// Every present channel has exactly one entry per point; the constructors
/// enforce this. A missing channel means "absent", never zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Point3>,
    colors: Option<Vec<Rgba>>,
    normals: Option<Vec<Point3>>,
    confidences: Option<Vec<f32>>,
}

fn check_len(channel: &str, len: usize, expected: usize) -> Result<()> {
    if len == expected {
        Ok(())
    } else {
        Err(ScanMetricsError::Validation(format!(
            "{channel} has {len} entries, expected {expected}"
        )))
    }
}

impl PointCloud {
    pub fn new(points: Vec<Point3>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }

    pub fn with_colors(mut self, colors: Vec<Rgba>) -> Result<Self> {
        check_len("colors", colors.len(), self.points.len())?;
        self.colors = Some(colors);
        Ok(self)
    }

    pub fn with_normals(mut self, normals: Vec<Point3>) -> Result<Self> {
        check_len("normals", normals.len(), self.points.len())?;
        self.normals = Some(normals);
        Ok(self)
    }

    pub fn with_confidences(mut self, confidences: Vec<f32>) -> Result<Self> {
        check_len("confidences", confidences.len(), self.points.len())?;
        self.confidences = Some(confidences);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn colors(&self) -> Option<&[Rgba]> {
        self.colors.as_deref()
    }

    pub fn normals(&self) -> Option<&[Point3]> {
        self.normals.as_deref()
    }

    pub fn confidences(&self) -> Option<&[f32]> {
        self.confidences.as_deref()
    }

    pub fn color(&self, index: usize) -> Option<Rgba> {
        self.colors.as_ref()?.get(index).copied()
    }

    pub fn normal(&self, index: usize) -> Option<Point3> {
        self.normals.as_ref()?.get(index).copied()
    }

    pub fn confidence(&self, index: usize) -> Option<f32> {
        self.confidences.as_ref()?.get(index).copied()
    }

    /// Bounds of all finite points; `None` for an empty cloud.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.points.iter().copied())
    }

    /// Append another cloud.
    ///
    /// A channel survives only if both clouds carry it (or either is empty);
    /// otherwise it is dropped rather than padded with made-up values.
    pub fn append(&mut self, other: PointCloud) {
        if other.points.is_empty() {
            return;
        }
        if self.points.is_empty() {
            *self = other;
            return;
        }

        fn merge<T>(dst: &mut Option<Vec<T>>, src: Option<Vec<T>>, name: &str) {
            match (dst.as_mut(), src) {
                (Some(d), Some(s)) => d.extend(s),
                (Some(_), None) | (None, Some(_)) => {
                    debug!(channel = name, "Dropping point channel missing on one side of append");
                    *dst = None;
                }
                (None, None) => {}
            }
        }

        merge(&mut self.colors, other.colors, "colors");
        merge(&mut self.normals, other.normals, "normals");
        merge(&mut self.confidences, other.confidences, "confidences");
        self.points.extend(other.points);
    }

    /// Replace the whole cloud with a newer snapshot.
    pub fn replace(&mut self, other: PointCloud) {
        *self = other;
    }

    /// Keep the points at the given indices (in order), carrying every channel.
    pub fn select(&self, indices: &[usize]) -> PointCloud {
        fn pick<T: Copy>(src: &Option<Vec<T>>, indices: &[usize]) -> Option<Vec<T>> {
            src.as_ref().map(|v| indices.iter().map(|&i| v[i]).collect())
        }
        let indices: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.points.len())
            .collect();
        PointCloud {
            points: indices.iter().map(|&i| self.points[i]).collect(),
            colors: pick(&self.colors, &indices),
            normals: pick(&self.normals, &indices),
            confidences: pick(&self.confidences, &indices),
        }
    }
}

pub mod depth;
pub mod lraw;

use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{Result, ScanMetricsError};

use lraw::LrawCapture;

/// Result of the ingestion stage.
#[derive(Debug)]
pub struct IngestionResult {
    pub capture: LrawCapture,
    pub stats: IngestionStats,
}

/// Statistics about the ingested capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionStats {
    pub anchors: usize,
    pub total_vertices: usize,
    pub total_faces: usize,
    pub classified_anchors: usize,
    pub texture_frames: usize,
    pub depth_frames: usize,
    pub has_confidence_maps: bool,
    pub format_version: u16,
    pub input_format: String,
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Lraw,
}

impl InputFormat {
    /// Detect format from file extension (case-insensitive), falling back to
    /// the file's magic bytes.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "lraw" => Ok(InputFormat::Lraw),
            _ if has_lraw_magic(path) => Ok(InputFormat::Lraw),
            _ => Err(ScanMetricsError::Input(format!(
                "Unsupported file format: .{ext}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Lraw => "LRAW",
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn has_lraw_magic(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .is_ok_and(|_| magic == lraw::MAGIC)
}

/// Run the full ingestion stage.
pub fn ingest(config: &PipelineConfig) -> Result<IngestionResult> {
    // 1. Validate input exists
    if !config.input.exists() {
        return Err(ScanMetricsError::Input(format!(
            "Input file not found: {}",
            config.input.display()
        )));
    }

    // 2. Detect format
    let format = InputFormat::from_path(&config.input)?;
    info!(format = %format, path = %config.input.display(), "Detected input format");

    // 3. Decode
    let capture = match format {
        InputFormat::Lraw => lraw::read_lraw(&config.input)?,
    };

    // 4. Compute stats
    let stats = compute_stats(&capture, format);
    debug!(
        anchors = stats.anchors,
        vertices = stats.total_vertices,
        faces = stats.total_faces,
        textures = stats.texture_frames,
        depth = stats.depth_frames,
        "Ingestion stats"
    );

    Ok(IngestionResult { capture, stats })
}

/// Compute summary statistics from a decoded capture.
pub fn compute_stats(capture: &LrawCapture, format: InputFormat) -> IngestionStats {
    IngestionStats {
        anchors: capture.anchors.len(),
        total_vertices: capture.anchors.iter().map(|a| a.mesh.vertex_count()).sum(),
        total_faces: capture.anchors.iter().map(|a| a.mesh.face_count()).sum(),
        classified_anchors: capture
            .anchors
            .iter()
            .filter(|a| a.mesh.classification.is_some())
            .count(),
        texture_frames: capture.texture_frames.len(),
        depth_frames: capture.depth_frames.len(),
        has_confidence_maps: capture.depth_frames.iter().any(|d| d.confidence.is_some()),
        format_version: capture.version,
        input_format: format.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::lraw::{MeshAnchor, encode_lraw};
    use super::*;
    use crate::types::{AnchorId, Mesh};

    fn capture() -> LrawCapture {
        let tri = Mesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![[0, 1, 2]]);
        let mut classified = Mesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Z, Vec3::ONE],
            vec![[0, 2, 1], [1, 2, 3]],
        );
        classified.classification = Some(vec![2; 4]);
        LrawCapture {
            anchors: vec![
                MeshAnchor {
                    id: AnchorId([1; 16]),
                    mesh: tri,
                },
                MeshAnchor {
                    id: AnchorId([2; 16]),
                    mesh: classified,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn format_detection_by_extension() {
        assert_eq!(
            InputFormat::from_path(Path::new("room.lraw")).unwrap(),
            InputFormat::Lraw
        );
        assert_eq!(
            InputFormat::from_path(Path::new("Room.LRAW")).unwrap(),
            InputFormat::Lraw
        );
    }

    #[test]
    fn format_detection_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        std::fs::write(&path, encode_lraw(&capture())).unwrap();
        assert_eq!(InputFormat::from_path(&path).unwrap(), InputFormat::Lraw);
    }

    #[test]
    fn format_detection_unsupported() {
        assert!(InputFormat::from_path(Path::new("/nonexistent/file.fbx")).is_err());
    }

    #[test]
    fn compute_stats_basic() {
        let stats = compute_stats(&capture(), InputFormat::Lraw);
        assert_eq!(stats.anchors, 2);
        assert_eq!(stats.total_vertices, 7);
        assert_eq!(stats.total_faces, 3);
        assert_eq!(stats.classified_anchors, 1);
        assert_eq!(stats.texture_frames, 0);
        assert!(!stats.has_confidence_maps);
        assert_eq!(stats.input_format, "LRAW");
    }

    #[test]
    fn ingest_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.lraw");
        std::fs::write(&path, encode_lraw(&capture())).unwrap();
        let config = PipelineConfig {
            input: path,
            ..Default::default()
        };
        let result = ingest(&config).unwrap();
        assert_eq!(result.stats.anchors, 2);
        assert_eq!(result.stats.classified_anchors, 1);
        assert_eq!(result.capture.anchors[1].mesh.classification, Some(vec![2; 4]));
    }

    #[test]
    fn ingest_missing_file() {
        let config = PipelineConfig {
            input: std::path::PathBuf::from("/nonexistent/file.lraw"),
            ..Default::default()
        };
        let err = ingest(&config).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}

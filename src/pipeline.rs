use std::fs::File;
use std::io::BufWriter;
use std::time::{Duration, Instant};

use glam::Vec3;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::coverage::{CoverageAnalyzer, CoverageSnapshot};
use crate::error::Result;
use crate::ingestion::depth::{decode_color, extract_point_cloud};
use crate::ingestion::lraw::{DepthCapture, LrawCapture, TextureFrame};
use crate::ingestion::{self, IngestionResult};
use crate::measure::{
    FaceFilter, VolumeEstimate, cast_ray, estimate_volume_open_mesh, mesh_surface_area,
    room_volume, volume::edge_diagnostics, volume::room_floor_area,
};
use crate::sync::{
    DepthStatistics, FrameSynchronizer, SyncStatistics, SynchronizedFrame,
    find_best_texture_frame,
};
use crate::types::{BoundingBox, Measurement, Mesh, PointCloud};

/// Per-anchor geometry summary.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorSummary {
    pub id: String,
    pub vertices: usize,
    pub faces: usize,
    pub surface_area_m2: f32,
    pub watertight: bool,
    pub boundary_edges: usize,
    pub bounds: Option<BoundingBox>,
}

/// Whole-scan geometry summary.
#[derive(Debug, Clone, Serialize)]
pub struct MeshSummary {
    pub vertices: usize,
    pub faces: usize,
    pub valid_faces: usize,
    pub watertight: bool,
    pub boundary_edges: usize,
    pub non_manifold_edges: usize,
    pub bounds: Option<BoundingBox>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepthFrameSummary {
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub statistics: Option<DepthStatistics>,
    pub extracted_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointCloudSummary {
    pub points: usize,
    pub has_colors: bool,
    pub has_normals: bool,
    pub has_confidences: bool,
    pub bounds: Option<BoundingBox>,
}

/// Frame picked for texturing the scan's focus point.
#[derive(Debug, Clone, Serialize)]
pub struct TextureChoice {
    pub timestamp: f64,
    pub score: f32,
    pub target: Vec3,
}

/// Everything a run computes, in one serializable report.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub input: String,
    pub ingestion: ingestion::IngestionStats,
    pub anchors: Vec<AnchorSummary>,
    pub mesh: MeshSummary,
    pub measurements: Vec<Measurement>,
    pub depth_frames: Vec<DepthFrameSummary>,
    pub point_cloud: PointCloudSummary,
    pub coverage: CoverageSnapshot,
    pub sync: SyncStatistics,
    pub best_texture_frame: Option<TextureChoice>,
}

/// Summary of a completed pipeline run.
#[derive(Debug)]
pub struct ProcessingResult {
    /// `None` for a dry run.
    pub report: Option<ScanReport>,
    pub duration: Duration,
}

/// Pipeline orchestrator -- drives ingestion, measurement, coverage and sync.
pub struct Pipeline;

impl Pipeline {
    /// Run the full analysis pipeline.
    pub fn run(config: &PipelineConfig) -> Result<ProcessingResult> {
        let start = Instant::now();
        config.validate()?;

        info!(input = %config.input.display(), "Starting pipeline");

        if config.dry_run {
            info!("--dry-run: reading capture only");
            let ingestion_result = ingestion::ingest(config)?;
            print_dry_run_summary(&ingestion_result);
            return Ok(ProcessingResult {
                report: None,
                duration: start.elapsed(),
            });
        }

        info!("Stage 1/5: Ingestion");
        let IngestionResult { capture, stats } = ingestion::ingest(config)?;

        info!("Stage 2/5: Geometry");
        let combined = capture.combined_mesh();
        let world = combined.flatten();
        let anchors = Self::summarize_anchors(&capture);
        let mesh = summarize_mesh(&world);
        let measurements = Self::measure(config, &world);
        print_geometry_summary(&mesh, &measurements);

        info!("Stage 3/5: Point clouds");
        let (depth_frames, frame_clouds) = Self::extract_points(config, &capture)?;

        info!("Stage 4/5: Coverage");
        let coverage = Self::coverage(config, &capture, &frame_clouds)?;
        print_coverage_summary(&coverage);
        let cloud = merge_clouds(frame_clouds);

        info!("Stage 5/5: Frame synchronization");
        let (sync, frames) = Self::synchronize(config, &capture);
        let best_texture_frame = pick_texture_frame(&world, &frames);

        let report = ScanReport {
            input: config.input.display().to_string(),
            ingestion: stats,
            anchors,
            mesh,
            measurements,
            depth_frames,
            point_cloud: PointCloudSummary {
                points: cloud.len(),
                has_colors: cloud.colors().is_some(),
                has_normals: cloud.normals().is_some(),
                has_confidences: cloud.confidences().is_some(),
                bounds: cloud.bounding_box(),
            },
            coverage,
            sync,
            best_texture_frame,
        };

        if let Some(path) = &config.report {
            info!(path = %path.display(), "Writing report");
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &report).map_err(std::io::Error::other)?;
        }

        let duration = start.elapsed();
        info!(
            anchors = report.anchors.len(),
            points = report.point_cloud.points,
            synchronized = report.sync.synchronized_frames,
            elapsed = ?duration,
            "Pipeline complete"
        );

        Ok(ProcessingResult {
            report: Some(report),
            duration,
        })
    }

    fn summarize_anchors(capture: &LrawCapture) -> Vec<AnchorSummary> {
        capture
            .anchors
            .par_iter()
            .map(|anchor| {
                let world = anchor.mesh.to_world();
                let edges = edge_diagnostics(&world);
                AnchorSummary {
                    id: anchor.id.to_string(),
                    vertices: world.vertex_count(),
                    faces: world.face_count(),
                    surface_area_m2: mesh_surface_area(&world, &FaceFilter::All),
                    watertight: edges.is_watertight(),
                    boundary_edges: edges.boundary_edges.len(),
                    bounds: BoundingBox::from_points(world.vertices.iter().copied()),
                }
            })
            .collect()
    }

    fn measure(config: &PipelineConfig, world: &Mesh) -> Vec<Measurement> {
        let units = config.units;
        let Some(bb) = BoundingBox::from_points(world.vertices.iter().copied()) else {
            warn!("Capture has no geometry, skipping measurements");
            return Vec::new();
        };
        let corners = vec![bb.min, bb.max];

        let mut out = vec![
            Measurement::area(
                corners.clone(),
                mesh_surface_area(world, &FaceFilter::All),
                units,
            ),
            Measurement::area(corners.clone(), room_floor_area(world), units),
            Measurement::volume(corners.clone(), estimate_volume_open_mesh(world), units),
        ];

        let room = room_volume(world, config.floor_height, config.ceiling_height);
        out.push(Measurement::volume(
            corners,
            VolumeEstimate::Approximate {
                volume: room,
                fill_factor: 1.0,
            },
            units,
        ));

        let top = Vec3::new(bb.min.x, bb.max.y, bb.min.z);
        out.push(Measurement::distance(vec![bb.min, top], bb.size().y, units));
        out
    }

    fn extract_points(
        config: &PipelineConfig,
        capture: &LrawCapture,
    ) -> Result<(Vec<DepthFrameSummary>, Vec<FrameCloud>)> {
        let max_delta = config.sync.max_timestamp_delta;
        let extracted: Vec<(DepthFrameSummary, FrameCloud)> = capture
            .depth_frames
            .par_iter()
            .map(|frame| {
                let cloud = if config.extract_point_cloud {
                    let color = nearest_texture(&capture.texture_frames, frame, max_delta)
                        .and_then(|t| decode_color(&t.image));
                    extract_point_cloud(frame, color.as_ref(), &config.extraction)?
                } else {
                    PointCloud::default()
                };
                let res = frame.depth.resolution();
                let summary = DepthFrameSummary {
                    timestamp: frame.timestamp,
                    width: res.width,
                    height: res.height,
                    statistics: frame.depth.statistics(),
                    extracted_points: cloud.len(),
                };
                let camera = frame.camera_transform.w_axis.truncate();
                Ok((summary, FrameCloud { camera, cloud }))
            })
            .collect::<Result<_>>()?;

        let (summaries, clouds): (Vec<_>, Vec<_>) = extracted.into_iter().unzip();
        info!(
            frames = summaries.len(),
            points = clouds.iter().map(|f| f.cloud.len()).sum::<usize>(),
            "Point extraction complete"
        );
        Ok((summaries, clouds))
    }

    /// Feed anchors and per-frame clouds into a fresh analyzer. Each cloud
    /// is observed from its depth camera; each anchor from the capture
    /// camera closest to it.
    fn coverage(
        config: &PipelineConfig,
        capture: &LrawCapture,
        frames: &[FrameCloud],
    ) -> Result<CoverageSnapshot> {
        let cameras: Vec<Vec3> = capture
            .texture_frames
            .iter()
            .map(|t| t.camera_transform.w_axis.truncate())
            .chain(frames.iter().map(|f| f.camera))
            .collect();

        let mut analyzer = CoverageAnalyzer::new(config.coverage.clone());
        analyzer.start()?;
        for anchor in &capture.anchors {
            let camera = BoundingBox::from_points(anchor.mesh.world_vertices())
                .and_then(|bb| nearest_camera(&cameras, bb.center()));
            analyzer.update_with_mesh(&anchor.mesh, camera);
        }
        for frame in frames.iter().filter(|f| !f.cloud.is_empty()) {
            analyzer.update_with_points(&frame.cloud, Some(frame.camera));
        }
        analyzer.finalize()?;
        Ok((*analyzer.snapshot()).clone())
    }

    fn synchronize(
        config: &PipelineConfig,
        capture: &LrawCapture,
    ) -> (SyncStatistics, Vec<SynchronizedFrame>) {
        enum Event<'a> {
            Depth(&'a DepthCapture),
            Color(&'a TextureFrame),
        }

        let mut events: Vec<(f64, Event<'_>)> = capture
            .depth_frames
            .iter()
            .map(|d| (d.timestamp, Event::Depth(d)))
            .chain(
                capture
                    .texture_frames
                    .iter()
                    .map(|t| (t.timestamp, Event::Color(t))),
            )
            .collect();
        // Depth sorts before color at equal timestamps so it can be matched.
        events.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| matches!(a.1, Event::Color(_)).cmp(&matches!(b.1, Event::Color(_))))
        });

        let mut synchronizer = FrameSynchronizer::new(config.sync.clone());
        let frames = synchronizer.subscribe();
        for (_, event) in events {
            match event {
                Event::Depth(d) => {
                    synchronizer.push_depth(d.to_depth_frame());
                }
                Event::Color(t) => {
                    synchronizer.push_color(t.to_color_frame());
                }
            }
        }
        synchronizer.stop();

        (synchronizer.statistics(), frames.try_iter().collect())
    }
}

/// Points back-projected from one depth frame, with the camera they were
/// seen from.
struct FrameCloud {
    camera: Vec3,
    cloud: PointCloud,
}

fn merge_clouds(frames: Vec<FrameCloud>) -> PointCloud {
    let mut combined = PointCloud::default();
    for frame in frames {
        combined.append(frame.cloud);
    }
    combined
}

fn nearest_camera(cameras: &[Vec3], target: Vec3) -> Option<Vec3> {
    cameras
        .iter()
        .copied()
        .filter(|c| c.is_finite())
        .min_by(|a, b| a.distance_squared(target).total_cmp(&b.distance_squared(target)))
}

/// Texture frame closest in time to a depth frame, within `max_delta`.
fn nearest_texture<'a>(
    textures: &'a [TextureFrame],
    depth: &DepthCapture,
    max_delta: f64,
) -> Option<&'a TextureFrame> {
    textures
        .iter()
        .map(|t| ((t.timestamp - depth.timestamp).abs(), t))
        .filter(|(delta, _)| *delta <= max_delta)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, t)| t)
}

/// Best frame for texturing the surface seen from the mean camera position
/// towards the scan's centre.
fn pick_texture_frame(world: &Mesh, frames: &[SynchronizedFrame]) -> Option<TextureChoice> {
    if frames.is_empty() {
        return None;
    }
    let bb = BoundingBox::from_points(world.vertices.iter().copied())?;
    let eye = frames.iter().map(|f| f.camera_position()).sum::<Vec3>() / frames.len() as f32;
    let center = bb.center();

    let (target, normal) = match cast_ray(eye, center - eye, world) {
        Ok(hit) => {
            let normal = world
                .triangle(hit.face)
                .map(|[a, b, c]| (b - a).cross(c - a).normalize_or_zero())
                .unwrap_or(Vec3::ZERO);
            let facing = if normal.dot(eye - hit.point) < 0.0 { -normal } else { normal };
            (hit.point, facing)
        }
        Err(miss) => {
            info!(reason = ?miss, "Centre ray missed the mesh, scoring the bounding-box centre");
            (center, (eye - center).normalize_or_zero())
        }
    };

    let (index, score) = find_best_texture_frame(target, normal, frames)?;
    Some(TextureChoice {
        timestamp: frames[index].timestamp,
        score,
        target,
    })
}

fn summarize_mesh(world: &Mesh) -> MeshSummary {
    let edges = edge_diagnostics(world);
    MeshSummary {
        vertices: world.vertex_count(),
        faces: world.face_count(),
        valid_faces: world.valid_face_count(),
        watertight: edges.is_watertight(),
        boundary_edges: edges.boundary_edges.len(),
        non_manifold_edges: edges.non_manifold_edges.len(),
        bounds: BoundingBox::from_points(world.vertices.iter().copied()),
    }
}

/// Print dry-run summary with capture stats.
fn print_dry_run_summary(ingestion: &IngestionResult) {
    let stats = &ingestion.stats;
    println!("=== Dry Run Summary ===");
    println!("  Format:      {} v{}", stats.input_format, stats.format_version);
    println!("  Anchors:     {}", stats.anchors);
    println!("  Vertices:    {}", stats.total_vertices);
    println!("  Faces:       {}", stats.total_faces);
    println!("  Classified:  {}", stats.classified_anchors);
    println!("  Textures:    {}", stats.texture_frames);
    println!("  Depth:       {}", stats.depth_frames);
    println!(
        "  Confidence:  {}",
        if stats.has_confidence_maps { "yes" } else { "no" }
    );
}

/// Print mesh health and headline measurements.
fn print_geometry_summary(mesh: &MeshSummary, measurements: &[Measurement]) {
    println!("=== Geometry ===");
    println!("  Vertices:    {}", mesh.vertices);
    println!("  Faces:       {} ({} valid)", mesh.faces, mesh.valid_faces);
    println!(
        "  Watertight:  {} ({} boundary, {} non-manifold edges)",
        if mesh.watertight { "yes" } else { "no" },
        mesh.boundary_edges,
        mesh.non_manifold_edges
    );
    if let Some(bb) = &mesh.bounds {
        println!(
            "  Bounding box: ({:.3}, {:.3}, {:.3}) → ({:.3}, {:.3}, {:.3})",
            bb.min.x, bb.min.y, bb.min.z, bb.max.x, bb.max.y, bb.max.z
        );
        println!("  Diagonal:    {:.3} m", bb.diagonal());
    }
    for m in measurements {
        println!("  {:?}: {}", m.kind, m.formatted_value);
    }
}

fn print_coverage_summary(snapshot: &CoverageSnapshot) {
    let s = &snapshot.statistics;
    println!("=== Coverage ===");
    println!("  Cells:       {}", s.covered_cells);
    println!("  Area:        {:.2} m²", s.scanned_area_m2);
    println!("  Quality:     {:.2}", s.average_quality);
    println!("  Coverage:    {:.1}%", s.coverage_percentage);
    println!("  Gaps:        {}", s.gap_count);
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;
    use crate::ingestion::lraw::MeshAnchor;
    use crate::sync::{CameraIntrinsics, ColorImage, DepthMap, Resolution};
    use crate::types::AnchorId;

    fn cube_anchor() -> MeshAnchor {
        let v = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        ];
        let f = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [1, 2, 6],
            [1, 6, 5],
            [0, 4, 7],
            [0, 7, 3],
        ];
        MeshAnchor {
            id: AnchorId([3; 16]),
            mesh: Mesh::new(v, f),
        }
    }

    fn texture(timestamp: f64, eye: Vec3) -> TextureFrame {
        TextureFrame {
            id: [0; 16],
            timestamp,
            camera_transform: Mat4::from_translation(eye),
            intrinsics: CameraIntrinsics {
                fx: 100.0,
                fy: 100.0,
                cx: 50.0,
                cy: 50.0,
            },
            image: ColorImage::new(Resolution::new(100, 100), Vec::new()),
        }
    }

    fn depth(timestamp: f64) -> DepthCapture {
        let res = Resolution::new(4, 4);
        DepthCapture {
            id: [1; 16],
            timestamp,
            camera_transform: Mat4::from_translation(Vec3::new(0.5, 0.5, 3.0)),
            intrinsics: CameraIntrinsics {
                fx: 4.0,
                fy: 4.0,
                cx: 2.0,
                cy: 2.0,
            },
            depth: DepthMap::new(res, vec![2.0; 16]).unwrap(),
            confidence: None,
        }
    }

    #[test]
    fn cube_measurements() {
        let config = PipelineConfig::default();
        let world = cube_anchor().mesh;
        let m = Pipeline::measure(&config, &world);
        assert_eq!(m.len(), 5);
        assert!((m[0].value - 6.0).abs() < 1e-4);
        assert!((m[1].value - 1.0).abs() < 1e-4);
        assert!((m[2].value - 1.0).abs() < 1e-3);
        assert_eq!(m[2].confidence, 1.0);
        assert!((m[3].value - 1.0).abs() < 1e-4);
        assert_eq!(m[4].formatted_value, "1.000 m");
    }

    #[test]
    fn empty_mesh_has_no_measurements() {
        assert!(Pipeline::measure(&PipelineConfig::default(), &Mesh::default()).is_empty());
    }

    #[test]
    fn synchronize_pairs_by_timestamp() {
        let capture = LrawCapture {
            texture_frames: vec![
                texture(0.010, Vec3::new(0.5, 0.5, 3.0)),
                texture(0.500, Vec3::new(0.5, 0.5, 3.0)),
            ],
            depth_frames: vec![depth(0.0)],
            ..Default::default()
        };
        let (stats, frames) = Pipeline::synchronize(&PipelineConfig::default(), &capture);
        assert_eq!(stats.synchronized_frames, 1);
        assert_eq!(stats.dropped_frames, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp, 0.010);
    }

    #[test]
    fn texture_frame_faces_the_cube() {
        let capture = LrawCapture {
            anchors: vec![cube_anchor()],
            texture_frames: vec![
                texture(0.0, Vec3::new(0.5, 0.5, 3.0)),
                texture(0.1, Vec3::new(1.5, 0.5, 3.0)),
            ],
            depth_frames: vec![depth(0.0), depth(0.1)],
            ..Default::default()
        };
        let world = capture.combined_mesh().flatten();
        let (_, frames) = Pipeline::synchronize(&PipelineConfig::default(), &capture);
        assert_eq!(frames.len(), 2);

        let choice = pick_texture_frame(&world, &frames).unwrap();
        // the ray from the mean eye hits the +Z face at z = 1
        assert!((choice.target.z - 1.0).abs() < 1e-4);
        assert_eq!(choice.timestamp, 0.0);
    }

    #[test]
    fn extract_points_respects_flag() {
        let capture = LrawCapture {
            depth_frames: vec![depth(0.0)],
            ..Default::default()
        };
        let mut config = PipelineConfig {
            extract_point_cloud: true,
            ..Default::default()
        };
        let (summaries, frames) = Pipeline::extract_points(&config, &capture).unwrap();
        assert_eq!(frames[0].cloud.len(), 16);
        assert_eq!(frames[0].camera, Vec3::new(0.5, 0.5, 3.0));
        assert_eq!(summaries[0].extracted_points, 16);
        assert!(summaries[0].statistics.is_some());
        assert_eq!(merge_clouds(frames).len(), 16);

        config.extract_point_cloud = false;
        let (summaries, frames) = Pipeline::extract_points(&config, &capture).unwrap();
        assert!(frames[0].cloud.is_empty());
        assert_eq!(summaries.len(), 1);
    }

    #[test]
    fn depth_stamped_after_color_pairs() {
        let capture = LrawCapture {
            texture_frames: vec![texture(1.000, Vec3::new(0.5, 0.5, 3.0))],
            depth_frames: vec![depth(1.010)],
            ..Default::default()
        };
        let (stats, frames) = Pipeline::synchronize(&PipelineConfig::default(), &capture);
        assert_eq!(stats.synchronized_frames, 1);
        assert_eq!(stats.dropped_frames, 0);
        assert_eq!(frames.len(), 1);
        assert!((frames[0].timestamp_delta - 0.010).abs() < 1e-9);
    }

    /// Four confident points inside the cell at the origin.
    fn cell_cloud() -> PointCloud {
        let points = (0..4)
            .map(|i| Vec3::new(0.01 + i as f32 * 0.01, 0.025, 0.025))
            .collect();
        PointCloud::new(points).with_confidences(vec![1.0; 4]).unwrap()
    }

    /// Average quality after observing the same cell from each camera.
    fn single_cell_quality(cameras: [Vec3; 3]) -> f32 {
        let frames: Vec<FrameCloud> = cameras
            .into_iter()
            .map(|camera| FrameCloud {
                camera,
                cloud: cell_cloud(),
            })
            .collect();
        let snapshot =
            Pipeline::coverage(&PipelineConfig::default(), &LrawCapture::default(), &frames)
                .unwrap();
        assert_eq!(snapshot.statistics.covered_cells, 1);
        assert_eq!(snapshot.statistics.updates_applied, 3);
        snapshot.statistics.average_quality
    }

    #[test]
    fn multi_view_coverage_reaches_excellent() {
        use crate::coverage::Quality;

        let three_views = [
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::new(3.0, 0.0, 0.0),
            Vec3::new(0.0, 3.0, 0.0),
        ];
        assert_eq!(single_cell_quality(three_views), Quality::Excellent.score());

        let one_view = [Vec3::new(0.0, 0.0, 3.0); 3];
        assert_eq!(single_cell_quality(one_view), Quality::Good.score());
    }

    #[test]
    fn anchor_observed_from_nearest_camera() {
        let capture = LrawCapture {
            anchors: vec![cube_anchor()],
            texture_frames: vec![
                texture(0.0, Vec3::new(0.5, 0.5, 3.0)),
                texture(0.1, Vec3::new(40.0, 0.5, 0.5)),
            ],
            ..Default::default()
        };
        let cameras = [Vec3::new(0.5, 0.5, 3.0), Vec3::new(40.0, 0.5, 0.5)];
        assert_eq!(
            nearest_camera(&cameras, Vec3::splat(0.5)),
            Some(Vec3::new(0.5, 0.5, 3.0))
        );
        let snapshot = Pipeline::coverage(&PipelineConfig::default(), &capture, &[]).unwrap();
        assert!(snapshot.statistics.covered_cells > 0);
        assert_eq!(snapshot.statistics.updates_applied, 1);
    }
}

//! Coverage Analyzer: tracks how thoroughly each region of space has been
//! scanned and clusters under-scanned regions into gaps.
//!
//! The analyzer is mutated through `&mut self` by a single producer. Every
//! accepted update recomputes a [`CoverageSnapshot`] from the grid and
//! publishes it through a [`CoverageHandle`], which any number of readers
//! may hold.

pub mod gaps;
pub mod grid;

use std::sync::{Arc, PoisonError, RwLock};

use glam::Vec3;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CoverageConfig;
use crate::error::{Result, ScanMetricsError};
use crate::types::{Mesh, PointCloud};

pub use gaps::{Gap, detect_gaps};
pub use grid::{CoverageCell, CoverageGrid, GridCoord, Quality};

/// Confidence credited to a mesh surface sample.
const MESH_SAMPLE_CONFIDENCE: f32 = 1.0;

/// Confidence credited to a point with no confidence channel.
const DEFAULT_POINT_CONFIDENCE: f32 = 0.5;

/// Upper bound on samples per triangle edge when rasterizing a mesh.
const MAX_SAMPLES_PER_EDGE: usize = 64;

/// Scan session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    Idle,
    Accumulating,
    Paused,
    Finalized,
}

/// Aggregate coverage figures, recomputed from the grid on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageStatistics {
    pub covered_cells: usize,
    pub scanned_area_m2: f32,
    /// Mean cell quality score in [0, 1].
    pub average_quality: f32,
    pub gap_count: usize,
    /// Share of covered cells at or above the gap threshold, in [0, 100].
    pub coverage_percentage: f32,
    pub updates_applied: u64,
    /// Updates received while not accumulating.
    pub updates_rejected: u64,
    /// Samples that could not be placed in the grid.
    pub samples_rejected: u64,
}

/// Immutable view of the analyzer published after each change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoverageSnapshot {
    pub state: ScanState,
    pub statistics: CoverageStatistics,
    pub gaps: Vec<Gap>,
}

/// Cloneable read handle onto the latest published snapshot.
#[derive(Debug, Clone, Default)]
pub struct CoverageHandle {
    latest: Arc<RwLock<Arc<CoverageSnapshot>>>,
}

impl CoverageHandle {
    pub fn snapshot(&self) -> Arc<CoverageSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn statistics(&self) -> CoverageStatistics {
        self.snapshot().statistics.clone()
    }

    pub fn detected_gaps(&self) -> Vec<Gap> {
        self.snapshot().gaps.clone()
    }

    fn publish(&self, snapshot: CoverageSnapshot) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }
}

/// Spatial coverage tracker for one scan session.
#[derive(Debug)]
pub struct CoverageAnalyzer {
    config: CoverageConfig,
    grid: CoverageGrid,
    state: ScanState,
    updates_applied: u64,
    updates_rejected: u64,
    samples_rejected: u64,
    handle: CoverageHandle,
}

impl CoverageAnalyzer {
    pub fn new(config: CoverageConfig) -> Self {
        let grid = CoverageGrid::new(config.cell_size);
        Self {
            config,
            grid,
            state: ScanState::Idle,
            updates_applied: 0,
            updates_rejected: 0,
            samples_rejected: 0,
            handle: CoverageHandle::default(),
        }
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn grid(&self) -> &CoverageGrid {
        &self.grid
    }

    /// A read handle that keeps observing this analyzer's snapshots.
    pub fn handle(&self) -> CoverageHandle {
        self.handle.clone()
    }

    pub fn snapshot(&self) -> Arc<CoverageSnapshot> {
        self.handle.snapshot()
    }

    pub fn statistics(&self) -> CoverageStatistics {
        self.handle.statistics()
    }

    pub fn detected_gaps(&self) -> Vec<Gap> {
        self.handle.detected_gaps()
    }

    /// Idle -> Accumulating.
    pub fn start(&mut self) -> Result<()> {
        self.transition(&[ScanState::Idle], ScanState::Accumulating)
    }

    /// Accumulating -> Paused. The grid and snapshot are kept.
    pub fn pause(&mut self) -> Result<()> {
        self.transition(&[ScanState::Accumulating], ScanState::Paused)
    }

    /// Paused -> Accumulating.
    pub fn resume(&mut self) -> Result<()> {
        self.transition(&[ScanState::Paused], ScanState::Accumulating)
    }

    /// Stop accepting updates. The last snapshot stays readable.
    pub fn finalize(&mut self) -> Result<()> {
        self.transition(
            &[ScanState::Accumulating, ScanState::Paused],
            ScanState::Finalized,
        )
    }

    /// Drop all accumulated coverage and return to `Idle`.
    pub fn reset(&mut self) {
        self.grid.clear();
        self.state = ScanState::Idle;
        self.updates_applied = 0;
        self.updates_rejected = 0;
        self.samples_rejected = 0;
        self.publish();
        info!("Coverage reset");
    }

    fn transition(&mut self, from: &[ScanState], to: ScanState) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(ScanMetricsError::Validation(format!(
                "cannot move coverage analyzer from {:?} to {:?}",
                self.state, to
            )));
        }
        info!(from = ?self.state, to = ?to, "Coverage state change");
        self.state = to;
        self.publish();
        Ok(())
    }

    /// Accumulate a mesh snapshot. Vertices are taken through the mesh
    /// transform and every valid triangle is sampled at roughly cell spacing.
    ///
    /// Returns false when the update was ignored because the session is not
    /// accumulating.
    pub fn update_with_mesh(&mut self, mesh: &Mesh, camera: Option<Vec3>) -> bool {
        if !self.accepting() {
            return false;
        }
        let world = mesh.to_world();
        let spacing = self.grid.cell_size();
        let mut rejected = 0u64;
        let mut samples = 0usize;
        for (_, [a, b, c]) in world.triangles() {
            for p in triangle_samples(a, b, c, spacing) {
                samples += 1;
                if !self.grid.observe(p, MESH_SAMPLE_CONFIDENCE, camera) {
                    rejected += 1;
                }
            }
        }
        debug!(faces = world.face_count(), samples, rejected, "Coverage mesh update");
        self.finish_update(rejected);
        true
    }

    /// Accumulate a point-cloud snapshot, weighting each point by its
    /// confidence when the cloud carries one.
    pub fn update_with_points(&mut self, cloud: &PointCloud, camera: Option<Vec3>) -> bool {
        if !self.accepting() {
            return false;
        }
        let mut rejected = 0u64;
        for (i, &p) in cloud.points().iter().enumerate() {
            let confidence = cloud.confidence(i).unwrap_or(DEFAULT_POINT_CONFIDENCE);
            if !self.grid.observe(p, confidence, camera) {
                rejected += 1;
            }
        }
        debug!(points = cloud.len(), rejected, "Coverage point update");
        self.finish_update(rejected);
        true
    }

    fn accepting(&mut self) -> bool {
        if self.state == ScanState::Accumulating {
            return true;
        }
        self.updates_rejected += 1;
        debug!(state = ?self.state, "Coverage update ignored");
        self.publish();
        false
    }

    fn finish_update(&mut self, rejected: u64) {
        self.updates_applied += 1;
        self.samples_rejected += rejected;
        if rejected > 0 {
            warn!(rejected, "Samples outside the coverage grid");
        }
        self.publish();
    }

    /// Recompute statistics and gaps from the grid and publish them.
    fn publish(&self) {
        let gaps = detect_gaps(
            &self.grid,
            self.config.gap_threshold,
            self.config.neighborhood,
            self.config.min_gap_cells,
        );

        let covered_cells = self
            .grid
            .iter()
            .filter(|(_, c)| c.quality > Quality::None)
            .count();
        let well_covered = self
            .grid
            .iter()
            .filter(|(_, c)| c.quality >= self.config.gap_threshold)
            .count();
        let quality_sum: f32 = self.grid.iter().map(|(_, c)| c.quality.score()).sum();

        let (average_quality, coverage_percentage) = if covered_cells == 0 {
            (0.0, 0.0)
        } else {
            (
                quality_sum / covered_cells as f32,
                (well_covered as f32 / covered_cells as f32 * 100.0).clamp(0.0, 100.0),
            )
        };

        let cell_area = self.grid.cell_size() * self.grid.cell_size();
        let statistics = CoverageStatistics {
            covered_cells,
            scanned_area_m2: covered_cells as f32 * cell_area,
            average_quality,
            gap_count: gaps.len(),
            coverage_percentage,
            updates_applied: self.updates_applied,
            updates_rejected: self.updates_rejected,
            samples_rejected: self.samples_rejected,
        };

        if !gaps.is_empty() {
            debug!(gaps = gaps.len(), largest = gaps[0].cell_count, "Gaps detected");
        }

        self.handle.publish(CoverageSnapshot {
            state: self.state,
            statistics,
            gaps,
        });
    }
}

/// Barycentric lattice over a triangle with spacing close to `spacing`.
fn triangle_samples(a: Vec3, b: Vec3, c: Vec3, spacing: f32) -> Vec<Vec3> {
    let longest = (b - a).length().max((c - b).length()).max((a - c).length());
    if !longest.is_finite() {
        return vec![a, b, c];
    }
    let n = ((longest / spacing).ceil() as usize).clamp(1, MAX_SAMPLES_PER_EDGE);
    let mut samples = Vec::with_capacity((n + 1) * (n + 2) / 2);
    let step = 1.0 / n as f32;
    for i in 0..=n {
        for j in 0..=(n - i) {
            let u = i as f32 * step;
            let v = j as f32 * step;
            samples.push(a + (b - a) * u + (c - a) * v);
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Neighborhood;

    fn floor_mesh(size: f32) -> Mesh {
        Mesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(size, 0.0, 0.0),
                Vec3::new(size, 0.0, size),
                Vec3::new(0.0, 0.0, size),
            ],
            vec![[0, 2, 1], [0, 3, 2]],
        )
    }

    fn analyzer() -> CoverageAnalyzer {
        CoverageAnalyzer::new(CoverageConfig {
            cell_size: 0.1,
            ..Default::default()
        })
    }

    #[test]
    fn lifecycle_transitions() {
        let mut a = analyzer();
        assert_eq!(a.state(), ScanState::Idle);
        assert!(a.pause().is_err());
        a.start().unwrap();
        a.pause().unwrap();
        assert!(a.start().is_err());
        a.resume().unwrap();
        a.finalize().unwrap();
        assert_eq!(a.state(), ScanState::Finalized);
        assert!(a.resume().is_err());
        assert_eq!(a.snapshot().state, ScanState::Finalized);
    }

    #[test]
    fn updates_ignored_unless_accumulating() {
        let mut a = analyzer();
        assert!(!a.update_with_mesh(&floor_mesh(1.0), None));
        assert_eq!(a.statistics().updates_rejected, 1);
        assert_eq!(a.statistics().covered_cells, 0);

        a.start().unwrap();
        assert!(a.update_with_mesh(&floor_mesh(1.0), None));
        let covered = a.statistics().covered_cells;
        assert!(covered >= 100);

        a.pause().unwrap();
        assert!(!a.update_with_mesh(&floor_mesh(2.0), None));
        assert_eq!(a.statistics().covered_cells, covered);
    }

    #[test]
    fn mesh_update_covers_floor_area() {
        let mut a = analyzer();
        a.start().unwrap();
        a.update_with_mesh(&floor_mesh(1.0), None);
        let stats = a.statistics();
        // a 1 m square at 0.1 m cells touches 10x10 cells, plus the far edge row
        assert!((100..=121).contains(&stats.covered_cells));
        assert!((stats.scanned_area_m2 - stats.covered_cells as f32 * 0.01).abs() < 1e-4);
        assert!(stats.average_quality > 0.0 && stats.average_quality <= 1.0);
    }

    #[test]
    fn percentage_stays_in_range() {
        let mut a = analyzer();
        a.start().unwrap();
        for i in 0..5 {
            let cloud = PointCloud::new(
                (0..50)
                    .map(|k| Vec3::new(k as f32 * 0.03, i as f32 * 0.2, 0.0))
                    .collect(),
            );
            a.update_with_points(&cloud, Some(Vec3::new(0.0, 0.0, 2.0)));
            let pct = a.statistics().coverage_percentage;
            assert!((0.0..=100.0).contains(&pct));
        }
    }

    #[test]
    fn sparse_points_form_gaps() {
        let mut a = CoverageAnalyzer::new(CoverageConfig {
            cell_size: 0.1,
            min_gap_cells: 3,
            gap_threshold: Quality::Fair,
            neighborhood: Neighborhood::Six,
        });
        a.start().unwrap();
        let cloud = PointCloud::new((0..6).map(|x| Vec3::new(x as f32 * 0.1 + 0.05, 0.05, 0.05)).collect())
            .with_confidences(vec![0.1; 6])
            .unwrap();
        a.update_with_points(&cloud, None);

        let gaps = a.detected_gaps();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].cell_count, 6);
        assert_eq!(a.statistics().gap_count, 1);
        assert_eq!(a.statistics().coverage_percentage, 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut a = analyzer();
        a.start().unwrap();
        let cloud =
            PointCloud::new((0..20).map(|x| Vec3::new(x as f32 * 0.1 + 0.05, 0.05, 0.05)).collect());
        a.update_with_points(&cloud, None);
        assert!(a.statistics().gap_count > 0);

        a.reset();
        let stats = a.statistics();
        assert_eq!(stats.gap_count, 0);
        assert_eq!(stats.covered_cells, 0);
        assert_eq!(a.state(), ScanState::Idle);
    }

    #[test]
    fn non_finite_points_counted() {
        let mut a = analyzer();
        a.start().unwrap();
        let cloud = PointCloud::new(vec![Vec3::ZERO, Vec3::NAN, Vec3::splat(f32::INFINITY)]);
        a.update_with_points(&cloud, None);
        let stats = a.statistics();
        assert_eq!(stats.samples_rejected, 2);
        assert_eq!(stats.covered_cells, 1);
    }

    #[test]
    fn handle_sees_later_updates() {
        let mut a = analyzer();
        let handle = a.handle();
        a.start().unwrap();
        a.update_with_mesh(&floor_mesh(0.5), None);
        assert_eq!(handle.statistics(), a.statistics());

        let reader = std::thread::spawn(move || handle.snapshot().statistics.covered_cells);
        assert!(reader.join().unwrap() > 0);
    }

    #[test]
    fn finalize_keeps_last_snapshot() {
        let mut a = analyzer();
        a.start().unwrap();
        a.update_with_mesh(&floor_mesh(1.0), None);
        let before = a.statistics().covered_cells;
        a.finalize().unwrap();
        assert!(!a.update_with_mesh(&floor_mesh(3.0), None));
        assert_eq!(a.statistics().covered_cells, before);
    }

    #[test]
    fn triangle_samples_include_corners() {
        let a = Vec3::ZERO;
        let b = Vec3::X;
        let c = Vec3::Z;
        // longest edge sqrt(2) at 0.5 spacing -> 3 steps -> 10 lattice points
        let s = triangle_samples(a, b, c, 0.5);
        assert_eq!(s.len(), 10);
        for corner in [a, b, c] {
            assert!(s.iter().any(|p| (*p - corner).length() < 1e-6));
        }
    }
}

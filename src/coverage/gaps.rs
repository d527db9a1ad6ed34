use std::collections::{HashSet, VecDeque};

use glam::{IVec3, Vec3};
use serde::Serialize;

use crate::config::Neighborhood;

use super::grid::{CoverageGrid, GridCoord, Quality};

/// A connected cluster of under-scanned cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gap {
    /// Mean of the member cells' centroids.
    pub center: Vec3,
    pub cell_count: usize,
    /// Worst quality among the member cells.
    pub worst_quality: Quality,
}

const FACE_OFFSETS: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

fn neighbor_offsets(neighborhood: Neighborhood) -> Vec<IVec3> {
    match neighborhood {
        Neighborhood::Six => FACE_OFFSETS.to_vec(),
        Neighborhood::TwentySix => {
            let mut offsets = Vec::with_capacity(26);
            for dz in -1..=1 {
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        if dx != 0 || dy != 0 || dz != 0 {
                            offsets.push(IVec3::new(dx, dy, dz));
                        }
                    }
                }
            }
            offsets
        }
    }
}

/// Cluster grid cells whose quality is below `threshold` into gaps.
///
/// Components with fewer than `min_cells` cells are dropped. The result is
/// sorted by descending size, then by center for a stable order.
pub fn detect_gaps(
    grid: &CoverageGrid,
    threshold: Quality,
    neighborhood: Neighborhood,
    min_cells: usize,
) -> Vec<Gap> {
    let low: HashSet<u64> = grid
        .iter()
        .filter(|(_, cell)| cell.quality < threshold)
        .map(|(coord, _)| coord.key())
        .collect();

    let offsets = neighbor_offsets(neighborhood);
    let mut visited: HashSet<u64> = HashSet::with_capacity(low.len());
    let mut gaps = Vec::new();
    let mut queue = VecDeque::new();

    for &seed in &low {
        if !visited.insert(seed) {
            continue;
        }
        queue.push_back(seed);
        let mut sum = Vec3::ZERO;
        let mut count = 0usize;
        let mut worst = Quality::Excellent;

        while let Some(key) = queue.pop_front() {
            let coord = GridCoord::from_key(key);
            if let Some(cell) = grid.get(coord) {
                sum += cell.world_position;
                worst = worst.min(cell.quality);
            }
            count += 1;

            for offset in &offsets {
                let Some(next) = coord.checked_offset(*offset) else {
                    continue;
                };
                let next = next.key();
                if low.contains(&next) && visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        if count >= min_cells.max(1) {
            gaps.push(Gap {
                center: sum / count as f32,
                cell_count: count,
                worst_quality: worst,
            });
        }
    }

    gaps.sort_by(|a, b| {
        b.cell_count.cmp(&a.cell_count).then_with(|| {
            a.center
                .to_array()
                .iter()
                .zip(b.center.to_array().iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe_cell(grid: &mut CoverageGrid, x: i32, y: i32, z: i32, hits: u32) {
        let p = GridCoord(IVec3::new(x, y, z)).center(grid.cell_size());
        for _ in 0..hits {
            grid.observe(p, 0.1, None);
        }
    }

    #[test]
    fn gaps_do_not_wrap_across_grid_edges() {
        let edge = (1 << 20) - 1;
        let mut grid = CoverageGrid::new(1.0);
        observe_cell(&mut grid, edge, 0, 0, 1);
        observe_cell(&mut grid, -edge, 0, 0, 1);
        assert_eq!(grid.len(), 2);

        let gaps = detect_gaps(&grid, Quality::Fair, Neighborhood::TwentySix, 1);
        assert_eq!(gaps.len(), 2);
        assert!(gaps.iter().all(|g| g.cell_count == 1));
    }

    #[test]
    fn empty_grid_has_no_gaps() {
        let grid = CoverageGrid::new(0.1);
        assert!(detect_gaps(&grid, Quality::Fair, Neighborhood::Six, 1).is_empty());
    }

    #[test]
    fn line_of_poor_cells_is_one_gap() {
        let mut grid = CoverageGrid::new(0.1);
        for x in 0..4 {
            observe_cell(&mut grid, x, 0, 0, 1);
        }
        let gaps = detect_gaps(&grid, Quality::Fair, Neighborhood::Six, 3);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].cell_count, 4);
        assert_eq!(gaps[0].worst_quality, Quality::Poor);
        assert!((gaps[0].center - Vec3::new(0.2, 0.05, 0.05)).length() < 1e-5);
    }

    #[test]
    fn small_components_are_noise() {
        let mut grid = CoverageGrid::new(0.1);
        observe_cell(&mut grid, 0, 0, 0, 1);
        observe_cell(&mut grid, 1, 0, 0, 1);
        assert!(detect_gaps(&grid, Quality::Fair, Neighborhood::Six, 3).is_empty());
        assert_eq!(detect_gaps(&grid, Quality::Fair, Neighborhood::Six, 2).len(), 1);
    }

    #[test]
    fn diagonal_cells_join_only_with_26_neighborhood() {
        let mut grid = CoverageGrid::new(0.1);
        observe_cell(&mut grid, 0, 0, 0, 1);
        observe_cell(&mut grid, 1, 1, 0, 1);
        observe_cell(&mut grid, 2, 2, 1, 1);

        assert!(detect_gaps(&grid, Quality::Fair, Neighborhood::Six, 2).is_empty());
        let gaps = detect_gaps(&grid, Quality::Fair, Neighborhood::TwentySix, 2);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].cell_count, 3);
    }

    #[test]
    fn cells_at_threshold_are_not_gaps() {
        let mut grid = CoverageGrid::new(0.1);
        for x in 0..5 {
            // 10 hits at 0.1 confidence: 0.4 + 0.03 -> Fair
            observe_cell(&mut grid, x, 0, 0, 10);
        }
        assert!(detect_gaps(&grid, Quality::Fair, Neighborhood::Six, 1).is_empty());
        assert_eq!(detect_gaps(&grid, Quality::Good, Neighborhood::Six, 1).len(), 1);
    }

    #[test]
    fn gaps_sorted_by_size() {
        let mut grid = CoverageGrid::new(0.1);
        for x in 0..2 {
            observe_cell(&mut grid, x, 0, 0, 1);
        }
        for x in 0..5 {
            observe_cell(&mut grid, x, 10, 0, 1);
        }
        let gaps = detect_gaps(&grid, Quality::Fair, Neighborhood::Six, 1);
        assert_eq!(gaps.iter().map(|g| g.cell_count).collect::<Vec<_>>(), vec![5, 2]);
    }
}

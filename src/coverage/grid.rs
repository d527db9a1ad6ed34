use std::collections::HashMap;

use glam::{IVec3, Vec3};
use serde::Serialize;

/// Scan quality of a single cell, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    None,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Quality {
    /// Normalized score in [0, 1].
    pub fn score(self) -> f32 {
        match self {
            Quality::None => 0.0,
            Quality::Poor => 0.25,
            Quality::Fair => 0.5,
            Quality::Good => 0.75,
            Quality::Excellent => 1.0,
        }
    }

    fn from_score(score: f32) -> Quality {
        if score >= 0.85 {
            Quality::Excellent
        } else if score >= 0.6 {
            Quality::Good
        } else if score >= 0.35 {
            Quality::Fair
        } else {
            Quality::Poor
        }
    }
}

/// Hits needed for the density term to saturate.
const SATURATION_HITS: u32 = 10;

/// Distinct view directions needed for the diversity term to saturate.
const SATURATION_VIEWS: u32 = 3;

const DENSITY_WEIGHT: f32 = 0.4;
const CONFIDENCE_WEIGHT: f32 = 0.3;
const DIVERSITY_WEIGHT: f32 = 0.3;

/// Grid coordinates are packed into 21 bits per axis.
const AXIS_BITS: u32 = 21;
const AXIS_OFFSET: i32 = 1 << (AXIS_BITS - 1);
const AXIS_MASK: u64 = (1 << AXIS_BITS) - 1;

/// Integer cell coordinate in the coverage grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCoord(pub IVec3);

impl GridCoord {
    /// Cell containing `p`, or `None` for non-finite or out-of-range points.
    pub fn from_world(p: Vec3, cell_size: f32) -> Option<GridCoord> {
        if !p.is_finite() {
            return None;
        }
        let scaled = (p / cell_size).floor();
        let limit = AXIS_OFFSET as f32;
        if scaled.abs().max_element() >= limit {
            return None;
        }
        Some(GridCoord(scaled.as_ivec3()))
    }

    /// Neighbouring coordinate, or `None` when it leaves the range
    /// [`from_world`](Self::from_world) can produce.
    pub fn checked_offset(self, offset: IVec3) -> Option<GridCoord> {
        let next = IVec3::new(
            self.0.x.checked_add(offset.x)?,
            self.0.y.checked_add(offset.y)?,
            self.0.z.checked_add(offset.z)?,
        );
        let in_range = next.cmplt(IVec3::splat(AXIS_OFFSET)).all()
            && next.cmpgt(IVec3::splat(-AXIS_OFFSET)).all();
        in_range.then_some(GridCoord(next))
    }

    /// Packed integer key, unique per coordinate.
    pub fn key(self) -> u64 {
        let pack = |v: i32| ((v + AXIS_OFFSET) as u64) & AXIS_MASK;
        pack(self.0.x) | (pack(self.0.y) << AXIS_BITS) | (pack(self.0.z) << (2 * AXIS_BITS))
    }

    pub fn from_key(key: u64) -> GridCoord {
        let unpack = |shift: u32| (((key >> shift) & AXIS_MASK) as i32) - AXIS_OFFSET;
        GridCoord(IVec3::new(unpack(0), unpack(AXIS_BITS), unpack(2 * AXIS_BITS)))
    }

    /// Cell centroid in world space.
    pub fn center(self, cell_size: f32) -> Vec3 {
        (self.0.as_vec3() + Vec3::splat(0.5)) * cell_size
    }
}

/// Accumulated observations for one grid cell.
#[derive(Debug, Clone)]
pub struct CoverageCell {
    pub world_position: Vec3,
    pub hit_count: u32,
    pub confidence_sum: f32,
    /// Bit set of observed view directions (see [`view_bucket`]).
    pub view_buckets: u32,
    pub quality: Quality,
}

impl CoverageCell {
    fn new(world_position: Vec3) -> Self {
        Self {
            world_position,
            hit_count: 0,
            confidence_sum: 0.0,
            view_buckets: 0,
            quality: Quality::None,
        }
    }

    pub fn mean_confidence(&self) -> f32 {
        if self.hit_count == 0 {
            0.0
        } else {
            self.confidence_sum / self.hit_count as f32
        }
    }

    /// Quality implied by the observations so far.
    pub fn derived_quality(&self) -> Quality {
        if self.hit_count == 0 {
            return Quality::None;
        }
        let density = (self.hit_count.min(SATURATION_HITS) as f32) / SATURATION_HITS as f32;
        let views = self.view_buckets.count_ones().min(SATURATION_VIEWS) as f32;
        let diversity = views / SATURATION_VIEWS as f32;
        let score = DENSITY_WEIGHT * density
            + CONFIDENCE_WEIGHT * self.mean_confidence().clamp(0.0, 1.0)
            + DIVERSITY_WEIGHT * diversity;
        Quality::from_score(score)
    }

    fn observe(&mut self, confidence: f32, view: Option<u32>) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.confidence_sum += confidence.clamp(0.0, 1.0);
        if let Some(bucket) = view {
            self.view_buckets |= 1 << bucket;
        }
        // Quality never regresses on new data.
        self.quality = self.quality.max(self.derived_quality());
    }
}

/// Bucket (0..26) of the direction from a cell to the camera: the sign of
/// each axis component, with components under 0.38 of the length treated as 0.
pub fn view_bucket(direction: Vec3) -> Option<u32> {
    let len = direction.length();
    if !len.is_finite() || len <= f32::EPSILON {
        return None;
    }
    let d = direction / len;
    let sign = |c: f32| -> u32 {
        if c > 0.38 {
            2
        } else if c < -0.38 {
            0
        } else {
            1
        }
    };
    Some(sign(d.x) + 3 * sign(d.y) + 9 * sign(d.z))
}

/// Sparse hashed voxel grid of coverage cells.
#[derive(Debug, Clone)]
pub struct CoverageGrid {
    cell_size: f32,
    cells: HashMap<u64, CoverageCell>,
}

impl CoverageGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, coord: GridCoord) -> Option<&CoverageCell> {
        self.cells.get(&coord.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = (GridCoord, &CoverageCell)> {
        self.cells.iter().map(|(&k, c)| (GridCoord::from_key(k), c))
    }

    /// Record one observation of `point`. Returns false if the point cannot
    /// be placed in the grid.
    pub fn observe(&mut self, point: Vec3, confidence: f32, camera: Option<Vec3>) -> bool {
        let Some(coord) = GridCoord::from_world(point, self.cell_size) else {
            return false;
        };
        let cell_size = self.cell_size;
        let cell = self
            .cells
            .entry(coord.key())
            .or_insert_with(|| CoverageCell::new(coord.center(cell_size)));
        let view = camera.and_then(|c| view_bucket(c - point));
        cell.observe(confidence, view);
        true
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

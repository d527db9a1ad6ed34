use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::coverage::Quality;
use crate::error::{Result, ScanMetricsError};

/// Display units for measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
pub enum Units {
    #[value(name = "mm")]
    Millimeters,
    #[value(name = "cm")]
    Centimeters,
    #[default]
    #[value(name = "m")]
    Meters,
    #[value(name = "ft")]
    Feet,
    #[value(name = "in")]
    Inches,
}

impl Units {
    /// Length of one unit in metres.
    pub fn metres_per_unit(self) -> f64 {
        match self {
            Units::Millimeters => 0.001,
            Units::Centimeters => 0.01,
            Units::Meters => 1.0,
            Units::Feet => 0.3048,
            Units::Inches => 0.0254,
        }
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Units::Millimeters => write!(f, "mm"),
            Units::Centimeters => write!(f, "cm"),
            Units::Meters => write!(f, "m"),
            Units::Feet => write!(f, "ft"),
            Units::Inches => write!(f, "in"),
        }
    }
}

/// Cell adjacency used when merging low-quality cells into gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum Neighborhood {
    /// Face neighbours only.
    #[value(name = "6")]
    Six,
    /// Face, edge and corner neighbours.
    #[value(name = "26")]
    TwentySix,
}

/// Coverage grid parameters.
#[derive(Debug, Clone)]
pub struct CoverageConfig {
    /// Edge length of a grid cell in metres.
    pub cell_size: f32,
    /// Gaps with fewer cells are discarded as noise.
    pub min_gap_cells: usize,
    /// Cells below this quality are gap candidates.
    pub gap_threshold: Quality,
    pub neighborhood: Neighborhood,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            cell_size: 0.05,
            min_gap_cells: 3,
            gap_threshold: Quality::Fair,
            neighborhood: Neighborhood::Six,
        }
    }
}

/// Frame synchronizer parameters.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Largest depth/color timestamp difference that still pairs, in seconds.
    pub max_timestamp_delta: f64,
    /// Capacity of each ring buffer.
    pub buffer_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_timestamp_delta: 0.050,
            buffer_capacity: 30,
        }
    }
}

/// Depth-to-point-cloud extraction parameters.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Minimum normalized confidence (0-1) for a depth sample to be kept.
    pub min_confidence: f32,
    /// Voxel edge length used when downsampling, in metres.
    pub voxel_size: f32,
    pub max_points: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            voxel_size: 0.005,
            max_points: 2_000_000,
        }
    }
}

/// Fully resolved pipeline configuration (constructed from CLI args).
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub report: Option<PathBuf>,
    pub units: Units,
    pub coverage: CoverageConfig,
    pub sync: SyncConfig,
    pub extraction: ExtractionConfig,
    pub extract_point_cloud: bool,
    pub floor_height: Option<f32>,
    pub ceiling_height: Option<f32>,
    pub dry_run: bool,
    pub verbose: bool,
    pub log_json: bool,
    pub threads: Option<usize>,
}

impl PipelineConfig {
    /// Reject parameter combinations the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ScanMetricsError::Validation(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };
        positive("cell size", self.coverage.cell_size as f64)?;
        positive("voxel size", self.extraction.voxel_size as f64)?;
        positive("max timestamp delta", self.sync.max_timestamp_delta)?;
        if self.sync.buffer_capacity == 0 {
            return Err(ScanMetricsError::Validation(
                "buffer capacity must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.extraction.min_confidence) {
            return Err(ScanMetricsError::Validation(format!(
                "min confidence must be within [0, 1], got {}",
                self.extraction.min_confidence
            )));
        }
        if let (Some(floor), Some(ceiling)) = (self.floor_height, self.ceiling_height)
            && ceiling < floor
        {
            return Err(ScanMetricsError::Validation(format!(
                "ceiling height {ceiling} is below floor height {floor}"
            )));
        }
        Ok(())
    }
}

/// CLI argument definition (clap derive).
#[derive(Parser, Debug)]
#[command(
    name = "scan-metrics",
    about = "Measurement, validation and coverage analytics for 3D scan captures",
    version
)]
pub struct CliArgs {
    /// Capture file (LRAW)
    #[arg(short = 'i', long)]
    pub input: PathBuf,

    /// Write a JSON report to this path
    #[arg(short = 'o', long)]
    pub report: Option<PathBuf>,

    /// Display units for measurements
    #[arg(long, value_enum, default_value = "m")]
    pub units: Units,

    /// Coverage grid cell size in metres
    #[arg(long, default_value_t = 0.05)]
    pub cell_size: f32,

    /// Smallest gap (in cells) that is reported
    #[arg(long, default_value_t = 3)]
    pub min_gap_cells: usize,

    /// Cell adjacency for gap clustering: 6 or 26
    #[arg(long, value_enum, default_value = "6")]
    pub neighborhood: Neighborhood,

    /// Max depth/color timestamp difference in milliseconds
    #[arg(long, default_value_t = 50.0)]
    pub max_delta_ms: f64,

    /// Frame ring-buffer capacity
    #[arg(long, default_value_t = 30)]
    pub buffer_capacity: usize,

    /// Minimum depth confidence (0-1) for extracted points
    #[arg(long, default_value_t = 0.3)]
    pub min_confidence: f32,

    /// Voxel size for point-cloud downsampling in metres
    #[arg(long, default_value_t = 0.005)]
    pub voxel_size: f32,

    /// Max points kept per extracted depth frame
    #[arg(long, default_value_t = 2_000_000)]
    pub max_points: usize,

    /// Skip point-cloud extraction from depth frames
    #[arg(long)]
    pub no_point_cloud: bool,

    /// Floor height (Y, metres) for room volume
    #[arg(long)]
    pub floor_height: Option<f32>,

    /// Ceiling height (Y, metres) for room volume
    #[arg(long)]
    pub ceiling_height: Option<f32>,

    /// Read the capture and report stats only
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Worker thread count (default: all cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}

impl From<CliArgs> for PipelineConfig {
    fn from(args: CliArgs) -> Self {
        PipelineConfig {
            input: args.input,
            report: args.report,
            units: args.units,
            coverage: CoverageConfig {
                cell_size: args.cell_size,
                min_gap_cells: args.min_gap_cells,
                neighborhood: args.neighborhood,
                ..Default::default()
            },
            sync: SyncConfig {
                max_timestamp_delta: args.max_delta_ms / 1000.0,
                buffer_capacity: args.buffer_capacity,
            },
            extraction: ExtractionConfig {
                min_confidence: args.min_confidence,
                voxel_size: args.voxel_size,
                max_points: args.max_points,
            },
            extract_point_cloud: !args.no_point_cloud,
            floor_height: args.floor_height,
            ceiling_height: args.ceiling_height,
            dry_run: args.dry_run,
            verbose: args.verbose,
            log_json: args.log_json,
            threads: args.threads,
        }
    }
}

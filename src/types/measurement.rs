use serde::Serialize;

use crate::config::Units;
use crate::measure::area::polygon_area;
use crate::measure::distance::{angle_at, distance};
use crate::measure::volume::VolumeEstimate;
use crate::types::Point3;

/// Confidence attached to values computed exactly from the input geometry.
pub const EXACT_CONFIDENCE: f32 = 1.0;

/// Confidence attached to the open-mesh volume approximation.
pub const APPROXIMATE_CONFIDENCE: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    Distance,
    Area,
    Volume,
    Angle,
}

/// A user-facing measurement.
///
/// `value` is always SI (metres, square metres, cubic metres) or degrees for
/// angles; `formatted_value` renders it in the requested display units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub kind: MeasurementKind,
    pub points: Vec<Point3>,
    pub value: f32,
    pub formatted_value: String,
    pub confidence: f32,
}

impl Measurement {
    pub fn distance(points: Vec<Point3>, metres: f32, units: Units) -> Self {
        Self {
            kind: MeasurementKind::Distance,
            points,
            value: metres,
            formatted_value: format_length(metres, units),
            confidence: EXACT_CONFIDENCE,
        }
    }

    pub fn area(points: Vec<Point3>, square_metres: f32, units: Units) -> Self {
        Self {
            kind: MeasurementKind::Area,
            points,
            value: square_metres,
            formatted_value: format_area(square_metres, units),
            confidence: EXACT_CONFIDENCE,
        }
    }

    /// Volume measurement; approximate estimates carry a lower confidence
    /// and a `~` prefix.
    pub fn volume(points: Vec<Point3>, estimate: VolumeEstimate, units: Units) -> Self {
        let value = estimate.volume();
        let (confidence, prefix) = if estimate.is_exact() {
            (EXACT_CONFIDENCE, "")
        } else {
            (APPROXIMATE_CONFIDENCE, "~")
        };
        Self {
            kind: MeasurementKind::Volume,
            points,
            value,
            formatted_value: format!("{prefix}{}", format_volume(value, units)),
            confidence,
        }
    }

    pub fn angle(points: Vec<Point3>, degrees: f32) -> Self {
        Self {
            kind: MeasurementKind::Angle,
            points,
            value: degrees,
            formatted_value: format!("{degrees:.1}°"),
            confidence: EXACT_CONFIDENCE,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

fn decimals(units: Units) -> usize {
    match units {
        Units::Millimeters => 1,
        Units::Centimeters => 1,
        Units::Meters => 3,
        Units::Feet => 2,
        Units::Inches => 1,
    }
}

/// Render a length given in metres.
pub fn format_length(metres: f32, units: Units) -> String {
    let scale = units.metres_per_unit();
    let v = metres as f64 / scale;
    format!("{v:.prec$} {units}", prec = decimals(units))
}

/// Render an area given in square metres.
pub fn format_area(square_metres: f32, units: Units) -> String {
    let scale = units.metres_per_unit();
    let v = square_metres as f64 / (scale * scale);
    format!("{v:.2} {units}²")
}

/// Render a volume given in cubic metres.
pub fn format_volume(cubic_metres: f32, units: Units) -> String {
    let scale = units.metres_per_unit();
    let v = cubic_metres as f64 / (scale * scale * scale);
    format!("{v:.3} {units}³")
}

/// Straight-line distance between two picked points.
pub fn measure_distance(a: Point3, b: Point3, units: Units) -> Measurement {
    Measurement::distance(vec![a, b], distance(a, b), units)
}

/// Angle at `vertex` between the rays towards `a` and `b`. `None` when
/// either ray has zero length.
pub fn measure_angle(a: Point3, vertex: Point3, b: Point3) -> Option<Measurement> {
    angle_at(a, vertex, b).map(|deg| Measurement::angle(vec![a, vertex, b], deg))
}

/// Area enclosed by a picked planar polygon.
pub fn measure_polygon(points: Vec<Point3>, units: Units) -> Measurement {
    let area = polygon_area(&points);
    Measurement::area(points, area, units)
}

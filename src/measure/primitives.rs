//! Closed-form volumes of primitive shapes.

use std::f32::consts::PI;

pub fn sphere_volume(radius: f32) -> f32 {
    4.0 / 3.0 * PI * radius.powi(3)
}

pub fn cylinder_volume(radius: f32, height: f32) -> f32 {
    PI * radius * radius * height
}

pub fn cone_volume(radius: f32, height: f32) -> f32 {
    PI * radius * radius * height / 3.0
}

pub fn box_volume(width: f32, height: f32, depth: f32) -> f32 {
    width * height * depth
}

/// Right prism over an arbitrary base.
pub fn prism_volume(base_area: f32, height: f32) -> f32 {
    base_area * height
}

/// Pyramid over an arbitrary base.
pub fn pyramid_volume(base_area: f32, height: f32) -> f32 {
    base_area * height / 3.0
}

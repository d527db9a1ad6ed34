//! Pure geometry engines: distance, area and volume.
//!
//! Everything here is a synchronous function of its arguments. Nothing
//! panics or errors on malformed geometry: out-of-range faces are skipped
//! and degenerate inputs produce zero, `None`, or a tagged result.

pub mod area;
pub mod distance;
pub mod primitives;
pub mod volume;

pub use area::{
    FaceFilter, PlaneOrientation, classify_polygon, convex_hull_area, floor_area,
    mesh_surface_area, polygon_area, triangle_area, wall_area,
};
pub use distance::{
    GeodesicDistance, RayHit, RayMiss, cast_ray, closest_point_on_triangle, distance,
    distance_squared, ray_mesh_intersection, snap_to_surface, surface_distance,
};
pub use volume::{
    VolumeEstimate, bounding_box_volume, estimate_volume_open_mesh, find_boundary_edges,
    is_watertight, mesh_volume, room_volume, volume_from_cross_sections,
};

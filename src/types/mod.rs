pub mod bounds;
pub mod measurement;
pub mod mesh;
pub mod point_cloud;

pub use bounds::BoundingBox;
pub use measurement::{
    Measurement, MeasurementKind, measure_angle, measure_distance, measure_polygon,
};
pub use mesh::{AnchorId, CombinedMesh, Mesh, Point3, SurfaceClass};
pub use point_cloud::{PointCloud, Rgba};

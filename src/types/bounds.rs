use glam::Vec3;
use serde::Serialize;

/// Axis-aligned bounding box in 3-D.
///
/// There is deliberately no empty/default box: an empty point set has no
/// bounds at all (`None` from [`BoundingBox::from_points`]), which keeps it
/// distinguishable from a real zero-size scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// Smallest box containing every finite point, or `None` if there are none.
    pub fn from_points<I>(points: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut iter = points.into_iter().filter(|p| p.is_finite());
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(BoundingBox { min, max })
    }

    /// Centre point of the box.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Edge lengths along each axis.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Length of the space diagonal.
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    pub fn volume(&self) -> f32 {
        let s = self.size();
        s.x * s.y * s.z
    }

    /// Whether a point lies inside (or on the boundary of) the box.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Return the smallest box that contains both `self` and `other`.
    pub fn merge(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> BoundingBox {
        BoundingBox {
            min: Vec3::ZERO,
            max: Vec3::ONE,
        }
    }

    #[test]
    fn bounding_box_center() {
        let c = unit_box().center();
        assert!((c - Vec3::splat(0.5)).length() < f32::EPSILON);
    }

    #[test]
    fn bounding_box_diagonal() {
        let expected = 3.0_f32.sqrt();
        assert!((unit_box().diagonal() - expected).abs() < 1e-6);
    }

    #[test]
    fn bounding_box_contains_point() {
        let bb = unit_box();
        assert!(bb.contains_point(Vec3::splat(0.5)));
        assert!(bb.contains_point(Vec3::ZERO)); // boundary
        assert!(bb.contains_point(Vec3::ONE)); // boundary
        assert!(!bb.contains_point(Vec3::new(1.1, 0.5, 0.5)));
        assert!(!bb.contains_point(Vec3::new(-0.1, 0.5, 0.5)));
    }

    #[test]
    fn bounding_box_merge() {
        let b = BoundingBox {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(0.5),
        };
        let merged = unit_box().merge(&b);
        assert_eq!(merged.min, Vec3::splat(-1.0));
        assert_eq!(merged.max, Vec3::ONE);
    }

    #[test]
    fn empty_point_set_has_no_bounds() {
        assert!(BoundingBox::from_points(Vec::<Vec3>::new()).is_none());
        assert!(BoundingBox::from_points([Vec3::NAN]).is_none());
    }

    #[test]
    fn single_point_is_degenerate_box() {
        let bb = BoundingBox::from_points([Vec3::new(2.0, 3.0, 4.0)]).unwrap();
        assert_eq!(bb.min, bb.max);
        assert_eq!(bb.volume(), 0.0);
    }

    #[test]
    fn volume_matches_independent_size_product() {
        let points = [
            Vec3::new(-1.0, 2.0, 0.5),
            Vec3::new(3.0, -2.0, 1.5),
            Vec3::new(0.0, 0.0, 4.0),
        ];
        let bb = BoundingBox::from_points(points).unwrap();
        let sx = bb.max.x - bb.min.x;
        let sy = bb.max.y - bb.min.y;
        let sz = bb.max.z - bb.min.z;
        assert!((bb.volume() - sx * sy * sz).abs() < 1e-5);
        assert!((bb.volume() - 4.0 * 4.0 * 3.5).abs() < 1e-4);
    }
}

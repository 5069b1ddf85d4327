//! Regions of interest in physical coordinates.
//!
//! A region is anything that can answer `contains`. The optional `bounds`
//! hint lets the sampler restrict its lattice; shapes that do not provide it
//! are scanned over the whole volume.

use nalgebra::Vector3;

/// Axis-aligned bounding box in physical coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Aabb {
    pub fn corners(&self) -> [Vector3<f64>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vector3::new(a.x, a.y, a.z),
            Vector3::new(b.x, a.y, a.z),
            Vector3::new(a.x, b.y, a.z),
            Vector3::new(b.x, b.y, a.z),
            Vector3::new(a.x, a.y, b.z),
            Vector3::new(b.x, a.y, b.z),
            Vector3::new(a.x, b.y, b.z),
            Vector3::new(b.x, b.y, b.z),
        ]
    }
}

pub trait Region: Send + Sync {
    fn contains(&self, point: &Vector3<f64>) -> bool;

    /// Smallest box enclosing every point for which `contains` holds
    fn bounds(&self) -> Option<Aabb> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxRegion {
    pub center: Vector3<f64>,
    pub size: Vector3<f64>,
}

impl BoxRegion {
    pub fn new(center: Vector3<f64>, size: Vector3<f64>) -> Self {
        Self { center, size }
    }

    fn extents(&self) -> Aabb {
        let half = self.size / 2.0;
        Aabb {
            min: self.center - half,
            max: self.center + half,
        }
    }
}

impl Region for BoxRegion {
    fn contains(&self, point: &Vector3<f64>) -> bool {
        let Aabb { min, max } = self.extents();
        (0..3).all(|axis| min[axis] <= point[axis] && point[axis] <= max[axis])
    }

    fn bounds(&self) -> Option<Aabb> {
        Some(self.extents())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereRegion {
    pub center: Vector3<f64>,
    pub radius: f64,
}

impl SphereRegion {
    pub fn new(center: Vector3<f64>, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl Region for SphereRegion {
    fn contains(&self, point: &Vector3<f64>) -> bool {
        (point - self.center).norm() <= self.radius
    }

    fn bounds(&self) -> Option<Aabb> {
        let half = Vector3::repeat(self.radius);
        Some(Aabb {
            min: self.center - half,
            max: self.center + half,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_contains() {
        let roi = BoxRegion::new(Vector3::zeros(), Vector3::new(2.0, 2.0, 2.0));
        assert!(roi.contains(&Vector3::new(0.5, 0.5, 0.5)));
        assert!(!roi.contains(&Vector3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn box_boundary_is_inclusive() {
        let roi = BoxRegion::new(Vector3::new(1.0, 1.0, 1.0), Vector3::new(2.0, 4.0, 6.0));
        assert!(roi.contains(&Vector3::new(0.0, -1.0, -2.0)));
        assert!(roi.contains(&Vector3::new(2.0, 3.0, 4.0)));
        assert!(!roi.contains(&Vector3::new(2.0001, 3.0, 4.0)));
    }

    #[test]
    fn sphere_contains() {
        let roi = SphereRegion::new(Vector3::zeros(), 1.0);
        assert!(roi.contains(&Vector3::new(0.5, 0.5, 0.5)));
        assert!(!roi.contains(&Vector3::new(1.0, 1.0, 1.0)));
        assert!(roi.contains(&Vector3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn sphere_bounds_enclose_surface() {
        let roi = SphereRegion::new(Vector3::new(5.0, 5.0, 5.0), 2.0);
        let bounds = roi.bounds().expect("sphere has bounds");
        assert_eq!(bounds.min, Vector3::new(3.0, 3.0, 3.0));
        assert_eq!(bounds.max, Vector3::new(7.0, 7.0, 7.0));
        assert!(bounds.corners().iter().all(|c| !roi.contains(c)));
    }

    struct HalfSpace;

    impl Region for HalfSpace {
        fn contains(&self, point: &Vector3<f64>) -> bool {
            point.x >= 0.0
        }
    }

    #[test]
    fn custom_region_has_no_bounds_hint() {
        assert!(HalfSpace.bounds().is_none());
        assert!(HalfSpace.contains(&Vector3::new(0.0, -100.0, 100.0)));
    }
}

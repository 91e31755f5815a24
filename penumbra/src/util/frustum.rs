//! Frustums, bounding spheres and boxes.
//!
//! Plane extraction follows <https://www.gamedevs.org/uploads/fast-extraction-viewing-frustum-planes-from-world-view-projection-matrix.pdf>.

use glam::{Mat4, Vec3A};
use penumbra_types::Aabb;

/// Represents a point in space and a radius from that point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3A,
    pub radius: f32,
}

impl BoundingSphere {
    /// Sphere passing through all eight corners of the box.
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            center: aabb.center(),
            radius: aabb.half_extents().length(),
        }
    }
}

/// Represents a plane as a vec4 (or vec3 + f32)
#[derive(Debug, Copy, Clone)]
pub struct Plane {
    pub abc: Vec3A,
    pub d: f32,
}

impl Plane {
    pub fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            abc: Vec3A::new(a, b, c),
            d,
        }
    }

    pub fn normalize(mut self) -> Self {
        let mag = self.abc.length();

        self.abc /= mag;
        self.d /= mag;

        self
    }

    pub fn distance(self, point: Vec3A) -> f32 {
        self.abc.dot(point) + self.d
    }
}

/// A frustum composed of 5 different planes. Has no far plane as it assumes
/// infinite.
#[derive(Debug, Copy, Clone)]
pub struct Frustum {
    left: Plane,
    right: Plane,
    top: Plane,
    bottom: Plane,
    near: Plane,
}

impl Frustum {
    pub fn from_matrix(matrix: Mat4) -> Self {
        let mat_arr = matrix.to_cols_array_2d();

        let left = Plane::new(
            mat_arr[0][3] + mat_arr[0][0],
            mat_arr[1][3] + mat_arr[1][0],
            mat_arr[2][3] + mat_arr[2][0],
            mat_arr[3][3] + mat_arr[3][0],
        );

        let right = Plane::new(
            mat_arr[0][3] - mat_arr[0][0],
            mat_arr[1][3] - mat_arr[1][0],
            mat_arr[2][3] - mat_arr[2][0],
            mat_arr[3][3] - mat_arr[3][0],
        );

        let top = Plane::new(
            mat_arr[0][3] - mat_arr[0][1],
            mat_arr[1][3] - mat_arr[1][1],
            mat_arr[2][3] - mat_arr[2][1],
            mat_arr[3][3] - mat_arr[3][1],
        );

        let bottom = Plane::new(
            mat_arr[0][3] + mat_arr[0][1],
            mat_arr[1][3] + mat_arr[1][1],
            mat_arr[2][3] + mat_arr[2][1],
            mat_arr[3][3] + mat_arr[3][1],
        );

        // this is the far plane in the algorithm, but we're using inverse Z, so near
        // and far get flipped.
        let near = Plane::new(
            mat_arr[0][3] - mat_arr[0][2],
            mat_arr[1][3] - mat_arr[1][2],
            mat_arr[2][3] - mat_arr[2][2],
            mat_arr[3][3] - mat_arr[3][2],
        );

        Self {
            left: left.normalize(),
            right: right.normalize(),
            top: top.normalize(),
            bottom: bottom.normalize(),
            near: near.normalize(),
        }
    }

    fn planes(&self) -> [Plane; 5] {
        [self.left, self.right, self.top, self.bottom, self.near]
    }

    /// Determines if the sphere is at all inside the frustum.
    pub fn contains_sphere(&self, sphere: BoundingSphere) -> bool {
        let neg_radius = -sphere.radius;

        self.planes()
            .iter()
            .all(|plane| plane.distance(sphere.center) >= neg_radius)
    }

    /// Determines if the box is at all inside the frustum.
    ///
    /// Conservative: boxes straddling a frustum corner may be reported inside.
    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        self.planes().iter().all(|plane| {
            // The corner furthest along the plane normal.
            let positive = Vec3A::select(plane.abc.cmpge(Vec3A::ZERO), aabb.max, aabb.min);
            plane.distance(positive) >= 0.0
        })
    }
}

//! View frustum for visibility tests

use glam::{Mat4, Vec3, Vec4};

/// Frustum plane order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumPlane {
    Near = 0,
    Far = 1,
    Left = 2,
    Right = 3,
    Top = 4,
    Bottom = 5,
}

/// Six inward-facing planes `(normal, d)` plus the world-space far-plane corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
    far_corners: [Vec3; 4],
}

impl Default for Frustum {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

impl Frustum {
    /// Build from view and projection (clip-space depth in [0, 1])
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        let m = projection * view;
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));

        let planes = [r2, r3 - r2, r3 + r0, r3 - r0, r3 - r1, r3 + r1].map(normalize_plane);

        let inverse_projection = projection.inverse();
        let inverse_view = view.inverse();
        let far_corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)].map(|(x, y)| {
            let corner = inverse_projection * Vec4::new(x, y, 1.0, 1.0);
            let view_space = corner.truncate() / corner.w;
            inverse_view.transform_point3(view_space)
        });

        Self {
            planes,
            far_corners,
        }
    }

    pub fn plane(&self, plane: FrustumPlane) -> Vec4 {
        self.planes[plane as usize]
    }

    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    /// Far-plane corners in world space: bottom-left, bottom-right, top-right, top-left
    pub fn far_corners(&self) -> &[Vec3; 4] {
        &self.far_corners
    }

    fn distance(plane: Vec4, point: Vec3) -> f32 {
        plane.truncate().dot(point) + plane.w
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| Self::distance(*p, point) >= 0.0)
    }

    /// False only if the sphere lies entirely outside at least one plane
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| Self::distance(*p, center) >= -radius)
    }

    /// False only if every vertex lies outside the same plane
    pub fn intersects_vertices(&self, vertices: &[Vec3]) -> bool {
        self.planes
            .iter()
            .all(|p| vertices.iter().any(|v| Self::distance(*p, *v) >= 0.0))
    }

    /// Cuboid given by its world transform over the unit cube [-0.5, 0.5]^3
    pub fn intersects_cuboid(&self, world: Mat4) -> bool {
        let mut vertices = [Vec3::ZERO; 8];
        for (i, vertex) in vertices.iter_mut().enumerate() {
            let corner = Vec3::new(
                if i & 1 == 0 { -0.5 } else { 0.5 },
                if i & 2 == 0 { -0.5 } else { 0.5 },
                if i & 4 == 0 { -0.5 } else { 0.5 },
            );
            *vertex = world.transform_point3(corner);
        }
        self.intersects_vertices(&vertices)
    }

    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        let center = (min + max) * 0.5;
        let size = max - min;
        self.intersects_cuboid(Mat4::from_translation(center) * Mat4::from_scale(size))
    }
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let length = plane.truncate().length();
    if length > 0.0 {
        plane / length
    } else {
        plane
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frustum() -> Frustum {
        // Camera at origin looking down -Z
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 100.0);
        Frustum::new(Mat4::IDENTITY, projection)
    }

    #[test]
    fn points_inside_and_outside() {
        let f = frustum();
        assert!(f.contains_point(Vec3::new(0.0, 0.0, -50.0)));
        assert!(!f.contains_point(Vec3::new(0.0, 0.0, 50.0)));
        assert!(!f.contains_point(Vec3::new(0.0, 0.0, -150.0)));
        assert!(!f.contains_point(Vec3::new(80.0, 0.0, -50.0)));
    }

    #[test]
    fn sphere_on_near_plane_with_zero_radius_is_visible() {
        let f = frustum();
        assert!(f.intersects_sphere(Vec3::new(0.0, 0.0, -1.0), 0.0));
    }

    #[test]
    fn sphere_behind_one_plane_is_culled() {
        let f = frustum();
        assert!(!f.intersects_sphere(Vec3::new(1000.0, 0.0, -50.0), 1.0));
        assert!(!f.intersects_sphere(Vec3::new(0.0, 0.0, 10.0), 5.0));
        // Partial overlap is conservative
        assert!(f.intersects_sphere(Vec3::new(0.0, 0.0, 3.0), 5.0));
    }

    #[test]
    fn plane_order_and_normalisation() {
        let f = frustum();
        for plane in f.planes() {
            assert!((plane.truncate().length() - 1.0).abs() < 1e-5);
        }
        // Near plane faces away from the camera
        assert!(f.plane(FrustumPlane::Near).z < 0.0);
        assert!(f.plane(FrustumPlane::Left).x > 0.0);
        assert!(f.plane(FrustumPlane::Right).x < 0.0);
        assert!(f.plane(FrustumPlane::Top).y < 0.0);
        assert!(f.plane(FrustumPlane::Bottom).y > 0.0);
    }

    #[test]
    fn far_corners_lie_on_far_plane() {
        let f = frustum();
        for corner in f.far_corners() {
            assert!((corner.z + 100.0).abs() < 1e-2, "{:?}", corner);
            assert!((corner.x.abs() - 100.0).abs() < 1e-2);
        }
    }

    #[test]
    fn cuboid_any_vertex_test() {
        let f = frustum();
        assert!(f.intersects_aabb(Vec3::new(-1.0, -1.0, -20.0), Vec3::new(1.0, 1.0, -10.0)));
        assert!(!f.intersects_aabb(Vec3::new(-1.0, -1.0, 5.0), Vec3::new(1.0, 1.0, 10.0)));
        // Straddling the near plane
        assert!(f.intersects_aabb(Vec3::new(-1.0, -1.0, -5.0), Vec3::new(1.0, 1.0, 5.0)));
    }
}

//! Mesh data structures and generation
//!
//! Generated meshes cover the proxy geometry the engine needs itself: light
//! volumes (sphere, cone), the full-screen quad and debug line boxes.

use crate::backend::types::{PrimitiveTopology, Vertex};
use glam::{Vec2, Vec3, Vec4};

/// A mesh with vertex and 16-bit index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
    pub topology: PrimitiveTopology,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Radius of the smallest origin-centred sphere enclosing every vertex
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| v.position.length())
            .fold(0.0, f32::max)
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        for (normal, right) in faces {
            let up = normal.cross(right);
            let base = mesh.vertices.len() as u16;
            let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];
            for (u, v) in corners {
                mesh.vertices.push(Vertex {
                    position: normal * 0.5 + right * u + up * v,
                    normal,
                    uv: Vec2::new(u + 0.5, 0.5 - v),
                    tangent: right.extend(1.0),
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Unit-radius UV sphere, used as the point light volume
    pub fn sphere(segments: u16, rings: u16) -> Self {
        let mut mesh = Mesh::new("sphere");

        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                let normal = Vec3::new(x, y, z).normalize_or_zero();
                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());

                mesh.vertices.push(Vertex {
                    position: Vec3::new(x, y, z),
                    normal,
                    uv: Vec2::new(
                        segment as f32 / segments as f32,
                        ring as f32 / rings as f32,
                    ),
                    tangent: tangent.extend(1.0),
                });
            }
        }

        // Outward-facing counter-clockwise winding
        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;

                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }

    /// Cone with its apex at the origin opening along -Z to a unit-radius base at z = -1.
    ///
    /// Used as the spotlight volume; scale x/y by `tan(half_angle) * range` and z by `range`.
    pub fn cone(segments: u16) -> Self {
        let mut mesh = Mesh::new("cone");
        let angle_step = 2.0 * std::f32::consts::PI / segments as f32;

        mesh.vertices.push(Vertex {
            position: Vec3::ZERO,
            normal: Vec3::Z,
            uv: Vec2::new(0.5, 0.0),
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
        });

        for i in 0..segments {
            let angle = i as f32 * angle_step;
            let (sin, cos) = angle.sin_cos();
            mesh.vertices.push(Vertex {
                position: Vec3::new(cos, sin, -1.0),
                normal: Vec3::new(cos, sin, 1.0).normalize(),
                uv: Vec2::new(i as f32 / segments as f32, 1.0),
                tangent: Vec4::new(-sin, cos, 0.0, 1.0),
            });
        }

        let base_center = mesh.vertices.len() as u16;
        mesh.vertices.push(Vertex {
            position: Vec3::new(0.0, 0.0, -1.0),
            normal: -Vec3::Z,
            uv: Vec2::new(0.5, 1.0),
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
        });

        for i in 0..segments {
            let a = 1 + i;
            let b = 1 + (i + 1) % segments;
            // Side, then base cap
            mesh.indices.extend_from_slice(&[0, b, a]);
            mesh.indices.extend_from_slice(&[base_center, a, b]);
        }

        mesh
    }

    /// Two-triangle quad spanning [-1, 1] in x and y at z = 0
    pub fn fullscreen_quad() -> Self {
        let mut mesh = Mesh::new("fullscreen_quad");
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (x, y) in corners {
            mesh.vertices.push(Vertex {
                position: Vec3::new(x, y, 0.0),
                normal: -Vec3::Z,
                uv: Vec2::new((x + 1.0) * 0.5, (1.0 - y) * 0.5),
                tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            });
        }
        mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
        mesh
    }

    /// The twelve edges of a unit cube as a line list
    pub fn line_box() -> Self {
        let mut mesh = Mesh::new("line_box");
        mesh.topology = PrimitiveTopology::LineList;
        for i in 0..8u16 {
            let position = Vec3::new(
                if i & 1 == 0 { -0.5 } else { 0.5 },
                if i & 2 == 0 { -0.5 } else { 0.5 },
                if i & 4 == 0 { -0.5 } else { 0.5 },
            );
            mesh.vertices.push(Vertex {
                position,
                normal: position.normalize(),
                uv: Vec2::ZERO,
                tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            });
        }
        for i in 0..8u16 {
            for bit in [1u16, 2, 4] {
                if i & bit == 0 {
                    mesh.indices.extend_from_slice(&[i, i | bit]);
                }
            }
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_is_unit_radius() {
        let sphere = Mesh::sphere(16, 8);
        assert!((sphere.bounding_radius() - 1.0).abs() < 1e-5);
        assert_eq!(sphere.index_count(), 16 * 8 * 6);
        assert!(sphere
            .indices
            .iter()
            .all(|&i| (i as usize) < sphere.vertex_count()));
    }

    #[test]
    fn cone_apex_at_origin() {
        let cone = Mesh::cone(12);
        assert_eq!(cone.vertices[0].position, Vec3::ZERO);
        assert_eq!(cone.index_count(), 12 * 6);
        assert!(cone.vertices.iter().all(|v| v.position.z <= 0.0));
    }

    #[test]
    fn line_box_has_twelve_edges() {
        let mesh = Mesh::line_box();
        assert_eq!(mesh.topology, PrimitiveTopology::LineList);
        assert_eq!(mesh.index_count(), 24);
    }

    #[test]
    fn cube_has_six_faces() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!((cube.bounding_radius() - 0.75f32.sqrt()).abs() < 1e-5);
    }
}

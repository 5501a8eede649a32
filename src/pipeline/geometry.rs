//! Proxy geometry drawn by the lighting and post-process passes

use glam::Mat4;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::frame::fullscreen_quad_transform;
use crate::render_queue::RenderInstance;
use crate::resources::{Mesh, ModelBuffer, ModelId};

const SPHERE_SEGMENTS: u16 = 16;
const SPHERE_RINGS: u16 = 12;
const CONE_SEGMENTS: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeShape {
    Sphere,
    Cone,
    Quad,
}

/// Light volume meshes plus a one-element instance stream for drawing them
pub struct VolumeGeometry {
    sphere: ModelBuffer,
    cone: ModelBuffer,
    quad: ModelBuffer,
    instance_buffer: BufferHandle,
}

impl VolumeGeometry {
    pub fn new(device: &mut dyn RenderDevice) -> BackendResult<Self> {
        let sphere = ModelBuffer::from_mesh(
            device,
            ModelId(u32::MAX - 2),
            &Mesh::sphere(SPHERE_SEGMENTS, SPHERE_RINGS),
        )?;
        let cone = ModelBuffer::from_mesh(device, ModelId(u32::MAX - 1), &Mesh::cone(CONE_SEGMENTS))?;
        let quad = ModelBuffer::from_mesh(device, ModelId(u32::MAX), &Mesh::fullscreen_quad())?;
        let instance_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("volume_instance".to_string()),
            size: std::mem::size_of::<RenderInstance>() as u64,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        })?;

        Ok(Self {
            sphere,
            cone,
            quad,
            instance_buffer,
        })
    }

    pub fn model(&self, shape: VolumeShape) -> &ModelBuffer {
        match shape {
            VolumeShape::Sphere => &self.sphere,
            VolumeShape::Cone => &self.cone,
            VolumeShape::Quad => &self.quad,
        }
    }

    /// Draw one instance of `shape` with the given world transform
    pub fn draw(&self, device: &mut dyn RenderDevice, shape: VolumeShape, transform: Mat4) -> bool {
        let instance = RenderInstance::new(transform);
        if let Err(e) = device.write_buffer(self.instance_buffer, 0, bytemuck::bytes_of(&instance)) {
            log::error!("Failed to upload volume transform: {}", e);
            return false;
        }

        let model = self.model(shape);
        device.set_vertex_buffers(&[model.vertex_buffer, self.instance_buffer]);
        device.set_index_buffer(model.index_buffer, IndexFormat::Uint16);
        device.set_primitive_topology(model.topology);
        device.draw_indexed_instanced(model.index_count, 1);
        true
    }

    /// Draw the quad covering the whole screen at the far plane; expects the
    /// fullscreen frame data to be bound
    pub fn draw_fullscreen(&self, device: &mut dyn RenderDevice, width: u32, height: u32) -> bool {
        self.draw(device, VolumeShape::Quad, fullscreen_quad_transform(width, height))
    }

    pub fn release(&self, device: &mut dyn RenderDevice) {
        self.sphere.release(device);
        self.cone.release(device);
        self.quad.release(device);
        device.destroy_buffer(self.instance_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceCommand, RecordingDevice};

    #[test]
    fn draw_uploads_transform_and_issues_single_instance() {
        let mut device = RecordingDevice::new();
        let geometry = VolumeGeometry::new(&mut device).unwrap();
        device.clear_commands();

        let transform = Mat4::from_scale(glam::Vec3::splat(4.0));
        assert!(geometry.draw(&mut device, VolumeShape::Sphere, transform));

        let contents = device.buffer_contents(geometry.instance_buffer).unwrap();
        let instance: RenderInstance = bytemuck::pod_read_unaligned(contents);
        assert_eq!(instance.world, transform);
        assert_eq!(
            device.commands().last(),
            Some(&DeviceCommand::DrawIndexedInstanced {
                index_count: geometry.model(VolumeShape::Sphere).index_count,
                instance_count: 1
            })
        );
    }

    #[test]
    fn release_frees_everything() {
        let mut device = RecordingDevice::new();
        let geometry = VolumeGeometry::new(&mut device).unwrap();
        assert_eq!(device.live_buffer_count(), 7);
        geometry.release(&mut device);
        assert_eq!(device.live_buffer_count(), 0);
    }
}

//! GPU-resident model geometry

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::Mesh;

/// Stable identifier of a model buffer, used as the render queue bucket key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u32);

/// Compiled vertex/index buffers plus the metadata needed to draw them.
///
/// Immutable once created; shared between render queue buckets through `Arc`.
#[derive(Debug)]
pub struct ModelBuffer {
    pub id: ModelId,
    pub name: String,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
    pub topology: PrimitiveTopology,
    pub bounding_radius: f32,
}

impl ModelBuffer {
    /// Upload a mesh to the device
    pub fn from_mesh(
        device: &mut dyn RenderDevice,
        id: ModelId,
        mesh: &Mesh,
    ) -> BackendResult<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "mesh '{}' has no geometry",
                mesh.name
            )));
        }

        let vertex_buffer = device.create_buffer(&BufferDescriptor {
            label: Some(format!("{}_vb", mesh.name)),
            size: mesh.vertex_bytes().len() as u64,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        })?;
        device.write_buffer(vertex_buffer, 0, mesh.vertex_bytes())?;

        // 16-bit indices are padded to a 4-byte multiple
        let index_bytes = mesh.index_bytes();
        let padded_size = (index_bytes.len() as u64 + 3) & !3;
        let index_buffer = device.create_buffer(&BufferDescriptor {
            label: Some(format!("{}_ib", mesh.name)),
            size: padded_size,
            usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
        })?;
        device.write_buffer(index_buffer, 0, index_bytes)?;

        log::debug!(
            "Created model buffer '{}' ({} vertices, {} indices)",
            mesh.name,
            mesh.vertex_count(),
            mesh.index_count()
        );

        Ok(Self {
            id,
            name: mesh.name.clone(),
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertex_count() as u32,
            index_count: mesh.index_count() as u32,
            topology: mesh.topology,
            bounding_radius: mesh.bounding_radius(),
        })
    }

    pub fn release(&self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.vertex_buffer);
        device.destroy_buffer(self.index_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;

    #[test]
    fn upload_records_counts_and_radius() {
        let mut device = RecordingDevice::new();
        let model = ModelBuffer::from_mesh(&mut device, ModelId(3), &Mesh::cube()).unwrap();
        assert_eq!(model.index_count, 36);
        assert_eq!(model.vertex_count, 24);
        assert!(model.bounding_radius > 0.8);
        assert_eq!(device.live_buffer_count(), 2);

        model.release(&mut device);
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn empty_mesh_is_rejected() {
        let mut device = RecordingDevice::new();
        assert!(ModelBuffer::from_mesh(&mut device, ModelId(0), &Mesh::new("empty")).is_err());
    }
}

//! Per-frame constant buffer

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::shaders::FRAME_DATA_SLOT;
use crate::scene::Camera;

/// Camera and screen data visible to every pass (208 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameData {
    pub view: Mat4,
    pub projection: Mat4,
    pub inverse_projection: Mat4,
    pub screen_dimensions: Vec2,
    pub jitter: Vec2,
}

impl Default for FrameData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            inverse_projection: Mat4::IDENTITY,
            screen_dimensions: Vec2::ONE,
            jitter: Vec2::ZERO,
        }
    }
}

impl FrameData {
    pub fn from_camera(camera: &Camera, width: u32, height: u32) -> Self {
        Self {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            inverse_projection: camera.inverse_projection_matrix(),
            screen_dimensions: Vec2::new(width as f32, height as f32),
            jitter: camera.jitter(),
        }
    }

    /// Identity view and a pixel-sized orthographic projection for screen-space quads
    pub fn fullscreen(width: u32, height: u32) -> Self {
        let projection = fullscreen_projection(width, height);
        Self {
            view: Mat4::IDENTITY,
            projection,
            inverse_projection: projection.inverse(),
            screen_dimensions: Vec2::new(width as f32, height as f32),
            jitter: Vec2::ZERO,
        }
    }
}

pub fn fullscreen_projection(width: u32, height: u32) -> Mat4 {
    let (hw, hh) = (width.max(1) as f32 * 0.5, height.max(1) as f32 * 0.5);
    Mat4::orthographic_rh(-hw, hw, -hh, hh, 0.0, 1.0)
}

/// World transform placing the unit quad over the whole screen at the far plane
/// under [`fullscreen_projection`]
pub fn fullscreen_quad_transform(width: u32, height: u32) -> Mat4 {
    let (hw, hh) = (width.max(1) as f32 * 0.5, height.max(1) as f32 * 0.5);
    Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)) * Mat4::from_scale(Vec3::new(hw, hh, 1.0))
}

/// Contents currently held by the frame constant buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameBufferState {
    #[default]
    Unknown,
    Normal,
    Fullscreen,
}

/// Owns the frame constant buffer and avoids redundant uploads when
/// consecutive passes need the same contents.
pub struct FrameConstants {
    buffer: BufferHandle,
    state: FrameBufferState,
    normal: FrameData,
    uploads: u32,
}

impl FrameConstants {
    pub fn new(device: &mut dyn RenderDevice) -> BackendResult<Self> {
        let buffer = device.create_buffer(&BufferDescriptor::uniform(
            "frame_data",
            std::mem::size_of::<FrameData>() as u64,
        ))?;
        Ok(Self {
            buffer,
            state: FrameBufferState::Unknown,
            normal: FrameData::default(),
            uploads: 0,
        })
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn state(&self) -> FrameBufferState {
        self.state
    }

    pub fn data(&self) -> &FrameData {
        &self.normal
    }

    /// Number of buffer uploads since creation
    pub fn upload_count(&self) -> u32 {
        self.uploads
    }

    /// Capture this frame's camera data; the next state request always uploads
    pub fn update(&mut self, camera: &Camera, width: u32, height: u32) {
        self.normal = FrameData::from_camera(camera, width, height);
        self.state = FrameBufferState::Unknown;
    }

    /// Make the buffer hold the requested contents, uploading only on a change.
    /// Returns whether an upload happened.
    pub fn set_frame_buffer_state(
        &mut self,
        device: &mut dyn RenderDevice,
        state: FrameBufferState,
    ) -> bool {
        if state == self.state || state == FrameBufferState::Unknown {
            return false;
        }

        let data = match state {
            FrameBufferState::Fullscreen => {
                let size = self.normal.screen_dimensions;
                // Lighting reconstructs positions with the camera projection
                FrameData {
                    inverse_projection: self.normal.inverse_projection,
                    ..FrameData::fullscreen(size.x as u32, size.y as u32)
                }
            }
            _ => self.normal,
        };

        if let Err(e) = device.write_buffer(self.buffer, 0, bytemuck::bytes_of(&data)) {
            log::error!("Failed to upload frame data: {}", e);
            self.state = FrameBufferState::Unknown;
            return false;
        }
        log::trace!("Frame buffer state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.uploads += 1;
        true
    }

    pub fn bind(&self, device: &mut dyn RenderDevice, stage: ShaderStage) {
        device.bind_constant_buffer(stage, FRAME_DATA_SLOT, Some(self.buffer));
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.buffer);
        self.state = FrameBufferState::Unknown;
    }
}

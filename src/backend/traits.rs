//! Core device abstraction
//!
//! The engine drives the GPU through an immediate-context style interface: state
//! setters, resource binds and draws are issued one at a time in frame order.

use crate::backend::types::*;
use thiserror::Error;

/// Device error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to create sampler: {0}")]
    SamplerCreationFailed(String),
    #[error("Invalid resource handle: {0}")]
    InvalidHandle(String),
    #[error("Write of {len} bytes at offset {offset} overflows buffer of {size} bytes")]
    BufferOverflow { offset: u64, len: u64, size: u64 },
    #[error("Texture size mismatch: expected {expected:?}, found {found:?}")]
    SizeMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a compiled shader program for a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub(crate) u64);

/// Maximum number of simultaneous colour attachments
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Set of textures bound as the output of subsequent draws
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderTargetBinding {
    pub colors: [Option<TextureHandle>; MAX_COLOR_ATTACHMENTS],
    pub depth_stencil: Option<TextureHandle>,
}

impl RenderTargetBinding {
    pub fn color_count(&self) -> usize {
        self.colors.iter().filter(|c| c.is_some()).count()
    }
}

/// Immediate-context rendering device
pub trait RenderDevice {
    // Resource creation
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)>;
    fn texture_format(&self, texture: TextureHandle) -> Option<TextureFormat>;
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;
    fn create_shader(
        &mut self,
        stage: ShaderStage,
        label: &str,
        source: &str,
    ) -> BackendResult<ShaderHandle>;

    // Transfer
    fn copy_texture(&mut self, source: TextureHandle, destination: TextureHandle);

    // Output merger
    fn bind_render_target(&mut self, binding: &RenderTargetBinding);
    fn unbind_render_target(&mut self);
    fn clear_texture(&mut self, texture: TextureHandle, flags: ClearFlags, values: &ClearValues);
    fn set_blend_state(&mut self, state: Option<BlendState>);
    fn set_depth_stencil_state(&mut self, state: &DepthStencilState, stencil_ref: u32);

    // Rasterizer
    fn set_rasterizer_state(&mut self, state: &RasterizerState);
    fn set_viewport(&mut self, viewport: &Viewport);

    // Shader stages
    fn bind_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>);
    fn bind_texture(&mut self, stage: ShaderStage, slot: u32, texture: Option<TextureHandle>);
    fn bind_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: Option<SamplerHandle>);
    fn bind_constant_buffer(&mut self, stage: ShaderStage, slot: u32, buffer: Option<BufferHandle>);

    // Input assembly and draws
    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);
    fn set_vertex_buffers(&mut self, buffers: &[BufferHandle]);
    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat);
    fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32);
    fn draw(&mut self, vertex_count: u32);
}

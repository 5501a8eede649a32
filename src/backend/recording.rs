//! Recording device.
//!
//! Performs no GPU work. Resources are tracked in memory and every state change,
//! bind and draw is appended to a command log that callers can inspect. Used for
//! headless operation and for verifying the exact command sequences the engine
//! issues.

use std::collections::{HashMap, HashSet};

use crate::backend::traits::*;
use crate::backend::types::*;

/// A single call made against the device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    CopyTexture {
        source: TextureHandle,
        destination: TextureHandle,
    },
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        len: u64,
    },
    BindRenderTarget(RenderTargetBinding),
    UnbindRenderTarget,
    ClearTexture {
        texture: TextureHandle,
        flags: ClearFlags,
        values: ClearValues,
    },
    SetBlendState(Option<BlendState>),
    SetDepthStencilState {
        state: DepthStencilState,
        stencil_ref: u32,
    },
    SetRasterizerState(RasterizerState),
    SetViewport(Viewport),
    BindShader {
        stage: ShaderStage,
        shader: Option<ShaderHandle>,
    },
    BindTexture {
        stage: ShaderStage,
        slot: u32,
        texture: Option<TextureHandle>,
    },
    BindSampler {
        stage: ShaderStage,
        slot: u32,
        sampler: Option<SamplerHandle>,
    },
    BindConstantBuffer {
        stage: ShaderStage,
        slot: u32,
        buffer: Option<BufferHandle>,
    },
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffers(Vec<BufferHandle>),
    SetIndexBuffer {
        buffer: BufferHandle,
        format: IndexFormat,
    },
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
    },
    Draw {
        vertex_count: u32,
    },
}

impl DeviceCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            DeviceCommand::DrawIndexedInstanced { .. } | DeviceCommand::Draw { .. }
        )
    }
}

struct TextureRecord {
    desc: TextureDescriptor,
    data: Vec<u8>,
}

/// In-memory device that records every command issued against it
#[derive(Default)]
pub struct RecordingDevice {
    textures: HashMap<u64, TextureRecord>,
    buffers: HashMap<u64, Vec<u8>>,
    shaders: HashMap<u64, (ShaderStage, String)>,
    failing_shaders: HashSet<String>,
    next_id: u64,
    commands: Vec<DeviceCommand>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Make subsequent shader creation with this label fail, simulating a missing asset
    pub fn fail_shader(&mut self, label: &str) {
        self.failing_shaders.insert(label.to_string());
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    fn record(&mut self, command: DeviceCommand) {
        log::trace!("RecordingDevice: {:?}", command);
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.as_slice())
    }

    pub fn texture_contents(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture.0).map(|t| t.data.as_slice())
    }

    pub fn texture_label(&self, texture: TextureHandle) -> Option<&str> {
        self.textures
            .get(&texture.0)
            .and_then(|t| t.desc.label.as_deref())
    }

    pub fn shader_label(&self, shader: ShaderHandle) -> Option<&str> {
        self.shaders.get(&shader.0).map(|(_, label)| label.as_str())
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

impl RenderDevice for RecordingDevice {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent ({}x{})",
                desc.label, desc.width, desc.height
            )));
        }
        log::trace!(
            "RecordingDevice: creating texture {:?} ({}x{}, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let id = self.allocate_id();
        let len = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
        self.textures.insert(
            id,
            TextureRecord {
                desc: desc.clone(),
                data: vec![0; len],
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_none() {
            log::warn!("RecordingDevice: destroying unknown texture {:?}", texture);
        }
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures
            .get(&texture.0)
            .map(|t| (t.desc.width, t.desc.height))
    }

    fn texture_format(&self, texture: TextureHandle) -> Option<TextureFormat> {
        self.textures.get(&texture.0).map(|t| t.desc.format)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let record = self
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
        if data.len() != record.data.len() {
            return Err(BackendError::BufferOverflow {
                offset: 0,
                len: data.len() as u64,
                size: record.data.len() as u64,
            });
        }
        record.data.copy_from_slice(data);
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        log::trace!(
            "RecordingDevice: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.allocate_id();
        self.buffers.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.0).is_none() {
            log::warn!("RecordingDevice: destroying unknown buffer {:?}", buffer);
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let contents = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
        let end = offset + data.len() as u64;
        if end > contents.len() as u64 {
            return Err(BackendError::BufferOverflow {
                offset,
                len: data.len() as u64,
                size: contents.len() as u64,
            });
        }
        contents[offset as usize..end as usize].copy_from_slice(data);
        self.record(DeviceCommand::WriteBuffer {
            buffer,
            offset,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("RecordingDevice: creating sampler {:?}", desc.label);
        Ok(SamplerHandle(self.allocate_id()))
    }

    fn create_shader(
        &mut self,
        stage: ShaderStage,
        label: &str,
        source: &str,
    ) -> BackendResult<ShaderHandle> {
        if self.failing_shaders.contains(label) || source.trim().is_empty() {
            return Err(BackendError::ShaderCreationFailed(label.to_string()));
        }
        log::trace!("RecordingDevice: creating {:?} shader {}", stage, label);
        let id = self.allocate_id();
        self.shaders.insert(id, (stage, label.to_string()));
        Ok(ShaderHandle(id))
    }

    fn copy_texture(&mut self, source: TextureHandle, destination: TextureHandle) {
        if let Some(data) = self.textures.get(&source.0).map(|t| t.data.clone()) {
            if let Some(dst) = self.textures.get_mut(&destination.0) {
                if dst.data.len() == data.len() {
                    dst.data = data;
                } else {
                    log::warn!(
                        "RecordingDevice: copy between differently sized textures {:?} -> {:?}",
                        source,
                        destination
                    );
                }
            }
        }
        self.record(DeviceCommand::CopyTexture {
            source,
            destination,
        });
    }

    fn bind_render_target(&mut self, binding: &RenderTargetBinding) {
        self.record(DeviceCommand::BindRenderTarget(binding.clone()));
    }

    fn unbind_render_target(&mut self) {
        self.record(DeviceCommand::UnbindRenderTarget);
    }

    fn clear_texture(&mut self, texture: TextureHandle, flags: ClearFlags, values: &ClearValues) {
        self.record(DeviceCommand::ClearTexture {
            texture,
            flags,
            values: *values,
        });
    }

    fn set_blend_state(&mut self, state: Option<BlendState>) {
        self.record(DeviceCommand::SetBlendState(state));
    }

    fn set_depth_stencil_state(&mut self, state: &DepthStencilState, stencil_ref: u32) {
        self.record(DeviceCommand::SetDepthStencilState {
            state: *state,
            stencil_ref,
        });
    }

    fn set_rasterizer_state(&mut self, state: &RasterizerState) {
        self.record(DeviceCommand::SetRasterizerState(*state));
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.record(DeviceCommand::SetViewport(*viewport));
    }

    fn bind_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>) {
        self.record(DeviceCommand::BindShader { stage, shader });
    }

    fn bind_texture(&mut self, stage: ShaderStage, slot: u32, texture: Option<TextureHandle>) {
        self.record(DeviceCommand::BindTexture {
            stage,
            slot,
            texture,
        });
    }

    fn bind_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: Option<SamplerHandle>) {
        self.record(DeviceCommand::BindSampler {
            stage,
            slot,
            sampler,
        });
    }

    fn bind_constant_buffer(&mut self, stage: ShaderStage, slot: u32, buffer: Option<BufferHandle>) {
        self.record(DeviceCommand::BindConstantBuffer {
            stage,
            slot,
            buffer,
        });
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.record(DeviceCommand::SetPrimitiveTopology(topology));
    }

    fn set_vertex_buffers(&mut self, buffers: &[BufferHandle]) {
        self.record(DeviceCommand::SetVertexBuffers(buffers.to_vec()));
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) {
        self.record(DeviceCommand::SetIndexBuffer { buffer, format });
    }

    fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32) {
        self.record(DeviceCommand::DrawIndexedInstanced {
            index_count,
            instance_count,
        });
    }

    fn draw(&mut self, vertex_count: u32) {
        self.record(DeviceCommand::Draw { vertex_count });
    }
}

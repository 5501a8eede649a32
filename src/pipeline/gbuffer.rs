//! Geometry buffer
//!
//! Owns the per-pixel surface attribute textures written by the geometry pass
//! and read by the lighting pass. The light accumulation attachment (Color0) is
//! owned by the caller and must be attached before the buffer is rendered into.

use glam::Vec4;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{AttachmentPoint, RenderTarget, SharedRenderTarget};

/// Surface attributes held by the geometry buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GBufferAttachment {
    Diffuse,
    Specular,
    Normal,
    Velocity,
    DepthStencil,
}

impl GBufferAttachment {
    pub const COUNT: usize = 5;

    pub const ALL: [GBufferAttachment; Self::COUNT] = [
        GBufferAttachment::Diffuse,
        GBufferAttachment::Specular,
        GBufferAttachment::Normal,
        GBufferAttachment::Velocity,
        GBufferAttachment::DepthStencil,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn format(&self) -> TextureFormat {
        match self {
            GBufferAttachment::Diffuse | GBufferAttachment::Specular => TextureFormat::Rgba8Unorm,
            GBufferAttachment::Normal => TextureFormat::Rgba32Float,
            GBufferAttachment::Velocity => TextureFormat::Rg16Float,
            GBufferAttachment::DepthStencil => TextureFormat::Depth24PlusStencil8,
        }
    }

    pub fn attachment_point(&self) -> AttachmentPoint {
        match self {
            GBufferAttachment::Diffuse => AttachmentPoint::Color1,
            GBufferAttachment::Specular => AttachmentPoint::Color2,
            GBufferAttachment::Normal => AttachmentPoint::Color3,
            GBufferAttachment::Velocity => AttachmentPoint::Color4,
            GBufferAttachment::DepthStencil => AttachmentPoint::DepthStencil,
        }
    }

    /// Texture slot the attachment is bound to when read by a shader
    pub fn shader_slot(&self) -> u32 {
        self.index() as u32
    }

    pub fn label(&self) -> &'static str {
        match self {
            GBufferAttachment::Diffuse => "GBuffer::Diffuse",
            GBufferAttachment::Specular => "GBuffer::Specular",
            GBufferAttachment::Normal => "GBuffer::Normal",
            GBufferAttachment::Velocity => "GBuffer::Velocity",
            GBufferAttachment::DepthStencil => "GBuffer::DepthStencil",
        }
    }
}

pub struct GBuffer {
    width: u32,
    height: u32,
    textures: [Option<TextureHandle>; GBufferAttachment::COUNT],
    render_target: SharedRenderTarget,
    light_accumulation: Option<TextureHandle>,
}

impl GBuffer {
    /// Create every attribute texture and attach it to the GBuffer render target
    pub fn new(device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<Self> {
        log::info!("Initialising GBuffer texture resources ({}x{})", width, height);
        let mut gbuffer = Self {
            width,
            height,
            textures: [None; GBufferAttachment::COUNT],
            render_target: RenderTarget::new("GBufferRenderTarget").shared(),
            light_accumulation: None,
        };

        let attached = create_attachment_textures(device, width, height)
            .and_then(|textures| gbuffer.attach_textures(device, textures));
        if let Err(e) = attached {
            log::error!("GBuffer initialisation failed: {}", e);
            gbuffer.release(device);
            return Err(e);
        }

        log::info!("GBuffer initialisation complete");
        Ok(gbuffer)
    }

    fn attach_textures(
        &mut self,
        device: &dyn RenderDevice,
        textures: [TextureHandle; GBufferAttachment::COUNT],
    ) -> BackendResult<()> {
        let mut target = self.render_target.write();
        for attachment in GBufferAttachment::ALL {
            let texture = textures[attachment.index()];
            self.textures[attachment.index()] = Some(texture);
            target.attach(device, attachment.attachment_point(), Some(texture))?;
        }
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn texture(&self, attachment: GBufferAttachment) -> Option<TextureHandle> {
        self.textures[attachment.index()]
    }

    pub fn depth_stencil_texture(&self) -> Option<TextureHandle> {
        self.texture(GBufferAttachment::DepthStencil)
    }

    pub fn velocity_texture(&self) -> Option<TextureHandle> {
        self.texture(GBufferAttachment::Velocity)
    }

    pub fn render_target(&self) -> &SharedRenderTarget {
        &self.render_target
    }

    /// Attach the caller-owned light accumulation texture at Color0
    pub fn attach_light_accumulation(
        &mut self,
        device: &dyn RenderDevice,
        texture: TextureHandle,
    ) -> BackendResult<()> {
        self.render_target
            .write()
            .attach(device, AttachmentPoint::Color0, Some(texture))?;
        self.light_accumulation = Some(texture);
        Ok(())
    }

    pub fn light_accumulation(&self) -> Option<TextureHandle> {
        self.light_accumulation
    }

    /// Every attribute texture exists and the light accumulation target is attached
    pub fn is_ready(&self) -> bool {
        self.light_accumulation.is_some() && self.textures.iter().all(|t| t.is_some())
    }

    /// Bind the attribute textures to consecutive pixel shader slots
    pub fn bind_to_shader(&self, device: &mut dyn RenderDevice, stage: ShaderStage) {
        for attachment in GBufferAttachment::ALL {
            device.bind_texture(stage, attachment.shader_slot(), self.texture(attachment));
        }
    }

    pub fn unbind_from_shader(&self, device: &mut dyn RenderDevice, stage: ShaderStage) {
        for attachment in GBufferAttachment::ALL {
            device.bind_texture(stage, attachment.shader_slot(), None);
        }
    }

    /// Clear every attachment, light accumulation included
    pub fn clear(&self, device: &mut dyn RenderDevice) {
        let values = ClearValues {
            color: Vec4::ZERO,
            depth: 1.0,
            stencil: 0,
        };
        self.render_target.read().clear(device, ClearFlags::ALL, &values);
    }

    /// Recreate the attribute textures at a new size.
    ///
    /// The new textures are created before the old ones are released, so a
    /// failed resize leaves the buffer exactly as it was. On success the light
    /// accumulation attachment is detached; the caller re-attaches a texture of
    /// the new size.
    pub fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<()> {
        let complete = self.textures.iter().all(|t| t.is_some());
        if (width, height) == (self.width, self.height) && complete {
            return Ok(());
        }
        log::info!(
            "Resizing GBuffer from {}x{} to {}x{}",
            self.width,
            self.height,
            width,
            height
        );

        let textures = match create_attachment_textures(device, width, height) {
            Ok(textures) => textures,
            Err(e) => {
                log::error!("GBuffer resize failed, keeping {}x{}: {}", self.width, self.height, e);
                return Err(e);
            }
        };

        self.release(device);
        self.width = width;
        self.height = height;
        if let Err(e) = self.attach_textures(device, textures) {
            log::error!("GBuffer resize failed: {}", e);
            self.release(device);
            return Err(e);
        }
        Ok(())
    }

    /// Destroy owned textures and detach everything from the render target
    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        {
            let mut target = self.render_target.write();
            for point in AttachmentPoint::ALL {
                // Detaching never fails
                let _ = target.attach(device, point, None);
            }
        }
        for texture in self.textures.iter_mut() {
            if let Some(t) = texture.take() {
                device.destroy_texture(t);
            }
        }
        self.light_accumulation = None;
    }
}

/// Create one texture per attribute; nothing is left alive on failure
fn create_attachment_textures(
    device: &mut dyn RenderDevice,
    width: u32,
    height: u32,
) -> BackendResult<[TextureHandle; GBufferAttachment::COUNT]> {
    let mut created = Vec::with_capacity(GBufferAttachment::COUNT);
    for attachment in GBufferAttachment::ALL {
        let descriptor =
            TextureDescriptor::render_target(attachment.label(), width, height, attachment.format());
        match device.create_texture(&descriptor) {
            Ok(texture) => created.push(texture),
            Err(e) => {
                for texture in created {
                    device.destroy_texture(texture);
                }
                return Err(e);
            }
        }
    }
    Ok(std::array::from_fn(|i| created[i]))
}

//! Render targets: named attachment points over externally owned textures
//!
//! A render target references textures but does not own them. Every attached
//! texture must share the same dimensions; attaching a differently sized
//! texture is rejected.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::traits::*;
use crate::backend::types::*;

/// Attachment points of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentPoint {
    Color0,
    Color1,
    Color2,
    Color3,
    Color4,
    Color5,
    Color6,
    Color7,
    Depth,
    DepthStencil,
}

impl AttachmentPoint {
    pub const COUNT: usize = 10;

    pub const ALL: [AttachmentPoint; Self::COUNT] = [
        AttachmentPoint::Color0,
        AttachmentPoint::Color1,
        AttachmentPoint::Color2,
        AttachmentPoint::Color3,
        AttachmentPoint::Color4,
        AttachmentPoint::Color5,
        AttachmentPoint::Color6,
        AttachmentPoint::Color7,
        AttachmentPoint::Depth,
        AttachmentPoint::DepthStencil,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Colour attachment index, or `None` for depth attachments
    pub fn color_index(&self) -> Option<usize> {
        let index = self.index();
        (index < MAX_COLOR_ATTACHMENTS).then_some(index)
    }

    pub fn is_depth(&self) -> bool {
        self.color_index().is_none()
    }
}

pub type SharedRenderTarget = Arc<RwLock<RenderTarget>>;

#[derive(Debug, Clone, Default)]
pub struct RenderTarget {
    name: String,
    attachments: [Option<TextureHandle>; AttachmentPoint::COUNT],
    size: Option<(u32, u32)>,
}

impl RenderTarget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn shared(self) -> SharedRenderTarget {
        Arc::new(RwLock::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Common size of the attached textures, if any are attached
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn texture(&self, point: AttachmentPoint) -> Option<TextureHandle> {
        self.attachments[point.index()]
    }

    /// Attach (or with `None`, detach) a texture at the given point
    pub fn attach(
        &mut self,
        device: &dyn RenderDevice,
        point: AttachmentPoint,
        texture: Option<TextureHandle>,
    ) -> BackendResult<()> {
        let Some(texture) = texture else {
            self.attachments[point.index()] = None;
            self.recompute_size(device);
            return Ok(());
        };

        let size = device
            .texture_size(texture)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;

        // A replaced attachment does not constrain its replacement
        let others_size = self
            .attachments
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != point.index())
            .filter_map(|(_, t)| t.and_then(|t| device.texture_size(t)))
            .next();

        if let Some(expected) = others_size {
            if expected != size {
                log::error!(
                    "Render target '{}': cannot attach {}x{} texture at {:?}, target is {}x{}",
                    self.name,
                    size.0,
                    size.1,
                    point,
                    expected.0,
                    expected.1
                );
                return Err(BackendError::SizeMismatch {
                    expected,
                    found: size,
                });
            }
        }

        self.attachments[point.index()] = Some(texture);
        self.size = Some(size);
        Ok(())
    }

    fn recompute_size(&mut self, device: &dyn RenderDevice) {
        self.size = self
            .attachments
            .iter()
            .filter_map(|t| t.and_then(|t| device.texture_size(t)))
            .next();
    }

    /// At least one attachment is present
    pub fn is_valid(&self) -> bool {
        self.attachments.iter().any(|a| a.is_some())
    }

    pub fn depth_attachment(&self) -> Option<TextureHandle> {
        self.texture(AttachmentPoint::DepthStencil)
            .or(self.texture(AttachmentPoint::Depth))
    }

    pub fn binding(&self) -> RenderTargetBinding {
        let mut binding = RenderTargetBinding::default();
        for point in AttachmentPoint::ALL {
            if let Some(i) = point.color_index() {
                binding.colors[i] = self.attachments[point.index()];
            }
        }
        binding.depth_stencil = self.depth_attachment();
        binding
    }

    pub fn bind(&self, device: &mut dyn RenderDevice) {
        if !self.is_valid() {
            log::error!("Render target '{}' bound with no attachments", self.name);
        }
        device.bind_render_target(&self.binding());
        if let Some((w, h)) = self.size {
            device.set_viewport(&Viewport::new(w as f32, h as f32));
        }
    }

    pub fn unbind(&self, device: &mut dyn RenderDevice) {
        device.unbind_render_target();
    }

    /// Clear the attachments selected by `flags`
    pub fn clear(&self, device: &mut dyn RenderDevice, flags: ClearFlags, values: &ClearValues) {
        if flags.contains(ClearFlags::COLOR) {
            for point in AttachmentPoint::ALL.iter().filter(|p| !p.is_depth()) {
                if let Some(texture) = self.texture(*point) {
                    device.clear_texture(texture, ClearFlags::COLOR, values);
                }
            }
        }

        if flags.intersects(ClearFlags::DEPTH_STENCIL) {
            if let Some(texture) = self.texture(AttachmentPoint::Depth) {
                device.clear_texture(texture, ClearFlags::DEPTH, values);
            }
            if let Some(texture) = self.texture(AttachmentPoint::DepthStencil) {
                let depth_flags = if flags.contains(ClearFlags::DEPTH_STENCIL) {
                    ClearFlags::DEPTH_STENCIL
                } else if flags.contains(ClearFlags::DEPTH) {
                    ClearFlags::DEPTH
                } else {
                    ClearFlags::STENCIL
                };
                device.clear_texture(texture, depth_flags, values);
            }
        }
    }

    /// Copy every attachment present in both targets from `source`
    pub fn copy_from(&self, device: &mut dyn RenderDevice, source: &RenderTarget) {
        for point in AttachmentPoint::ALL {
            if let (Some(src), Some(dst)) = (source.texture(point), self.texture(point)) {
                device.copy_texture(src, dst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceCommand, RecordingDevice};

    fn texture(device: &mut RecordingDevice, w: u32, h: u32, format: TextureFormat) -> TextureHandle {
        device
            .create_texture(&TextureDescriptor::render_target("t", w, h, format))
            .unwrap()
    }

    #[test]
    fn attachments_must_share_size() {
        let mut device = RecordingDevice::new();
        let a = texture(&mut device, 64, 32, TextureFormat::Rgba8Unorm);
        let b = texture(&mut device, 64, 32, TextureFormat::Depth24PlusStencil8);
        let c = texture(&mut device, 32, 32, TextureFormat::Rgba8Unorm);

        let mut target = RenderTarget::new("rt");
        target.attach(&device, AttachmentPoint::Color1, Some(a)).unwrap();
        target
            .attach(&device, AttachmentPoint::DepthStencil, Some(b))
            .unwrap();
        assert_eq!(target.size(), Some((64, 32)));

        let err = target
            .attach(&device, AttachmentPoint::Color2, Some(c))
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::SizeMismatch {
                expected: (64, 32),
                found: (32, 32)
            }
        );
        assert!(target.texture(AttachmentPoint::Color2).is_none());
    }

    #[test]
    fn replacing_the_only_attachment_allows_resize() {
        let mut device = RecordingDevice::new();
        let a = texture(&mut device, 64, 32, TextureFormat::Rgba8Unorm);
        let b = texture(&mut device, 128, 64, TextureFormat::Rgba8Unorm);

        let mut target = RenderTarget::new("rt");
        target.attach(&device, AttachmentPoint::Color0, Some(a)).unwrap();
        target.attach(&device, AttachmentPoint::Color0, Some(b)).unwrap();
        assert_eq!(target.size(), Some((128, 64)));

        target.attach(&device, AttachmentPoint::Color0, None).unwrap();
        assert_eq!(target.size(), None);
        assert!(!target.is_valid());
    }

    #[test]
    fn binding_leaves_unattached_colour_slots_empty() {
        let mut device = RecordingDevice::new();
        let a = texture(&mut device, 8, 8, TextureFormat::Rgba8Unorm);
        let d = texture(&mut device, 8, 8, TextureFormat::Depth24PlusStencil8);

        let mut target = RenderTarget::new("rt");
        target.attach(&device, AttachmentPoint::Color1, Some(a)).unwrap();
        target
            .attach(&device, AttachmentPoint::DepthStencil, Some(d))
            .unwrap();

        let binding = target.binding();
        assert_eq!(binding.colors[0], None);
        assert_eq!(binding.colors[1], Some(a));
        assert_eq!(binding.depth_stencil, Some(d));
    }

    #[test]
    fn stencil_only_clear_targets_depth_stencil() {
        let mut device = RecordingDevice::new();
        let a = texture(&mut device, 8, 8, TextureFormat::Rgba8Unorm);
        let d = texture(&mut device, 8, 8, TextureFormat::Depth24PlusStencil8);
        let mut target = RenderTarget::new("rt");
        target.attach(&device, AttachmentPoint::Color0, Some(a)).unwrap();
        target
            .attach(&device, AttachmentPoint::DepthStencil, Some(d))
            .unwrap();

        device.clear_commands();
        let values = ClearValues {
            stencil: 1,
            ..Default::default()
        };
        target.clear(&mut device, ClearFlags::STENCIL, &values);

        assert_eq!(
            device.commands(),
            &[DeviceCommand::ClearTexture {
                texture: d,
                flags: ClearFlags::STENCIL,
                values
            }]
        );
    }
}

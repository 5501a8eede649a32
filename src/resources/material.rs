//! Surface materials
//!
//! A material is a GPU-aligned parameter block plus up to eight optional texture
//! slots. The "has texture" flags inside the parameter block are never set
//! directly: they are recomputed from the slot contents after every texture
//! mutation, so they always agree with what will actually be bound.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use parking_lot::RwLock;

use crate::backend::traits::*;
use crate::backend::types::*;

/// Constant buffer slot the material parameter block binds to
pub const MATERIAL_CONSTANT_BUFFER_SLOT: u32 = 2;

/// Texture slot kinds; the discriminant is the shader texture slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    Diffuse = 0,
    Normal = 1,
    Ambient = 2,
    Emissive = 3,
    Specular = 4,
    SpecularPower = 5,
    Bump = 6,
    Opacity = 7,
}

impl TextureType {
    pub const COUNT: usize = 8;

    pub const ALL: [TextureType; Self::COUNT] = [
        TextureType::Diffuse,
        TextureType::Normal,
        TextureType::Ambient,
        TextureType::Emissive,
        TextureType::Specular,
        TextureType::SpecularPower,
        TextureType::Bump,
        TextureType::Opacity,
    ];

    pub fn slot(&self) -> u32 {
        *self as u32
    }
}

/// Material parameter block as laid out for the GPU (160 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialData {
    pub global_ambient: Vec4,
    pub ambient_color: Vec4,
    pub emissive_color: Vec4,
    pub diffuse_color: Vec4,
    pub specular_color: Vec4,
    pub reflectance: Vec4,

    pub opacity: f32,
    pub specular_power: f32,
    pub index_of_refraction: f32,
    pub specular_scale: f32,

    pub has_ambient_texture: u32,
    pub has_emissive_texture: u32,
    pub has_diffuse_texture: u32,
    pub has_specular_texture: u32,
    pub has_specular_power_texture: u32,
    pub has_normal_texture: u32,
    pub has_bump_texture: u32,
    pub has_opacity_texture: u32,

    pub bump_intensity: f32,
    pub alpha_threshold: f32,
    pub _padding: [f32; 2],
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            global_ambient: Vec4::new(0.1, 0.1, 0.15, 1.0),
            ambient_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            emissive_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            diffuse_color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            specular_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            reflectance: Vec4::ZERO,
            opacity: 1.0,
            specular_power: -1.0,
            index_of_refraction: -1.0,
            specular_scale: 128.0,
            has_ambient_texture: 0,
            has_emissive_texture: 0,
            has_diffuse_texture: 0,
            has_specular_texture: 0,
            has_specular_power_texture: 0,
            has_normal_texture: 0,
            has_bump_texture: 0,
            has_opacity_texture: 0,
            bump_intensity: 5.0,
            alpha_threshold: 0.1,
            _padding: [0.0; 2],
        }
    }
}

impl MaterialData {
    fn flag_mut(&mut self, texture_type: TextureType) -> &mut u32 {
        match texture_type {
            TextureType::Diffuse => &mut self.has_diffuse_texture,
            TextureType::Normal => &mut self.has_normal_texture,
            TextureType::Ambient => &mut self.has_ambient_texture,
            TextureType::Emissive => &mut self.has_emissive_texture,
            TextureType::Specular => &mut self.has_specular_texture,
            TextureType::SpecularPower => &mut self.has_specular_power_texture,
            TextureType::Bump => &mut self.has_bump_texture,
            TextureType::Opacity => &mut self.has_opacity_texture,
        }
    }

    pub fn has_texture(&self, texture_type: TextureType) -> bool {
        let flag = match texture_type {
            TextureType::Diffuse => self.has_diffuse_texture,
            TextureType::Normal => self.has_normal_texture,
            TextureType::Ambient => self.has_ambient_texture,
            TextureType::Emissive => self.has_emissive_texture,
            TextureType::Specular => self.has_specular_texture,
            TextureType::SpecularPower => self.has_specular_power_texture,
            TextureType::Bump => self.has_bump_texture,
            TextureType::Opacity => self.has_opacity_texture,
        };
        flag != 0
    }
}

/// Stable material identifier, part of the render queue bucket key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

pub type SharedMaterial = Arc<RwLock<Material>>;

/// Material parameters, texture bindings and the compiled constant buffer
#[derive(Debug)]
pub struct Material {
    id: MaterialId,
    name: String,
    data: MaterialData,
    textures: [Option<TextureHandle>; TextureType::COUNT],
    bindings: Vec<(u32, TextureHandle)>,
    buffer: Option<BufferHandle>,
    buffer_dirty: bool,
    updates_suspended: bool,
}

impl Material {
    pub fn new(id: MaterialId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            data: MaterialData::default(),
            textures: [None; TextureType::COUNT],
            bindings: Vec::new(),
            buffer: None,
            buffer_dirty: true,
            updates_suspended: false,
        }
    }

    pub fn shared(self) -> SharedMaterial {
        Arc::new(RwLock::new(self))
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &MaterialData {
        &self.data
    }

    pub fn texture(&self, texture_type: TextureType) -> Option<TextureHandle> {
        self.textures[texture_type as usize]
    }

    pub fn has_texture(&self, texture_type: TextureType) -> bool {
        self.data.has_texture(texture_type)
    }

    pub fn set_texture(&mut self, texture_type: TextureType, texture: Option<TextureHandle>) {
        self.textures[texture_type as usize] = texture;
        self.update_material_state();
    }

    pub fn set_diffuse_color(&mut self, color: Vec4) {
        self.data.diffuse_color = color;
        self.buffer_dirty = true;
    }

    pub fn set_specular_color(&mut self, color: Vec4) {
        self.data.specular_color = color;
        self.buffer_dirty = true;
    }

    pub fn set_emissive_color(&mut self, color: Vec4) {
        self.data.emissive_color = color;
        self.buffer_dirty = true;
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.data.opacity = opacity;
        self.buffer_dirty = true;
    }

    pub fn set_specular_power(&mut self, power: f32) {
        self.data.specular_power = power;
        self.buffer_dirty = true;
    }

    pub fn set_alpha_threshold(&mut self, threshold: f32) {
        self.data.alpha_threshold = threshold;
        self.buffer_dirty = true;
    }

    /// Defer flag/binding recomputation while several textures are changed
    pub fn suspend_updates(&mut self) {
        self.updates_suspended = true;
    }

    /// Resume updates and recompute state for everything changed while suspended
    pub fn resume_updates(&mut self) {
        self.updates_suspended = false;
        self.update_material_state();
    }

    pub fn updates_suspended(&self) -> bool {
        self.updates_suspended
    }

    fn update_material_state(&mut self) {
        if self.updates_suspended {
            return;
        }

        self.bindings.clear();
        for texture_type in TextureType::ALL {
            let texture = self.textures[texture_type as usize];
            *self.data.flag_mut(texture_type) = texture.is_some() as u32;
            if let Some(t) = texture {
                self.bindings.push((texture_type.slot(), t));
            }
        }
        self.buffer_dirty = true;
    }

    /// Compact (slot, texture) list for the textures currently present
    pub fn texture_bindings(&self) -> &[(u32, TextureHandle)] {
        &self.bindings
    }

    pub fn is_transparent(&self) -> bool {
        self.data.opacity < 1.0 || self.texture(TextureType::Opacity).is_some()
    }

    /// Restore default parameters and clear every texture slot
    pub fn reset(&mut self) {
        self.data = MaterialData::default();
        self.textures = [None; TextureType::COUNT];
        self.update_material_state();
    }

    /// Upload the parameter block if it changed since the last compile
    pub fn compile(&mut self, device: &mut dyn RenderDevice) -> BackendResult<BufferHandle> {
        let buffer = match self.buffer {
            Some(b) => b,
            None => {
                let b = device.create_buffer(&BufferDescriptor::uniform(
                    &format!("material_{}", self.name),
                    std::mem::size_of::<MaterialData>() as u64,
                ))?;
                self.buffer = Some(b);
                self.buffer_dirty = true;
                b
            }
        };

        if self.buffer_dirty {
            device.write_buffer(buffer, 0, bytemuck::bytes_of(&self.data))?;
            self.buffer_dirty = false;
        }
        Ok(buffer)
    }

    /// Bind every present texture to its slot plus the parameter block
    pub fn bind(&mut self, device: &mut dyn RenderDevice, stage: ShaderStage) {
        match self.compile(device) {
            Ok(buffer) => {
                device.bind_constant_buffer(stage, MATERIAL_CONSTANT_BUFFER_SLOT, Some(buffer))
            }
            Err(e) => log::error!("Cannot compile material '{}': {}", self.name, e),
        }
        for &(slot, texture) in &self.bindings {
            device.bind_texture(stage, slot, Some(texture));
        }
    }

    pub fn unbind(&self, device: &mut dyn RenderDevice, stage: ShaderStage) {
        for &(slot, _) in &self.bindings {
            device.bind_texture(stage, slot, None);
        }
        device.bind_constant_buffer(stage, MATERIAL_CONSTANT_BUFFER_SLOT, None);
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer);
        }
    }
}

//! Shader programs and their reflected parameter tables
//!
//! Every stage is represented by the same [`Shader`] type, tagged with its
//! [`ShaderStage`]; binding, unbinding and parameter updates go through one
//! uniform surface regardless of stage.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::traits::*;
use crate::backend::types::*;

/// Declared type of a shader parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    ConstantBuffer,
    Texture,
    Sampler,
}

/// Resource bound to a parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterValue {
    ConstantBuffer(BufferHandle),
    Texture(TextureHandle),
    Sampler(SamplerHandle),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            ParameterValue::ConstantBuffer(_) => ParameterKind::ConstantBuffer,
            ParameterValue::Texture(_) => ParameterKind::Texture,
            ParameterValue::Sampler(_) => ParameterKind::Sampler,
        }
    }
}

/// Reflection data for one named parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDesc {
    pub name: String,
    pub kind: ParameterKind,
    pub slot: u32,
}

impl ParameterDesc {
    pub fn new(name: &str, kind: ParameterKind, slot: u32) -> Self {
        Self {
            name: name.to_string(),
            kind,
            slot,
        }
    }

    pub fn constant_buffer(name: &str, slot: u32) -> Self {
        Self::new(name, ParameterKind::ConstantBuffer, slot)
    }

    pub fn texture(name: &str, slot: u32) -> Self {
        Self::new(name, ParameterKind::Texture, slot)
    }

    pub fn sampler(name: &str, slot: u32) -> Self {
        Self::new(name, ParameterKind::Sampler, slot)
    }
}

/// Index into a shader's parameter table, resolved once by name and cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterIndex(usize);

#[derive(Debug, Clone)]
struct ShaderParameter {
    desc: ParameterDesc,
    value: Option<ParameterValue>,
}

/// A compiled single-stage shader with named parameter slots
#[derive(Debug)]
pub struct Shader {
    name: String,
    stage: ShaderStage,
    handle: ShaderHandle,
    parameters: Vec<ShaderParameter>,
}

pub type SharedShader = Arc<RwLock<Shader>>;

impl Shader {
    pub fn new(
        name: &str,
        stage: ShaderStage,
        handle: ShaderHandle,
        parameters: Vec<ParameterDesc>,
    ) -> Self {
        Self {
            name: name.to_string(),
            stage,
            handle,
            parameters: parameters
                .into_iter()
                .map(|desc| ShaderParameter { desc, value: None })
                .collect(),
        }
    }

    /// Compile `source` on the device and attach the given parameter table
    pub fn compile(
        device: &mut dyn RenderDevice,
        name: &str,
        stage: ShaderStage,
        source: &str,
        parameters: Vec<ParameterDesc>,
    ) -> BackendResult<Self> {
        let handle = device.create_shader(stage, name, source)?;
        Ok(Self::new(name, stage, handle, parameters))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }

    pub fn parameter_index(&self, name: &str) -> Option<ParameterIndex> {
        self.parameters
            .iter()
            .position(|p| p.desc.name == name)
            .map(ParameterIndex)
    }

    pub fn parameter_desc(&self, index: ParameterIndex) -> Option<&ParameterDesc> {
        self.parameters.get(index.0).map(|p| &p.desc)
    }

    pub fn parameter_value(&self, index: ParameterIndex) -> Option<ParameterValue> {
        self.parameters.get(index.0).and_then(|p| p.value)
    }

    /// Set or clear the resource bound to a parameter.
    ///
    /// Binding a value whose kind differs from the declared kind is a programming
    /// error: it asserts in debug builds and is logged and ignored otherwise.
    pub fn set_parameter(&mut self, index: ParameterIndex, value: Option<ParameterValue>) -> bool {
        let Some(parameter) = self.parameters.get_mut(index.0) else {
            log::error!("Shader '{}': parameter index {} out of range", self.name, index.0);
            return false;
        };

        if let Some(v) = value {
            if v.kind() != parameter.desc.kind {
                log::error!(
                    "Shader '{}': parameter kind mismatch for '{}' (declared {:?}, given {:?})",
                    self.name,
                    parameter.desc.name,
                    parameter.desc.kind,
                    v.kind()
                );
                debug_assert!(false, "parameter kind mismatch");
                return false;
            }
        }

        parameter.value = value;
        true
    }

    pub fn set_constant_buffer(&mut self, index: ParameterIndex, buffer: BufferHandle) -> bool {
        self.set_parameter(index, Some(ParameterValue::ConstantBuffer(buffer)))
    }

    pub fn set_texture(&mut self, index: ParameterIndex, texture: Option<TextureHandle>) -> bool {
        self.set_parameter(index, texture.map(ParameterValue::Texture))
    }

    pub fn set_sampler(&mut self, index: ParameterIndex, sampler: SamplerHandle) -> bool {
        self.set_parameter(index, Some(ParameterValue::Sampler(sampler)))
    }

    /// Bind the program and every parameter that currently has a value
    pub fn bind(&self, device: &mut dyn RenderDevice) {
        device.bind_shader(self.stage, Some(self.handle));
        for parameter in &self.parameters {
            let Some(value) = parameter.value else {
                continue;
            };
            let slot = parameter.desc.slot;
            match value {
                ParameterValue::ConstantBuffer(b) => {
                    device.bind_constant_buffer(self.stage, slot, Some(b))
                }
                ParameterValue::Texture(t) => device.bind_texture(self.stage, slot, Some(t)),
                ParameterValue::Sampler(s) => device.bind_sampler(self.stage, slot, Some(s)),
            }
        }
    }

    /// Unbind the program and null out every slot it bound
    pub fn unbind(&self, device: &mut dyn RenderDevice) {
        for parameter in &self.parameters {
            if parameter.value.is_none() {
                continue;
            }
            let slot = parameter.desc.slot;
            match parameter.desc.kind {
                ParameterKind::ConstantBuffer => device.bind_constant_buffer(self.stage, slot, None),
                ParameterKind::Texture => device.bind_texture(self.stage, slot, None),
                ParameterKind::Sampler => device.bind_sampler(self.stage, slot, None),
            }
        }
        device.bind_shader(self.stage, None);
    }
}

/// Resolves shaders by symbolic name
pub trait ShaderLibrary {
    fn shader(&self, name: &str) -> Option<SharedShader>;
}

/// Look up a parameter index, logging an error when the shader or parameter is absent
pub fn attempt_parameter_lookup(
    shader: Option<&SharedShader>,
    name: &str,
) -> Option<ParameterIndex> {
    let shader = shader?;
    let guard = shader.read();
    let index = guard.parameter_index(name);
    if index.is_none() {
        log::error!(
            "Cannot retrieve parameter '{}' from shader '{}'",
            name,
            guard.name()
        );
    }
    index
}

/// In-memory shader registry keyed by name
#[derive(Default)]
pub struct ShaderCache {
    shaders: HashMap<String, SharedShader>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shader: Shader) -> SharedShader {
        let name = shader.name().to_string();
        let shared = Arc::new(RwLock::new(shader));
        self.shaders.insert(name, shared.clone());
        shared
    }

    /// Compile and register a shader; on failure the error is logged and returned
    pub fn compile(
        &mut self,
        device: &mut dyn RenderDevice,
        name: &str,
        stage: ShaderStage,
        source: &str,
        parameters: Vec<ParameterDesc>,
    ) -> BackendResult<SharedShader> {
        match Shader::compile(device, name, stage, source, parameters) {
            Ok(shader) => Ok(self.insert(shader)),
            Err(e) => {
                log::error!("Failed to compile shader '{}': {}", name, e);
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

impl ShaderLibrary for ShaderCache {
    fn shader(&self, name: &str) -> Option<SharedShader> {
        self.shaders.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceCommand, RecordingDevice};

    fn make_shader(device: &mut RecordingDevice) -> Shader {
        Shader::compile(
            device,
            "test_ps",
            ShaderStage::Pixel,
            "fn main() {}",
            vec![
                ParameterDesc::constant_buffer("FrameData", 0),
                ParameterDesc::texture("Diffuse", 3),
                ParameterDesc::sampler("Linear", 1),
            ],
        )
        .unwrap()
    }

    #[test]
    fn parameter_lookup_by_name() {
        let mut device = RecordingDevice::new();
        let shader = make_shader(&mut device);
        let index = shader.parameter_index("Diffuse").unwrap();
        assert_eq!(shader.parameter_desc(index).unwrap().slot, 3);
        assert!(shader.parameter_index("Missing").is_none());
    }

    #[test]
    fn bind_and_unbind_only_touch_set_parameters() {
        let mut device = RecordingDevice::new();
        let mut shader = make_shader(&mut device);
        let texture = device
            .create_texture(&TextureDescriptor::default())
            .unwrap();
        let index = shader.parameter_index("Diffuse").unwrap();
        assert!(shader.set_texture(index, Some(texture)));

        device.clear_commands();
        shader.bind(&mut device);
        shader.unbind(&mut device);

        assert_eq!(
            device.commands(),
            &[
                DeviceCommand::BindShader {
                    stage: ShaderStage::Pixel,
                    shader: Some(shader.handle())
                },
                DeviceCommand::BindTexture {
                    stage: ShaderStage::Pixel,
                    slot: 3,
                    texture: Some(texture)
                },
                DeviceCommand::BindTexture {
                    stage: ShaderStage::Pixel,
                    slot: 3,
                    texture: None
                },
                DeviceCommand::BindShader {
                    stage: ShaderStage::Pixel,
                    shader: None
                },
            ]
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "parameter kind mismatch")]
    fn wrong_parameter_kind_asserts() {
        let mut device = RecordingDevice::new();
        let mut shader = make_shader(&mut device);
        let buffer = device
            .create_buffer(&BufferDescriptor::uniform("cb", 16))
            .unwrap();
        let index = shader.parameter_index("Diffuse").unwrap();
        shader.set_constant_buffer(index, buffer);
    }

    #[test]
    fn cache_lookup_and_missing_parameter() {
        let mut device = RecordingDevice::new();
        let mut cache = ShaderCache::new();
        let shader = make_shader(&mut device);
        cache.insert(shader);

        let found = cache.shader("test_ps");
        assert!(found.is_some());
        assert!(cache.shader("other").is_none());
        assert!(attempt_parameter_lookup(found.as_ref(), "FrameData").is_some());
        assert!(attempt_parameter_lookup(found.as_ref(), "Nope").is_none());
        assert!(attempt_parameter_lookup(None, "FrameData").is_none());
    }
}

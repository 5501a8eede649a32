//! Turns a filled render queue into instanced draw calls

use std::sync::Arc;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_queue::{RenderInstance, RenderQueue, RenderTechnique};
use crate::resources::{
    Material, MaterialId, ModelBuffer, SharedMaterial, SharedShader, ShaderLibrary,
};

/// Material bound for buckets submitted without one
pub const DEFAULT_MATERIAL_ID: MaterialId = MaterialId(u32::MAX);

/// Shader pair a technique draws with
#[derive(Clone)]
pub struct TechniqueShaders {
    pub vertex: SharedShader,
    pub pixel: Option<SharedShader>,
}

impl TechniqueShaders {
    pub fn vertex_shader_name(technique: RenderTechnique) -> String {
        format!("{}.vs", technique.name())
    }

    pub fn pixel_shader_name(technique: RenderTechnique) -> String {
        format!("{}.ps", technique.name())
    }

    /// Resolve the shaders of `technique` from a library
    pub fn resolve(library: &dyn ShaderLibrary, technique: RenderTechnique) -> Option<Self> {
        let vertex = library.shader(&Self::vertex_shader_name(technique))?;
        let pixel = library.shader(&Self::pixel_shader_name(technique));
        Some(Self { vertex, pixel })
    }

    fn bind(&self, device: &mut dyn RenderDevice) {
        self.vertex.read().bind(device);
        if let Some(pixel) = &self.pixel {
            pixel.read().bind(device);
        }
    }

    fn unbind(&self, device: &mut dyn RenderDevice) {
        if let Some(pixel) = &self.pixel {
            pixel.read().unbind(device);
        }
        self.vertex.read().unbind(device);
    }
}

/// Draw statistics for the current frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: u32,
    pub instances_drawn: u32,
    pub techniques_skipped: u32,
}

pub struct RenderQueueProcessor {
    instance_buffer: BufferHandle,
    instance_limit: usize,
    shaders: Vec<Option<TechniqueShaders>>,
    missing_reported: [bool; RenderTechnique::COUNT],
    default_material: Material,
    current_topology: Option<PrimitiveTopology>,
    current_material: Option<MaterialId>,
    scratch: Vec<RenderInstance>,
    stats: FrameStats,
}

impl RenderQueueProcessor {
    pub fn new(device: &mut dyn RenderDevice, instance_limit: usize) -> BackendResult<Self> {
        let instance_limit = instance_limit.max(1);
        let instance_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("render_queue_instances".to_string()),
            size: (instance_limit * std::mem::size_of::<RenderInstance>()) as u64,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        })?;

        Ok(Self {
            instance_buffer,
            instance_limit,
            shaders: vec![None; RenderTechnique::COUNT],
            missing_reported: [false; RenderTechnique::COUNT],
            default_material: Material::new(DEFAULT_MATERIAL_ID, "default"),
            current_topology: None,
            current_material: None,
            scratch: Vec::with_capacity(instance_limit),
            stats: FrameStats::default(),
        })
    }

    pub fn instance_buffer(&self) -> BufferHandle {
        self.instance_buffer
    }

    pub fn instance_limit(&self) -> usize {
        self.instance_limit
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = FrameStats::default();
    }

    pub fn set_technique_shaders(&mut self, technique: RenderTechnique, shaders: TechniqueShaders) {
        self.shaders[technique.index()] = Some(shaders);
        self.missing_reported[technique.index()] = false;
    }

    pub fn has_technique_shaders(&self, technique: RenderTechnique) -> bool {
        self.shaders[technique.index()].is_some()
    }

    /// Resolve shaders for every technique present in the library; returns how many resolved
    pub fn load_technique_shaders(&mut self, library: &dyn ShaderLibrary) -> usize {
        let mut loaded = 0;
        for technique in RenderTechnique::ALL {
            if let Some(shaders) = TechniqueShaders::resolve(library, technique) {
                self.set_technique_shaders(technique, shaders);
                loaded += 1;
            }
        }
        log::debug!(
            "Resolved shaders for {}/{} render techniques",
            loaded,
            RenderTechnique::COUNT
        );
        loaded
    }

    /// Draw every technique accepted by `filter`.
    ///
    /// Within a technique the unsorted buckets are drawn first, then the z-sorted
    /// list back-to-front.
    pub fn process(
        &mut self,
        device: &mut dyn RenderDevice,
        queue: &mut RenderQueue,
        filter: impl Fn(RenderTechnique) -> bool,
    ) {
        self.current_topology = None;
        self.current_material = None;

        for technique in RenderTechnique::ALL.into_iter().filter(|t| filter(*t)) {
            if queue.is_technique_empty(technique) {
                continue;
            }

            let Some(shaders) = self.shaders[technique.index()].clone() else {
                if !self.missing_reported[technique.index()] {
                    log::error!(
                        "No shaders available for technique {}, its instances will not be rendered",
                        technique.name()
                    );
                    self.missing_reported[technique.index()] = true;
                }
                self.stats.techniques_skipped += 1;
                continue;
            };

            shaders.bind(device);
            if technique.requires_alpha_blending() {
                device.set_blend_state(Some(BlendState::alpha_blending()));
            } else {
                device.set_blend_state(None);
            }

            for batch in queue.drain(technique) {
                self.render_batch(device, batch.model, batch.material, batch.instances);
            }

            let mut scratch = std::mem::take(&mut self.scratch);
            for batch in queue.drain_zsorted(technique) {
                scratch.clear();
                scratch.extend(batch.entries.iter().map(|e| e.instance));
                self.render_batch(device, batch.model, batch.material, &scratch);
            }
            self.scratch = scratch;

            shaders.unbind(device);
        }
    }

    /// Depth-only draw of the shadow casters of a technique; the caller binds the shadow shaders
    pub fn process_shadow_casters(
        &mut self,
        device: &mut dyn RenderDevice,
        queue: &RenderQueue,
        technique: RenderTechnique,
    ) {
        self.current_topology = None;
        let mut scratch = std::mem::take(&mut self.scratch);

        for (model, bucket) in queue.shadow_caster_buckets(technique) {
            scratch.clear();
            scratch.extend(bucket.instances().iter().filter(|i| i.is_shadow_caster()));
            for chunk in scratch.chunks(self.instance_limit) {
                if self.upload_instances(device, chunk) {
                    self.draw_model(device, model, chunk.len());
                }
            }
        }

        self.scratch = scratch;
    }

    fn render_batch(
        &mut self,
        device: &mut dyn RenderDevice,
        model: &Arc<ModelBuffer>,
        material: Option<&SharedMaterial>,
        instances: &[RenderInstance],
    ) {
        if instances.is_empty() {
            return;
        }
        if !self.upload_instances(device, instances) {
            return;
        }
        self.bind_material(device, material);
        self.draw_model(device, model, instances.len());
    }

    fn upload_instances(&mut self, device: &mut dyn RenderDevice, instances: &[RenderInstance]) -> bool {
        debug_assert!(instances.len() <= self.instance_limit);
        match device.write_buffer(self.instance_buffer, 0, bytemuck::cast_slice(instances)) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to upload {} instances: {}", instances.len(), e);
                false
            }
        }
    }

    fn bind_material(&mut self, device: &mut dyn RenderDevice, material: Option<&SharedMaterial>) {
        match material {
            Some(material) => {
                let mut material = material.write();
                if self.current_material != Some(material.id()) {
                    material.bind(device, ShaderStage::Pixel);
                    self.current_material = Some(material.id());
                }
            }
            None => {
                if self.current_material != Some(DEFAULT_MATERIAL_ID) {
                    self.default_material.bind(device, ShaderStage::Pixel);
                    self.current_material = Some(DEFAULT_MATERIAL_ID);
                }
            }
        }
    }

    fn draw_model(&mut self, device: &mut dyn RenderDevice, model: &ModelBuffer, instance_count: usize) {
        device.set_vertex_buffers(&[model.vertex_buffer, self.instance_buffer]);
        device.set_index_buffer(model.index_buffer, IndexFormat::Uint16);
        if self.current_topology != Some(model.topology) {
            device.set_primitive_topology(model.topology);
            self.current_topology = Some(model.topology);
        }
        device.draw_indexed_instanced(model.index_count, instance_count as u32);

        self.stats.draw_calls += 1;
        self.stats.instances_drawn += instance_count as u32;
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.instance_buffer);
        self.default_material.release(device);
    }
}

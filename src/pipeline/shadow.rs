//! Shadow map rendering for shadow-casting lights

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::pipeline_state::PipelineState;
use crate::pipeline::shaders::{names, params};
use crate::render_queue::{RenderQueue, RenderQueueProcessor, RenderTechnique};
use crate::resources::{AttachmentPoint, RenderTarget, ShaderLibrary, SharedRenderTarget};
use crate::scene::{Camera, LightData, LightType};

const SHADOW_NEAR_PLANE: f32 = 0.1;
const DEFAULT_DEPTH_BIAS: f32 = 0.005;
const DEFAULT_DIRECTIONAL_EXTENT: f32 = 100.0;

/// Supported square shadow map resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShadowMapSize {
    Sm256,
    Sm512,
    Sm1024,
    Sm2048,
    Sm4096,
}

impl ShadowMapSize {
    pub fn pixels(&self) -> u32 {
        match self {
            ShadowMapSize::Sm256 => 256,
            ShadowMapSize::Sm512 => 512,
            ShadowMapSize::Sm1024 => 1024,
            ShadowMapSize::Sm2048 => 2048,
            ShadowMapSize::Sm4096 => 4096,
        }
    }

    pub fn default_for(light_type: LightType) -> Self {
        match light_type {
            LightType::Point | LightType::Spot => ShadowMapSize::Sm1024,
            LightType::Directional => ShadowMapSize::Sm2048,
        }
    }
}

/// Light-space transforms read by the shadow and lighting shaders (144 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowData {
    /// Camera view space to shadow clip space
    pub view_to_shadow: Mat4,
    pub light_view_projection: Mat4,
    /// x = depth bias, y = map size, z = enabled
    pub params: Vec4,
}

impl ShadowData {
    pub fn disabled() -> Self {
        Self {
            view_to_shadow: Mat4::IDENTITY,
            light_view_projection: Mat4::IDENTITY,
            params: Vec4::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.params.z > 0.5
    }
}

fn stable_up(direction: Vec3) -> Vec3 {
    if direction.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Renders shadow casters from a light's point of view into a depth texture
pub struct ShadowMapper {
    pipeline: Option<PipelineState>,
    render_target: SharedRenderTarget,
    shadow_buffer: BufferHandle,
    textures: HashMap<ShadowMapSize, TextureHandle>,
    sizes: [ShadowMapSize; 3],
    directional_extent: f32,
    depth_bias: f32,
    maps_rendered: u32,
}

impl ShadowMapper {
    pub fn new(device: &mut dyn RenderDevice) -> BackendResult<Self> {
        let shadow_buffer = device.create_buffer(&BufferDescriptor::uniform(
            "shadow_data",
            std::mem::size_of::<ShadowData>() as u64,
        ))?;
        device.write_buffer(shadow_buffer, 0, bytemuck::bytes_of(&ShadowData::disabled()))?;

        Ok(Self {
            pipeline: None,
            render_target: RenderTarget::new("ShadowMapRenderTarget").shared(),
            shadow_buffer,
            textures: HashMap::new(),
            sizes: [
                ShadowMapSize::default_for(LightType::Point),
                ShadowMapSize::default_for(LightType::Spot),
                ShadowMapSize::default_for(LightType::Directional),
            ],
            directional_extent: DEFAULT_DIRECTIONAL_EXTENT,
            depth_bias: DEFAULT_DEPTH_BIAS,
            maps_rendered: 0,
        })
    }

    /// Build the shadow pipeline; returns false (and logs) if the shader is missing
    pub fn load_shaders(&mut self, library: &dyn ShaderLibrary) -> bool {
        let Some(vertex) = library.shader(names::SHADOW_MAP_VS) else {
            log::error!(
                "Shadow map shader '{}' not found, shadow mapping disabled",
                names::SHADOW_MAP_VS
            );
            self.pipeline = None;
            return false;
        };

        {
            let mut shader = vertex.write();
            match shader.parameter_index(params::SHADOW_DATA) {
                Some(index) => {
                    shader.set_constant_buffer(index, self.shadow_buffer);
                }
                None => log::error!(
                    "Cannot retrieve parameter '{}' from shader '{}'",
                    params::SHADOW_DATA,
                    shader.name()
                ),
            }
        }

        let mut pipeline = PipelineState::new("ShadowMap");
        pipeline.set_shader(ShaderStage::Vertex, Some(vertex));
        pipeline.set_rasterizer_state(RasterizerState::default().with_cull_mode(CullMode::Back));
        pipeline.set_depth_stencil_state(DepthStencilState {
            depth_compare: CompareFunction::Less,
            depth_write_enabled: true,
            ..Default::default()
        });
        pipeline.set_render_target(Some(self.render_target.clone()));
        self.pipeline = Some(pipeline);
        true
    }

    pub fn is_available(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn shadow_buffer(&self) -> BufferHandle {
        self.shadow_buffer
    }

    pub fn size_for(&self, light_type: LightType) -> ShadowMapSize {
        self.sizes[light_type as usize]
    }

    pub fn set_size_for(&mut self, light_type: LightType, size: ShadowMapSize) {
        self.sizes[light_type as usize] = size;
    }

    /// Half-width of the orthographic volume used for directional lights
    pub fn set_directional_extent(&mut self, extent: f32) {
        self.directional_extent = extent.max(1.0);
    }

    pub fn maps_rendered(&self) -> u32 {
        self.maps_rendered
    }

    pub fn reset_stats(&mut self) {
        self.maps_rendered = 0;
    }

    /// World to light clip space for the given light.
    ///
    /// Point lights get a single square 90 degree frustum looking along
    /// `direction_ws`, not a cube map. Casters outside that frustum cast no
    /// shadow, so point shadows only suit lights with a dominant direction.
    pub fn light_view_projection(&self, light: &LightData, camera: &Camera) -> Mat4 {
        let position = light.position_ws.truncate();
        let direction = light.direction_ws.truncate().try_normalize().unwrap_or(-Vec3::Z);
        let up = stable_up(direction);

        match light.light_type() {
            Some(LightType::Directional) => {
                let extent = self.directional_extent;
                let focus = camera.position;
                let eye = focus - direction * extent;
                let view = Mat4::look_at_rh(eye, focus, up);
                let projection = Mat4::orthographic_rh(
                    -extent,
                    extent,
                    -extent,
                    extent,
                    SHADOW_NEAR_PLANE,
                    extent * 2.0,
                );
                projection * view
            }
            Some(LightType::Spot) => {
                let fov = 2.0 * light.spot_angle_cos.clamp(-1.0, 1.0).acos();
                let fov = fov.clamp(0.01, std::f32::consts::PI - 0.01);
                let view = Mat4::look_to_rh(position, direction, up);
                let projection =
                    Mat4::perspective_rh(fov, 1.0, SHADOW_NEAR_PLANE, light.range.max(SHADOW_NEAR_PLANE * 2.0));
                projection * view
            }
            _ => {
                let view = Mat4::look_to_rh(position, direction, up);
                let projection = Mat4::perspective_rh(
                    std::f32::consts::FRAC_PI_2,
                    1.0,
                    SHADOW_NEAR_PLANE,
                    light.range.max(SHADOW_NEAR_PLANE * 2.0),
                );
                projection * view
            }
        }
    }

    fn shadow_texture(
        &mut self,
        device: &mut dyn RenderDevice,
        size: ShadowMapSize,
    ) -> BackendResult<TextureHandle> {
        if let Some(texture) = self.textures.get(&size) {
            return Ok(*texture);
        }
        let texture = device.create_texture(&TextureDescriptor::render_target(
            &format!("shadow_map_{}", size.pixels()),
            size.pixels(),
            size.pixels(),
            TextureFormat::Depth32Float,
        ))?;
        log::debug!("Created {}x{} shadow map", size.pixels(), size.pixels());
        self.textures.insert(size, texture);
        Ok(texture)
    }

    /// Render the shadow casters of `queue` from the light's viewpoint.
    ///
    /// Returns the shadow map texture, or `None` when shadow mapping is
    /// unavailable, in which case the shadow data is left disabled.
    pub fn render(
        &mut self,
        device: &mut dyn RenderDevice,
        light: &LightData,
        camera: &Camera,
        processor: &mut RenderQueueProcessor,
        queue: &RenderQueue,
    ) -> Option<TextureHandle> {
        let Some(pipeline) = self.pipeline.clone() else {
            self.disable(device);
            return None;
        };
        let Some(light_type) = light.light_type() else {
            self.disable(device);
            return None;
        };

        let size = self.size_for(light_type);
        let texture = match self.shadow_texture(device, size) {
            Ok(texture) => texture,
            Err(e) => {
                log::error!("Failed to create shadow map: {}", e);
                self.disable(device);
                return None;
            }
        };
        let attached = self
            .render_target
            .write()
            .attach(device, AttachmentPoint::Depth, Some(texture));
        if let Err(e) = attached {
            log::error!("Failed to attach shadow map: {}", e);
            // The cached texture is unusable; recreate it on the next render
            self.textures.remove(&size);
            self.disable(device);
            return None;
        }

        let light_view_projection = self.light_view_projection(light, camera);
        let data = ShadowData {
            view_to_shadow: light_view_projection * camera.inverse_view_matrix(),
            light_view_projection,
            params: Vec4::new(self.depth_bias, size.pixels() as f32, 1.0, 0.0),
        };
        if let Err(e) = device.write_buffer(self.shadow_buffer, 0, bytemuck::bytes_of(&data)) {
            log::error!("Failed to upload shadow data: {}", e);
            return None;
        }

        self.render_target
            .read()
            .clear(device, ClearFlags::DEPTH, &ClearValues::default());
        pipeline.bind(device);
        processor.process_shadow_casters(device, queue, RenderTechnique::Light);
        pipeline.unbind(device);

        self.maps_rendered += 1;
        Some(texture)
    }

    /// Mark the shadow data as disabled so the lighting shader ignores the shadow slot
    pub fn disable(&mut self, device: &mut dyn RenderDevice) {
        if let Err(e) = device.write_buffer(
            self.shadow_buffer,
            0,
            bytemuck::bytes_of(&ShadowData::disabled()),
        ) {
            log::error!("Failed to upload shadow data: {}", e);
        }
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        let _ = self
            .render_target
            .write()
            .attach(device, AttachmentPoint::Depth, None);
        for (_, texture) in self.textures.drain() {
            device.destroy_texture(texture);
        }
        device.destroy_buffer(self.shadow_buffer);
        self.pipeline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceCommand, RecordingDevice};
    use crate::pipeline::shaders::install_default_shaders;
    use crate::render_queue::{InstanceFlags, RenderInstance};
    use crate::resources::{Mesh, ModelBuffer, ModelId, ShaderCache};
    use std::sync::Arc;

    fn read_shadow_data(device: &RecordingDevice, buffer: BufferHandle) -> ShadowData {
        bytemuck::pod_read_unaligned(&device.buffer_contents(buffer).unwrap()[..144])
    }

    #[test]
    fn shadow_data_layout() {
        assert_eq!(std::mem::size_of::<ShadowData>(), 144);
    }

    #[test]
    fn default_sizes_per_light_type() {
        let mut device = RecordingDevice::new();
        let mut mapper = ShadowMapper::new(&mut device).unwrap();
        assert_eq!(mapper.size_for(LightType::Point), ShadowMapSize::Sm1024);
        assert_eq!(mapper.size_for(LightType::Spot), ShadowMapSize::Sm1024);
        assert_eq!(mapper.size_for(LightType::Directional), ShadowMapSize::Sm2048);

        mapper.set_size_for(LightType::Spot, ShadowMapSize::Sm256);
        assert_eq!(mapper.size_for(LightType::Spot).pixels(), 256);
        assert!(!read_shadow_data(&device, mapper.shadow_buffer()).is_enabled());
    }

    #[test]
    fn spot_light_projection_contains_its_axis() {
        let mut device = RecordingDevice::new();
        let mapper = ShadowMapper::new(&mut device).unwrap();
        let light = LightData {
            position_ws: Vec4::new(0.0, 10.0, 0.0, 1.0),
            direction_ws: Vec4::new(0.0, -1.0, 0.0, 0.0),
            light_type: LightType::Spot as u32,
            range: 50.0,
            ..Default::default()
        };
        let camera = Camera::default();

        let clip = mapper.light_view_projection(&light, &camera) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);

        // Behind the light is outside the volume
        let behind = mapper.light_view_projection(&light, &camera) * Vec4::new(0.0, 20.0, 0.0, 1.0);
        assert!(behind.w < 0.0);
    }

    #[test]
    fn point_light_projection_covers_one_face() {
        let mut device = RecordingDevice::new();
        let mapper = ShadowMapper::new(&mut device).unwrap();
        let light = LightData {
            position_ws: Vec4::new(0.0, 0.0, 0.0, 1.0),
            direction_ws: Vec4::new(1.0, 0.0, 0.0, 0.0),
            light_type: LightType::Point as u32,
            range: 10.0,
            ..Default::default()
        };
        let view_projection = mapper.light_view_projection(&light, &Camera::default());
        let ndc = |p: Vec3| {
            let clip = view_projection * p.extend(1.0);
            (clip.truncate() / clip.w, clip.w)
        };

        let (ahead, _) = ndc(Vec3::new(5.0, 0.0, 0.0));
        assert!(ahead.x.abs() < 1e-4 && ahead.y.abs() < 1e-4);
        assert!(ahead.z > 0.0 && ahead.z < 1.0);

        // Just inside the 45 degree half angle
        let (edge, _) = ndc(Vec3::new(5.0, 4.9, 0.0));
        assert!(edge.y.abs() <= 1.0);

        // Sideways and behind fall outside the single face
        let (side, _) = ndc(Vec3::new(1.0, 5.0, 0.0));
        assert!(side.y.abs() > 1.0);
        let (_, behind_w) = ndc(Vec3::new(-5.0, 0.0, 0.0));
        assert!(behind_w < 0.0);
    }

    #[test]
    fn render_draws_only_shadow_casters() {
        let mut device = RecordingDevice::new();
        let mut cache = ShaderCache::new();
        install_default_shaders(&mut device, &mut cache);
        let mut mapper = ShadowMapper::new(&mut device).unwrap();
        assert!(mapper.load_shaders(&cache));

        let mut processor = RenderQueueProcessor::new(&mut device, 16).unwrap();
        let model = Arc::new(ModelBuffer::from_mesh(&mut device, ModelId(1), &Mesh::cube()).unwrap());
        let mut queue = RenderQueue::new(16);
        queue.submit(
            RenderTechnique::Light,
            &model,
            RenderInstance::new(Mat4::IDENTITY).with_flags(InstanceFlags::SHADOW_CASTER),
            None,
        );
        queue.submit(RenderTechnique::Light, &model, RenderInstance::new(Mat4::IDENTITY), None);

        let light = LightData {
            light_type: LightType::Directional as u32,
            direction_ws: Vec4::new(0.0, -1.0, 0.0, 0.0),
            ..Default::default()
        };
        device.clear_commands();
        let texture = mapper
            .render(&mut device, &light, &Camera::default(), &mut processor, &queue)
            .unwrap();

        assert_eq!(device.texture_size(texture), Some((2048, 2048)));
        assert_eq!(mapper.maps_rendered(), 1);
        let draws: Vec<u32> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::DrawIndexedInstanced { instance_count, .. } => Some(*instance_count),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![1]);
        assert!(read_shadow_data(&device, mapper.shadow_buffer()).is_enabled());

        // Same size reuses the texture
        let again = mapper
            .render(&mut device, &light, &Camera::default(), &mut processor, &queue)
            .unwrap();
        assert_eq!(again, texture);
    }

    #[test]
    fn lost_shadow_map_is_recreated() {
        let mut device = RecordingDevice::new();
        let mut cache = ShaderCache::new();
        install_default_shaders(&mut device, &mut cache);
        let mut mapper = ShadowMapper::new(&mut device).unwrap();
        assert!(mapper.load_shaders(&cache));
        let mut processor = RenderQueueProcessor::new(&mut device, 4).unwrap();
        let queue = RenderQueue::new(4);
        let light = LightData {
            light_type: LightType::Spot as u32,
            range: 20.0,
            ..Default::default()
        };

        let texture = mapper
            .render(&mut device, &light, &Camera::default(), &mut processor, &queue)
            .unwrap();
        device.destroy_texture(texture);

        let result = mapper.render(&mut device, &light, &Camera::default(), &mut processor, &queue);
        assert!(result.is_none());
        assert!(!read_shadow_data(&device, mapper.shadow_buffer()).is_enabled());

        let recreated = mapper
            .render(&mut device, &light, &Camera::default(), &mut processor, &queue)
            .unwrap();
        assert_ne!(recreated, texture);
        assert_eq!(device.texture_size(recreated), Some((1024, 1024)));
        assert!(read_shadow_data(&device, mapper.shadow_buffer()).is_enabled());
    }

    #[test]
    fn missing_shader_disables_shadows() {
        let mut device = RecordingDevice::new();
        let cache = ShaderCache::new();
        let mut mapper = ShadowMapper::new(&mut device).unwrap();
        assert!(!mapper.load_shaders(&cache));

        let mut processor = RenderQueueProcessor::new(&mut device, 4).unwrap();
        let queue = RenderQueue::new(4);
        let result = mapper.render(
            &mut device,
            &LightData::default(),
            &Camera::default(),
            &mut processor,
            &queue,
        );
        assert!(result.is_none());
        assert!(!read_shadow_data(&device, mapper.shadow_buffer()).is_enabled());
    }
}

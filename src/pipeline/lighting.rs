//! Deferred lighting engine
//!
//! Owns the GBuffer, the primary colour and depth targets and the pipelines of
//! the per-frame sequence:
//!
//! 1. geometry pass into the GBuffer
//! 2. copy of the GBuffer depth into the primary depth-stencil
//! 3. per-light accumulation into the primary colour target
//! 4. transparency on top of the lit result
//!
//! Point and spot lights use a two-pass stencil technique over their light
//! volume. Pass 1 draws the front faces with a "greater" depth test and
//! decrements the stencil wherever the volume lies behind the scene. Pass 2
//! draws the back faces with a "greater or equal" test and shades only where the
//! stencil still holds the reference value. Directional lights draw a single
//! quad at the far plane.

use bytemuck::{Pod, Zeroable};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::frame::{FrameBufferState, FrameConstants};
use crate::pipeline::gbuffer::{GBuffer, GBufferAttachment};
use crate::pipeline::geometry::{VolumeGeometry, VolumeShape};
use crate::pipeline::pipeline_state::PipelineState;
use crate::pipeline::postprocess::{NoiseGenerator, PostProcessContext};
use crate::pipeline::shaders::{names, params, SharedShaderResources, SHADOW_MAP_TEXTURE_SLOT};
use crate::pipeline::shadow::ShadowMapper;
use crate::render_queue::{RenderQueue, RenderQueueProcessor};
use crate::resources::{
    AttachmentPoint, ParameterIndex, RenderTarget, ShaderLibrary, SharedRenderTarget, SharedShader,
};
use crate::scene::{Camera, LightData, LightType, LIGHT_RENDER_LIMIT};
use crate::{EngineError, EngineResult};

/// Stencil value every light pass starts from
pub const LIGHT_STENCIL_REF: u32 = 1;

/// Format of the light accumulation target
pub const COLOUR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Selects the light the lighting shader reads from the light buffer (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable, Default)]
pub struct LightIndexData {
    pub light_index: u32,
    pub _padding: [u32; 3],
}

/// Progress through the passes of a single light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightPassState {
    #[default]
    Idle,
    StencilCleared,
    Pass1Rendered,
    Pass2Rendered,
    DirectionalRendered,
}

impl LightPassState {
    pub fn can_transition_to(&self, next: LightPassState) -> bool {
        use LightPassState::*;
        matches!(
            (self, next),
            (Idle, StencilCleared)
                | (StencilCleared, Pass1Rendered)
                | (StencilCleared, DirectionalRendered)
                | (Pass1Rendered, Pass2Rendered)
                | (Pass2Rendered, Idle)
                | (DirectionalRendered, Idle)
        )
    }
}

/// Per-frame lighting counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightingStats {
    pub lights_rendered: u32,
    pub lights_skipped: u32,
    pub volume_lights: u32,
    pub directional_lights: u32,
    pub shadow_maps: u32,
}

/// Depth-stencil state of pass 1: front faces behind the scene decrement the stencil
pub fn stencil_pass1_depth_stencil() -> DepthStencilState {
    DepthStencilState {
        depth_test_enabled: true,
        depth_write_enabled: false,
        depth_compare: CompareFunction::Greater,
        stencil_enabled: true,
        front: StencilFaceState {
            compare: CompareFunction::Always,
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::DecrementClamp,
        },
        back: StencilFaceState::IGNORE,
        ..Default::default()
    }
}

pub fn stencil_pass1_rasterizer() -> RasterizerState {
    RasterizerState::default().with_cull_mode(CullMode::Back)
}

/// Depth-stencil state of pass 2: back faces at or beyond the scene shade where
/// the stencil was left untouched
pub fn stencil_pass2_depth_stencil() -> DepthStencilState {
    DepthStencilState {
        depth_test_enabled: true,
        depth_write_enabled: false,
        depth_compare: CompareFunction::GreaterEqual,
        stencil_enabled: true,
        front: StencilFaceState::IGNORE,
        back: StencilFaceState {
            compare: CompareFunction::Equal,
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
        },
        ..Default::default()
    }
}

/// Back faces must survive beyond the far plane
pub fn stencil_pass2_rasterizer() -> RasterizerState {
    RasterizerState::default()
        .with_cull_mode(CullMode::Front)
        .with_depth_clip(false)
}

pub fn directional_depth_stencil() -> DepthStencilState {
    DepthStencilState::read_only(CompareFunction::Greater)
}

/// Primary colour and depth-stencil textures plus the targets built from them
struct ScreenTargets {
    colour: TextureHandle,
    depth: TextureHandle,
    colour_target: SharedRenderTarget,
    depth_only_target: SharedRenderTarget,
}

impl ScreenTargets {
    fn create(device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<Self> {
        let colour = device.create_texture(&TextureDescriptor::render_target(
            "primary_colour",
            width,
            height,
            COLOUR_FORMAT,
        ))?;
        let depth = match device.create_texture(&TextureDescriptor::render_target(
            "primary_depth_stencil",
            width,
            height,
            TextureFormat::Depth24PlusStencil8,
        )) {
            Ok(depth) => depth,
            Err(e) => {
                device.destroy_texture(colour);
                return Err(e);
            }
        };

        let mut colour_target = RenderTarget::new("PrimaryColourTarget");
        let mut depth_only_target = RenderTarget::new("PrimaryDepthTarget");
        if let Err(e) = Self::attach(device, colour, depth, &mut colour_target, &mut depth_only_target) {
            device.destroy_texture(colour);
            device.destroy_texture(depth);
            return Err(e);
        }

        Ok(Self {
            colour,
            depth,
            colour_target: colour_target.shared(),
            depth_only_target: depth_only_target.shared(),
        })
    }

    fn attach(
        device: &dyn RenderDevice,
        colour: TextureHandle,
        depth: TextureHandle,
        colour_target: &mut RenderTarget,
        depth_only_target: &mut RenderTarget,
    ) -> BackendResult<()> {
        colour_target.attach(device, AttachmentPoint::Color0, Some(colour))?;
        colour_target.attach(device, AttachmentPoint::DepthStencil, Some(depth))?;
        depth_only_target.attach(device, AttachmentPoint::DepthStencil, Some(depth))?;
        Ok(())
    }

    fn release(&self, device: &mut dyn RenderDevice) {
        for target in [&self.colour_target, &self.depth_only_target] {
            let mut target = target.write();
            for point in AttachmentPoint::ALL {
                let _ = target.attach(device, point, None);
            }
        }
        device.destroy_texture(self.colour);
        device.destroy_texture(self.depth);
    }
}

struct LightingPipelines {
    stencil_pass1: PipelineState,
    stencil_pass2: PipelineState,
    directional: PipelineState,
    lighting_shader: SharedShader,
    shadow_map_parameter: Option<ParameterIndex>,
}

/// Resources created so far during initialisation, released if a later step fails
#[derive(Default)]
struct PartialResources {
    frame: Option<FrameConstants>,
    gbuffer: Option<GBuffer>,
    targets: Option<ScreenTargets>,
    geometry: Option<VolumeGeometry>,
    shadows: Option<ShadowMapper>,
    light_buffer: Option<BufferHandle>,
    light_index_buffer: Option<BufferHandle>,
    shared: Option<SharedShaderResources>,
}

impl PartialResources {
    fn create(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> EngineResult<()> {
        let frame = FrameConstants::new(device)?;
        let frame_buffer = frame.buffer();
        self.frame = Some(frame);

        let gbuffer = self.gbuffer.insert(GBuffer::new(device, width, height)?);
        let targets = ScreenTargets::create(device, width, height)?;
        gbuffer.attach_light_accumulation(device, targets.colour)?;
        self.targets = Some(targets);

        self.geometry = Some(VolumeGeometry::new(device)?);
        self.shadows = Some(ShadowMapper::new(device)?);
        self.light_buffer = Some(device.create_buffer(&BufferDescriptor::uniform(
            "light_buffer",
            (LIGHT_RENDER_LIMIT * std::mem::size_of::<LightData>()) as u64,
        ))?);
        self.light_index_buffer = Some(device.create_buffer(&BufferDescriptor::uniform(
            "light_index",
            std::mem::size_of::<LightIndexData>() as u64,
        ))?);
        self.shared = Some(SharedShaderResources::create(device, frame_buffer)?);
        Ok(())
    }

    fn release(self, device: &mut dyn RenderDevice) {
        if let Some(mut frame) = self.frame {
            frame.release(device);
        }
        if let Some(mut gbuffer) = self.gbuffer {
            gbuffer.release(device);
        }
        if let Some(targets) = self.targets {
            targets.release(device);
        }
        if let Some(geometry) = self.geometry {
            geometry.release(device);
        }
        if let Some(mut shadows) = self.shadows {
            shadows.release(device);
        }
        for buffer in [self.light_buffer, self.light_index_buffer].into_iter().flatten() {
            device.destroy_buffer(buffer);
        }
    }
}

pub struct DeferredLightingEngine {
    width: u32,
    height: u32,
    frame: FrameConstants,
    gbuffer: GBuffer,
    targets: ScreenTargets,
    geometry: VolumeGeometry,
    shadows: ShadowMapper,
    light_buffer: BufferHandle,
    light_index_buffer: BufferHandle,
    shared: SharedShaderResources,
    geometry_pipeline: PipelineState,
    transparency_pipeline: PipelineState,
    lighting: Option<LightingPipelines>,
    state: LightPassState,
    stats: LightingStats,
}

impl DeferredLightingEngine {
    /// Create every device resource and resolve the lighting shaders.
    ///
    /// Resource creation failures are fatal and tear down whatever was already
    /// created. Missing shaders only disable the affected passes.
    pub fn initialise(
        device: &mut dyn RenderDevice,
        library: &dyn ShaderLibrary,
        width: u32,
        height: u32,
    ) -> EngineResult<Self> {
        log::info!("Initialising deferred lighting engine ({}x{})", width, height);

        let mut partial = PartialResources::default();
        if let Err(e) = partial.create(device, width, height) {
            log::error!("Deferred lighting engine initialisation failed: {}", e);
            partial.release(device);
            return Err(e);
        }

        let PartialResources {
            frame: Some(frame),
            gbuffer: Some(gbuffer),
            targets: Some(targets),
            geometry: Some(geometry),
            shadows: Some(shadows),
            light_buffer: Some(light_buffer),
            light_index_buffer: Some(light_index_buffer),
            shared: Some(shared),
        } = partial
        else {
            return Err(EngineError::Initialisation(
                "lighting resources incomplete".to_string(),
            ));
        };

        let mut geometry_pipeline = PipelineState::new("GBuffer");
        geometry_pipeline.set_render_target(Some(gbuffer.render_target().clone()));

        let mut transparency_pipeline = PipelineState::new("Transparency");
        transparency_pipeline.set_blend_state(Some(BlendState::alpha_blending()));
        transparency_pipeline.set_depth_stencil_state(DepthStencilState::read_only(CompareFunction::Less));
        transparency_pipeline.set_render_target(Some(targets.colour_target.clone()));

        let mut engine = Self {
            width,
            height,
            frame,
            gbuffer,
            targets,
            geometry,
            shadows,
            light_buffer,
            light_index_buffer,
            shared,
            geometry_pipeline,
            transparency_pipeline,
            lighting: None,
            state: LightPassState::Idle,
            stats: LightingStats::default(),
        };
        engine.reload_shaders(library);

        log::info!("Deferred lighting engine initialised");
        Ok(engine)
    }

    /// Resolve shaders and re-cache their parameter indices; returns whether
    /// light accumulation is available
    pub fn reload_shaders(&mut self, library: &dyn ShaderLibrary) -> bool {
        let assigned = self.shared.assign(library);
        log::debug!("Assigned {} shared shader parameters", assigned);
        self.shadows.load_shaders(library);
        self.lighting = self.build_lighting_pipelines(library);
        self.lighting.is_some()
    }

    fn build_lighting_pipelines(&self, library: &dyn ShaderLibrary) -> Option<LightingPipelines> {
        let mut missing = Vec::new();
        let mut resolve = |name: &str| {
            let shader = library.shader(name);
            if shader.is_none() {
                missing.push(name.to_string());
            }
            shader
        };
        let volume_vs = resolve(names::LIGHT_VOLUME_VS);
        let fullscreen_vs = resolve(names::FULLSCREEN_VS);
        let lighting_ps = resolve(names::DEFERRED_LIGHTING_PS);
        let (Some(volume_vs), Some(fullscreen_vs), Some(lighting_ps)) = (volume_vs, fullscreen_vs, lighting_ps)
        else {
            log::error!(
                "Lighting shaders not available ({}), light accumulation disabled",
                missing.join(", ")
            );
            return None;
        };

        let shadow_map_parameter = {
            let mut shader = lighting_ps.write();
            for (name, buffer) in [
                (params::LIGHT_INDEX_BUFFER, self.light_index_buffer),
                (params::LIGHT_BUFFER, self.light_buffer),
                (params::SHADOW_DATA, self.shadows.shadow_buffer()),
            ] {
                match shader.parameter_index(name) {
                    Some(index) => {
                        shader.set_constant_buffer(index, buffer);
                    }
                    None => log::error!(
                        "Cannot retrieve parameter '{}' from shader '{}'",
                        name,
                        shader.name()
                    ),
                }
            }
            shader.parameter_index(params::SHADOW_MAP)
        };

        let mut stencil_pass1 = PipelineState::new("LightStencilPass1");
        stencil_pass1.set_shader(ShaderStage::Vertex, Some(volume_vs.clone()));
        stencil_pass1.set_rasterizer_state(stencil_pass1_rasterizer());
        stencil_pass1.set_depth_stencil_state(stencil_pass1_depth_stencil());
        stencil_pass1.set_stencil_ref(LIGHT_STENCIL_REF);
        stencil_pass1.set_render_target(Some(self.targets.depth_only_target.clone()));

        let mut stencil_pass2 = PipelineState::new("LightStencilPass2");
        stencil_pass2.set_shader(ShaderStage::Vertex, Some(volume_vs));
        stencil_pass2.set_shader(ShaderStage::Pixel, Some(lighting_ps.clone()));
        stencil_pass2.set_blend_state(Some(BlendState::additive()));
        stencil_pass2.set_rasterizer_state(stencil_pass2_rasterizer());
        stencil_pass2.set_depth_stencil_state(stencil_pass2_depth_stencil());
        stencil_pass2.set_stencil_ref(LIGHT_STENCIL_REF);
        stencil_pass2.set_render_target(Some(self.targets.colour_target.clone()));

        let mut directional = PipelineState::new("DirectionalLight");
        directional.set_shader(ShaderStage::Vertex, Some(fullscreen_vs));
        directional.set_shader(ShaderStage::Pixel, Some(lighting_ps.clone()));
        directional.set_blend_state(Some(BlendState::additive()));
        directional.set_rasterizer_state(RasterizerState::default());
        directional.set_depth_stencil_state(directional_depth_stencil());
        directional.set_render_target(Some(self.targets.colour_target.clone()));

        Some(LightingPipelines {
            stencil_pass1,
            stencil_pass2,
            directional,
            lighting_shader: lighting_ps,
            shadow_map_parameter,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_lighting_available(&self) -> bool {
        self.lighting.is_some()
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn frame_constants(&self) -> &FrameConstants {
        &self.frame
    }

    pub fn frame_constants_mut(&mut self) -> &mut FrameConstants {
        &mut self.frame
    }

    pub fn volume_geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn shadows(&self) -> &ShadowMapper {
        &self.shadows
    }

    pub fn shadows_mut(&mut self) -> &mut ShadowMapper {
        &mut self.shadows
    }

    pub fn shared_resources(&self) -> &SharedShaderResources {
        &self.shared
    }

    /// Lit colour texture handed to post-processing
    pub fn colour_texture(&self) -> TextureHandle {
        self.targets.colour
    }

    pub fn depth_texture(&self) -> TextureHandle {
        self.targets.depth
    }

    pub fn colour_target(&self) -> &SharedRenderTarget {
        &self.targets.colour_target
    }

    pub fn light_pass_state(&self) -> LightPassState {
        self.state
    }

    pub fn stats(&self) -> LightingStats {
        self.stats
    }

    fn advance(&mut self, next: LightPassState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid light pass transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Capture the camera for this frame and clear the GBuffer
    pub fn begin_frame(&mut self, device: &mut dyn RenderDevice, camera: &Camera) {
        self.frame.update(camera, self.width, self.height);
        self.gbuffer.clear(device);
        self.stats = LightingStats::default();
        self.shadows.reset_stats();
        self.state = LightPassState::Idle;
    }

    /// Geometry, depth copy, light accumulation and transparency, in that order
    pub fn render_frame(
        &mut self,
        device: &mut dyn RenderDevice,
        camera: &Camera,
        lights: &[LightData],
        queue: &mut RenderQueue,
        processor: &mut RenderQueueProcessor,
    ) {
        self.render_geometry(device, queue, processor);
        self.copy_depth(device);
        self.render_lights(device, camera, lights, queue, processor);
        self.render_transparency(device, queue, processor);
    }

    /// Draw every opaque technique into the GBuffer
    pub fn render_geometry(
        &mut self,
        device: &mut dyn RenderDevice,
        queue: &mut RenderQueue,
        processor: &mut RenderQueueProcessor,
    ) {
        self.frame.set_frame_buffer_state(device, FrameBufferState::Normal);
        self.geometry_pipeline.bind(device);
        processor.process(device, queue, |t| t.is_deferred());
        self.geometry_pipeline.unbind(device);
    }

    /// Copy the GBuffer depth into the primary depth-stencil so light volumes can
    /// depth test while the GBuffer depth is bound for reading
    pub fn copy_depth(&self, device: &mut dyn RenderDevice) {
        match self.gbuffer.depth_stencil_texture() {
            Some(depth) => device.copy_texture(depth, self.targets.depth),
            None => log::error!("GBuffer has no depth texture, depth copy skipped"),
        }
    }

    /// Accumulate every enabled light into the primary colour target
    pub fn render_lights(
        &mut self,
        device: &mut dyn RenderDevice,
        camera: &Camera,
        lights: &[LightData],
        queue: &RenderQueue,
        processor: &mut RenderQueueProcessor,
    ) {
        if self.lighting.is_none() {
            self.stats.lights_skipped += lights.len() as u32;
            return;
        }

        let count = lights.len().min(LIGHT_RENDER_LIMIT);
        if count < lights.len() {
            log::warn!(
                "{} lights submitted, only the first {} are rendered",
                lights.len(),
                LIGHT_RENDER_LIMIT
            );
        }
        if count == 0 {
            return;
        }
        if let Err(e) = device.write_buffer(self.light_buffer, 0, bytemuck::cast_slice(&lights[..count])) {
            log::error!("Failed to upload light buffer: {}", e);
            return;
        }

        self.gbuffer.bind_to_shader(device, ShaderStage::Pixel);
        for (slot, light) in lights[..count].iter().enumerate() {
            if self.render_light(device, camera, slot as u32, light, queue, processor) {
                self.stats.lights_rendered += 1;
            } else {
                self.stats.lights_skipped += 1;
            }
        }
        self.gbuffer.unbind_from_shader(device, ShaderStage::Pixel);
        self.stats.shadow_maps = self.shadows.maps_rendered();
    }

    fn render_light(
        &mut self,
        device: &mut dyn RenderDevice,
        camera: &Camera,
        slot: u32,
        light: &LightData,
        queue: &RenderQueue,
        processor: &mut RenderQueueProcessor,
    ) -> bool {
        if !light.is_enabled() {
            return false;
        }
        let Some(light_type) = light.light_type() else {
            log::warn!("Light {} has unknown type {}, skipped", slot, light.light_type);
            return false;
        };

        let index = LightIndexData {
            light_index: slot,
            ..Default::default()
        };
        if let Err(e) = device.write_buffer(self.light_index_buffer, 0, bytemuck::bytes_of(&index)) {
            log::error!("Failed to upload light index: {}", e);
            return false;
        }

        let shadow_map = if light.casts_shadows() {
            self.shadows.render(device, light, camera, processor, queue)
        } else {
            self.shadows.disable(device);
            None
        };

        let Some(lighting) = &self.lighting else {
            return false;
        };
        if let Some(index) = lighting.shadow_map_parameter {
            lighting.lighting_shader.write().set_texture(index, shadow_map);
        }

        self.advance(LightPassState::StencilCleared);
        let stencil = ClearValues {
            stencil: LIGHT_STENCIL_REF as u8,
            ..Default::default()
        };
        self.targets
            .depth_only_target
            .read()
            .clear(device, ClearFlags::STENCIL, &stencil);

        match light_type {
            LightType::Point | LightType::Spot => {
                let shape = if light_type == LightType::Spot {
                    VolumeShape::Cone
                } else {
                    VolumeShape::Sphere
                };
                let transform = light.volume_transform();
                self.frame.set_frame_buffer_state(device, FrameBufferState::Normal);

                let Some(lighting) = &self.lighting else {
                    return false;
                };
                lighting.stencil_pass1.bind(device);
                self.geometry.draw(device, shape, transform);
                lighting.stencil_pass1.unbind(device);
                self.advance(LightPassState::Pass1Rendered);

                let Some(lighting) = &self.lighting else {
                    return false;
                };
                lighting.stencil_pass2.bind(device);
                if shadow_map.is_none() {
                    device.bind_texture(ShaderStage::Pixel, SHADOW_MAP_TEXTURE_SLOT, None);
                }
                self.geometry.draw(device, shape, transform);
                lighting.stencil_pass2.unbind(device);
                self.advance(LightPassState::Pass2Rendered);
                self.stats.volume_lights += 1;
            }
            LightType::Directional => {
                self.frame.set_frame_buffer_state(device, FrameBufferState::Fullscreen);

                let Some(lighting) = &self.lighting else {
                    return false;
                };
                lighting.directional.bind(device);
                if shadow_map.is_none() {
                    device.bind_texture(ShaderStage::Pixel, SHADOW_MAP_TEXTURE_SLOT, None);
                }
                self.geometry.draw_fullscreen(device, self.width, self.height);
                lighting.directional.unbind(device);
                self.advance(LightPassState::DirectionalRendered);
                self.stats.directional_lights += 1;
            }
        }

        self.advance(LightPassState::Idle);
        true
    }

    /// Draw the alpha-blended techniques over the lit image
    pub fn render_transparency(
        &mut self,
        device: &mut dyn RenderDevice,
        queue: &mut RenderQueue,
        processor: &mut RenderQueueProcessor,
    ) {
        self.frame.set_frame_buffer_state(device, FrameBufferState::Normal);
        self.transparency_pipeline.bind(device);
        processor.process(device, queue, |t| t.requires_alpha_blending());
        self.transparency_pipeline.unbind(device);
    }

    /// Recreate the size-dependent targets.
    ///
    /// Replacement textures are created before anything is released, so a
    /// resize that fails on creation keeps the previous size fully usable.
    pub fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> EngineResult<()> {
        if (width, height) == (self.width, self.height) && self.gbuffer.is_ready() {
            return Ok(());
        }

        let fresh = ScreenTargets::create(device, width, height)?;
        if let Err(e) = self.gbuffer.resize(device, width, height) {
            fresh.release(device);
            return Err(e.into());
        }
        self.targets.release(device);
        self.targets.colour = fresh.colour;
        self.targets.depth = fresh.depth;

        // Pipelines share these targets; re-attach in place
        let attached = {
            let mut colour_target = self.targets.colour_target.write();
            let mut depth_only_target = self.targets.depth_only_target.write();
            ScreenTargets::attach(
                device,
                fresh.colour,
                fresh.depth,
                &mut colour_target,
                &mut depth_only_target,
            )
        }
        .and_then(|_| self.gbuffer.attach_light_accumulation(device, fresh.colour));

        if let Err(e) = attached {
            log::error!("Deferred lighting engine resize to {}x{} failed: {}", width, height, e);
            // Force the next resize to rebuild everything
            self.width = 0;
            self.height = 0;
            return Err(e.into());
        }

        self.width = width;
        self.height = height;
        log::info!("Deferred lighting engine resized to {}x{}", width, height);
        Ok(())
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        self.lighting = None;
        self.shadows.release(device);
        self.geometry.release(device);
        self.targets.release(device);
        self.gbuffer.release(device);
        device.destroy_buffer(self.light_buffer);
        device.destroy_buffer(self.light_index_buffer);
        self.frame.release(device);
    }

    /// Texture behind a GBuffer attachment, for debug views and post-processing
    pub fn gbuffer_texture(&self, attachment: GBufferAttachment) -> Option<TextureHandle> {
        self.gbuffer.texture(attachment)
    }

    /// Frame constants and screen geometry borrowed together for fullscreen passes
    pub fn fullscreen_resources(&mut self) -> (&mut FrameConstants, &VolumeGeometry) {
        (&mut self.frame, &self.geometry)
    }

    /// Resources post-processing reads after lighting: GBuffer depth and velocity
    pub fn post_process_context<'a>(&'a mut self, noise: &'a NoiseGenerator) -> PostProcessContext<'a> {
        PostProcessContext {
            depth: self.gbuffer.depth_stencil_texture(),
            velocity: self.gbuffer.velocity_texture(),
            width: self.width,
            height: self.height,
            frame: &mut self.frame,
            geometry: &self.geometry,
            noise,
        }
    }
}

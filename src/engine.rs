//! Main engine orchestrator
//!
//! Owns the render queue, culler, lighting engine and post-process chain and
//! drives them through one frame: cull and submit, geometry, lighting,
//! transparency, post-processing, debug views, then queue maintenance.

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::debug_view::{DebugSources, DebugViewRenderer};
use crate::pipeline::gbuffer::GBufferAttachment;
use crate::pipeline::lighting::{DeferredLightingEngine, LightingStats};
use crate::pipeline::postprocess::{
    MotionBlur, NoiseGenerator, NoiseMethod, PostProcessChain, TemporalAa,
};
use crate::pipeline::shaders::names;
use crate::render_queue::{
    FrameStats, OptimiserAction, QueueStats, RenderInstance, RenderQueue, RenderQueueOptimiser,
    RenderQueueProcessor, RenderTechnique,
};
use crate::resources::{Mesh, ModelBuffer, ModelId, ShaderLibrary};
use crate::scene::{Camera, CullStats, Environment, LightData, SpatialCuller};
use crate::{EngineConfig, EngineError, EngineResult};

/// Model id reserved for the debug line box
pub const DEBUG_BOX_MODEL_ID: ModelId = ModelId(u32::MAX);

const TREE_BOX_COLOUR: Vec4 = Vec4::new(0.2, 0.4, 1.0, 1.0);
const OBB_COLOUR: Vec4 = Vec4::new(0.1, 1.0, 0.1, 1.0);
const TERRAIN_BOX_COLOUR: Vec4 = Vec4::new(1.0, 0.2, 0.1, 1.0);

/// Debug toggles set through the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderFlag {
    RenderTree,
    DisableHullRendering,
    RenderObb,
    RenderTerrainBoxes,
}

impl RenderFlag {
    pub const COUNT: usize = 4;

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Set of frame stages that are currently rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderStage(u32);

impl RenderStage {
    pub const NONE: Self = Self(0);
    pub const SYSTEM_REGION: Self = Self(1 << 0);
    pub const IMMEDIATE_REGION: Self = Self(1 << 1);
    pub const SYSTEM_OBJECTS: Self = Self(1 << 2);
    pub const BASIC_PROJECTILES: Self = Self(1 << 3);
    pub const EFFECTS: Self = Self(1 << 4);
    pub const PARTICLE_EMITTERS: Self = Self(1 << 5);
    pub const USER_INTERFACE: Self = Self(1 << 6);
    pub const DEBUG_DATA: Self = Self(1 << 7);
    pub const ALL: Self = Self((1 << 8) - 1);

    const NAMED: [(&'static str, RenderStage); 9] = [
        ("all", Self::ALL),
        ("system_region", Self::SYSTEM_REGION),
        ("immediate_region", Self::IMMEDIATE_REGION),
        ("system_objects", Self::SYSTEM_OBJECTS),
        ("basic_projectiles", Self::BASIC_PROJECTILES),
        ("effects", Self::EFFECTS),
        ("particle_emitters", Self::PARTICLE_EMITTERS),
        ("user_interface", Self::USER_INTERFACE),
        ("debug_data", Self::DEBUG_DATA),
    ];

    /// Case-insensitive lookup; "all" names every stage
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, stage)| *stage)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    fn set(&mut self, other: Self, active: bool) {
        if active {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl std::ops::BitOr for RenderStage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Axis-aligned bounds of one spatial partitioning node, for debug rendering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeBounds {
    pub min: Vec3,
    pub max: Vec3,
}

/// Scene content for one frame, owned by the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameScene<'a> {
    pub environments: &'a [Environment],
    pub lights: &'a [LightData],
    pub spatial_tree: Option<&'a [NodeBounds]>,
}

/// Counters gathered over the last rendered frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frame: u64,
    pub culling: CullStats,
    pub queue: QueueStats,
    pub draws: FrameStats,
    pub lighting: LightingStats,
    pub debug_cells: usize,
}

pub struct RenderEngine {
    config: EngineConfig,
    queue: RenderQueue,
    optimiser: RenderQueueOptimiser,
    processor: RenderQueueProcessor,
    culler: SpatialCuller,
    lighting: DeferredLightingEngine,
    noise: NoiseGenerator,
    post_process: PostProcessChain,
    debug_views: DebugViewRenderer,
    debug_box: Arc<ModelBuffer>,
    flags: [bool; RenderFlag::COUNT],
    stages: RenderStage,
    debug_terrain_environment: Option<String>,
    stats: EngineStats,
}

impl RenderEngine {
    /// Create every engine subsystem. Shaders are resolved from `library`, which
    /// must already hold the built-in shaders.
    pub fn new(
        device: &mut dyn RenderDevice,
        library: &dyn ShaderLibrary,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        if library.shader(names::FULLSCREEN_VS).is_none() {
            log::error!(
                "Shader '{}' not found, fullscreen passes will be skipped",
                names::FULLSCREEN_VS
            );
        }
        log::info!(
            "Initialising render engine ({}x{}, instance limit {})",
            config.width,
            config.height,
            config.instanced_render_limit
        );

        let mut processor = RenderQueueProcessor::new(device, config.instanced_render_limit)?;
        processor.load_technique_shaders(library);

        let mut lighting =
            match DeferredLightingEngine::initialise(device, library, config.width, config.height) {
                Ok(lighting) => lighting,
                Err(e) => {
                    processor.release(device);
                    return Err(e);
                }
            };
        if !lighting.gbuffer().is_ready() {
            lighting.release(device);
            processor.release(device);
            return Err(EngineError::IncompleteRenderTarget("GBufferRenderTarget".into()));
        }

        let mut post_process = PostProcessChain::new();
        let (noise, mut debug_views, debug_box) =
            match create_frame_resources(device, &config, &mut post_process) {
                Ok(resources) => resources,
                Err(e) => {
                    post_process.release(device);
                    lighting.release(device);
                    processor.release(device);
                    return Err(e.into());
                }
            };

        let loaded = post_process.load_shaders(library);
        if loaded < post_process.len() {
            log::warn!(
                "{} of {} post-process components have no shaders and will pass through",
                post_process.len() - loaded,
                post_process.len()
            );
        }
        debug_views.load_shaders(library, lighting.colour_target());

        log::info!("Render engine initialisation complete");
        Ok(Self {
            queue: RenderQueue::new(config.instanced_render_limit),
            optimiser: RenderQueueOptimiser::new(config.optimiser),
            culler: SpatialCuller::new(config.element_scale),
            processor,
            lighting,
            noise,
            post_process,
            debug_views,
            debug_box,
            flags: [false; RenderFlag::COUNT],
            stages: RenderStage::ALL,
            debug_terrain_environment: None,
            stats: EngineStats::default(),
            config,
        })
    }

    /// Re-resolve every shader, e.g. after the library was reloaded
    pub fn reload_shaders(&mut self, library: &dyn ShaderLibrary) {
        self.processor.load_technique_shaders(library);
        self.lighting.reload_shaders(library);
        self.post_process.load_shaders(library);
        self.debug_views.load_shaders(library, self.lighting.colour_target());
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }

    /// Queue for external submissions made before [`Self::render_frame`]
    pub fn queue_mut(&mut self) -> &mut RenderQueue {
        &mut self.queue
    }

    pub fn culler(&self) -> &SpatialCuller {
        &self.culler
    }

    pub fn lighting(&self) -> &DeferredLightingEngine {
        &self.lighting
    }

    pub fn lighting_mut(&mut self) -> &mut DeferredLightingEngine {
        &mut self.lighting
    }

    pub fn post_process(&self) -> &PostProcessChain {
        &self.post_process
    }

    pub fn post_process_mut(&mut self) -> &mut PostProcessChain {
        &mut self.post_process
    }

    pub fn noise(&self) -> &NoiseGenerator {
        &self.noise
    }

    pub fn set_noise_method(&mut self, device: &mut dyn RenderDevice, method: NoiseMethod) -> BackendResult<()> {
        self.noise.set_method(device, method)
    }

    pub fn debug_views(&self) -> &DebugViewRenderer {
        &self.debug_views
    }

    pub fn debug_views_mut(&mut self) -> &mut DebugViewRenderer {
        &mut self.debug_views
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn flag(&self, flag: RenderFlag) -> bool {
        self.flags[flag.index()]
    }

    pub fn set_flag(&mut self, flag: RenderFlag, value: bool) {
        self.flags[flag.index()] = value;
    }

    pub fn stages(&self) -> RenderStage {
        self.stages
    }

    pub fn is_stage_active(&self, stage: RenderStage) -> bool {
        self.stages.contains(stage)
    }

    pub fn set_stage_active(&mut self, stage: RenderStage, active: bool) {
        self.stages.set(stage, active);
    }

    /// Environment whose terrain collision boxes are drawn while
    /// [`RenderFlag::RenderTerrainBoxes`] is set
    pub fn debug_terrain_environment(&self) -> Option<&str> {
        self.debug_terrain_environment.as_deref()
    }

    pub fn set_debug_terrain_environment(&mut self, code: Option<String>) {
        self.debug_terrain_environment = code;
    }

    /// Render one frame and return the texture holding the final image.
    ///
    /// `now_ms` is a monotonic clock used to schedule render queue maintenance.
    pub fn render_frame(
        &mut self,
        device: &mut dyn RenderDevice,
        camera: &mut Camera,
        scene: &FrameScene<'_>,
        now_ms: u64,
    ) -> TextureHandle {
        if let Some(taa) = self.post_process.get_mut::<TemporalAa>() {
            taa.update_jitter(camera);
        }
        self.culler.construct_frustum_from_camera(camera);
        self.processor.reset_stats();
        self.lighting.begin_frame(device, camera);

        if self.is_stage_active(RenderStage::SYSTEM_OBJECTS) {
            let hull_disabled = self.flag(RenderFlag::DisableHullRendering);
            for environment in scene.environments {
                self.culler
                    .render_environment_hull(environment, &mut self.queue, hull_disabled);
                self.culler
                    .render_environment(environment, &mut self.queue, camera.position);
            }
        }
        if self.is_stage_active(RenderStage::DEBUG_DATA) {
            self.submit_debug_data(scene);
        }

        let light_count = scene.lights.len().min(self.config.light_render_limit);
        self.lighting.render_frame(
            device,
            camera,
            &scene.lights[..light_count],
            &mut self.queue,
            &mut self.processor,
        );

        let colour = self.lighting.colour_texture();
        let mut output = {
            let mut ctx = self.lighting.post_process_context(&self.noise);
            self.post_process.execute(device, &mut ctx, colour)
        };

        let mut debug_cells = 0;
        if self.debug_views.views().is_enabled() {
            let sources = self.debug_sources();
            let (width, height) = self.lighting.size();
            let (frame, geometry) = self.lighting.fullscreen_resources();
            debug_cells = self
                .debug_views
                .render(device, frame, geometry, &sources, width, height);
            if debug_cells > 0 {
                output = colour;
            }
        }

        self.stats = EngineStats {
            frame: self.stats.frame + 1,
            culling: self.culler.stats(),
            queue: self.queue.stats(),
            draws: self.processor.stats(),
            lighting: self.lighting.stats(),
            debug_cells,
        };
        log::trace!("Frame {} stats: {:?}", self.stats.frame, self.stats);

        // Bucket removal is only safe between frames
        if let OptimiserAction::Optimised { removed } = self.optimiser.run(now_ms, &mut self.queue) {
            log::debug!("Render queue optimised, {} idle buckets removed", removed);
        }
        self.queue.reset();
        output
    }

    fn submit_debug_data(&mut self, scene: &FrameScene<'_>) {
        if self.flag(RenderFlag::RenderTree) {
            for node in scene.spatial_tree.unwrap_or_default() {
                let centre = (node.min + node.max) * 0.5;
                let world = Mat4::from_scale_rotation_translation(
                    node.max - node.min,
                    glam::Quat::IDENTITY,
                    centre,
                );
                self.submit_debug_box(world, TREE_BOX_COLOUR);
            }
        }

        for environment in scene.environments {
            let zero_point_world = environment.zero_point_world();
            if self.flag(RenderFlag::RenderObb) {
                for object in environment.objects() {
                    let world =
                        zero_point_world * object.world * Mat4::from_scale(Vec3::splat(object.radius * 2.0));
                    self.submit_debug_box(world, OBB_COLOUR);
                }
            }

            let terrain_boxes = self.flag(RenderFlag::RenderTerrainBoxes)
                && self.debug_terrain_environment.as_deref() == Some(environment.code());
            if terrain_boxes {
                for terrain in environment.terrain() {
                    let world = zero_point_world * terrain.world * Mat4::from_scale(terrain.extent * 2.0);
                    self.submit_debug_box(world, TERRAIN_BOX_COLOUR);
                }
            }
        }
    }

    fn submit_debug_box(&mut self, world: Mat4, colour: Vec4) {
        let instance = RenderInstance::new(world).with_params(colour);
        self.queue
            .submit(RenderTechnique::VolLine, &self.debug_box, instance, None);
    }

    fn debug_sources(&self) -> DebugSources {
        let taa = self.post_process.get::<TemporalAa>();
        let blur = self.post_process.get::<MotionBlur>();
        DebugSources {
            diffuse: self.lighting.gbuffer_texture(GBufferAttachment::Diffuse),
            specular: self.lighting.gbuffer_texture(GBufferAttachment::Specular),
            normal: self.lighting.gbuffer_texture(GBufferAttachment::Normal),
            velocity: self.lighting.gbuffer_texture(GBufferAttachment::Velocity),
            depth: self.lighting.gbuffer_texture(GBufferAttachment::DepthStencil),
            taa_history: taa.and_then(|t| t.history_texture()),
            motion_blur_tiles: blur.map(|b| b.tile_texture()),
            motion_blur_neighbourhood: blur.map(|b| b.neighbourhood_texture()),
        }
    }

    pub fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> EngineResult<()> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "screen size {}x{} must be non-zero",
                width, height
            )));
        }
        self.lighting.resize(device, width, height)?;
        self.post_process.resize(device, width, height)?;
        self.config.width = width;
        self.config.height = height;
        Ok(())
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        self.debug_views.release(device);
        self.debug_box.release(device);
        self.post_process.release(device);
        self.noise.release(device);
        self.lighting.release(device);
        self.processor.release(device);
        log::info!("Render engine released");
    }
}

fn create_frame_resources(
    device: &mut dyn RenderDevice,
    config: &EngineConfig,
    post_process: &mut PostProcessChain,
) -> BackendResult<(NoiseGenerator, DebugViewRenderer, Arc<ModelBuffer>)> {
    let mut noise = NoiseGenerator::new(device, config.noise_method, config.noise_seed, config.noise_size)?;
    if let Err(e) = create_post_process(device, config, post_process) {
        noise.release(device);
        return Err(e);
    }

    let mut debug_views = match DebugViewRenderer::new(device) {
        Ok(views) => views,
        Err(e) => {
            noise.release(device);
            return Err(e);
        }
    };
    match ModelBuffer::from_mesh(device, DEBUG_BOX_MODEL_ID, &Mesh::line_box()) {
        Ok(model) => Ok((noise, debug_views, Arc::new(model))),
        Err(e) => {
            debug_views.release(device);
            noise.release(device);
            Err(e)
        }
    }
}

fn create_post_process(
    device: &mut dyn RenderDevice,
    config: &EngineConfig,
    post_process: &mut PostProcessChain,
) -> BackendResult<()> {
    post_process.add(TemporalAa::new(device, config.width, config.height, config.temporal_aa)?);
    post_process.add(MotionBlur::new(device, config.width, config.height, config.motion_blur)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;
    use crate::pipeline::debug_view::DebugView;
    use crate::pipeline::shaders::install_default_shaders;
    use crate::resources::ShaderCache;
    use crate::scene::{SimulationState, TerrainObject, Tile};
    use glam::IVec3;

    struct Fixture {
        device: RecordingDevice,
        engine: RenderEngine,
        camera: Camera,
    }

    fn fixture() -> Fixture {
        let mut device = RecordingDevice::new();
        let mut cache = ShaderCache::new();
        install_default_shaders(&mut device, &mut cache);
        let config = EngineConfig {
            width: 64,
            height: 32,
            ..Default::default()
        };
        let engine = RenderEngine::new(&mut device, &cache, config).unwrap();
        Fixture {
            device,
            engine,
            camera: Camera::new(Vec3::new(0.0, 0.0, 60.0), Vec3::ZERO),
        }
    }

    fn environment(device: &mut RecordingDevice) -> Environment {
        let model = Arc::new(ModelBuffer::from_mesh(device, ModelId(1), &Mesh::cube()).unwrap());
        let mut env = Environment::new("ship", IVec3::new(2, 2, 1));
        env.set_simulation_state(SimulationState::FullSimulation);
        env.add_tile(Tile::new(model.clone(), Mat4::IDENTITY), &[IVec3::ZERO]);
        env.add_terrain(
            TerrainObject {
                model: Some(model),
                world: Mat4::IDENTITY,
                extent: Vec3::ONE,
            },
            &[IVec3::ZERO],
        );
        env
    }

    #[test]
    fn render_stages_toggle_individually_and_together() {
        let mut f = fixture();
        assert!(f.engine.is_stage_active(RenderStage::EFFECTS));

        f.engine.set_stage_active(RenderStage::EFFECTS, false);
        assert!(!f.engine.is_stage_active(RenderStage::EFFECTS));
        assert!(f.engine.is_stage_active(RenderStage::DEBUG_DATA));
        assert!(!f.engine.is_stage_active(RenderStage::ALL));

        f.engine.set_stage_active(RenderStage::ALL, false);
        assert_eq!(f.engine.stages(), RenderStage::NONE);
        f.engine.set_stage_active(RenderStage::ALL, true);
        assert_eq!(f.engine.stages(), RenderStage::ALL);

        assert_eq!(RenderStage::from_name("Debug_Data"), Some(RenderStage::DEBUG_DATA));
        assert_eq!(RenderStage::from_name("bogus"), None);
    }

    #[test]
    fn frame_runs_the_full_chain() {
        let mut f = fixture();
        let env = environment(&mut f.device);
        let lights = [LightData {
            range: 20.0,
            ..Default::default()
        }];
        let scene = FrameScene {
            environments: std::slice::from_ref(&env),
            lights: &lights,
            spatial_tree: None,
        };

        let output = f.engine.render_frame(&mut f.device, &mut f.camera, &scene, 0);

        let blur = f.engine.post_process().get::<MotionBlur>().unwrap();
        assert_eq!(output, blur.output_texture());
        let stats = f.engine.stats();
        assert_eq!(stats.frame, 1);
        assert_eq!(stats.queue.submitted, 2);
        assert_eq!(stats.lighting.lights_rendered, 1);
        assert!(stats.draws.draw_calls >= 1);

        // Queue is cleared for the next frame
        assert!(f.engine.queue().is_technique_empty(RenderTechnique::Light));
        assert_ne!(f.camera.jitter(), glam::Vec2::ZERO);
    }

    #[test]
    fn disabled_post_processing_returns_the_lit_colour() {
        let mut f = fixture();
        f.engine.post_process_mut().set_active("temporalaa", false);
        f.engine.post_process_mut().set_active("motionblur", false);

        let output = f
            .engine
            .render_frame(&mut f.device, &mut f.camera, &FrameScene::default(), 0);
        assert_eq!(output, f.engine.lighting().colour_texture());
        assert_eq!(f.camera.jitter(), glam::Vec2::ZERO);
    }

    #[test]
    fn disabled_objects_stage_submits_nothing() {
        let mut f = fixture();
        let env = environment(&mut f.device);
        f.engine.set_stage_active(RenderStage::SYSTEM_OBJECTS, false);
        let scene = FrameScene {
            environments: std::slice::from_ref(&env),
            ..Default::default()
        };
        f.engine.render_frame(&mut f.device, &mut f.camera, &scene, 0);
        assert_eq!(f.engine.stats().queue.submitted, 0);
    }

    #[test]
    fn debug_flags_submit_line_boxes() {
        let mut f = fixture();
        let env = environment(&mut f.device);
        let nodes = [NodeBounds {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        }];
        let scene = FrameScene {
            environments: std::slice::from_ref(&env),
            lights: &[],
            spatial_tree: Some(&nodes),
        };
        f.engine.set_stage_active(RenderStage::SYSTEM_OBJECTS, false);
        f.engine.set_flag(RenderFlag::RenderTree, true);
        f.engine.set_flag(RenderFlag::RenderTerrainBoxes, true);

        // Terrain boxes only for the selected environment
        f.engine.render_frame(&mut f.device, &mut f.camera, &scene, 0);
        assert_eq!(f.engine.stats().queue.submitted, 1);

        f.engine.set_debug_terrain_environment(Some("ship".into()));
        f.engine.render_frame(&mut f.device, &mut f.camera, &scene, 0);
        assert_eq!(f.engine.stats().queue.submitted, 2);
    }

    #[test]
    fn debug_views_replace_the_output() {
        let mut f = fixture();
        f.engine.debug_views_mut().views_mut().set(0, DebugView::GBufferNormal);
        f.engine.debug_views_mut().views_mut().set(1, DebugView::MotionBlurTiles);

        let output = f
            .engine
            .render_frame(&mut f.device, &mut f.camera, &FrameScene::default(), 0);
        assert_eq!(output, f.engine.lighting().colour_texture());
        assert_eq!(f.engine.stats().debug_cells, 2);
    }

    #[test]
    fn engine_without_shaders_passes_the_lit_image_through() {
        let mut device = RecordingDevice::new();
        let cache = ShaderCache::new();
        let config = EngineConfig {
            width: 32,
            height: 32,
            ..Default::default()
        };
        let mut engine = RenderEngine::new(&mut device, &cache, config).unwrap();
        assert!(engine.lighting().gbuffer().is_ready());

        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 60.0), Vec3::ZERO);
        let output = engine.render_frame(&mut device, &mut camera, &FrameScene::default(), 0);
        assert_eq!(output, engine.lighting().colour_texture());
    }

    #[test]
    fn resize_propagates_to_post_processing() {
        let mut f = fixture();
        f.engine.resize(&mut f.device, 128, 64).unwrap();
        assert_eq!(f.engine.lighting().size(), (128, 64));
        let blur = f.engine.post_process().get::<MotionBlur>().unwrap();
        assert_eq!(f.device.texture_size(blur.output_texture()), Some((128, 64)));
        assert!(f.engine.resize(&mut f.device, 0, 64).is_err());
    }
}

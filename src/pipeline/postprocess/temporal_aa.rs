//! Temporal anti-aliasing with ping-pong history buffers

use std::any::Any;

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use super::{
    create_colour_target, fullscreen_pipeline, release_colour_target, set_constant_buffer, set_texture,
    FrustumJitter, PostProcessComponent, PostProcessContext,
};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::frame::FrameBufferState;
use crate::pipeline::lighting::COLOUR_FORMAT;
use crate::pipeline::pipeline_state::PipelineState;
use crate::pipeline::shaders::{names, params};
use crate::resources::{ParameterIndex, ShaderLibrary, SharedRenderTarget, SharedShader};
use crate::scene::Camera;

pub const DEFAULT_FEEDBACK_MIN: f32 = 0.88;
pub const DEFAULT_FEEDBACK_MAX: f32 = 0.97;

/// Parameters read by the reprojection shader (32 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TemporalAaData {
    pub jitter: Vec2,
    pub previous_jitter: Vec2,
    pub feedback_min: f32,
    pub feedback_max: f32,
    pub _padding: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalAaConfig {
    pub feedback_min: f32,
    pub feedback_max: f32,
    pub jitter_scale: f32,
}

impl Default for TemporalAaConfig {
    fn default() -> Self {
        Self {
            feedback_min: DEFAULT_FEEDBACK_MIN,
            feedback_max: DEFAULT_FEEDBACK_MAX,
            jitter_scale: 1.0,
        }
    }
}

/// Clamp both factors to [0, 1] and keep `min <= max`
pub fn clamp_feedback(min: f32, max: f32) -> (f32, f32) {
    let min = min.clamp(0.0, 1.0);
    let max = max.clamp(0.0, 1.0).max(min);
    (min, max)
}

struct TemporalAaPipelines {
    /// One pipeline per history target
    targets: [PipelineState; 2],
    pixel: SharedShader,
    colour: Option<ParameterIndex>,
    history: Option<ParameterIndex>,
    velocity: Option<ParameterIndex>,
}

pub struct TemporalAa {
    active: bool,
    history: [TextureHandle; 2],
    history_targets: [SharedRenderTarget; 2],
    pipelines: Option<TemporalAaPipelines>,
    data_buffer: BufferHandle,
    /// Slot holding the latest resolved frame; negative until the history is seeded
    reprojection_index: i32,
    feedback_min: f32,
    feedback_max: f32,
    jitter: FrustumJitter,
    width: u32,
    height: u32,
}

impl TemporalAa {
    pub const NAME: &'static str = "TemporalAA";

    pub fn new(
        device: &mut dyn RenderDevice,
        width: u32,
        height: u32,
        config: TemporalAaConfig,
    ) -> BackendResult<Self> {
        let data_buffer = device.create_buffer(&BufferDescriptor::uniform(
            "taa_data",
            std::mem::size_of::<TemporalAaData>() as u64,
        ))?;
        let (history, history_targets) = match create_history(device, width, height) {
            Ok(created) => created,
            Err(e) => {
                device.destroy_buffer(data_buffer);
                return Err(e);
            }
        };
        let (feedback_min, feedback_max) = clamp_feedback(config.feedback_min, config.feedback_max);

        Ok(Self {
            active: true,
            history,
            history_targets,
            pipelines: None,
            data_buffer,
            reprojection_index: -1,
            feedback_min,
            feedback_max,
            jitter: FrustumJitter::new(config.jitter_scale),
            width,
            height,
        })
    }

    pub fn feedback(&self) -> (f32, f32) {
        (self.feedback_min, self.feedback_max)
    }

    pub fn set_feedback(&mut self, min: f32, max: f32) {
        (self.feedback_min, self.feedback_max) = clamp_feedback(min, max);
        log::debug!(
            "TAA feedback set to [{}, {}]",
            self.feedback_min,
            self.feedback_max
        );
    }

    pub fn jitter(&self) -> &FrustumJitter {
        &self.jitter
    }

    /// Advance the projection jitter and apply it to `camera`. Jitter is
    /// cleared while the component is inactive.
    pub fn update_jitter(&mut self, camera: &mut Camera) {
        if self.active {
            let offset = self.jitter.update(self.width, self.height);
            camera.set_jitter(offset);
        } else {
            camera.clear_jitter();
        }
    }

    /// Texture holding the most recent resolved frame, if any
    pub fn history_texture(&self) -> Option<TextureHandle> {
        usize::try_from(self.reprojection_index)
            .ok()
            .map(|i| self.history[i])
    }

    pub fn reprojection_index(&self) -> i32 {
        self.reprojection_index
    }

    fn upload_data(&self, device: &mut dyn RenderDevice) -> BackendResult<()> {
        let data = TemporalAaData {
            jitter: self.jitter.current(),
            previous_jitter: self.jitter.previous(),
            feedback_min: self.feedback_min,
            feedback_max: self.feedback_max,
            _padding: Vec2::ZERO,
        };
        device.write_buffer(self.data_buffer, 0, bytemuck::bytes_of(&data))
    }
}

fn create_history(
    device: &mut dyn RenderDevice,
    width: u32,
    height: u32,
) -> BackendResult<([TextureHandle; 2], [SharedRenderTarget; 2])> {
    let (first, first_target) = create_colour_target(device, "taa_history_0", width, height, COLOUR_FORMAT)?;
    match create_colour_target(device, "taa_history_1", width, height, COLOUR_FORMAT) {
        Ok((second, second_target)) => Ok(([first, second], [first_target, second_target])),
        Err(e) => {
            release_colour_target(device, first, &first_target);
            Err(e)
        }
    }
}

impl PostProcessComponent for TemporalAa {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        let activated = active && !self.active;
        self.active = active;
        if activated {
            self.on_activated();
        }
    }

    fn on_activated(&mut self) {
        self.reprojection_index = -1;
        self.jitter.reset();
    }

    fn load_shaders(&mut self, library: &dyn ShaderLibrary) -> bool {
        let vertex = library.shader(names::FULLSCREEN_VS);
        let pixel = library.shader(names::TEMPORAL_AA_PS);
        let (Some(vertex), Some(pixel)) = (vertex, pixel) else {
            log::error!("Temporal AA shaders not available, component will pass through");
            self.pipelines = None;
            return false;
        };

        let (colour, history, velocity, data) = {
            let shader = pixel.read();
            (
                shader.parameter_index(params::COLOUR_TEXTURE),
                shader.parameter_index(params::HISTORY_TEXTURE),
                shader.parameter_index(params::VELOCITY_TEXTURE),
                shader.parameter_index(params::POST_PROCESS_DATA),
            )
        };
        set_constant_buffer(&pixel, data, self.data_buffer);

        let targets = [0, 1].map(|i| {
            fullscreen_pipeline(
                &format!("TemporalAA{}", i),
                vertex.clone(),
                pixel.clone(),
                Some(self.history_targets[i].clone()),
            )
        });
        self.pipelines = Some(TemporalAaPipelines {
            targets,
            pixel,
            colour,
            history,
            velocity,
        });
        true
    }

    fn execute(
        &mut self,
        device: &mut dyn RenderDevice,
        ctx: &mut PostProcessContext<'_>,
        input: TextureHandle,
    ) -> TextureHandle {
        if !self.active {
            return input;
        }
        let Some(taa) = &self.pipelines else {
            return input;
        };
        let Some(velocity) = ctx.velocity else {
            log::warn!("Temporal AA requires a velocity buffer, skipping");
            return input;
        };

        // Seed the history so the first blend does not read uninitialised data
        if self.reprojection_index < 0 {
            device.copy_texture(input, self.history[0]);
            self.reprojection_index = 0;
        }
        let source = self.reprojection_index as usize;
        let target = 1 - source;

        if let Err(e) = self.upload_data(device) {
            log::error!("Failed to upload temporal AA data: {}", e);
            return input;
        }

        set_texture(&taa.pixel, taa.colour, Some(input));
        set_texture(&taa.pixel, taa.history, Some(self.history[source]));
        set_texture(&taa.pixel, taa.velocity, Some(velocity));

        ctx.frame.set_frame_buffer_state(device, FrameBufferState::Fullscreen);
        let pipeline = &taa.targets[target];
        pipeline.bind(device);
        ctx.geometry.draw_fullscreen(device, ctx.width, ctx.height);
        pipeline.unbind(device);

        self.reprojection_index = target as i32;
        self.history[target]
    }

    fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let (history, targets) = create_history(device, width, height)?;
        for (texture, target) in self.history.iter().zip(&self.history_targets) {
            release_colour_target(device, *texture, target);
        }
        self.history = history;
        self.history_targets = targets;
        if let Some(taa) = &mut self.pipelines {
            for (pipeline, target) in taa.targets.iter_mut().zip(&self.history_targets) {
                pipeline.set_render_target(Some(target.clone()));
            }
        }
        self.width = width;
        self.height = height;
        self.reprojection_index = -1;
        Ok(())
    }

    fn release(&mut self, device: &mut dyn RenderDevice) {
        for (texture, target) in self.history.iter().zip(&self.history_targets) {
            release_colour_target(device, *texture, target);
        }
        device.destroy_buffer(self.data_buffer);
        self.pipelines = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceCommand;
    use crate::pipeline::postprocess::test_support::PostFixture;

    fn taa(f: &mut PostFixture) -> TemporalAa {
        let mut taa = TemporalAa::new(&mut f.device, f.width, f.height, TemporalAaConfig::default()).unwrap();
        assert!(taa.load_shaders(&f.cache));
        taa
    }

    #[test]
    fn data_layout() {
        assert_eq!(std::mem::size_of::<TemporalAaData>(), 32);
    }

    #[test]
    fn feedback_is_clamped_and_ordered() {
        assert_eq!(clamp_feedback(0.5, 0.9), (0.5, 0.9));
        assert_eq!(clamp_feedback(-1.0, 2.0), (0.0, 1.0));
        assert_eq!(clamp_feedback(0.9, 0.5), (0.9, 0.9));
    }

    #[test]
    fn inactive_returns_input_unchanged() {
        let mut f = PostFixture::new(16, 16);
        let mut taa = taa(&mut f);
        taa.set_active(false);

        let input = f.colour;
        let (device, mut ctx) = f.split();
        device.clear_commands();
        assert_eq!(taa.execute(device, &mut ctx, input), input);
        assert!(device.commands().is_empty());
    }

    #[test]
    fn first_frame_seeds_history_then_ping_pongs() {
        let mut f = PostFixture::new(16, 16);
        let mut taa = taa(&mut f);
        let history = taa.history;

        let input = f.colour;
        let (device, mut ctx) = f.split();
        device.clear_commands();

        let first = taa.execute(device, &mut ctx, input);
        let commands = device.take_commands();
        assert_eq!(
            commands[0],
            DeviceCommand::CopyTexture {
                source: input,
                destination: history[0],
            }
        );
        assert_eq!(first, history[1]);
        assert_eq!(commands.iter().filter(|c| c.is_draw()).count(), 1);

        let second = taa.execute(device, &mut ctx, input);
        assert_eq!(second, history[0]);
        assert!(!device
            .commands()
            .iter()
            .any(|c| matches!(c, DeviceCommand::CopyTexture { .. })));

        assert_eq!(taa.execute(device, &mut ctx, input), history[1]);
        assert_eq!(taa.history_texture(), Some(history[1]));
    }

    #[test]
    fn reactivation_reseeds_history() {
        let mut f = PostFixture::new(16, 16);
        let mut taa = taa(&mut f);
        let input = f.colour;
        let (device, mut ctx) = f.split();
        taa.execute(device, &mut ctx, input);
        assert_eq!(taa.reprojection_index(), 1);

        taa.set_active(false);
        taa.set_active(true);
        assert_eq!(taa.reprojection_index(), -1);
        assert_eq!(taa.history_texture(), None);
    }

    #[test]
    fn missing_velocity_passes_through() {
        let mut f = PostFixture::new(16, 16);
        let mut taa = taa(&mut f);
        let input = f.colour;
        let (device, mut ctx) = f.split();
        ctx.velocity = None;
        assert_eq!(taa.execute(device, &mut ctx, input), input);
        assert_eq!(taa.reprojection_index(), -1);
    }

    #[test]
    fn jitter_follows_activation() {
        let mut f = PostFixture::new(64, 64);
        let mut taa = taa(&mut f);
        let mut camera = Camera::default();

        taa.update_jitter(&mut camera);
        assert_ne!(camera.jitter(), Vec2::ZERO);

        taa.set_active(false);
        taa.update_jitter(&mut camera);
        assert_eq!(camera.jitter(), Vec2::ZERO);
    }

    #[test]
    fn resize_recreates_history() {
        let mut f = PostFixture::new(16, 16);
        let mut taa = taa(&mut f);
        let before = f.device.live_texture_count();
        let old = taa.history;
        taa.resize(&mut f.device, 32, 24).unwrap();
        assert_eq!(f.device.live_texture_count(), before);
        assert_ne!(taa.history, old);
        assert_eq!(f.device.texture_size(taa.history[0]), Some((32, 24)));
    }
}

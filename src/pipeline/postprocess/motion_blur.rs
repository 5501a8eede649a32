//! Tiled motion blur
//!
//! Three fullscreen passes: the velocity buffer is reduced to one dominant
//! velocity per K x K tile, each tile then takes the dominant velocity of its
//! 3x3 neighbourhood, and finally the colour buffer is gathered along that
//! velocity with noise-offset taps.

use std::any::Any;

use bytemuck::{Pod, Zeroable};

use super::{
    create_colour_target, fullscreen_pipeline, release_colour_target, set_constant_buffer, set_texture,
    PostProcessComponent, PostProcessContext,
};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::frame::FrameBufferState;
use crate::pipeline::lighting::COLOUR_FORMAT;
use crate::pipeline::pipeline_state::PipelineState;
use crate::pipeline::shaders::{names, params};
use crate::resources::{ParameterIndex, ShaderLibrary, SharedRenderTarget, SharedShader};

pub const DEFAULT_TILE_SCALE: u32 = 2;
pub const DEFAULT_SAMPLE_COUNT: u32 = 15;
pub const DEFAULT_MAX_TAP_DISTANCE: f32 = 20.0;

const TILE_FORMAT: TextureFormat = TextureFormat::Rg8Unorm;

/// Parameters shared by the tile and gather shaders (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MotionBlurData {
    pub tile_scale: u32,
    pub sample_count: u32,
    /// Longest blur in pixels
    pub max_tap_distance: f32,
    pub _padding: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionBlurConfig {
    pub tile_scale: u32,
    pub sample_count: u32,
    pub max_tap_distance: f32,
}

impl Default for MotionBlurConfig {
    fn default() -> Self {
        Self {
            tile_scale: DEFAULT_TILE_SCALE,
            sample_count: DEFAULT_SAMPLE_COUNT,
            max_tap_distance: DEFAULT_MAX_TAP_DISTANCE,
        }
    }
}

/// Size of the tile textures for a `width` x `height` screen. Partial tiles
/// at the right and bottom edges get their own texel.
pub fn tiled_dimensions(width: u32, height: u32, tile_scale: u32) -> (u32, u32) {
    let k = tile_scale.max(1);
    (width.div_ceil(k).max(1), height.div_ceil(k).max(1))
}

struct TileTargets {
    tiles: TextureHandle,
    tiles_target: SharedRenderTarget,
    neighbourhood: TextureHandle,
    neighbourhood_target: SharedRenderTarget,
}

impl TileTargets {
    fn create(device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<Self> {
        let (tiles, tiles_target) = create_colour_target(device, "motion_blur_tiles", width, height, TILE_FORMAT)?;
        match create_colour_target(device, "motion_blur_neighbourhood", width, height, TILE_FORMAT) {
            Ok((neighbourhood, neighbourhood_target)) => Ok(Self {
                tiles,
                tiles_target,
                neighbourhood,
                neighbourhood_target,
            }),
            Err(e) => {
                release_colour_target(device, tiles, &tiles_target);
                Err(e)
            }
        }
    }

    fn release(&self, device: &mut dyn RenderDevice) {
        release_colour_target(device, self.tiles, &self.tiles_target);
        release_colour_target(device, self.neighbourhood, &self.neighbourhood_target);
    }
}

struct MotionBlurPipelines {
    tile_gen: PipelineState,
    tile_gen_shader: SharedShader,
    tile_velocity: Option<ParameterIndex>,

    neighbourhood: PipelineState,
    neighbourhood_shader: SharedShader,
    neighbourhood_tiles: Option<ParameterIndex>,

    gather: PipelineState,
    gather_shader: SharedShader,
    gather_colour: Option<ParameterIndex>,
    gather_depth: Option<ParameterIndex>,
    gather_velocity: Option<ParameterIndex>,
    gather_neighbourhood: Option<ParameterIndex>,
    gather_noise: Option<ParameterIndex>,
    gather_noise_data: Option<ParameterIndex>,
}

pub struct MotionBlur {
    active: bool,
    config: MotionBlurConfig,
    tiles: TileTargets,
    output: TextureHandle,
    output_target: SharedRenderTarget,
    pipelines: Option<MotionBlurPipelines>,
    data_buffer: BufferHandle,
    width: u32,
    height: u32,
}

impl MotionBlur {
    pub const NAME: &'static str = "MotionBlur";

    pub fn new(
        device: &mut dyn RenderDevice,
        width: u32,
        height: u32,
        config: MotionBlurConfig,
    ) -> BackendResult<Self> {
        let config = MotionBlurConfig {
            tile_scale: config.tile_scale.max(1),
            ..config
        };
        let data_buffer = device.create_buffer(&BufferDescriptor::uniform(
            "motion_blur_data",
            std::mem::size_of::<MotionBlurData>() as u64,
        ))?;

        let (tile_width, tile_height) = tiled_dimensions(width, height, config.tile_scale);
        let tiles = match TileTargets::create(device, tile_width, tile_height) {
            Ok(tiles) => tiles,
            Err(e) => {
                device.destroy_buffer(data_buffer);
                return Err(e);
            }
        };
        let (output, output_target) =
            match create_colour_target(device, "motion_blur_output", width, height, COLOUR_FORMAT) {
                Ok(created) => created,
                Err(e) => {
                    tiles.release(device);
                    device.destroy_buffer(data_buffer);
                    return Err(e);
                }
            };

        Ok(Self {
            active: true,
            config,
            tiles,
            output,
            output_target,
            pipelines: None,
            data_buffer,
            width,
            height,
        })
    }

    pub fn config(&self) -> &MotionBlurConfig {
        &self.config
    }

    pub fn tile_scale(&self) -> u32 {
        self.config.tile_scale
    }

    pub fn tiled_size(&self) -> (u32, u32) {
        tiled_dimensions(self.width, self.height, self.config.tile_scale)
    }

    /// Change the tile size, recreating the tile textures. Values below 1 are clamped.
    pub fn set_tile_scale(&mut self, device: &mut dyn RenderDevice, tile_scale: u32) -> BackendResult<()> {
        let tile_scale = tile_scale.max(1);
        if tile_scale == self.config.tile_scale {
            return Ok(());
        }
        let (w, h) = tiled_dimensions(self.width, self.height, tile_scale);
        self.replace_tiles(device, w, h)?;
        self.config.tile_scale = tile_scale;
        log::info!("Motion blur tile scale set to {} ({}x{} tiles)", tile_scale, w, h);
        Ok(())
    }

    pub fn set_sample_count(&mut self, sample_count: u32) {
        self.config.sample_count = sample_count.max(1);
    }

    pub fn set_max_tap_distance(&mut self, distance: f32) {
        self.config.max_tap_distance = distance.max(0.0);
    }

    pub fn tile_texture(&self) -> TextureHandle {
        self.tiles.tiles
    }

    pub fn neighbourhood_texture(&self) -> TextureHandle {
        self.tiles.neighbourhood
    }

    pub fn output_texture(&self) -> TextureHandle {
        self.output
    }

    fn replace_tiles(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<()> {
        let tiles = TileTargets::create(device, width, height)?;
        self.tiles.release(device);
        self.tiles = tiles;
        if let Some(blur) = &mut self.pipelines {
            blur.tile_gen.set_render_target(Some(self.tiles.tiles_target.clone()));
            blur.neighbourhood
                .set_render_target(Some(self.tiles.neighbourhood_target.clone()));
        }
        Ok(())
    }

    fn upload_data(&self, device: &mut dyn RenderDevice) -> BackendResult<()> {
        let data = MotionBlurData {
            tile_scale: self.config.tile_scale,
            sample_count: self.config.sample_count,
            max_tap_distance: self.config.max_tap_distance,
            _padding: 0.0,
        };
        device.write_buffer(self.data_buffer, 0, bytemuck::bytes_of(&data))
    }
}

impl PostProcessComponent for MotionBlur {
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

    fn load_shaders(&mut self, library: &dyn ShaderLibrary) -> bool {
        let vertex = library.shader(names::FULLSCREEN_VS);
        let tile_gen = library.shader(names::MOTION_BLUR_TILE_GEN_PS);
        let neighbourhood = library.shader(names::MOTION_BLUR_NEIGHBOURHOOD_PS);
        let gather = library.shader(names::MOTION_BLUR_GATHER_PS);
        let (Some(vertex), Some(tile_gen_shader), Some(neighbourhood_shader), Some(gather_shader)) =
            (vertex, tile_gen, neighbourhood, gather)
        else {
            log::error!("Motion blur shaders not available, component will pass through");
            self.pipelines = None;
            return false;
        };

        let (tile_velocity, tile_data) = {
            let shader = tile_gen_shader.read();
            (
                shader.parameter_index(params::VELOCITY_TEXTURE),
                shader.parameter_index(params::POST_PROCESS_DATA),
            )
        };
        set_constant_buffer(&tile_gen_shader, tile_data, self.data_buffer);
        let neighbourhood_tiles = neighbourhood_shader.read().parameter_index(params::TILE_TEXTURE);

        let gather_data = gather_shader.read().parameter_index(params::POST_PROCESS_DATA);
        set_constant_buffer(&gather_shader, gather_data, self.data_buffer);
        let shader = gather_shader.read();
        let gather_colour = shader.parameter_index(params::COLOUR_TEXTURE);
        let gather_depth = shader.parameter_index(params::DEPTH_TEXTURE);
        let gather_velocity = shader.parameter_index(params::VELOCITY_TEXTURE);
        let gather_neighbourhood = shader.parameter_index(params::NEIGHBOURHOOD_TEXTURE);
        let gather_noise = shader.parameter_index(params::NOISE_TEXTURE);
        let gather_noise_data = shader.parameter_index(params::NOISE_DATA);
        drop(shader);

        self.pipelines = Some(MotionBlurPipelines {
            tile_gen: fullscreen_pipeline(
                "MotionBlurTileGen",
                vertex.clone(),
                tile_gen_shader.clone(),
                Some(self.tiles.tiles_target.clone()),
            ),
            tile_gen_shader,
            tile_velocity,
            neighbourhood: fullscreen_pipeline(
                "MotionBlurNeighbourhood",
                vertex.clone(),
                neighbourhood_shader.clone(),
                Some(self.tiles.neighbourhood_target.clone()),
            ),
            neighbourhood_shader,
            neighbourhood_tiles,
            gather: fullscreen_pipeline(
                "MotionBlurGather",
                vertex,
                gather_shader.clone(),
                Some(self.output_target.clone()),
            ),
            gather_shader,
            gather_colour,
            gather_depth,
            gather_velocity,
            gather_neighbourhood,
            gather_noise,
            gather_noise_data,
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
        let Some(blur) = &self.pipelines else {
            return input;
        };
        let (Some(velocity), Some(depth)) = (ctx.velocity, ctx.depth) else {
            log::warn!("Motion blur requires velocity and depth buffers, skipping");
            return input;
        };
        if let Err(e) = self.upload_data(device) {
            log::error!("Failed to upload motion blur data: {}", e);
            return input;
        }

        ctx.frame.set_frame_buffer_state(device, FrameBufferState::Fullscreen);

        set_texture(&blur.tile_gen_shader, blur.tile_velocity, Some(velocity));
        blur.tile_gen.bind(device);
        ctx.geometry.draw_fullscreen(device, ctx.width, ctx.height);
        blur.tile_gen.unbind(device);

        set_texture(&blur.neighbourhood_shader, blur.neighbourhood_tiles, Some(self.tiles.tiles));
        blur.neighbourhood.bind(device);
        ctx.geometry.draw_fullscreen(device, ctx.width, ctx.height);
        blur.neighbourhood.unbind(device);

        let gather = &blur.gather_shader;
        set_texture(gather, blur.gather_colour, Some(input));
        set_texture(gather, blur.gather_depth, Some(depth));
        set_texture(gather, blur.gather_velocity, Some(velocity));
        set_texture(gather, blur.gather_neighbourhood, Some(self.tiles.neighbourhood));
        set_texture(gather, blur.gather_noise, Some(ctx.noise.texture()));
        set_constant_buffer(gather, blur.gather_noise_data, ctx.noise.buffer());
        blur.gather.bind(device);
        ctx.geometry.draw_fullscreen(device, ctx.width, ctx.height);
        blur.gather.unbind(device);

        self.output
    }

    fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let (output, output_target) =
            create_colour_target(device, "motion_blur_output", width, height, COLOUR_FORMAT)?;
        let (tile_width, tile_height) = tiled_dimensions(width, height, self.config.tile_scale);
        if let Err(e) = self.replace_tiles(device, tile_width, tile_height) {
            release_colour_target(device, output, &output_target);
            return Err(e);
        }
        release_colour_target(device, self.output, &self.output_target);
        self.output = output;
        self.output_target = output_target;
        if let Some(blur) = &mut self.pipelines {
            blur.gather.set_render_target(Some(self.output_target.clone()));
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn release(&mut self, device: &mut dyn RenderDevice) {
        self.tiles.release(device);
        release_colour_target(device, self.output, &self.output_target);
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

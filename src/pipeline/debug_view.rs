//! Diagnostic views of intermediate buffers, drawn as a grid over the final image

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::frame::{FrameBufferState, FrameConstants};
use crate::pipeline::geometry::VolumeGeometry;
use crate::pipeline::pipeline_state::PipelineState;
use crate::pipeline::shaders::{names, params};
use crate::resources::{ParameterIndex, ShaderLibrary, SharedRenderTarget, SharedShader};

/// Maximum number of simultaneous debug views
pub const MAX_DEBUG_VIEWS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DebugView {
    #[default]
    None,
    GBufferDiffuse,
    GBufferSpecular,
    GBufferNormal,
    GBufferVelocity,
    GBufferDepth,
    TaaHistory,
    MotionBlurTiles,
    MotionBlurNeighbourhood,
}

impl DebugView {
    pub const ALL: [DebugView; 9] = [
        DebugView::None,
        DebugView::GBufferDiffuse,
        DebugView::GBufferSpecular,
        DebugView::GBufferNormal,
        DebugView::GBufferVelocity,
        DebugView::GBufferDepth,
        DebugView::TaaHistory,
        DebugView::MotionBlurTiles,
        DebugView::MotionBlurNeighbourhood,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DebugView::None => "none",
            DebugView::GBufferDiffuse => "diffuse",
            DebugView::GBufferSpecular => "specular",
            DebugView::GBufferNormal => "normal",
            DebugView::GBufferVelocity => "velocity",
            DebugView::GBufferDepth => "depth",
            DebugView::TaaHistory => "taa_history",
            DebugView::MotionBlurTiles => "motionblur_tiles",
            DebugView::MotionBlurNeighbourhood => "motionblur_neighbourhood",
        }
    }

    /// Case-insensitive lookup by [`DebugView::name`]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
    }

    fn mode(&self) -> u32 {
        match self {
            DebugView::GBufferDepth => 1,
            DebugView::GBufferNormal | DebugView::GBufferVelocity => 2,
            _ => 0,
        }
    }
}

/// Fixed-capacity table of enabled views
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugViewSet {
    views: [DebugView; MAX_DEBUG_VIEWS],
    active_count: usize,
}

impl DebugViewSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the view at `index`; returns false if the index is out of range
    pub fn set(&mut self, index: usize, view: DebugView) -> bool {
        if index >= MAX_DEBUG_VIEWS {
            return false;
        }
        self.views[index] = view;
        self.active_count = self
            .views
            .iter()
            .rposition(|v| *v != DebugView::None)
            .map_or(0, |i| i + 1);
        true
    }

    pub fn get(&self, index: usize) -> DebugView {
        self.views.get(index).copied().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Highest non-None index plus one
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn is_enabled(&self) -> bool {
        self.active_count > 0
    }

    pub fn active(&self) -> &[DebugView] {
        &self.views[..self.active_count]
    }

    /// Columns and rows of the smallest square-ish grid holding every active view
    pub fn grid(&self) -> (u32, u32) {
        let count = self.active_count as u32;
        if count == 0 {
            return (0, 0);
        }
        let columns = (count as f32).sqrt().ceil() as u32;
        let rows = count.div_ceil(columns);
        (columns, rows)
    }
}

/// Per-cell parameters for the debug view shader (32 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DebugViewData {
    pub cell_origin: Vec2,
    pub cell_size: Vec2,
    pub mode: u32,
    pub _padding: [u32; 3],
}

/// Textures a debug view may display; absent sources leave their cell empty
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugSources {
    pub diffuse: Option<TextureHandle>,
    pub specular: Option<TextureHandle>,
    pub normal: Option<TextureHandle>,
    pub velocity: Option<TextureHandle>,
    pub depth: Option<TextureHandle>,
    pub taa_history: Option<TextureHandle>,
    pub motion_blur_tiles: Option<TextureHandle>,
    pub motion_blur_neighbourhood: Option<TextureHandle>,
}

impl DebugSources {
    pub fn texture(&self, view: DebugView) -> Option<TextureHandle> {
        match view {
            DebugView::None => None,
            DebugView::GBufferDiffuse => self.diffuse,
            DebugView::GBufferSpecular => self.specular,
            DebugView::GBufferNormal => self.normal,
            DebugView::GBufferVelocity => self.velocity,
            DebugView::GBufferDepth => self.depth,
            DebugView::TaaHistory => self.taa_history,
            DebugView::MotionBlurTiles => self.motion_blur_tiles,
            DebugView::MotionBlurNeighbourhood => self.motion_blur_neighbourhood,
        }
    }
}

struct DebugViewPipeline {
    pipeline: PipelineState,
    pixel: SharedShader,
    source_texture: Option<ParameterIndex>,
    source_depth: Option<ParameterIndex>,
}

/// Draws the enabled debug views into the output render target
pub struct DebugViewRenderer {
    views: DebugViewSet,
    pipeline: Option<DebugViewPipeline>,
    data_buffer: BufferHandle,
}

impl DebugViewRenderer {
    pub fn new(device: &mut dyn RenderDevice) -> BackendResult<Self> {
        let data_buffer = device.create_buffer(&BufferDescriptor::uniform(
            "debug_view_data",
            std::mem::size_of::<DebugViewData>() as u64,
        ))?;
        Ok(Self {
            views: DebugViewSet::new(),
            pipeline: None,
            data_buffer,
        })
    }

    pub fn views(&self) -> &DebugViewSet {
        &self.views
    }

    pub fn views_mut(&mut self) -> &mut DebugViewSet {
        &mut self.views
    }

    /// Build the debug pipeline drawing into `output`; logs and returns false on missing shaders
    pub fn load_shaders(&mut self, library: &dyn ShaderLibrary, output: &SharedRenderTarget) -> bool {
        let vertex = library.shader(names::FULLSCREEN_VS);
        let pixel = library.shader(names::DEBUG_VIEW_PS);
        let (Some(vertex), Some(pixel)) = (vertex, pixel) else {
            log::error!("Debug view shaders not available, debug views disabled");
            self.pipeline = None;
            return false;
        };

        let (source_texture, source_depth) = {
            let mut shader = pixel.write();
            if let Some(index) = shader.parameter_index(params::POST_PROCESS_DATA) {
                shader.set_constant_buffer(index, self.data_buffer);
            }
            (
                shader.parameter_index(params::SOURCE_TEXTURE),
                shader.parameter_index(params::SOURCE_DEPTH),
            )
        };

        let mut pipeline = PipelineState::new("DebugView");
        pipeline.set_shader(ShaderStage::Vertex, Some(vertex));
        pipeline.set_shader(ShaderStage::Pixel, Some(pixel.clone()));
        pipeline.set_rasterizer_state(RasterizerState::default().with_cull_mode(CullMode::None));
        pipeline.set_depth_stencil_state(DepthStencilState::disabled());
        pipeline.set_render_target(Some(output.clone()));

        self.pipeline = Some(DebugViewPipeline {
            pipeline,
            pixel,
            source_texture,
            source_depth,
        });
        true
    }

    /// Draw every active view into its grid cell; returns the number of cells drawn
    pub fn render(
        &mut self,
        device: &mut dyn RenderDevice,
        frame: &mut FrameConstants,
        geometry: &VolumeGeometry,
        sources: &DebugSources,
        width: u32,
        height: u32,
    ) -> usize {
        if !self.views.is_enabled() {
            return 0;
        }
        let Some(debug) = &self.pipeline else {
            return 0;
        };

        let (columns, rows) = self.views.grid();
        let cell_size = Vec2::new(width as f32 / columns as f32, height as f32 / rows as f32);
        frame.set_frame_buffer_state(device, FrameBufferState::Fullscreen);

        let mut drawn = 0;
        for (i, view) in self.views.active().iter().enumerate() {
            let Some(texture) = sources.texture(*view) else {
                continue;
            };
            let cell = Vec2::new((i as u32 % columns) as f32, (i as u32 / columns) as f32);
            let data = DebugViewData {
                cell_origin: cell * cell_size,
                cell_size,
                mode: view.mode(),
                _padding: [0; 3],
            };
            if let Err(e) = device.write_buffer(self.data_buffer, 0, bytemuck::bytes_of(&data)) {
                log::error!("Failed to upload debug view data: {}", e);
                continue;
            }

            {
                let mut shader = debug.pixel.write();
                let (colour, depth) = if *view == DebugView::GBufferDepth {
                    (None, Some(texture))
                } else {
                    (Some(texture), None)
                };
                if let Some(index) = debug.source_texture {
                    shader.set_texture(index, colour);
                }
                if let Some(index) = debug.source_depth {
                    shader.set_texture(index, depth);
                }
            }

            debug.pipeline.bind(device);
            device.set_viewport(&Viewport {
                x: data.cell_origin.x,
                y: data.cell_origin.y,
                width: cell_size.x,
                height: cell_size.y,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            geometry.draw_fullscreen(device, width, height);
            debug.pipeline.unbind(device);
            drawn += 1;
        }
        drawn
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.data_buffer);
        self.pipeline = None;
    }
}

//! Complete fixed-function and programmable state for one draw configuration

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{SharedRenderTarget, SharedShader};

/// One shader per stage plus blend, rasterizer and depth-stencil state and the
/// render target drawn into.
///
/// Shaders and the render target are shared references; the pipeline does not
/// own them and never releases them.
#[derive(Clone)]
pub struct PipelineState {
    name: String,
    shaders: [Option<SharedShader>; ShaderStage::COUNT],
    blend: Option<BlendState>,
    rasterizer: RasterizerState,
    depth_stencil: DepthStencilState,
    stencil_ref: u32,
    render_target: Option<SharedRenderTarget>,
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shaders: Vec<_> = self
            .shaders
            .iter()
            .flatten()
            .map(|s| s.read().name().to_string())
            .collect();
        f.debug_struct("PipelineState")
            .field("name", &self.name)
            .field("shaders", &shaders)
            .field("blend", &self.blend)
            .field("rasterizer", &self.rasterizer)
            .field("depth_stencil", &self.depth_stencil)
            .field("stencil_ref", &self.stencil_ref)
            .finish()
    }
}

impl PipelineState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shaders: Default::default(),
            blend: None,
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            stencil_ref: 0,
            render_target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_shader(&mut self, stage: ShaderStage, shader: Option<SharedShader>) {
        if let Some(s) = &shader {
            let actual = s.read().stage();
            if actual != stage {
                log::error!(
                    "Pipeline '{}': shader '{}' is a {:?} shader, cannot assign to {:?} stage",
                    self.name,
                    s.read().name(),
                    actual,
                    stage
                );
                return;
            }
        }
        self.shaders[stage.index()] = shader;
    }

    pub fn shader(&self, stage: ShaderStage) -> Option<&SharedShader> {
        self.shaders[stage.index()].as_ref()
    }

    pub fn has_shader(&self, stage: ShaderStage) -> bool {
        self.shaders[stage.index()].is_some()
    }

    pub fn set_blend_state(&mut self, blend: Option<BlendState>) {
        self.blend = blend;
    }

    pub fn blend_state(&self) -> Option<BlendState> {
        self.blend
    }

    pub fn set_rasterizer_state(&mut self, rasterizer: RasterizerState) {
        self.rasterizer = rasterizer;
    }

    pub fn rasterizer_state(&self) -> &RasterizerState {
        &self.rasterizer
    }

    pub fn set_depth_stencil_state(&mut self, depth_stencil: DepthStencilState) {
        self.depth_stencil = depth_stencil;
    }

    pub fn depth_stencil_state(&self) -> &DepthStencilState {
        &self.depth_stencil
    }

    pub fn set_stencil_ref(&mut self, stencil_ref: u32) {
        self.stencil_ref = stencil_ref;
    }

    pub fn stencil_ref(&self) -> u32 {
        self.stencil_ref
    }

    pub fn set_render_target(&mut self, render_target: Option<SharedRenderTarget>) {
        self.render_target = render_target;
    }

    pub fn render_target(&self) -> Option<&SharedRenderTarget> {
        self.render_target.as_ref()
    }

    /// Apply all state, bind every assigned shader with its parameters and bind the render target
    pub fn bind(&self, device: &mut dyn RenderDevice) {
        match &self.render_target {
            Some(target) => target.read().bind(device),
            None => log::warn!("Pipeline '{}' bound without a render target", self.name),
        }
        device.set_blend_state(self.blend);
        device.set_rasterizer_state(&self.rasterizer);
        device.set_depth_stencil_state(&self.depth_stencil, self.stencil_ref);

        for shader in self.shaders.iter().flatten() {
            shader.read().bind(device);
        }
    }

    /// Unbind shaders (nulling their slots) and the render target
    pub fn unbind(&self, device: &mut dyn RenderDevice) {
        for shader in self.shaders.iter().rev().flatten() {
            shader.read().unbind(device);
        }
        if let Some(target) = &self.render_target {
            target.read().unbind(device);
        }
    }
}

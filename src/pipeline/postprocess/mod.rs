//! Post-processing chain
//!
//! Components run in order over the lit colour buffer, each receiving the
//! previous component's output. An inactive component returns its input
//! unchanged, so any combination can be toggled at runtime.

mod jitter;
mod motion_blur;
mod noise;
mod temporal_aa;

pub use jitter::*;
pub use motion_blur::*;
pub use noise::*;
pub use temporal_aa::*;

use std::any::Any;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::frame::FrameConstants;
use crate::pipeline::geometry::VolumeGeometry;
use crate::pipeline::pipeline_state::PipelineState;
use crate::resources::{AttachmentPoint, ParameterIndex, RenderTarget, ShaderLibrary, SharedRenderTarget, SharedShader};

/// Frame resources shared by every post-process component
pub struct PostProcessContext<'a> {
    pub frame: &'a mut FrameConstants,
    pub geometry: &'a VolumeGeometry,
    pub noise: &'a NoiseGenerator,
    pub depth: Option<TextureHandle>,
    pub velocity: Option<TextureHandle>,
    pub width: u32,
    pub height: u32,
}

pub trait PostProcessComponent: Any {
    fn name(&self) -> &'static str;

    fn is_active(&self) -> bool;

    /// Toggle the component; becoming active triggers [`Self::on_activated`]
    fn set_active(&mut self, active: bool);

    /// Reset temporal state when the component is (re)activated
    fn on_activated(&mut self) {}

    /// Resolve shaders and cache parameter indices; returns false if the
    /// component cannot run
    fn load_shaders(&mut self, library: &dyn ShaderLibrary) -> bool;

    /// Process `input`, returning the texture holding the result. Inactive
    /// components return `input` itself.
    fn execute(
        &mut self,
        device: &mut dyn RenderDevice,
        ctx: &mut PostProcessContext<'_>,
        input: TextureHandle,
    ) -> TextureHandle;

    fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<()>;

    fn release(&mut self, device: &mut dyn RenderDevice);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Ordered list of post-process components
#[derive(Default)]
pub struct PostProcessChain {
    components: Vec<Box<dyn PostProcessComponent>>,
}

impl PostProcessChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, component: impl PostProcessComponent) {
        log::debug!("Added post-process component '{}'", component.name());
        self.components.push(Box::new(component));
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    /// Case-insensitive lookup by component name
    pub fn component(&self, name: &str) -> Option<&dyn PostProcessComponent> {
        self.components
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .map(|c| c.as_ref())
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut (dyn PostProcessComponent + 'static)> {
        self.components
            .iter_mut()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .map(|c| c.as_mut())
    }

    /// First component of concrete type `T`
    pub fn get<T: PostProcessComponent>(&self) -> Option<&T> {
        self.components.iter().find_map(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: PostProcessComponent>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|c| c.as_any_mut().downcast_mut::<T>())
    }

    /// Activate or deactivate a component by name; returns false if no such component exists
    pub fn set_active(&mut self, name: &str, active: bool) -> bool {
        match self.component_mut(name) {
            Some(component) => {
                component.set_active(active);
                log::info!(
                    "Post-process component '{}' {}",
                    component.name(),
                    if active { "activated" } else { "deactivated" }
                );
                true
            }
            None => false,
        }
    }

    pub fn load_shaders(&mut self, library: &dyn ShaderLibrary) -> usize {
        self.components
            .iter_mut()
            .map(|c| c.load_shaders(library))
            .filter(|loaded| *loaded)
            .count()
    }

    /// Run every component in order and return the final texture
    pub fn execute(
        &mut self,
        device: &mut dyn RenderDevice,
        ctx: &mut PostProcessContext<'_>,
        input: TextureHandle,
    ) -> TextureHandle {
        self.components
            .iter_mut()
            .fold(input, |texture, component| component.execute(device, ctx, texture))
    }

    pub fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> BackendResult<()> {
        for component in &mut self.components {
            component.resize(device, width, height)?;
        }
        Ok(())
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        for component in &mut self.components {
            component.release(device);
        }
    }
}

/// Pipeline drawing a screen quad with no depth test and no blending
pub(crate) fn fullscreen_pipeline(
    name: &str,
    vertex: SharedShader,
    pixel: SharedShader,
    target: Option<SharedRenderTarget>,
) -> PipelineState {
    let mut pipeline = PipelineState::new(name);
    pipeline.set_shader(ShaderStage::Vertex, Some(vertex));
    pipeline.set_shader(ShaderStage::Pixel, Some(pixel));
    pipeline.set_rasterizer_state(RasterizerState::default().with_cull_mode(CullMode::None));
    pipeline.set_depth_stencil_state(DepthStencilState::disabled());
    pipeline.set_blend_state(None);
    pipeline.set_render_target(target);
    pipeline
}

/// Colour texture plus a render target with it attached at Color0
pub(crate) fn create_colour_target(
    device: &mut dyn RenderDevice,
    label: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> BackendResult<(TextureHandle, SharedRenderTarget)> {
    let texture = device.create_texture(&TextureDescriptor::render_target(label, width, height, format))?;
    let mut target = RenderTarget::new(label);
    if let Err(e) = target.attach(device, AttachmentPoint::Color0, Some(texture)) {
        device.destroy_texture(texture);
        return Err(e);
    }
    Ok((texture, target.shared()))
}

/// Detach and destroy a texture created by [`create_colour_target`]
pub(crate) fn release_colour_target(
    device: &mut dyn RenderDevice,
    texture: TextureHandle,
    target: &SharedRenderTarget,
) {
    let _ = target.write().attach(device, AttachmentPoint::Color0, None);
    device.destroy_texture(texture);
}

/// Set a texture parameter if it was resolved
pub(crate) fn set_texture(shader: &SharedShader, index: Option<ParameterIndex>, texture: Option<TextureHandle>) {
    if let Some(index) = index {
        shader.write().set_texture(index, texture);
    }
}

/// Set a constant buffer parameter if it was resolved
pub(crate) fn set_constant_buffer(shader: &SharedShader, index: Option<ParameterIndex>, buffer: BufferHandle) {
    if let Some(index) = index {
        shader.write().set_constant_buffer(index, buffer);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::backend::RecordingDevice;
    use crate::pipeline::shaders::install_default_shaders;
    use crate::resources::ShaderCache;
    use crate::scene::Camera;

    pub struct PostFixture {
        pub device: RecordingDevice,
        pub cache: ShaderCache,
        pub frame: FrameConstants,
        pub geometry: VolumeGeometry,
        pub noise: NoiseGenerator,
        pub colour: TextureHandle,
        pub depth: TextureHandle,
        pub velocity: TextureHandle,
        pub width: u32,
        pub height: u32,
    }

    impl PostFixture {
        pub fn new(width: u32, height: u32) -> Self {
            let mut device = RecordingDevice::new();
            let mut cache = ShaderCache::new();
            install_default_shaders(&mut device, &mut cache);
            let mut frame = FrameConstants::new(&mut device).unwrap();
            frame.update(&Camera::default(), width, height);
            let geometry = VolumeGeometry::new(&mut device).unwrap();
            let noise = NoiseGenerator::new(&mut device, NoiseMethod::White, 1, 8).unwrap();
            let colour = device
                .create_texture(&TextureDescriptor::render_target(
                    "colour",
                    width,
                    height,
                    crate::pipeline::lighting::COLOUR_FORMAT,
                ))
                .unwrap();
            let depth = device
                .create_texture(&TextureDescriptor::render_target(
                    "depth",
                    width,
                    height,
                    TextureFormat::Depth24PlusStencil8,
                ))
                .unwrap();
            let velocity = device
                .create_texture(&TextureDescriptor::render_target(
                    "velocity",
                    width,
                    height,
                    TextureFormat::Rg16Float,
                ))
                .unwrap();
            Self {
                device,
                cache,
                frame,
                geometry,
                noise,
                colour,
                depth,
                velocity,
                width,
                height,
            }
        }

        /// Split into the device and a context borrowing the remaining fields
        pub fn split(&mut self) -> (&mut RecordingDevice, PostProcessContext<'_>) {
            (
                &mut self.device,
                PostProcessContext {
                    frame: &mut self.frame,
                    geometry: &self.geometry,
                    noise: &self.noise,
                    depth: Some(self.depth),
                    velocity: Some(self.velocity),
                    width: self.width,
                    height: self.height,
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::PostFixture;
    use super::*;

    #[test]
    fn chain_with_inactive_components_passes_input_through() {
        let mut f = PostFixture::new(32, 32);
        let mut chain = PostProcessChain::new();
        let taa = TemporalAa::new(&mut f.device, 32, 32, TemporalAaConfig::default()).unwrap();
        let blur = MotionBlur::new(&mut f.device, 32, 32, MotionBlurConfig::default()).unwrap();
        chain.add(taa);
        chain.add(blur);
        assert_eq!(chain.load_shaders(&f.cache), 2);

        chain.set_active("temporalaa", false);
        chain.set_active("MOTIONBLUR", false);

        let input = f.colour;
        let (device, mut ctx) = f.split();
        device.clear_commands();
        let output = chain.execute(device, &mut ctx, input);
        assert_eq!(output, input);
        assert_eq!(device.draw_count(), 0);
    }

    #[test]
    fn chain_feeds_each_output_to_the_next_component() {
        let mut f = PostFixture::new(32, 32);
        let mut chain = PostProcessChain::new();
        chain.add(TemporalAa::new(&mut f.device, 32, 32, TemporalAaConfig::default()).unwrap());
        chain.add(MotionBlur::new(&mut f.device, 32, 32, MotionBlurConfig::default()).unwrap());
        chain.load_shaders(&f.cache);

        let input = f.colour;
        let (device, mut ctx) = f.split();
        let output = chain.execute(device, &mut ctx, input);

        let blur_output = chain.get::<MotionBlur>().map(|b| b.output_texture());
        assert_eq!(Some(output), blur_output);
        assert_ne!(output, input);
    }

    #[test]
    fn components_are_found_by_name_and_type() {
        let mut f = PostFixture::new(16, 16);
        let mut chain = PostProcessChain::new();
        chain.add(MotionBlur::new(&mut f.device, 16, 16, MotionBlurConfig::default()).unwrap());

        assert!(chain.component("motionblur").is_some());
        assert!(chain.component("bloom").is_none());
        assert!(!chain.set_active("bloom", true));
        assert!(chain.get::<TemporalAa>().is_none());
        assert!(chain.get_mut::<MotionBlur>().is_some());
        assert_eq!(chain.names(), vec!["MotionBlur"]);
    }
}

//! Deferred rendering pipeline
//!
//! This module implements the per-frame deferred sequence:
//! 1. Geometry pass - Drains the render queue into the G-buffer
//! 2. Lighting pass - Stencil-masked light volumes and fullscreen directional lights
//!    accumulate into the primary colour target
//! 3. Post-processing - Temporal anti-aliasing and tiled motion blur

pub mod debug_view;
pub mod frame;
pub mod gbuffer;
pub mod geometry;
pub mod lighting;
pub mod pipeline_state;
pub mod postprocess;
pub mod shaders;
pub mod shadow;

pub use debug_view::{DebugSources, DebugView, DebugViewRenderer, DebugViewSet, MAX_DEBUG_VIEWS};
pub use frame::{FrameBufferState, FrameConstants, FrameData};
pub use gbuffer::{GBuffer, GBufferAttachment};
pub use geometry::{VolumeGeometry, VolumeShape};
pub use lighting::{DeferredLightingEngine, LightPassState, LightingStats};
pub use pipeline_state::PipelineState;
pub use postprocess::{
    MotionBlur, MotionBlurConfig, NoiseGenerator, NoiseMethod, PostProcessChain, PostProcessComponent,
    PostProcessContext, TemporalAa, TemporalAaConfig,
};
pub use shaders::{install_default_shaders, SharedShaderResources};
pub use shadow::ShadowMapper;

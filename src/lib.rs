//! Deferred Engine - A deferred rendering core with instanced render-queue batching
//!
//! The engine draws through an immediate-context [`backend::RenderDevice`]:
//! - **RecordingDevice**: headless device recording every command (tests, tooling)
//!
//! # Features
//! - Render queue bucketing submissions by (technique, model, material) for instanced draws
//! - Back-to-front ordering for alpha-blended techniques
//! - Frustum culling of environments by recursive binary subdivision
//! - Stencil-masked deferred lighting for point, spot and directional lights, with shadow maps
//! - Post-processing chain: temporal anti-aliasing and tiled motion blur
//! - Console command handling for render debug toggles
//! - Light sources extracted from a Bevy ECS world

pub mod backend;
pub mod console;
pub mod engine;
pub mod pipeline;
pub mod render_queue;
pub mod resources;
pub mod scene;

// Re-export Bevy ECS prelude for users
pub use bevy_ecs::prelude::*;

pub use console::{CommandResult, ConsoleCommand, SceneQuery};
pub use engine::{EngineStats, FrameScene, NodeBounds, RenderEngine, RenderFlag, RenderStage};

use thiserror::Error;

use crate::backend::BackendError;
use crate::pipeline::{MotionBlurConfig, NoiseMethod, TemporalAaConfig};
use crate::render_queue::{RenderQueueOptimiserConfig, DEFAULT_INSTANCED_RENDER_LIMIT};
use crate::scene::{DEFAULT_ELEMENT_SCALE, LIGHT_RENDER_LIMIT};

/// Errors raised while setting up or resizing the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Render target '{0}' is incomplete")]
    IncompleteRenderTarget(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Initialisation failed: {0}")]
    Initialisation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Configuration for initializing the render engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial screen width
    pub width: u32,
    /// Initial screen height
    pub height: u32,
    /// Maximum number of instances per instanced draw call
    pub instanced_render_limit: usize,
    /// World-space size of one environment element
    pub element_scale: f32,
    /// Maximum number of lights rendered per frame
    pub light_render_limit: usize,
    pub noise_method: NoiseMethod,
    pub noise_seed: u32,
    pub noise_size: u32,
    pub temporal_aa: TemporalAaConfig,
    pub motion_blur: MotionBlurConfig,
    pub optimiser: RenderQueueOptimiserConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            instanced_render_limit: DEFAULT_INSTANCED_RENDER_LIMIT,
            element_scale: DEFAULT_ELEMENT_SCALE,
            light_render_limit: LIGHT_RENDER_LIMIT,
            noise_method: NoiseMethod::default(),
            noise_seed: pipeline::postprocess::DEFAULT_NOISE_SEED,
            noise_size: pipeline::postprocess::DEFAULT_NOISE_SIZE,
            temporal_aa: TemporalAaConfig::default(),
            motion_blur: MotionBlurConfig::default(),
            optimiser: RenderQueueOptimiserConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "screen size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.instanced_render_limit == 0 {
            return Err(EngineError::InvalidConfiguration(
                "instanced render limit must be at least 1".into(),
            ));
        }
        if self.element_scale.is_nan() || self.element_scale <= 0.0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "element scale {} must be positive",
                self.element_scale
            )));
        }
        if self.light_render_limit > LIGHT_RENDER_LIMIT {
            return Err(EngineError::InvalidConfiguration(format!(
                "light render limit {} exceeds the light buffer capacity {}",
                self.light_render_limit, LIGHT_RENDER_LIMIT
            )));
        }
        Ok(())
    }
}

/// Install the logger. Safe to call more than once; `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.instanced_render_limit, 1000);
        assert_eq!(config.element_scale, 10.0);
        assert_eq!(config.light_render_limit, 512);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero = EngineConfig {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(EngineError::InvalidConfiguration(_))));

        let lights = EngineConfig {
            light_render_limit: LIGHT_RENDER_LIMIT + 1,
            ..Default::default()
        };
        assert!(lights.validate().is_err());
    }

    #[test]
    fn backend_errors_convert() {
        let error: EngineError = BackendError::InvalidHandle("texture 7".into()).into();
        assert!(matches!(error, EngineError::Backend(_)));
    }

    #[test]
    fn logging_can_be_initialised_twice() {
        init_logging();
        init_logging();
    }
}

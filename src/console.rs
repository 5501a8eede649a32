//! Console command handling for render debug toggles
//!
//! Commands arrive pre-tokenised. The engine answers the ones it recognises with
//! a [`CommandResult`] and declines everything else with `None` so the caller can
//! route the command elsewhere.

use crate::backend::traits::RenderDevice;
use crate::engine::{FrameScene, RenderEngine, RenderFlag, RenderStage};
use crate::pipeline::debug_view::DebugView;
use crate::pipeline::postprocess::{MotionBlur, NoiseMethod, TemporalAa};

/// A tokenised console command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsoleCommand {
    pub command: String,
    pub params: Vec<String>,
}

impl ConsoleCommand {
    pub fn new(command: &str, params: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Split a whitespace-separated command line; `None` for a blank line
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next()?.to_string();
        Some(Self {
            command,
            params: tokens.map(str::to_string).collect(),
        })
    }

    /// Parameter at `index`, or an empty string when absent
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map_or("", String::as_str)
    }

    fn param_is_set(&self, index: usize) -> bool {
        self.param(index) == "1"
    }
}

/// Outcome reported back to the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Scene facts some commands validate against
pub trait SceneQuery {
    fn has_spatial_tree(&self) -> bool;
    fn has_environment(&self, code: &str) -> bool;
}

impl SceneQuery for FrameScene<'_> {
    fn has_spatial_tree(&self) -> bool {
        self.spatial_tree.is_some()
    }

    fn has_environment(&self, code: &str) -> bool {
        self.environments.iter().any(|e| e.code() == code)
    }
}

fn enabling(enabled: bool) -> &'static str {
    if enabled {
        "Enabling"
    } else {
        "Disabling"
    }
}

impl RenderEngine {
    /// Handle a console command. Returns `None` if the command is not a render command.
    pub fn process_console_command(
        &mut self,
        device: &mut dyn RenderDevice,
        scene: &dyn SceneQuery,
        command: &ConsoleCommand,
    ) -> Option<CommandResult> {
        let result = match command.command.as_str() {
            "render_tree" => {
                if !scene.has_spatial_tree() {
                    return Some(CommandResult::failure("No tree to render"));
                }
                let enabled = command.param_is_set(0);
                self.set_flag(RenderFlag::RenderTree, enabled);
                CommandResult::success(format!(
                    "{} render of spatial partitioning tree",
                    enabling(enabled)
                ))
            }
            "hull_render" => {
                let disabled = !command.param_is_set(0);
                self.set_flag(RenderFlag::DisableHullRendering, disabled);
                CommandResult::success(format!("{} rendering of ship hulls", enabling(!disabled)))
            }
            "render_obb" => {
                let enabled = command.param_is_set(0);
                self.set_flag(RenderFlag::RenderObb, enabled);
                CommandResult::success(format!("{} rendering of object OBBs", enabling(enabled)))
            }
            "render_terrainboxes" => self.render_terrain_boxes(scene, command),
            "render_stage" => self.render_stage(command),
            "postprocess" => {
                let name = command.param(0);
                let active = command.param_is_set(1);
                if self.post_process_mut().set_active(name, active) {
                    CommandResult::success(format!(
                        "{} post-process component \"{}\"",
                        enabling(active),
                        name
                    ))
                } else {
                    CommandResult::failure(format!("Unknown post-process component \"{}\"", name))
                }
            }
            "noise_method" => match NoiseMethod::from_name(command.param(0)) {
                Some(method) => match self.set_noise_method(device, method) {
                    Ok(()) => CommandResult::success(format!("Noise method set to {}", method.name())),
                    Err(e) => CommandResult::failure(format!("Failed to regenerate noise: {}", e)),
                },
                None => CommandResult::failure(format!(
                    "Unknown noise method \"{}\" (expected white, halton or ign)",
                    command.param(0)
                )),
            },
            "debug_view" => self.debug_view(command),
            "taa_feedback" => self.taa_feedback(command),
            "motionblur_tilescale" => self.motion_blur_tile_scale(device, command),
            _ => return None,
        };

        log::debug!("Console command {:?}: {}", command.command, result.message);
        Some(result)
    }

    fn render_terrain_boxes(&mut self, scene: &dyn SceneQuery, command: &ConsoleCommand) -> CommandResult {
        if !command.param_is_set(1) {
            self.set_flag(RenderFlag::RenderTerrainBoxes, false);
            self.set_debug_terrain_environment(None);
            return CommandResult::success("Disabling render of environment collision volumes");
        }

        let code = command.param(0);
        if !scene.has_environment(code) {
            return CommandResult::failure(format!("Invalid object \"{}\" specified", code));
        }
        self.set_flag(RenderFlag::RenderTerrainBoxes, true);
        self.set_debug_terrain_environment(Some(code.to_string()));
        CommandResult::success("Enabling render of environment object collision volumes")
    }

    fn render_stage(&mut self, command: &ConsoleCommand) -> CommandResult {
        let name = command.param(0);
        let Some(stage) = RenderStage::from_name(name) else {
            return CommandResult::failure(format!("Unknown render stage \"{}\"", name));
        };
        let active = command.param_is_set(1);
        self.set_stage_active(stage, active);
        CommandResult::success(format!("{} render stage \"{}\"", enabling(active), name))
    }

    fn debug_view(&mut self, command: &ConsoleCommand) -> CommandResult {
        let Ok(index) = command.param(0).parse::<usize>() else {
            return CommandResult::failure(format!("Invalid debug view index \"{}\"", command.param(0)));
        };
        let Some(view) = DebugView::from_name(command.param(1)) else {
            return CommandResult::failure(format!("Unknown debug view \"{}\"", command.param(1)));
        };
        if !self.debug_views_mut().views_mut().set(index, view) {
            return CommandResult::failure(format!("Debug view index {} is out of range", index));
        }
        CommandResult::success(format!("Debug view {} set to {}", index, view.name()))
    }

    fn taa_feedback(&mut self, command: &ConsoleCommand) -> CommandResult {
        let (Ok(min), Ok(max)) = (command.param(0).parse::<f32>(), command.param(1).parse::<f32>()) else {
            return CommandResult::failure("Expected two feedback values: taa_feedback <min> <max>");
        };
        let Some(taa) = self.post_process_mut().get_mut::<TemporalAa>() else {
            return CommandResult::failure("Temporal anti-aliasing is not available");
        };
        taa.set_feedback(min, max);
        let (min, max) = taa.feedback();
        CommandResult::success(format!("TAA feedback set to [{}, {}]", min, max))
    }

    fn motion_blur_tile_scale(&mut self, device: &mut dyn RenderDevice, command: &ConsoleCommand) -> CommandResult {
        let Ok(scale) = command.param(0).parse::<u32>() else {
            return CommandResult::failure(format!("Invalid tile scale \"{}\"", command.param(0)));
        };
        let Some(blur) = self.post_process_mut().get_mut::<MotionBlur>() else {
            return CommandResult::failure("Motion blur is not available");
        };
        match blur.set_tile_scale(device, scale) {
            Ok(()) => CommandResult::success(format!("Motion blur tile scale set to {}", blur.tile_scale())),
            Err(e) => CommandResult::failure(format!("Failed to resize motion blur tiles: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;
    use crate::pipeline::shaders::install_default_shaders;
    use crate::resources::ShaderCache;
    use crate::EngineConfig;

    struct TestScene {
        tree: bool,
        environments: Vec<&'static str>,
    }

    impl SceneQuery for TestScene {
        fn has_spatial_tree(&self) -> bool {
            self.tree
        }

        fn has_environment(&self, code: &str) -> bool {
            self.environments.contains(&code)
        }
    }

    fn setup() -> (RecordingDevice, RenderEngine, TestScene) {
        let mut device = RecordingDevice::new();
        let mut cache = ShaderCache::new();
        install_default_shaders(&mut device, &mut cache);
        let config = EngineConfig {
            width: 64,
            height: 32,
            ..Default::default()
        };
        let engine = RenderEngine::new(&mut device, &cache, config).unwrap();
        let scene = TestScene {
            tree: true,
            environments: vec!["ship"],
        };
        (device, engine, scene)
    }

    fn run(
        device: &mut RecordingDevice,
        engine: &mut RenderEngine,
        scene: &TestScene,
        line: &str,
    ) -> Option<CommandResult> {
        let command = ConsoleCommand::parse(line).unwrap();
        engine.process_console_command(device, scene, &command)
    }

    #[test]
    fn parse_splits_on_whitespace() {
        let command = ConsoleCommand::parse("  render_stage   effects 0 ").unwrap();
        assert_eq!(command, ConsoleCommand::new("render_stage", &["effects", "0"]));
        assert_eq!(command.param(5), "");
        assert!(ConsoleCommand::parse("   ").is_none());
    }

    #[test]
    fn unknown_commands_are_declined() {
        let (mut device, mut engine, scene) = setup();
        assert!(run(&mut device, &mut engine, &scene, "spawn_ship 1").is_none());
    }

    #[test]
    fn render_tree_requires_a_tree() {
        let (mut device, mut engine, mut scene) = setup();
        let result = run(&mut device, &mut engine, &scene, "render_tree 1").unwrap();
        assert_eq!(result, CommandResult::success("Enabling render of spatial partitioning tree"));
        assert!(engine.flag(RenderFlag::RenderTree));

        scene.tree = false;
        let result = run(&mut device, &mut engine, &scene, "render_tree 0").unwrap();
        assert_eq!(result, CommandResult::failure("No tree to render"));
        assert!(engine.flag(RenderFlag::RenderTree));
    }

    #[test]
    fn hull_render_inverts_the_flag() {
        let (mut device, mut engine, scene) = setup();
        let result = run(&mut device, &mut engine, &scene, "hull_render 0").unwrap();
        assert_eq!(result.message, "Disabling rendering of ship hulls");
        assert!(engine.flag(RenderFlag::DisableHullRendering));

        let result = run(&mut device, &mut engine, &scene, "hull_render 1").unwrap();
        assert_eq!(result.message, "Enabling rendering of ship hulls");
        assert!(!engine.flag(RenderFlag::DisableHullRendering));
    }

    #[test]
    fn render_obb_toggles() {
        let (mut device, mut engine, scene) = setup();
        let result = run(&mut device, &mut engine, &scene, "render_obb 1").unwrap();
        assert_eq!(result.message, "Enabling rendering of object OBBs");
        assert!(engine.flag(RenderFlag::RenderObb));
    }

    #[test]
    fn terrain_boxes_validate_the_environment() {
        let (mut device, mut engine, scene) = setup();
        let result = run(&mut device, &mut engine, &scene, "render_terrainboxes wreck 1").unwrap();
        assert_eq!(result, CommandResult::failure("Invalid object \"wreck\" specified"));
        assert!(!engine.flag(RenderFlag::RenderTerrainBoxes));

        let result = run(&mut device, &mut engine, &scene, "render_terrainboxes ship 1").unwrap();
        assert!(result.success);
        assert!(engine.flag(RenderFlag::RenderTerrainBoxes));
        assert_eq!(engine.debug_terrain_environment(), Some("ship"));

        // Disabling never needs a valid environment
        let result = run(&mut device, &mut engine, &scene, "render_terrainboxes wreck 0").unwrap();
        assert_eq!(result.message, "Disabling render of environment collision volumes");
        assert_eq!(engine.debug_terrain_environment(), None);
    }

    #[test]
    fn render_stage_all_toggles_every_stage() {
        let (mut device, mut engine, scene) = setup();
        assert!(run(&mut device, &mut engine, &scene, "render_stage ALL 0").unwrap().success);
        assert_eq!(engine.stages(), RenderStage::NONE);

        run(&mut device, &mut engine, &scene, "render_stage effects 1").unwrap();
        assert_eq!(engine.stages(), RenderStage::EFFECTS);

        let result = run(&mut device, &mut engine, &scene, "render_stage lasers 1").unwrap();
        assert!(!result.success);
    }

    #[test]
    fn postprocess_toggles_components_by_name() {
        let (mut device, mut engine, scene) = setup();
        assert!(run(&mut device, &mut engine, &scene, "postprocess motionblur 0").unwrap().success);
        assert!(!engine.post_process().component("MotionBlur").unwrap().is_active());

        let result = run(&mut device, &mut engine, &scene, "postprocess bloom 1").unwrap();
        assert!(!result.success);
    }

    #[test]
    fn noise_method_regenerates_noise() {
        let (mut device, mut engine, scene) = setup();
        let result = run(&mut device, &mut engine, &scene, "noise_method IGN").unwrap();
        assert_eq!(result.message, "Noise method set to ign");
        assert_eq!(engine.noise().method(), NoiseMethod::InterleavedGradient);

        assert!(!run(&mut device, &mut engine, &scene, "noise_method blue").unwrap().success);
    }

    #[test]
    fn debug_view_assigns_cells() {
        let (mut device, mut engine, scene) = setup();
        assert!(run(&mut device, &mut engine, &scene, "debug_view 2 normal").unwrap().success);
        assert_eq!(engine.debug_views().views().get(2), DebugView::GBufferNormal);
        assert_eq!(engine.debug_views().views().active_count(), 3);

        assert!(!run(&mut device, &mut engine, &scene, "debug_view 99 normal").unwrap().success);
        assert!(!run(&mut device, &mut engine, &scene, "debug_view x normal").unwrap().success);
        assert!(!run(&mut device, &mut engine, &scene, "debug_view 0 sparkle").unwrap().success);
    }

    #[test]
    fn taa_feedback_is_clamped() {
        let (mut device, mut engine, scene) = setup();
        let result = run(&mut device, &mut engine, &scene, "taa_feedback 0.5 1.5").unwrap();
        assert_eq!(result.message, "TAA feedback set to [0.5, 1]");

        assert!(!run(&mut device, &mut engine, &scene, "taa_feedback 0.5").unwrap().success);
    }

    #[test]
    fn motion_blur_tile_scale_recreates_tiles() {
        let (mut device, mut engine, scene) = setup();
        let result = run(&mut device, &mut engine, &scene, "motionblur_tilescale 8").unwrap();
        assert!(result.success);
        let blur = engine.post_process().get::<MotionBlur>().unwrap();
        assert_eq!(blur.tile_scale(), 8);
        assert_eq!(blur.tiled_size(), (8, 4));

        assert!(!run(&mut device, &mut engine, &scene, "motionblur_tilescale -1").unwrap().success);
    }

    #[test]
    fn frame_scene_answers_queries() {
        let scene = FrameScene::default();
        assert!(!scene.has_spatial_tree());
        assert!(!scene.has_environment("ship"));
    }
}

//! Built-in WGSL shaders and their parameter tables
//!
//! Binding convention: constant buffers live in group 0, textures in group 1 and
//! samplers in group 2, with the binding index equal to the engine slot.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_queue::{RenderTechnique, TechniqueShaders};
use crate::resources::{ParameterDesc, ShaderCache, ShaderLibrary, MATERIAL_CONSTANT_BUFFER_SLOT};

// Constant buffer slots
pub const FRAME_DATA_SLOT: u32 = 0;
pub const LIGHT_INDEX_SLOT: u32 = 1;
pub const LIGHT_BUFFER_SLOT: u32 = 3;
pub const SHADOW_DATA_SLOT: u32 = 4;
pub const POST_PROCESS_DATA_SLOT: u32 = 5;
pub const NOISE_DATA_SLOT: u32 = 6;

// Texture slots beyond the GBuffer range (0..=4)
pub const SHADOW_MAP_TEXTURE_SLOT: u32 = 5;

// Sampler slots
pub const POINT_SAMPLER_SLOT: u32 = 0;
pub const LINEAR_SAMPLER_SLOT: u32 = 1;
pub const SHADOW_SAMPLER_SLOT: u32 = 2;

/// Shader names as resolved through a [`ShaderLibrary`]
pub mod names {
    pub const LIGHT_VOLUME_VS: &str = "LightVolume.vs";
    pub const DEFERRED_LIGHTING_PS: &str = "DeferredLighting.ps";
    pub const FULLSCREEN_VS: &str = "Fullscreen.vs";
    pub const SHADOW_MAP_VS: &str = "ShadowMap.vs";
    pub const TEMPORAL_AA_PS: &str = "TemporalAA.ps";
    pub const MOTION_BLUR_TILE_GEN_PS: &str = "MotionBlurTileGen.ps";
    pub const MOTION_BLUR_NEIGHBOURHOOD_PS: &str = "MotionBlurNeighbourhood.ps";
    pub const MOTION_BLUR_GATHER_PS: &str = "MotionBlurGather.ps";
    pub const DEBUG_VIEW_PS: &str = "DebugView.ps";
}

/// Parameter names shared between the tables below and the code that sets them
pub mod params {
    pub const FRAME_DATA: &str = "FrameData";
    pub const MATERIAL_DATA: &str = "MaterialData";
    pub const LIGHT_INDEX_BUFFER: &str = "LightIndexBuffer";
    pub const LIGHT_BUFFER: &str = "LightBuffer";
    pub const SHADOW_DATA: &str = "ShadowData";
    pub const SHADOW_MAP: &str = "ShadowMap";
    pub const POST_PROCESS_DATA: &str = "PostProcessData";
    pub const NOISE_DATA: &str = "NoiseData";
    pub const DIFFUSE_TEXTURE: &str = "DiffuseTexture";
    pub const COLOUR_TEXTURE: &str = "ColourTexture";
    pub const HISTORY_TEXTURE: &str = "HistoryTexture";
    pub const DEPTH_TEXTURE: &str = "DepthTexture";
    pub const VELOCITY_TEXTURE: &str = "VelocityTexture";
    pub const TILE_TEXTURE: &str = "TileTexture";
    pub const NEIGHBOURHOOD_TEXTURE: &str = "NeighbourhoodTexture";
    pub const NOISE_TEXTURE: &str = "NoiseTexture";
    pub const SOURCE_TEXTURE: &str = "SourceTexture";
    pub const SOURCE_DEPTH: &str = "SourceDepth";
    pub const POINT_SAMPLER: &str = "PointSampler";
    pub const LINEAR_SAMPLER: &str = "LinearSampler";
    pub const SHADOW_SAMPLER: &str = "ShadowSampler";
}

/// Instanced geometry vertex shader shared by every render technique
pub const GEOMETRY_VERTEX_SHADER: &str = r#"
struct FrameData {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    screen_dimensions: vec2<f32>,
    jitter: vec2<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameData;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct InstanceInput {
    @location(4) world_0: vec4<f32>,
    @location(5) world_1: vec4<f32>,
    @location(6) world_2: vec4<f32>,
    @location(7) world_3: vec4<f32>,
    @location(8) prev_world_0: vec4<f32>,
    @location(9) prev_world_1: vec4<f32>,
    @location(10) prev_world_2: vec4<f32>,
    @location(11) prev_world_3: vec4<f32>,
    @location(12) params: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal_vs: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) current_clip: vec4<f32>,
    @location(3) previous_clip: vec4<f32>,
    @location(4) params: vec4<f32>,
}

@vertex
fn vs_main(vertex_in: VertexInput, instance_in: InstanceInput) -> VertexOutput {
    let world = mat4x4<f32>(instance_in.world_0, instance_in.world_1, instance_in.world_2, instance_in.world_3);
    let prev_world = mat4x4<f32>(
        instance_in.prev_world_0,
        instance_in.prev_world_1,
        instance_in.prev_world_2,
        instance_in.prev_world_3,
    );
    let view_projection = frame.projection * frame.view;
    let current = view_projection * world * vec4<f32>(vertex_in.position, 1.0);

    var output: VertexOutput;
    output.clip_position = current;
    output.normal_vs = normalize((frame.view * world * vec4<f32>(vertex_in.normal, 0.0)).xyz);
    output.uv = vertex_in.uv;
    output.current_clip = current;
    output.previous_clip = view_projection * prev_world * vec4<f32>(vertex_in.position, 1.0);
    output.params = instance_in.params;
    return output;
}
"#;

/// Writes surface attributes into the GBuffer; Color0 receives ambient and emissive light
pub const GBUFFER_PIXEL_SHADER: &str = r#"
struct MaterialData {
    global_ambient: vec4<f32>,
    ambient_color: vec4<f32>,
    emissive_color: vec4<f32>,
    diffuse_color: vec4<f32>,
    specular_color: vec4<f32>,
    reflectance: vec4<f32>,
    opacity: f32,
    specular_power: f32,
    index_of_refraction: f32,
    specular_scale: f32,
    has_ambient_texture: u32,
    has_emissive_texture: u32,
    has_diffuse_texture: u32,
    has_specular_texture: u32,
    has_specular_power_texture: u32,
    has_normal_texture: u32,
    has_bump_texture: u32,
    has_opacity_texture: u32,
    bump_intensity: f32,
    alpha_threshold: f32,
    padding: vec2<f32>,
}

@group(0) @binding(2) var<uniform> material: MaterialData;
@group(1) @binding(0) var diffuse_texture: texture_2d<f32>;
@group(2) @binding(1) var linear_sampler: sampler;

struct FragmentInput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal_vs: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) current_clip: vec4<f32>,
    @location(3) previous_clip: vec4<f32>,
    @location(4) params: vec4<f32>,
}

struct GBufferOutput {
    @location(0) light_accumulation: vec4<f32>,
    @location(1) diffuse: vec4<f32>,
    @location(2) specular: vec4<f32>,
    @location(3) normal: vec4<f32>,
    @location(4) velocity: vec2<f32>,
}

@fragment
fn fs_main(input: FragmentInput) -> GBufferOutput {
    var diffuse = material.diffuse_color;
    let texel = textureSampleLevel(diffuse_texture, linear_sampler, input.uv, 0.0);
    if material.has_diffuse_texture != 0u {
        diffuse = diffuse * texel;
    }
    // Highlight colour tints the surface; plain instances carry white
    diffuse = vec4<f32>(diffuse.rgb * input.params.rgb, diffuse.a);

    let current = input.current_clip.xy / input.current_clip.w;
    let previous = input.previous_clip.xy / input.previous_clip.w;
    let specular_power = max(material.specular_power, 0.0) / material.specular_scale;

    var output: GBufferOutput;
    output.light_accumulation = vec4<f32>(
        material.global_ambient.rgb * diffuse.rgb + material.emissive_color.rgb,
        1.0,
    );
    output.diffuse = diffuse;
    output.specular = vec4<f32>(material.specular_color.rgb, saturate(specular_power));
    output.normal = vec4<f32>(normalize(input.normal_vs), 0.0);
    output.velocity = (current - previous) * vec2<f32>(0.5, -0.5);
    return output;
}
"#;

/// Forward alpha-blended output; alpha comes from the instance fade parameter
pub const FADE_PIXEL_SHADER: &str = r#"
struct MaterialData {
    global_ambient: vec4<f32>,
    ambient_color: vec4<f32>,
    emissive_color: vec4<f32>,
    diffuse_color: vec4<f32>,
    specular_color: vec4<f32>,
    reflectance: vec4<f32>,
    opacity: f32,
    specular_power: f32,
    index_of_refraction: f32,
    specular_scale: f32,
    has_ambient_texture: u32,
    has_emissive_texture: u32,
    has_diffuse_texture: u32,
    has_specular_texture: u32,
    has_specular_power_texture: u32,
    has_normal_texture: u32,
    has_bump_texture: u32,
    has_opacity_texture: u32,
    bump_intensity: f32,
    alpha_threshold: f32,
    padding: vec2<f32>,
}

@group(0) @binding(2) var<uniform> material: MaterialData;
@group(1) @binding(0) var diffuse_texture: texture_2d<f32>;
@group(2) @binding(1) var linear_sampler: sampler;

struct FragmentInput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal_vs: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(4) params: vec4<f32>,
}

@fragment
fn fs_main(input: FragmentInput) -> @location(0) vec4<f32> {
    var diffuse = material.diffuse_color;
    let texel = textureSampleLevel(diffuse_texture, linear_sampler, input.uv, 0.0);
    if material.has_diffuse_texture != 0u {
        diffuse = diffuse * texel;
    }
    let lit = diffuse.rgb * (material.global_ambient.rgb + vec3<f32>(0.5)) + material.emissive_color.rgb;
    return vec4<f32>(lit, diffuse.a * material.opacity * input.params.w);
}
"#;

/// Forward alpha-blended output tinted by the instance colour
pub const HIGHLIGHT_FADE_PIXEL_SHADER: &str = r#"
struct MaterialData {
    global_ambient: vec4<f32>,
    ambient_color: vec4<f32>,
    emissive_color: vec4<f32>,
    diffuse_color: vec4<f32>,
    specular_color: vec4<f32>,
    reflectance: vec4<f32>,
    opacity: f32,
    specular_power: f32,
    index_of_refraction: f32,
    specular_scale: f32,
    has_ambient_texture: u32,
    has_emissive_texture: u32,
    has_diffuse_texture: u32,
    has_specular_texture: u32,
    has_specular_power_texture: u32,
    has_normal_texture: u32,
    has_bump_texture: u32,
    has_opacity_texture: u32,
    bump_intensity: f32,
    alpha_threshold: f32,
    padding: vec2<f32>,
}

@group(0) @binding(2) var<uniform> material: MaterialData;
@group(1) @binding(0) var diffuse_texture: texture_2d<f32>;
@group(2) @binding(1) var linear_sampler: sampler;

struct FragmentInput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal_vs: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(4) params: vec4<f32>,
}

@fragment
fn fs_main(input: FragmentInput) -> @location(0) vec4<f32> {
    var diffuse = material.diffuse_color;
    let texel = textureSampleLevel(diffuse_texture, linear_sampler, input.uv, 0.0);
    if material.has_diffuse_texture != 0u {
        diffuse = diffuse * texel;
    }
    let rim = 1.0 - abs(normalize(input.normal_vs).z);
    let tinted = mix(diffuse.rgb, input.params.rgb, 0.5 + 0.5 * rim);
    return vec4<f32>(tinted, diffuse.a * input.params.w);
}
"#;

/// Transforms light volume geometry by the single instance transform
pub const LIGHT_VOLUME_VERTEX_SHADER: &str = r#"
struct FrameData {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    screen_dimensions: vec2<f32>,
    jitter: vec2<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameData;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(4) world_0: vec4<f32>,
    @location(5) world_1: vec4<f32>,
    @location(6) world_2: vec4<f32>,
    @location(7) world_3: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    let world = mat4x4<f32>(input.world_0, input.world_1, input.world_2, input.world_3);
    return frame.projection * frame.view * world * vec4<f32>(input.position, 1.0);
}
"#;

/// Screen-space quad; expects the fullscreen frame data
pub const FULLSCREEN_VERTEX_SHADER: &str = r#"
struct FrameData {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    screen_dimensions: vec2<f32>,
    jitter: vec2<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameData;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(4) world_0: vec4<f32>,
    @location(5) world_1: vec4<f32>,
    @location(6) world_2: vec4<f32>,
    @location(7) world_3: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    let world = mat4x4<f32>(input.world_0, input.world_1, input.world_2, input.world_3);
    var output: VertexOutput;
    output.position = frame.projection * frame.view * world * vec4<f32>(input.position, 1.0);
    output.uv = input.uv;
    return output;
}
"#;

/// Shades one light from the GBuffer; the light is selected by the light index buffer
pub const DEFERRED_LIGHTING_PIXEL_SHADER: &str = r#"
struct FrameData {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    screen_dimensions: vec2<f32>,
    jitter: vec2<f32>,
}

struct LightData {
    position_ws: vec4<f32>,
    direction_ws: vec4<f32>,
    position_vs: vec4<f32>,
    direction_vs: vec4<f32>,
    colour: vec4<f32>,
    light_type: u32,
    flags: u32,
    range: f32,
    intensity: f32,
    spot_angle_cos: f32,
    attenuation_constant: f32,
    attenuation_linear: f32,
    attenuation_quadratic: f32,
}

struct LightBuffer {
    lights: array<LightData, 512>,
}

struct LightIndexData {
    light_slot: u32,
    padding_0: u32,
    padding_1: u32,
    padding_2: u32,
}

struct ShadowData {
    view_to_shadow: mat4x4<f32>,
    light_view_projection: mat4x4<f32>,
    // x = depth bias, y = map size, z = enabled
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameData;
@group(0) @binding(1) var<uniform> light_index: LightIndexData;
@group(0) @binding(3) var<uniform> light_buffer: LightBuffer;
@group(0) @binding(4) var<uniform> shadow: ShadowData;

@group(1) @binding(0) var gbuffer_diffuse: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_specular: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(4) var gbuffer_depth: texture_depth_2d;
@group(1) @binding(5) var shadow_map: texture_depth_2d;

@group(2) @binding(2) var shadow_sampler: sampler_comparison;

fn reconstruct_view_position(pixel: vec2<f32>, depth: f32) -> vec3<f32> {
    let uv = pixel / frame.screen_dimensions;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let position = frame.inverse_projection * ndc;
    return position.xyz / position.w;
}

fn distance_attenuation(light: LightData, dist: f32) -> f32 {
    let denominator = light.attenuation_constant
        + light.attenuation_linear * dist
        + light.attenuation_quadratic * dist * dist;
    let falloff = 1.0 - smoothstep(light.range * 0.75, light.range, dist);
    return falloff / max(denominator, 0.0001);
}

fn shadow_factor(position_vs: vec3<f32>) -> f32 {
    if shadow.params.z < 0.5 {
        return 1.0;
    }
    let light_clip = shadow.view_to_shadow * vec4<f32>(position_vs, 1.0);
    let ndc = light_clip.xyz / light_clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) {
        return 1.0;
    }
    return textureSampleCompareLevel(shadow_map, shadow_sampler, uv, ndc.z - shadow.params.x);
}

@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(frag_coord.xy);
    let depth = textureLoad(gbuffer_depth, pixel, 0);
    let diffuse = textureLoad(gbuffer_diffuse, pixel, 0);
    let specular = textureLoad(gbuffer_specular, pixel, 0);
    let normal = normalize(textureLoad(gbuffer_normal, pixel, 0).xyz);
    let light = light_buffer.lights[light_index.light_slot];

    let position = reconstruct_view_position(frag_coord.xy, depth);
    let to_eye = normalize(-position);

    var to_light: vec3<f32>;
    var attenuation: f32 = 1.0;
    if light.light_type == 2u {
        to_light = -normalize(light.direction_vs.xyz);
    } else {
        let offset = light.position_vs.xyz - position;
        let light_distance = length(offset);
        to_light = offset / max(light_distance, 0.0001);
        attenuation = distance_attenuation(light, light_distance);
        if light.light_type == 1u {
            let cos_angle = dot(-to_light, normalize(light.direction_vs.xyz));
            let inner = mix(light.spot_angle_cos, 1.0, 0.1);
            attenuation = attenuation * smoothstep(light.spot_angle_cos, inner, cos_angle);
        }
    }

    let n_dot_l = max(dot(normal, to_light), 0.0);
    let half_vector = normalize(to_light + to_eye);
    let specular_power = max(specular.a * 128.0, 1.0);
    let highlight = pow(max(dot(normal, half_vector), 0.0), specular_power);

    let radiance = light.colour.rgb * light.intensity * attenuation * shadow_factor(position);
    let colour = (diffuse.rgb * n_dot_l + specular.rgb * highlight) * radiance;
    return vec4<f32>(colour, 1.0);
}
"#;

/// Depth-only shadow caster transform into light space
pub const SHADOW_MAP_VERTEX_SHADER: &str = r#"
struct ShadowData {
    view_to_shadow: mat4x4<f32>,
    light_view_projection: mat4x4<f32>,
    params: vec4<f32>,
}

@group(0) @binding(4) var<uniform> shadow: ShadowData;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(4) world_0: vec4<f32>,
    @location(5) world_1: vec4<f32>,
    @location(6) world_2: vec4<f32>,
    @location(7) world_3: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    let world = mat4x4<f32>(input.world_0, input.world_1, input.world_2, input.world_3);
    return shadow.light_view_projection * world * vec4<f32>(input.position, 1.0);
}
"#;

/// Temporal reprojection with neighbourhood clamping
pub const TEMPORAL_AA_PIXEL_SHADER: &str = r#"
struct FrameData {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    screen_dimensions: vec2<f32>,
    jitter: vec2<f32>,
}

struct TemporalAaData {
    jitter: vec2<f32>,
    previous_jitter: vec2<f32>,
    feedback_min: f32,
    feedback_max: f32,
    padding: vec2<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameData;
@group(0) @binding(5) var<uniform> taa: TemporalAaData;

@group(1) @binding(0) var colour_texture: texture_2d<f32>;
@group(1) @binding(1) var history_texture: texture_2d<f32>;
@group(1) @binding(2) var velocity_texture: texture_2d<f32>;

@group(2) @binding(1) var linear_sampler: sampler;

@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(frag_coord.xy);
    let dims = vec2<i32>(textureDimensions(colour_texture));
    let current = textureLoad(colour_texture, pixel, 0);

    var neighbourhood_min = current.rgb;
    var neighbourhood_max = current.rgb;
    for (var y: i32 = -1; y <= 1; y = y + 1) {
        for (var x: i32 = -1; x <= 1; x = x + 1) {
            let coord = clamp(pixel + vec2<i32>(x, y), vec2<i32>(0), dims - vec2<i32>(1));
            let neighbour = textureLoad(colour_texture, coord, 0).rgb;
            neighbourhood_min = min(neighbourhood_min, neighbour);
            neighbourhood_max = max(neighbourhood_max, neighbour);
        }
    }

    let velocity = textureLoad(velocity_texture, pixel, 0).xy;
    let uv = frag_coord.xy / frame.screen_dimensions;
    let history_uv = uv - velocity + (taa.jitter - taa.previous_jitter) * 0.5;
    let history = textureSampleLevel(history_texture, linear_sampler, history_uv, 0.0).rgb;
    let clamped = clamp(history, neighbourhood_min, neighbourhood_max);

    let motion = length(velocity * frame.screen_dimensions);
    let feedback = mix(taa.feedback_max, taa.feedback_min, saturate(motion / 8.0));
    return vec4<f32>(mix(current.rgb, clamped, feedback), current.a);
}
"#;

/// Per-tile dominant velocity, encoded relative to the maximum tap distance
pub const MOTION_BLUR_TILE_GEN_PIXEL_SHADER: &str = r#"
struct MotionBlurData {
    tile_scale: u32,
    sample_count: u32,
    max_tap_distance: f32,
    padding: f32,
}

@group(0) @binding(5) var<uniform> blur: MotionBlurData;
@group(1) @binding(0) var velocity_texture: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let dims = vec2<i32>(textureDimensions(velocity_texture));
    let k = i32(max(blur.tile_scale, 1u));
    let origin = vec2<i32>(frag_coord.xy) * k;

    var largest = vec2<f32>(0.0);
    var largest_length: f32 = 0.0;
    for (var y: i32 = 0; y < k; y = y + 1) {
        for (var x: i32 = 0; x < k; x = x + 1) {
            let coord = min(origin + vec2<i32>(x, y), dims - vec2<i32>(1));
            let velocity = textureLoad(velocity_texture, coord, 0).xy;
            let length_sq = dot(velocity, velocity);
            if length_sq > largest_length {
                largest_length = length_sq;
                largest = velocity;
            }
        }
    }

    let pixels = largest * vec2<f32>(dims);
    let encoded = clamp(pixels / max(blur.max_tap_distance, 1.0), vec2<f32>(-1.0), vec2<f32>(1.0));
    return vec4<f32>(encoded * 0.5 + 0.5, 0.0, 1.0);
}
"#;

/// Dominant velocity over the 3x3 tile neighbourhood
pub const MOTION_BLUR_NEIGHBOURHOOD_PIXEL_SHADER: &str = r#"
@group(1) @binding(0) var tile_texture: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let tile = vec2<i32>(frag_coord.xy);
    let dims = vec2<i32>(textureDimensions(tile_texture));

    var largest = vec2<f32>(0.0);
    var largest_length: f32 = 0.0;
    for (var y: i32 = -1; y <= 1; y = y + 1) {
        for (var x: i32 = -1; x <= 1; x = x + 1) {
            let coord = clamp(tile + vec2<i32>(x, y), vec2<i32>(0), dims - vec2<i32>(1));
            let velocity = textureLoad(tile_texture, coord, 0).xy * 2.0 - 1.0;
            let length_sq = dot(velocity, velocity);
            if length_sq > largest_length {
                largest_length = length_sq;
                largest = velocity;
            }
        }
    }
    return vec4<f32>(largest * 0.5 + 0.5, 0.0, 1.0);
}
"#;

/// Gathers colour along the neighbourhood velocity with noise-jittered taps
pub const MOTION_BLUR_GATHER_PIXEL_SHADER: &str = r#"
struct MotionBlurData {
    tile_scale: u32,
    sample_count: u32,
    max_tap_distance: f32,
    padding: f32,
}

struct NoiseData {
    dimensions: vec2<f32>,
    strength: f32,
    method: u32,
}

@group(0) @binding(5) var<uniform> blur: MotionBlurData;
@group(0) @binding(6) var<uniform> noise_data: NoiseData;

@group(1) @binding(0) var colour_texture: texture_2d<f32>;
@group(1) @binding(1) var depth_texture: texture_depth_2d;
@group(1) @binding(2) var velocity_texture: texture_2d<f32>;
@group(1) @binding(3) var neighbourhood_texture: texture_2d<f32>;
@group(1) @binding(4) var noise_texture: texture_2d<f32>;

@group(2) @binding(1) var linear_sampler: sampler;

@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(frag_coord.xy);
    let dims = vec2<f32>(textureDimensions(colour_texture));
    let uv = frag_coord.xy / dims;
    let centre = textureLoad(colour_texture, pixel, 0);

    let k = i32(max(blur.tile_scale, 1u));
    let tile_dims = vec2<i32>(textureDimensions(neighbourhood_texture));
    let tile = min(pixel / k, tile_dims - vec2<i32>(1));
    let dominant = (textureLoad(neighbourhood_texture, tile, 0).xy * 2.0 - 1.0) * blur.max_tap_distance;
    if dot(dominant, dominant) < 0.25 {
        return centre;
    }

    let noise_dims = vec2<i32>(textureDimensions(noise_texture));
    let noise = (textureLoad(noise_texture, pixel % noise_dims, 0).x - 0.5) * noise_data.strength;
    let centre_depth = textureLoad(depth_texture, pixel, 0);
    let dominant_length = max(length(dominant), 1.0);
    let count = max(blur.sample_count, 1u);

    var total = centre.rgb;
    var weight: f32 = 1.0;
    for (var i: u32 = 0u; i < count; i = i + 1u) {
        let t = mix(-1.0, 1.0, (f32(i) + 0.5 + noise) / f32(count));
        let tap_uv = uv + dominant * t * 0.5 / dims;
        let tap_pixel = clamp(vec2<i32>(tap_uv * dims), vec2<i32>(0), vec2<i32>(dims) - vec2<i32>(1));
        let tap_depth = textureLoad(depth_texture, tap_pixel, 0);
        let tap_speed = length(textureLoad(velocity_texture, tap_pixel, 0).xy * dims);
        // Background taps only contribute when they move themselves
        let tap_weight = select(1.0, saturate(tap_speed / dominant_length), tap_depth > centre_depth);
        total = total + textureSampleLevel(colour_texture, linear_sampler, tap_uv, 0.0).rgb * tap_weight;
        weight = weight + tap_weight;
    }
    return vec4<f32>(total / weight, centre.a);
}
"#;

/// Copies a source texture into a debug grid cell
pub const DEBUG_VIEW_PIXEL_SHADER: &str = r#"
struct DebugViewData {
    cell_origin: vec2<f32>,
    cell_size: vec2<f32>,
    // 0 = colour, 1 = depth, 2 = signed (normals, velocity)
    mode: u32,
    padding_0: u32,
    padding_1: u32,
    padding_2: u32,
}

@group(0) @binding(5) var<uniform> debug_view: DebugViewData;
@group(1) @binding(0) var source_texture: texture_2d<f32>;
@group(1) @binding(1) var source_depth: texture_depth_2d;

@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let uv = saturate((frag_coord.xy - debug_view.cell_origin) / debug_view.cell_size);
    if debug_view.mode == 1u {
        let dims = vec2<f32>(textureDimensions(source_depth));
        let texel = min(vec2<i32>(uv * dims), vec2<i32>(dims) - vec2<i32>(1));
        let depth = textureLoad(source_depth, texel, 0);
        return vec4<f32>(vec3<f32>(pow(depth, 32.0)), 1.0);
    }
    let dims = vec2<f32>(textureDimensions(source_texture));
    let texel = min(vec2<i32>(uv * dims), vec2<i32>(dims) - vec2<i32>(1));
    let value = textureLoad(source_texture, texel, 0);
    if debug_view.mode == 2u {
        return vec4<f32>(value.rgb * 0.5 + 0.5, 1.0);
    }
    return vec4<f32>(value.rgb, 1.0);
}
"#;

/// A shader shipped with the engine
#[derive(Debug, Clone)]
pub struct BuiltinShader {
    pub name: String,
    pub stage: ShaderStage,
    pub source: &'static str,
    pub parameters: Vec<ParameterDesc>,
}

impl BuiltinShader {
    fn new(name: &str, stage: ShaderStage, source: &'static str, parameters: Vec<ParameterDesc>) -> Self {
        Self {
            name: name.to_string(),
            stage,
            source,
            parameters,
        }
    }
}

fn technique_pixel_source(technique: RenderTechnique) -> &'static str {
    match technique {
        RenderTechnique::Light | RenderTechnique::LightHighlight => GBUFFER_PIXEL_SHADER,
        RenderTechnique::LightFade => FADE_PIXEL_SHADER,
        RenderTechnique::LightHighlightFade
        | RenderTechnique::LightFlatHighlightFade
        | RenderTechnique::VolLine => HIGHLIGHT_FADE_PIXEL_SHADER,
    }
}

fn material_parameters() -> Vec<ParameterDesc> {
    vec![
        ParameterDesc::constant_buffer(params::MATERIAL_DATA, MATERIAL_CONSTANT_BUFFER_SLOT),
        ParameterDesc::texture(params::DIFFUSE_TEXTURE, 0),
        ParameterDesc::sampler(params::LINEAR_SAMPLER, LINEAR_SAMPLER_SLOT),
    ]
}

/// Every shader the engine ships, with the parameter table of each
pub fn builtin_shaders() -> Vec<BuiltinShader> {
    let mut shaders = Vec::new();

    for technique in RenderTechnique::ALL {
        shaders.push(BuiltinShader::new(
            &TechniqueShaders::vertex_shader_name(technique),
            ShaderStage::Vertex,
            GEOMETRY_VERTEX_SHADER,
            vec![ParameterDesc::constant_buffer(params::FRAME_DATA, FRAME_DATA_SLOT)],
        ));
        shaders.push(BuiltinShader::new(
            &TechniqueShaders::pixel_shader_name(technique),
            ShaderStage::Pixel,
            technique_pixel_source(technique),
            material_parameters(),
        ));
    }

    shaders.push(BuiltinShader::new(
        names::LIGHT_VOLUME_VS,
        ShaderStage::Vertex,
        LIGHT_VOLUME_VERTEX_SHADER,
        vec![ParameterDesc::constant_buffer(params::FRAME_DATA, FRAME_DATA_SLOT)],
    ));
    shaders.push(BuiltinShader::new(
        names::FULLSCREEN_VS,
        ShaderStage::Vertex,
        FULLSCREEN_VERTEX_SHADER,
        vec![ParameterDesc::constant_buffer(params::FRAME_DATA, FRAME_DATA_SLOT)],
    ));
    shaders.push(BuiltinShader::new(
        names::SHADOW_MAP_VS,
        ShaderStage::Vertex,
        SHADOW_MAP_VERTEX_SHADER,
        vec![ParameterDesc::constant_buffer(params::SHADOW_DATA, SHADOW_DATA_SLOT)],
    ));
    // GBuffer textures are bound directly by the GBuffer, not through parameters
    shaders.push(BuiltinShader::new(
        names::DEFERRED_LIGHTING_PS,
        ShaderStage::Pixel,
        DEFERRED_LIGHTING_PIXEL_SHADER,
        vec![
            ParameterDesc::constant_buffer(params::FRAME_DATA, FRAME_DATA_SLOT),
            ParameterDesc::constant_buffer(params::LIGHT_INDEX_BUFFER, LIGHT_INDEX_SLOT),
            ParameterDesc::constant_buffer(params::LIGHT_BUFFER, LIGHT_BUFFER_SLOT),
            ParameterDesc::constant_buffer(params::SHADOW_DATA, SHADOW_DATA_SLOT),
            ParameterDesc::texture(params::SHADOW_MAP, SHADOW_MAP_TEXTURE_SLOT),
            ParameterDesc::sampler(params::SHADOW_SAMPLER, SHADOW_SAMPLER_SLOT),
        ],
    ));
    shaders.push(BuiltinShader::new(
        names::TEMPORAL_AA_PS,
        ShaderStage::Pixel,
        TEMPORAL_AA_PIXEL_SHADER,
        vec![
            ParameterDesc::constant_buffer(params::FRAME_DATA, FRAME_DATA_SLOT),
            ParameterDesc::constant_buffer(params::POST_PROCESS_DATA, POST_PROCESS_DATA_SLOT),
            ParameterDesc::texture(params::COLOUR_TEXTURE, 0),
            ParameterDesc::texture(params::HISTORY_TEXTURE, 1),
            ParameterDesc::texture(params::VELOCITY_TEXTURE, 2),
            ParameterDesc::sampler(params::LINEAR_SAMPLER, LINEAR_SAMPLER_SLOT),
        ],
    ));
    shaders.push(BuiltinShader::new(
        names::MOTION_BLUR_TILE_GEN_PS,
        ShaderStage::Pixel,
        MOTION_BLUR_TILE_GEN_PIXEL_SHADER,
        vec![
            ParameterDesc::constant_buffer(params::POST_PROCESS_DATA, POST_PROCESS_DATA_SLOT),
            ParameterDesc::texture(params::VELOCITY_TEXTURE, 0),
        ],
    ));
    shaders.push(BuiltinShader::new(
        names::MOTION_BLUR_NEIGHBOURHOOD_PS,
        ShaderStage::Pixel,
        MOTION_BLUR_NEIGHBOURHOOD_PIXEL_SHADER,
        vec![ParameterDesc::texture(params::TILE_TEXTURE, 0)],
    ));
    shaders.push(BuiltinShader::new(
        names::MOTION_BLUR_GATHER_PS,
        ShaderStage::Pixel,
        MOTION_BLUR_GATHER_PIXEL_SHADER,
        vec![
            ParameterDesc::constant_buffer(params::POST_PROCESS_DATA, POST_PROCESS_DATA_SLOT),
            ParameterDesc::constant_buffer(params::NOISE_DATA, NOISE_DATA_SLOT),
            ParameterDesc::texture(params::COLOUR_TEXTURE, 0),
            ParameterDesc::texture(params::DEPTH_TEXTURE, 1),
            ParameterDesc::texture(params::VELOCITY_TEXTURE, 2),
            ParameterDesc::texture(params::NEIGHBOURHOOD_TEXTURE, 3),
            ParameterDesc::texture(params::NOISE_TEXTURE, 4),
            ParameterDesc::sampler(params::LINEAR_SAMPLER, LINEAR_SAMPLER_SLOT),
        ],
    ));
    shaders.push(BuiltinShader::new(
        names::DEBUG_VIEW_PS,
        ShaderStage::Pixel,
        DEBUG_VIEW_PIXEL_SHADER,
        vec![
            ParameterDesc::constant_buffer(params::POST_PROCESS_DATA, POST_PROCESS_DATA_SLOT),
            ParameterDesc::texture(params::SOURCE_TEXTURE, 0),
            ParameterDesc::texture(params::SOURCE_DEPTH, 1),
        ],
    ));

    shaders
}

/// Compile every built-in shader into the cache; returns how many succeeded.
///
/// Failures are logged by the cache and leave the corresponding name unresolved.
pub fn install_default_shaders(device: &mut dyn RenderDevice, cache: &mut ShaderCache) -> usize {
    let shaders = builtin_shaders();
    let total = shaders.len();
    let installed = shaders
        .into_iter()
        .filter(|s| {
            cache
                .compile(device, &s.name, s.stage, s.source, s.parameters.clone())
                .is_ok()
        })
        .count();
    log::info!("Installed {}/{} built-in shaders", installed, total);
    installed
}

/// Resources every shader may declare and which never change after start-up
#[derive(Debug, Clone, Copy)]
pub struct SharedShaderResources {
    pub frame_data: BufferHandle,
    pub point_sampler: SamplerHandle,
    pub linear_sampler: SamplerHandle,
    pub shadow_sampler: SamplerHandle,
}

impl SharedShaderResources {
    pub fn create(device: &mut dyn RenderDevice, frame_data: BufferHandle) -> BackendResult<Self> {
        Ok(Self {
            frame_data,
            point_sampler: device.create_sampler(&SamplerDescriptor::point_clamp())?,
            linear_sampler: device.create_sampler(&SamplerDescriptor::linear_clamp())?,
            shadow_sampler: device.create_sampler(&SamplerDescriptor::shadow_comparison())?,
        })
    }

    /// Set the shared resources on every built-in shader present in the library
    /// that declares the matching parameter; returns the number of parameters set
    pub fn assign(&self, library: &dyn ShaderLibrary) -> usize {
        let mut assigned = 0;
        for builtin in builtin_shaders() {
            let Some(shader) = library.shader(&builtin.name) else {
                continue;
            };
            let mut shader = shader.write();
            if let Some(index) = shader.parameter_index(params::FRAME_DATA) {
                assigned += shader.set_constant_buffer(index, self.frame_data) as usize;
            }
            if let Some(index) = shader.parameter_index(params::POINT_SAMPLER) {
                assigned += shader.set_sampler(index, self.point_sampler) as usize;
            }
            if let Some(index) = shader.parameter_index(params::LINEAR_SAMPLER) {
                assigned += shader.set_sampler(index, self.linear_sampler) as usize;
            }
            if let Some(index) = shader.parameter_index(params::SHADOW_SAMPLER) {
                assigned += shader.set_sampler(index, self.shadow_sampler) as usize;
            }
        }
        assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;
    use crate::resources::ParameterKind;
    use std::collections::HashSet;

    fn validate(name: &str, source: &str) {
        let module = naga::front::wgsl::parse_str(source)
            .unwrap_or_else(|e| panic!("{} failed to parse: {}", name, e.emit_to_string(source)));
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        if let Err(e) = validator.validate(&module) {
            panic!("{} failed validation: {:?}", name, e);
        }
    }

    #[test]
    fn builtin_sources_are_valid_wgsl() {
        let mut seen = HashSet::new();
        for shader in builtin_shaders() {
            if seen.insert(shader.source.as_ptr()) {
                validate(&shader.name, shader.source);
            }
        }
        assert!(seen.len() >= 12);
    }

    #[test]
    fn every_technique_has_both_stages() {
        let shaders = builtin_shaders();
        for technique in RenderTechnique::ALL {
            let vs = TechniqueShaders::vertex_shader_name(technique);
            let ps = TechniqueShaders::pixel_shader_name(technique);
            assert!(shaders.iter().any(|s| s.name == vs && s.stage == ShaderStage::Vertex));
            assert!(shaders.iter().any(|s| s.name == ps && s.stage == ShaderStage::Pixel));
        }
    }

    #[test]
    fn parameter_slots_are_unique_per_kind() {
        for shader in builtin_shaders() {
            let mut slots = HashSet::new();
            for desc in &shader.parameters {
                assert!(
                    slots.insert((desc.kind, desc.slot)),
                    "{} declares {:?} slot {} twice",
                    shader.name,
                    desc.kind,
                    desc.slot
                );
            }
        }
    }

    #[test]
    fn install_and_assign_shared_resources() {
        let mut device = RecordingDevice::new();
        let mut cache = ShaderCache::new();
        let installed = install_default_shaders(&mut device, &mut cache);
        assert_eq!(installed, builtin_shaders().len());

        let frame = device
            .create_buffer(&BufferDescriptor::uniform("frame", 208))
            .unwrap();
        let shared = SharedShaderResources::create(&mut device, frame).unwrap();
        assert!(shared.assign(&cache) > 0);

        let lighting = cache.shader(names::DEFERRED_LIGHTING_PS).unwrap();
        let lighting = lighting.read();
        let index = lighting.parameter_index(params::FRAME_DATA).unwrap();
        assert_eq!(
            lighting.parameter_desc(index).map(|d| d.kind),
            Some(ParameterKind::ConstantBuffer)
        );
        assert!(lighting.parameter_value(index).is_some());
        let sampler = lighting.parameter_index(params::SHADOW_SAMPLER).unwrap();
        assert!(lighting.parameter_value(sampler).is_some());
    }

    #[test]
    fn failed_shader_is_skipped() {
        let mut device = RecordingDevice::new();
        device.fail_shader(names::TEMPORAL_AA_PS);
        let mut cache = ShaderCache::new();
        let installed = install_default_shaders(&mut device, &mut cache);
        assert_eq!(installed, builtin_shaders().len() - 1);
        assert!(cache.shader(names::TEMPORAL_AA_PS).is_none());
    }
}

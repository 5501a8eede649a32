//! Plain-data state passed to a [`RenderDevice`](super::RenderDevice)
//!
//! Only the formats and fixed-function states the engine actually sets are
//! modelled. Stencil and depth comparisons can be evaluated on the CPU, which
//! is how the lighting tests check the two-pass stencil technique.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Pixel formats of the engine's render targets and lookup textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    Rg8Unorm,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rg8Unorm => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rg16Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Every texture is single-mip and usable both as an attachment and as a
/// shader input, so a descriptor only carries its size and format.
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
        }
    }
}

impl TextureDescriptor {
    pub fn render_target(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            format,
        }
    }
}

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u8);

impl BufferUsage {
    pub const VERTEX: Self = Self(1);
    pub const INDEX: Self = Self(1 << 1);
    pub const UNIFORM: Self = Self(1 << 2);
    /// Contents are uploaded from the CPU
    pub const COPY_DST: Self = Self(1 << 3);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Constant buffer rewritten from the CPU every frame
    pub fn uniform(label: &str, size: u64) -> Self {
        Self {
            label: Some(label.to_string()),
            size,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32x2,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32x2 | VertexFormat::Uint32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Whether a stream advances per vertex or per instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStepMode {
    Vertex,
    Instance,
}

#[derive(Debug, Clone)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    /// First shader location not taken by this stream
    pub fn next_location(&self) -> u32 {
        self.attributes.iter().map(|a| a.location + 1).max().unwrap_or(0)
    }
}

/// Model vertex as stored in every model's vertex buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    pub fn layout() -> VertexBufferLayout {
        let formats = [
            VertexFormat::Float32x3,
            VertexFormat::Float32x3,
            VertexFormat::Float32x2,
            VertexFormat::Float32x4,
        ];
        let mut offset = 0;
        let mut attributes = Vec::with_capacity(formats.len());
        for (location, format) in formats.into_iter().enumerate() {
            attributes.push(VertexAttribute {
                location: location as u32,
                format,
                offset,
            });
            offset += format.size();
        }
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Meshes are either solid triangles or debug line lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    LineList,
    TriangleList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    /// `incoming <op> stored`, as the depth-stencil unit evaluates it. For
    /// stencil tests `incoming` is the reference value.
    pub fn passes<T: PartialOrd>(&self, incoming: T, stored: T) -> bool {
        match self {
            CompareFunction::Less => incoming < stored,
            CompareFunction::LessEqual => incoming <= stored,
            CompareFunction::Equal => incoming == stored,
            CompareFunction::Greater => incoming > stored,
            CompareFunction::GreaterEqual => incoming >= stored,
            CompareFunction::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
}

impl StencilOperation {
    pub fn apply(&self, stored: u8, reference: u8) -> u8 {
        match self {
            StencilOperation::Keep => stored,
            StencilOperation::Zero => 0,
            StencilOperation::Replace => reference,
            StencilOperation::IncrementClamp => stored.saturating_add(1),
            StencilOperation::DecrementClamp => stored.saturating_sub(1),
        }
    }
}

/// Stencil test and updates for one polygon facing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilFaceState {
    pub compare: CompareFunction,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
}

impl StencilFaceState {
    /// Always passes and never writes
    pub const IGNORE: Self = Self {
        compare: CompareFunction::Always,
        fail_op: StencilOperation::Keep,
        depth_fail_op: StencilOperation::Keep,
        pass_op: StencilOperation::Keep,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    pub stencil_enabled: bool,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enabled: true,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil_enabled: false,
            front: StencilFaceState::IGNORE,
            back: StencilFaceState::IGNORE,
        }
    }
}

impl DepthStencilState {
    /// Depth-tested but never written, as for overlays and light volumes
    pub fn read_only(compare: CompareFunction) -> Self {
        Self {
            depth_write_enabled: false,
            depth_compare: compare,
            ..Default::default()
        }
    }

    /// Fullscreen passes ignore depth entirely
    pub fn disabled() -> Self {
        Self {
            depth_test_enabled: false,
            depth_write_enabled: false,
            depth_compare: CompareFunction::Always,
            ..Default::default()
        }
    }

    pub fn face(&self, front_facing: bool) -> &StencilFaceState {
        if front_facing {
            &self.front
        } else {
            &self.back
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Counter-clockwise triangles are front facing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizerState {
    pub cull_mode: CullMode,
    /// When disabled, geometry beyond the far plane is clamped instead of clipped
    pub depth_clip_enabled: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            depth_clip_enabled: true,
        }
    }
}

impl RasterizerState {
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_depth_clip(mut self, enabled: bool) -> Self {
        self.depth_clip_enabled = enabled;
        self
    }

    pub fn rasterizes(&self, front_facing: bool) -> bool {
        match self.cull_mode {
            CullMode::None => true,
            CullMode::Front => !front_facing,
            CullMode::Back => front_facing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

impl BlendFactor {
    fn weight(&self, src_alpha: f32) -> f32 {
        match self {
            BlendFactor::Zero => 0.0,
            BlendFactor::One => 1.0,
            BlendFactor::SrcAlpha => src_alpha,
            BlendFactor::OneMinusSrcAlpha => 1.0 - src_alpha,
        }
    }
}

/// `src * src_factor + dst * dst_factor`, with separate factors for alpha.
/// Blending is disabled wherever a state is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

impl BlendState {
    /// Transparent surfaces over the lit image
    pub fn alpha_blending() -> Self {
        Self {
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
        }
    }

    /// Light contributions summed into the accumulation target
    pub fn additive() -> Self {
        Self {
            src_color: BlendFactor::One,
            dst_color: BlendFactor::One,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::One,
        }
    }

    /// Blend one fragment over the stored value
    pub fn apply(&self, src: Vec4, dst: Vec4) -> Vec4 {
        let a = src.w;
        let colour = src.truncate() * self.src_color.weight(a) + dst.truncate() * self.dst_color.weight(a);
        let alpha = src.w * self.src_alpha.weight(a) + dst.w * self.dst_alpha.weight(a);
        colour.extend(alpha)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl ShaderStage {
    pub const COUNT: usize = 2;

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Which aspects of a render target to clear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearFlags(u8);

impl ClearFlags {
    pub const COLOR: Self = Self(1);
    pub const DEPTH: Self = Self(1 << 1);
    pub const STENCIL: Self = Self(1 << 2);
    pub const DEPTH_STENCIL: Self = Self(Self::DEPTH.0 | Self::STENCIL.0);
    pub const ALL: Self = Self(Self::COLOR.0 | Self::DEPTH_STENCIL.0);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for ClearFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: Vec4,
    pub depth: f32,
    pub stencil: u8,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: Vec4::ZERO,
            depth: 1.0,
            stencil: 0,
        }
    }
}

/// Pixel rectangle and depth range rendered into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Whole-target viewport over the full depth range
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Samplers always clamp at the texture edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub filter: FilterMode,
    /// Depth comparison for hardware shadow filtering
    pub compare: Option<CompareFunction>,
}

impl SamplerDescriptor {
    pub fn point_clamp() -> Self {
        Self {
            label: Some("point_clamp".into()),
            filter: FilterMode::Nearest,
            compare: None,
        }
    }

    pub fn linear_clamp() -> Self {
        Self {
            label: Some("linear_clamp".into()),
            filter: FilterMode::Linear,
            compare: None,
        }
    }

    pub fn shadow_comparison() -> Self {
        Self {
            label: Some("shadow_comparison".into()),
            filter: FilterMode::Linear,
            compare: Some(CompareFunction::LessEqual),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_put_the_incoming_value_first() {
        assert!(CompareFunction::Greater.passes(0.8, 0.5));
        assert!(!CompareFunction::Greater.passes(0.5, 0.5));
        assert!(CompareFunction::GreaterEqual.passes(0.5, 0.5));
        assert!(CompareFunction::Equal.passes(1u8, 1u8));
        assert!(CompareFunction::Always.passes(0, 1));
    }

    #[test]
    fn stencil_decrement_saturates_at_zero() {
        assert_eq!(StencilOperation::DecrementClamp.apply(0, 1), 0);
        assert_eq!(StencilOperation::DecrementClamp.apply(1, 1), 0);
        assert_eq!(StencilOperation::IncrementClamp.apply(255, 1), 255);
        assert_eq!(StencilOperation::Replace.apply(7, 1), 1);
        assert_eq!(StencilOperation::Keep.apply(7, 1), 7);
    }

    #[test]
    fn culling_by_facing() {
        let back = RasterizerState::default();
        assert!(back.rasterizes(true));
        assert!(!back.rasterizes(false));

        let front = back.with_cull_mode(CullMode::Front);
        assert!(!front.rasterizes(true));
        assert!(front.rasterizes(false));
    }

    #[test]
    fn additive_blending_accumulates_light() {
        let additive = BlendState::additive();
        let first = additive.apply(Vec4::new(0.25, 0.0, 0.5, 1.0), Vec4::ZERO);
        let second = additive.apply(Vec4::new(0.25, 1.0, 0.0, 1.0), first);
        assert_eq!(second, Vec4::new(0.5, 1.0, 0.5, 2.0));

        let over = BlendState::alpha_blending().apply(Vec4::new(1.0, 1.0, 1.0, 0.25), Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(over.truncate(), Vec3::splat(0.25));
        assert_eq!(over.w, 1.0);
    }

    #[test]
    fn vertex_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.array_stride, std::mem::size_of::<Vertex>() as u64);
        assert_eq!(layout.attributes.last().map(|a| a.offset), Some(32));
        assert_eq!(layout.next_location(), 4);
    }
}

//! Per-instance data uploaded to the instance vertex stream

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::types::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

/// Instance flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceFlags(u32);

impl InstanceFlags {
    pub const NONE: Self = Self(0);
    pub const SHADOW_CASTER: Self = Self(1 << 0);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

impl std::ops::BitOr for InstanceFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

pub type SortKey = u64;

/// Sort key for instances that should be ordered before everything else
pub const SORT_KEY_RENDER_FIRST: SortKey = 0;
/// Sort key for instances that should be ordered after everything else
pub const SORT_KEY_RENDER_LAST: SortKey = SortKey::MAX;

/// Sort key monotone in camera distance; negative and NaN distances sort first
pub fn sort_key_from_distance_sq(distance_sq: f32) -> SortKey {
    if distance_sq.is_nan() || distance_sq <= 0.0 {
        return SORT_KEY_RENDER_FIRST;
    }
    // Non-negative IEEE-754 floats order identically to their bit patterns
    distance_sq.to_bits() as SortKey
}

pub fn sort_key_for_position(position: Vec3, camera_position: Vec3) -> SortKey {
    sort_key_from_distance_sq(position.distance_squared(camera_position))
}

/// One instanced draw record (160 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RenderInstance {
    pub world: Mat4,
    /// Previous-frame world transform, for per-pixel velocity
    pub prev_world: Mat4,
    /// Highlight colour, or fade alpha in `w`
    pub params: Vec4,
    pub light_config: u32,
    pub flags: u32,
    pub sort_key: SortKey,
}

impl RenderInstance {
    pub fn new(world: Mat4) -> Self {
        Self {
            world,
            prev_world: world,
            params: Vec4::ONE,
            light_config: 0,
            flags: 0,
            sort_key: SORT_KEY_RENDER_FIRST,
        }
    }

    pub fn with_prev_world(mut self, prev_world: Mat4) -> Self {
        self.prev_world = prev_world;
        self
    }

    pub fn with_params(mut self, params: Vec4) -> Self {
        self.params = params;
        self
    }

    pub fn with_flags(mut self, flags: InstanceFlags) -> Self {
        self.flags = flags.bits();
        self
    }

    pub fn with_light_config(mut self, light_config: u32) -> Self {
        self.light_config = light_config;
        self
    }

    pub fn with_sort_key(mut self, sort_key: SortKey) -> Self {
        self.sort_key = sort_key;
        self
    }

    pub fn flags(&self) -> InstanceFlags {
        InstanceFlags::from_bits(self.flags)
    }

    pub fn is_shadow_caster(&self) -> bool {
        self.flags().contains(InstanceFlags::SHADOW_CASTER)
    }

    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    /// Instance-rate vertex stream layout, following the model's vertex attributes
    pub fn layout(first_location: u32) -> VertexBufferLayout {
        let mut attributes = Vec::with_capacity(11);
        for i in 0..8u32 {
            attributes.push(VertexAttribute {
                location: first_location + i,
                format: VertexFormat::Float32x4,
                offset: i as u64 * 16,
            });
        }
        attributes.push(VertexAttribute {
            location: first_location + 8,
            format: VertexFormat::Float32x4,
            offset: 128,
        });
        attributes.push(VertexAttribute {
            location: first_location + 9,
            format: VertexFormat::Uint32x2,
            offset: 144,
        });
        attributes.push(VertexAttribute {
            location: first_location + 10,
            format: VertexFormat::Uint32x2,
            offset: 152,
        });

        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: VertexStepMode::Instance,
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_is_gpu_sized() {
        assert_eq!(std::mem::size_of::<RenderInstance>(), 160);
        assert_eq!(RenderInstance::layout(4).array_stride, 160);
    }

    #[test]
    fn instance_stream_follows_the_vertex_stream() {
        let vertex = crate::backend::types::Vertex::layout();
        let instance = RenderInstance::layout(vertex.next_location());
        assert_eq!(instance.attributes[0].location, 4);
        assert_eq!(instance.next_location(), 15);
        assert_eq!(instance.step_mode, VertexStepMode::Instance);
    }

    #[test]
    fn sort_key_is_monotone_in_distance() {
        let distances = [0.0, 0.5, 1.0, 2.0, 100.0, 1.0e6];
        let keys: Vec<_> = distances
            .iter()
            .map(|d| sort_key_from_distance_sq(*d))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sort_key_from_distance_sq(-3.0), SORT_KEY_RENDER_FIRST);
        assert_eq!(sort_key_from_distance_sq(f32::NAN), SORT_KEY_RENDER_FIRST);
    }

    #[test]
    fn shadow_caster_flag() {
        let instance = RenderInstance::new(Mat4::IDENTITY);
        assert!(!instance.is_shadow_caster());
        let instance = instance.with_flags(InstanceFlags::SHADOW_CASTER);
        assert!(instance.is_shadow_caster());
    }

    #[test]
    fn position_from_world_translation() {
        let instance = RenderInstance::new(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(instance.position(), Vec3::new(1.0, 2.0, 3.0));
    }
}
